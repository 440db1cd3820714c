use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use deskpilot_engine::cli::{
    self, ConfirmationMode, ConsoleObserver, FileErrorMode, FileOptions, OutputHandlers,
    ReplOptions,
};
use deskpilot_engine::common::TimeRange;
use deskpilot_engine::config::{ConfigLoader, DeskpilotConfig};
use deskpilot_engine::executor::DryRunExecutor;
use deskpilot_engine::logger::{JsonlActionLogger, MemoryActionLogger};
use deskpilot_engine::{Agent, Runtime, RuntimeBuilder, RuntimeHandle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deskpilot", version, about = "Drive the desktop with natural-language commands")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Config file (defaults: ./deskpilot.yaml, ~/.deskpilot/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Interpret and verify, but perform nothing and write no log
    #[arg(long, global = true)]
    dry_run: bool,

    /// Approve every confirmation without asking
    #[arg(long, global = true)]
    yes: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Interactive session
    Repl,
    /// Run one command per line from a file ('#' starts a comment)
    Run { file: String },
    /// Run a single command
    Exec {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Print logged actions as JSON lines
    Log {
        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Exclusive upper bound (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
}

fn print_out(msg: &str) {
    println!("{}", msg);
}

fn print_err(msg: &str) {
    eprintln!("{}", msg);
}

const OUTPUT: OutputHandlers = OutputHandlers {
    out: print_out,
    err: print_err,
};

fn build_runtime(config: DeskpilotConfig, dry_run: bool) -> anyhow::Result<RuntimeHandle> {
    let mut builder = RuntimeBuilder::new(config);
    if dry_run {
        builder = builder
            .executor(Arc::new(DryRunExecutor::new()))
            .logger(Arc::new(MemoryActionLogger::new()));
    }
    builder.build().context("Failed to initialise runtime")
}

fn non_interactive_observer(yes: bool) -> Arc<ConsoleObserver> {
    let mode = if yes {
        ConfirmationMode::ApproveAll
    } else {
        ConfirmationMode::DenyAll
    };
    Arc::new(ConsoleObserver::new(mode, OUTPUT))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // stdout carries command results and log exports
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = ConfigLoader::load(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    if let Mode::Log { since, until } = args.mode {
        let logger = JsonlActionLogger::open(&config.logging.path)
            .with_context(|| format!("Cannot open {}", config.logging.path.display()))?;
        let range = TimeRange {
            start: since,
            end: until,
        };
        let mut stdout = std::io::stdout().lock();
        let count = cli::export_log(&logger, range, &mut stdout)?;
        tracing::debug!(count, "log exported");
        return Ok(ExitCode::SUCCESS);
    }

    let runtime = build_runtime(config, args.dry_run)?;
    let mut code = ExitCode::SUCCESS;

    match args.mode {
        Mode::Repl => {
            let (observer, confirmations) = if args.yes {
                (non_interactive_observer(true), None)
            } else {
                let (observer, rx) = ConsoleObserver::prompting(OUTPUT);
                (Arc::new(observer), Some(rx))
            };
            let mut agent = Agent::new(runtime.clone()).with_observer(observer);
            let options = ReplOptions {
                banner_lines: &[
                    "Enter commands (e.g. 'open gedit then type \"hello\"').",
                    "Ctrl-C cancels the running command. Type 'exit' or 'quit' to close.",
                ],
                prompt: "> ",
                exit_commands: &["exit", "quit"],
                handle_ctrl_c: true,
                ctrl_c_message: Some("bye"),
            };
            cli::run_repl(&mut agent, OUTPUT, confirmations, options)
                .await
                .map_err(|e| anyhow!(e))
                .context("Error during session")?;
        }
        Mode::Run { file } => {
            let mut agent =
                Agent::new(runtime.clone()).with_observer(non_interactive_observer(args.yes));
            let options = FileOptions {
                stop_on_error: true,
                error_mode: FileErrorMode::WithLine,
            };
            if let Err(e) = cli::run_file(&mut agent, OUTPUT, &file, options).await {
                tracing::debug!(error = %e, file = %file, "script stopped");
                code = ExitCode::FAILURE;
            }
        }
        Mode::Exec { text } => {
            let mut agent =
                Agent::new(runtime.clone()).with_observer(non_interactive_observer(args.yes));
            let outcome = cli::run_command(&mut agent, OUTPUT, &text.join(" ")).await;
            if !outcome.is_success() {
                code = ExitCode::FAILURE;
            }
        }
        Mode::Log { .. } => {}
    }

    let report = Runtime::shutdown(runtime);
    if report.log_failures > 0 {
        eprintln!(
            "warning: {} action log entries could not be written",
            report.log_failures
        );
    }
    Ok(code)
}
