use crate::agent::{Agent, AgentObserver, StepStatus};
use crate::gate::{ConfirmationResponder, PendingConfirmation};
use crate::logger::{ActionLogger, LoggingError};
use deskpilot_common::formatter::format_outcome;
use deskpilot_common::{Action, CommandOutcome, OutcomeStatus, ResultStatus, TimeRange};
use std::error::Error;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

pub enum FileErrorMode {
    Plain,
    WithLine,
}

pub struct FileOptions {
    pub stop_on_error: bool,
    pub error_mode: FileErrorMode,
}

pub struct ReplOptions<'a> {
    pub banner_lines: &'a [&'a str],
    pub prompt: &'a str,
    pub exit_commands: &'a [&'a str],
    pub handle_ctrl_c: bool,
    pub ctrl_c_message: Option<&'a str>,
}

/// A confirmation the console has to answer.
pub struct ConfirmationRequest {
    pub step: usize,
    pub action: Action,
    pub responder: ConfirmationResponder,
}

pub enum ConfirmationMode {
    /// Forward requests to the REPL, which prompts inline.
    Prompt(mpsc::UnboundedSender<ConfirmationRequest>),
    ApproveAll,
    DenyAll,
}

/// Observer for terminal sessions: progress on stderr, confirmations per
/// [`ConfirmationMode`].
pub struct ConsoleObserver {
    mode: ConfirmationMode,
    output: OutputHandlers,
}

impl ConsoleObserver {
    pub fn new(mode: ConfirmationMode, output: OutputHandlers) -> Self {
        Self { mode, output }
    }

    /// Observer wired to a prompt channel, plus the receiving end for
    /// [`run_repl`].
    pub fn prompting(output: OutputHandlers) -> (Self, mpsc::UnboundedReceiver<ConfirmationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(ConfirmationMode::Prompt(tx), output), rx)
    }
}

impl AgentObserver for ConsoleObserver {
    fn on_progress(&self, step: usize, action: &Action, status: StepStatus) {
        match status {
            StepStatus::Dispatching => (self.output.err)(&format!("[{}] {}", step + 1, action)),
            StepStatus::Finished(ResultStatus::TimedOut) => {
                (self.output.err)(&format!("[{}] timed out", step + 1))
            }
            _ => {}
        }
    }

    fn request_confirmation(&self, step: usize, action: &Action) -> PendingConfirmation {
        match &self.mode {
            ConfirmationMode::ApproveAll => PendingConfirmation::resolved(true),
            ConfirmationMode::DenyAll => {
                (self.output.err)(&format!(
                    "[{}] {} needs confirmation; denied (pass --yes to approve)",
                    step + 1,
                    action
                ));
                PendingConfirmation::denied()
            }
            ConfirmationMode::Prompt(tx) => {
                let (responder, pending) = PendingConfirmation::channel();
                // A closed channel drops the responder, which denies.
                let _ = tx.send(ConfirmationRequest {
                    step,
                    action: action.clone(),
                    responder,
                });
                pending
            }
        }
    }
}

fn describe(outcome: &CommandOutcome) -> Result<String, String> {
    let text = format_outcome(outcome);
    match outcome.status {
        OutcomeStatus::Aborted => Err(text),
        OutcomeStatus::Succeeded | OutcomeStatus::Failed => Ok(text),
    }
}

pub async fn run_command(agent: &mut Agent, output: OutputHandlers, text: &str) -> CommandOutcome {
    let outcome = agent.handle_command(text).await;
    match describe(&outcome) {
        Ok(result) => (output.out)(&result),
        Err(err) => (output.err)(&err),
    }
    outcome
}

pub async fn run_file(
    agent: &mut Agent,
    output: OutputHandlers,
    path: &str,
    options: FileOptions,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let content = tokio::fs::read_to_string(path).await?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let outcome = agent.handle_command(trimmed).await;
        match describe(&outcome) {
            Ok(result) => (output.out)(&result),
            Err(err) => {
                match options.error_mode {
                    FileErrorMode::Plain => (output.err)(&err),
                    FileErrorMode::WithLine => {
                        (output.err)(&format!("Error executing line '{}':\n{}", trimmed, err))
                    }
                }
                if options.stop_on_error {
                    return Err(io::Error::other(err).into());
                }
            }
        }
    }
    Ok(())
}

/// Possible outcomes from reading a single REPL line.
enum ReadLineResult {
    /// A non-empty input line to process.
    Input(String),
    /// Empty line or no input yet -- skip and re-prompt.
    Skip,
    /// EOF or exit command -- terminate the loop.
    Exit,
    /// I/O error while reading.
    Error(io::Error),
}

type StdinLines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

async fn read_line(
    reader: &mut StdinLines,
    exit_commands: &[&str],
    handle_ctrl_c: bool,
    ctrl_c_message: Option<&str>,
    output: OutputHandlers,
) -> ReadLineResult {
    if handle_ctrl_c {
        tokio::select! {
            line = reader.next_line() => {
                classify_line(line, exit_commands)
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(message) = ctrl_c_message {
                    (output.out)(message);
                }
                ReadLineResult::Exit
            }
        }
    } else {
        classify_line(reader.next_line().await, exit_commands)
    }
}

fn classify_line(
    result: Result<Option<String>, io::Error>,
    exit_commands: &[&str],
) -> ReadLineResult {
    match result {
        Ok(Some(input)) => {
            let trimmed = input.trim().to_string();
            if trimmed.is_empty() {
                ReadLineResult::Skip
            } else if exit_commands.contains(&trimmed.as_str()) {
                ReadLineResult::Exit
            } else {
                ReadLineResult::Input(trimmed)
            }
        }
        Ok(None) => ReadLineResult::Exit,
        Err(e) => ReadLineResult::Error(e),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

async fn next_request(
    rx: &mut Option<mpsc::UnboundedReceiver<ConfirmationRequest>>,
) -> Option<ConfirmationRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Runs one command, answering its confirmation requests from stdin.
/// Ctrl-C cancels the command at the next action boundary.
async fn run_interactive(
    agent: &mut Agent,
    reader: &mut StdinLines,
    confirmations: &mut Option<mpsc::UnboundedReceiver<ConfirmationRequest>>,
    handle_ctrl_c: bool,
    line: &str,
) -> Result<CommandOutcome, io::Error> {
    let cancel = agent.cancel_handle();
    let command = agent.handle_command(line);
    tokio::pin!(command);

    loop {
        tokio::select! {
            outcome = &mut command => return Ok(outcome),
            Some(request) = next_request(confirmations) => {
                print!("Allow step {}: {}? [y/N] ", request.step + 1, request.action);
                io::stdout().flush()?;
                tokio::select! {
                    answer = reader.next_line() => {
                        let approved = matches!(answer, Ok(Some(ref a)) if is_yes(a));
                        request.responder.respond(approved);
                    }
                    outcome = &mut command => {
                        println!();
                        return Ok(outcome);
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if handle_ctrl_c => {
                cancel.cancel();
            }
        }
    }
}

pub async fn run_repl(
    agent: &mut Agent,
    output: OutputHandlers,
    mut confirmations: Option<mpsc::UnboundedReceiver<ConfirmationRequest>>,
    options: ReplOptions<'_>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    for line in options.banner_lines {
        (output.out)(line);
    }

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = io::stdout();

    loop {
        print!("{}", options.prompt);
        stdout.flush()?;

        match read_line(
            &mut reader,
            options.exit_commands,
            options.handle_ctrl_c,
            options.ctrl_c_message,
            output,
        )
        .await
        {
            ReadLineResult::Input(line) => {
                let outcome = run_interactive(
                    agent,
                    &mut reader,
                    &mut confirmations,
                    options.handle_ctrl_c,
                    &line,
                )
                .await?;
                match describe(&outcome) {
                    Ok(result) => (output.out)(&result),
                    Err(err) => (output.err)(&err),
                }
            }
            ReadLineResult::Skip => continue,
            ReadLineResult::Exit => break,
            ReadLineResult::Error(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Streams log entries in `range` as JSON lines. Returns how many were written.
pub fn export_log(
    logger: &dyn ActionLogger,
    range: TimeRange,
    out: &mut impl Write,
) -> Result<usize, LoggingError> {
    let mut count = 0;
    for entry in logger.query(range)? {
        serde_json::to_writer(&mut *out, &entry?)?;
        writeln!(out)?;
        count += 1;
    }
    Ok(count)
}
