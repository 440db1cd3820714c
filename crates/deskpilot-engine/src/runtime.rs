//! Process-wide components shared by every agent.
//!
//! [`Runtime::init`] builds them once from configuration; the returned handle
//! is cheap to clone and immutable. [`Runtime::shutdown`] flushes the action
//! log and reports how many entries could not be written.

use crate::config::{
    AgentConfig, DeskpilotConfig, InputDeviceKind, InterpreterBackendKind, InterpreterConfig,
};
use crate::executor::{
    AppExecutor, Executor, FileExecutor, InputExecutor, RecordingDevice, SharedInputDevice,
    SystemAppController, XdotoolDevice, shared_device,
};
use crate::gate::VerificationGate;
use crate::interpreter::http::EndpointError;
use crate::interpreter::{CommandInterpreter, HttpBackend, InferenceBackend, RuleBackend};
use crate::logger::{ActionLogger, BestEffortLogger, JsonlActionLogger, LoggingError, Redactor};
use crate::registry::{ExecutorRegistry, RegistryError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Cannot open action log: {0}")]
    Logging(#[from] LoggingError),

    #[error("Invalid interpreter rule: {0}")]
    Rules(#[from] regex::Error),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("interpreter.backend is http but interpreter.endpoint is not set")]
    MissingEndpoint,
}

pub type RuntimeHandle = Arc<Runtime>;

pub struct Runtime {
    registry: ExecutorRegistry,
    gate: VerificationGate,
    interpreter: CommandInterpreter,
    logger: BestEffortLogger,
    agent: AgentConfig,
    interpreter_config: InterpreterConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub log_failures: u64,
    pub flush_error: Option<String>,
}

impl Runtime {
    pub fn init(config: &DeskpilotConfig) -> Result<RuntimeHandle, InitError> {
        RuntimeBuilder::new(config.clone()).build()
    }

    /// Flushes the log. Agents still holding a clone of the handle keep
    /// working; only this handle is consumed.
    pub fn shutdown(handle: RuntimeHandle) -> ShutdownReport {
        let flush_error = handle.logger.flush().err().map(|e| e.to_string());
        let report = ShutdownReport {
            log_failures: handle.logger.failure_count(),
            flush_error,
        };
        if report.log_failures > 0 || report.flush_error.is_some() {
            tracing::warn!(
                failures = report.log_failures,
                flush_error = report.flush_error.as_deref(),
                "action log was degraded during this session"
            );
        } else {
            tracing::debug!("runtime shut down");
        }
        report
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &VerificationGate {
        &self.gate
    }

    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    pub fn logger(&self) -> &BestEffortLogger {
        &self.logger
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.agent
    }

    pub fn interpreter_config(&self) -> &InterpreterConfig {
        &self.interpreter_config
    }
}

/// Builds a [`Runtime`], with optional replacements for the components
/// configuration would otherwise create.
pub struct RuntimeBuilder {
    config: DeskpilotConfig,
    executors: Vec<Arc<dyn Executor>>,
    backend: Option<Arc<dyn InferenceBackend>>,
    logger: Option<Arc<dyn ActionLogger>>,
    input_device: Option<SharedInputDevice>,
}

impl RuntimeBuilder {
    pub fn new(config: DeskpilotConfig) -> Self {
        Self {
            config,
            executors: Vec::new(),
            backend: None,
            logger: None,
            input_device: None,
        }
    }

    /// Registers an executor ahead of the built-in ones. Built-in executors
    /// are only added when none of their kinds is already claimed.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn ActionLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Input channel to share with runtimes built elsewhere.
    pub fn input_device(mut self, device: SharedInputDevice) -> Self {
        self.input_device = Some(device);
        self
    }

    pub fn build(self) -> Result<RuntimeHandle, InitError> {
        let config = self.config;
        let classifier = config.verification.classifier();

        let mut registry = ExecutorRegistry::builder();
        for executor in self.executors {
            registry = registry.register(executor)?;
        }

        let input_device = self.input_device.unwrap_or_else(|| match config.input.device {
            InputDeviceKind::Xdotool => shared_device(XdotoolDevice),
            InputDeviceKind::Recording => shared_device(RecordingDevice::new()),
        });
        let builtins: [Arc<dyn Executor>; 3] = [
            Arc::new(InputExecutor::with_shared(input_device)),
            Arc::new(AppExecutor::new(SystemAppController)),
            Arc::new(FileExecutor::new()),
        ];
        for executor in builtins {
            if executor
                .supported_kinds()
                .iter()
                .all(|k| !registry.is_claimed(*k))
            {
                registry = registry.register(executor)?;
            }
        }
        let registry = registry.build()?;

        let backend: Arc<dyn InferenceBackend> = match self.backend {
            Some(backend) => backend,
            None => match config.interpreter.backend {
                InterpreterBackendKind::Rules => Arc::new(RuleBackend::new()?),
                InterpreterBackendKind::Http => {
                    let endpoint = config
                        .interpreter
                        .endpoint
                        .as_deref()
                        .ok_or(InitError::MissingEndpoint)?;
                    Arc::new(HttpBackend::new(endpoint)?)
                }
            },
        };

        let logger: Arc<dyn ActionLogger> = match self.logger {
            Some(logger) => logger,
            None => Arc::new(JsonlActionLogger::open(&config.logging.path)?),
        };

        let interpreter =
            CommandInterpreter::new(backend, classifier, config.interpreter.timeout());
        tracing::info!(
            executors = ?registry.list(),
            backend = interpreter.backend_name(),
            "runtime initialised"
        );

        Ok(Arc::new(Runtime {
            registry,
            gate: VerificationGate::new(&config.verification),
            interpreter,
            logger: BestEffortLogger::new(logger, Redactor::new(&config.logging)),
            agent: config.agent,
            interpreter_config: config.interpreter,
        }))
    }
}
