pub mod loader;
pub mod schema;

pub use loader::{ConfigError, ConfigLoader};
pub use schema::{
    AgentConfig, DeskpilotConfig, InputConfig, InputDeviceKind, InterpreterBackendKind,
    InterpreterConfig, LoggingConfig, VerificationConfig,
};
