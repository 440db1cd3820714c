pub mod agent;
pub mod cli;
pub mod config;
pub mod executor;
pub mod gate;
pub mod interpreter;
pub mod logger;
pub mod registry;
pub mod runtime;

pub use agent::{Agent, AgentObserver, AgentState, CancelHandle, NoopObserver, StepStatus};
pub use gate::{Confirmation, ConfirmationResponder, PendingConfirmation, Verdict, VerificationGate};
pub use registry::ExecutorRegistry;
pub use runtime::{InitError, Runtime, RuntimeBuilder, RuntimeHandle, ShutdownReport};

pub use deskpilot_common as common;
