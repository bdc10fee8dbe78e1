pub mod agent;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod text;

pub use agent::{AgentKind, AgentResult, AgentTask, QueryAgent, WorkflowAgent};
pub use error::{Error, PlanError, Result};
pub use orchestration::{Answer, WorkflowExecutor, WorkflowOutcome};
