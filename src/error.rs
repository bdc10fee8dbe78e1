use thiserror::Error;

use crate::client::RemoteError;
use crate::core::operation::ParamType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("RAG backend unreachable at {url}: {reason}")]
    BackendUnreachable { url: String, reason: String },

    #[error("Invalid status transition for step {step} from {from} to {to}")]
    InvalidTransition {
        step: String,
        from: String,
        to: String,
    },

    #[error("RAG request failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Step {0} is not part of the trace")]
    UnknownStep(usize),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Structural problems found while validating a plan.
///
/// Any of these rejects the whole plan before a single remote call is made.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("plan declares no steps")]
    EmptyPlan,

    #[error("step {step}: unknown operation '{name}'")]
    UnknownOperation { step: String, name: String },

    #[error("step {step}: invalid parameters for {operation}: {problem}")]
    InvalidParameters {
        step: String,
        operation: String,
        problem: ParamProblem,
    },

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("step id '{0}' must not be a bare integer")]
    NumericStepId(String),

    #[error("step {step}: unknown dependency '{target}'")]
    UnknownDependency { step: String, target: String },

    #[error("step {step}: forward reference to later step '{target}'")]
    ForwardReference { step: String, target: String },

    #[error("cyclic dependency involving step {0}")]
    CyclicDependency(String),

    #[error("step {step}: invalid reference '{reference}': {reason}")]
    InvalidReference {
        step: String,
        reference: String,
        reason: String,
    },

    #[error("step {step}: invalid condition: {reason}")]
    InvalidCondition { step: String, reason: String },
}

/// Why a parameter map failed validation against an operation schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamProblem {
    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("unexpected parameter '{0}'")]
    Extra(String),

    #[error("parameter '{name}' expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
