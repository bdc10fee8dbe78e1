//! Orchestration layer: runs validated plans against the RAG pipeline and
//! turns the resulting trace into an answer.

mod executor;
mod synthesizer;

pub use executor::{
    AbortPolicy, ExecutorConfig, ExecutorEvent, OperationOverride, RunReport, WorkflowExecutor,
    WorkflowOutcome,
};
pub use synthesizer::{synthesize, Answer, StepView, EMPTY_ANSWER, NO_SUCCESS_NOTE};
