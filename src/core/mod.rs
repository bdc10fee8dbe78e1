//! Core domain models for workflow execution.
//!
//! Operations and their schemas, validated plans, the step dependency graph
//! and the per-step results that make up a workflow trace.

pub mod condition;
pub mod dag;
pub mod operation;
pub mod plan;
pub mod reference;
pub mod step;

pub use condition::Condition;
pub use dag::{DependencyKind, StepGraph};
pub use operation::{Operation, OperationKind, OperationRegistry, ParamType, Params};
pub use plan::{DependencyRef, StepDeclaration, TaskId, WorkflowPlan, WorkflowRequest, WorkflowStep};
pub use reference::Reference;
pub use step::{
    FailureKind, SkipReason, StepFailure, StepKey, StepResult, StepStatus, WorkflowTrace,
};
