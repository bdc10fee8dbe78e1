//! Step results and the workflow trace.
//!
//! A [`StepResult`] tracks one step through its lifecycle. Status only moves
//! forward: Pending → Running → {Succeeded, Failed, Skipped}, or directly
//! Pending → Skipped. The [`WorkflowTrace`] holds one result per step in
//! execution order.

use crate::core::operation::{OperationKind, Params};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Identity of a step: its declaration index plus an optional explicit id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StepKey {
    pub fn new(index: usize, id: Option<String>) -> Self {
        Self { index, id }
    }

    /// The explicit id if there is one, otherwise the index.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self.index.to_string(),
        }
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "#{}", self.index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a step was skipped instead of run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// A dependency failed or was skipped.
    DependencyNotSatisfied { dependency: String },
    /// The step's condition evaluated to false.
    ConditionFalse { condition: String },
    /// A critical step did not succeed before this one started.
    Aborted { critical_step: String },
    /// The run was cancelled.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DependencyNotSatisfied { dependency } => {
                write!(f, "dependency {} did not succeed", dependency)
            }
            SkipReason::ConditionFalse { condition } => {
                write!(f, "condition not met: {}", condition)
            }
            SkipReason::Aborted { critical_step } => {
                write!(f, "aborted: critical step {} did not succeed", critical_step)
            }
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unreachable,
    BadRequest,
    ServerError,
    InvalidResponse,
    InvalidParameters,
}

/// Terminal error detail recorded on a Failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Execution record of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub key: StepKey,
    pub operation: OperationKind,
    pub status: StepStatus,
    /// Parameters sent to the backend, after reference substitution.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub parameters: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Remote calls made, including retries.
    #[serde(default)]
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn new(key: StepKey, operation: OperationKind) -> Self {
        Self {
            key,
            operation,
            status: StepStatus::Pending,
            parameters: Params::new(),
            output: None,
            error: None,
            skip_reason: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: StepStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Running, StepStatus::Succeeded)
                | (StepStatus::Running, StepStatus::Failed)
                | (StepStatus::Running, StepStatus::Skipped)
        );
        if !allowed {
            return Err(Error::InvalidTransition {
                step: self.key.to_string(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending → Running; records the start time.
    pub fn start(&mut self) -> Result<()> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Succeeded with the call's output.
    pub fn succeed(&mut self, output: Value, attempts: u32) -> Result<()> {
        self.transition(StepStatus::Succeeded)?;
        self.output = Some(output);
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Failed with the final error.
    pub fn fail(&mut self, failure: StepFailure, attempts: u32) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(failure);
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Pending → Skipped, or Running → Skipped when an in-flight call is
    /// cancelled.
    pub fn skip(&mut self, reason: SkipReason) -> Result<()> {
        self.transition(StepStatus::Skipped)?;
        self.skip_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Ordered record of a run: one [`StepResult`] per step, in execution order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WorkflowTrace {
    steps: Vec<StepResult>,
    /// Declaration index → position in `steps`.
    #[serde(skip)]
    positions: HashMap<usize, usize>,
}

impl WorkflowTrace {
    pub fn new(steps: Vec<StepResult>) -> Self {
        let positions = steps
            .iter()
            .enumerate()
            .map(|(pos, step)| (step.key.index, pos))
            .collect();
        Self { steps, positions }
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Look up a step by declaration index.
    pub fn get(&self, index: usize) -> Option<&StepResult> {
        self.positions.get(&index).and_then(|&pos| self.steps.get(pos))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut StepResult> {
        match self.positions.get(&index) {
            Some(&pos) => self.steps.get_mut(pos),
            None => None,
        }
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn all_finished(&self) -> bool {
        self.steps.iter().all(StepResult::is_finished)
    }
}
