//! Workflow executor.
//!
//! Drives a validated [`WorkflowPlan`] to completion: dispatches ready steps
//! to the [`RagClient`] while respecting dependencies and the concurrency
//! limit, applies retry and abort policies, and records every step in a
//! [`WorkflowTrace`]. Step failures never escape the run; they end up in the
//! trace and in the [`WorkflowOutcome`].

use crate::client::{RagClient, RemoteError, RetryDecision, RetryPolicy};
use crate::core::operation::{json_type_name, OperationKind, OperationRegistry, Params};
use crate::core::plan::WorkflowPlan;
use crate::core::reference::{self, Reference};
use crate::core::step::{
    FailureKind, SkipReason, StepFailure, StepKey, StepResult, StepStatus, WorkflowTrace,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happens to in-flight siblings when a critical step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Let running calls finish and keep their results.
    #[default]
    Drain,
    /// Abort running calls and mark them Skipped.
    Cancel,
}

impl std::fmt::Display for AbortPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortPolicy::Drain => write!(f, "drain"),
            AbortPolicy::Cancel => write!(f, "cancel"),
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Completed,
    CompletedWithErrors,
    Aborted,
}

impl WorkflowOutcome {
    /// Process exit code reported by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkflowOutcome::Completed => 0,
            WorkflowOutcome::Aborted => 2,
            WorkflowOutcome::CompletedWithErrors => 3,
        }
    }
}

impl std::fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowOutcome::Completed => write!(f, "completed"),
            WorkflowOutcome::CompletedWithErrors => write!(f, "completed_with_errors"),
            WorkflowOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Progress notifications for observers of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    StepStarted {
        key: StepKey,
        operation: OperationKind,
    },
    /// Sent once per step, after it reached a terminal status.
    StepFinished(StepResult),
    RunFinished {
        outcome: WorkflowOutcome,
    },
}

/// Per-operation settings that replace the executor defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOverride {
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Upper bound on remote calls in flight at once.
    pub max_concurrent: usize,
    /// Timeout of a single call attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub overrides: HashMap<OperationKind, OperationOverride>,
    pub abort_policy: AbortPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            overrides: HashMap::new(),
            abort_policy: AbortPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout_for(&self, operation: OperationKind) -> Duration {
        self.overrides
            .get(&operation)
            .and_then(|o| o.timeout)
            .unwrap_or(self.timeout)
    }

    pub fn retry_for(&self, operation: OperationKind) -> RetryPolicy {
        match self.overrides.get(&operation).and_then(|o| o.max_attempts) {
            Some(max_attempts) => self.retry.clone().with_max_attempts(max_attempts),
            None => self.retry.clone(),
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub trace: Arc<WorkflowTrace>,
    pub outcome: WorkflowOutcome,
    /// The critical step whose failure or dependency skip aborted the run.
    pub aborted_by: Option<StepKey>,
    pub cancelled: bool,
}

/// Result of one spawned step: the call result and how many attempts it took.
type CallResult = (usize, std::result::Result<Value, RemoteError>, u32);

enum Wake {
    Cancelled,
    Joined(Option<std::result::Result<CallResult, JoinError>>),
}

pub struct WorkflowExecutor {
    client: Arc<dyn RagClient>,
    config: ExecutorConfig,
    event_tx: Option<mpsc::Sender<ExecutorEvent>>,
    cancel: CancellationToken,
}

impl WorkflowExecutor {
    pub fn new(client: Arc<dyn RagClient>, config: ExecutorConfig) -> Self {
        Self {
            client,
            config,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<ExecutorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this executor.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `plan` and return its trace and outcome.
    ///
    /// Errors are reserved for internal faults (a panicked step task); remote
    /// and parameter failures are recorded in the trace instead.
    pub async fn run(&self, plan: &WorkflowPlan) -> Result<RunReport> {
        let order = plan.execution_order();
        let mut trace = WorkflowTrace::new(
            order
                .iter()
                .filter_map(|&i| plan.step(i))
                .map(|step| StepResult::new(step.key.clone(), step.operation))
                .collect(),
        );
        let capacity = self.config.max_concurrent.max(1);
        info!(
            task_id = %plan.task_id().short(),
            steps = plan.len(),
            max_concurrent = capacity,
            "workflow run started"
        );

        let mut outputs: HashMap<usize, Value> = HashMap::new();
        let mut in_flight: JoinSet<CallResult> = JoinSet::new();
        let mut handles: HashMap<usize, AbortHandle> = HashMap::new();
        let mut aborted_by: Option<StepKey> = None;
        let mut cancelled = false;
        // Steps that failed, or were skipped through a chain starting at a failure.
        let mut failure_chain: HashSet<usize> = HashSet::new();

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                self.cancel_in_flight(&mut trace, &mut in_flight, &mut handles, SkipReason::Cancelled)?;
            }

            if aborted_by.is_none() && !cancelled {
                for &index in order {
                    if step_status(&trace, index)? != StepStatus::Pending {
                        continue;
                    }
                    let Some(step) = plan.step(index) else {
                        return Err(Error::UnknownStep(index));
                    };

                    let dependencies = plan.dependencies(index);
                    let mut ready = true;
                    let mut unsatisfied = None;
                    let mut failed_dependency = None;
                    for &dep in &dependencies {
                        match step_status(&trace, dep)? {
                            StepStatus::Succeeded => {}
                            StepStatus::Failed | StepStatus::Skipped => {
                                unsatisfied.get_or_insert(dep);
                                if failure_chain.contains(&dep) {
                                    failed_dependency.get_or_insert(dep);
                                }
                            }
                            StepStatus::Pending | StepStatus::Running => ready = false,
                        }
                    }
                    if !ready {
                        continue;
                    }

                    if let Some(dep) = failed_dependency.or(unsatisfied) {
                        let dependency = plan
                            .step(dep)
                            .map(|s| s.key.to_string())
                            .unwrap_or_else(|| dep.to_string());
                        debug!(step = %step.key, %dependency, "skipping step: dependency not satisfied");
                        self.finish(&mut trace, index, |r| {
                            r.skip(SkipReason::DependencyNotSatisfied { dependency })
                        })?;
                        // A skip chain that started at a false condition is not a failure.
                        if failed_dependency.is_none() {
                            continue;
                        }
                        failure_chain.insert(index);
                        if step.critical {
                            self.abort(plan, index, &mut aborted_by, &mut trace, &mut in_flight, &mut handles)?;
                            break;
                        }
                        continue;
                    }

                    let resolve = |r: &Reference| resolve_reference(plan, &outputs, r);
                    if let Some(condition) = &step.condition {
                        if !condition.evaluate(&resolve) {
                            debug!(step = %step.key, %condition, "skipping step: condition false");
                            let condition = condition.to_string();
                            self.finish(&mut trace, index, |r| {
                                r.skip(SkipReason::ConditionFalse { condition })
                            })?;
                            continue;
                        }
                    }

                    if in_flight.len() >= capacity {
                        continue;
                    }

                    entry(&mut trace, index)?.start()?;
                    self.emit(ExecutorEvent::StepStarted {
                        key: step.key.clone(),
                        operation: step.operation,
                    });

                    let params = match resolve_parameters(step.operation, &step.parameters, &resolve) {
                        Ok(params) => params,
                        Err(message) => {
                            warn!(step = %step.key, %message, "parameter resolution failed");
                            let failure = StepFailure::new(FailureKind::InvalidParameters, message);
                            self.finish(&mut trace, index, |r| r.fail(failure, 0))?;
                            failure_chain.insert(index);
                            if step.critical {
                                self.abort(plan, index, &mut aborted_by, &mut trace, &mut in_flight, &mut handles)?;
                                break;
                            }
                            continue;
                        }
                    };

                    entry(&mut trace, index)?.parameters = params.clone();
                    debug!(step = %step.key, operation = %step.operation, "dispatching step");
                    let handle = in_flight.spawn(call_with_retry(
                        self.client.clone(),
                        index,
                        step.key.clone(),
                        step.operation,
                        params,
                        self.config.timeout_for(step.operation),
                        self.config.retry_for(step.operation),
                    ));
                    handles.insert(index, handle);
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !cancelled => Wake::Cancelled,
                joined = in_flight.join_next() => Wake::Joined(joined),
            };

            match wake {
                Wake::Cancelled => {
                    // Handled at the top of the loop.
                    continue;
                }
                Wake::Joined(None) => break,
                Wake::Joined(Some(Err(err))) if err.is_cancelled() => continue,
                Wake::Joined(Some(Err(err))) => return Err(Error::TaskJoin(err.to_string())),
                Wake::Joined(Some(Ok((index, result, attempts)))) => {
                    if handles.remove(&index).is_none() {
                        // Finished just as it was cancelled; already recorded as Skipped.
                        continue;
                    }
                    let Some(step) = plan.step(index) else {
                        return Err(Error::UnknownStep(index));
                    };
                    match result {
                        Ok(output) => {
                            debug!(step = %step.key, attempts, "step succeeded");
                            outputs.insert(index, output.clone());
                            self.finish(&mut trace, index, |r| r.succeed(output, attempts))?;
                        }
                        Err(err) => {
                            warn!(step = %step.key, attempts, error = %err, "step failed");
                            let failure = StepFailure::from(err);
                            self.finish(&mut trace, index, |r| r.fail(failure, attempts))?;
                            failure_chain.insert(index);
                            if step.critical && aborted_by.is_none() {
                                self.abort(plan, index, &mut aborted_by, &mut trace, &mut in_flight, &mut handles)?;
                            }
                        }
                    }
                }
            }
        }

        let leftover = match (&aborted_by, cancelled) {
            (_, true) => Some(SkipReason::Cancelled),
            (Some(key), false) => Some(SkipReason::Aborted {
                critical_step: key.to_string(),
            }),
            (None, false) => None,
        };
        if let Some(reason) = leftover {
            for &index in order {
                if step_status(&trace, index)? == StepStatus::Pending {
                    let reason = reason.clone();
                    self.finish(&mut trace, index, |r| r.skip(reason))?;
                }
            }
        }

        let outcome = if cancelled || aborted_by.is_some() {
            WorkflowOutcome::Aborted
        } else if trace.count(StepStatus::Failed) > 0 {
            WorkflowOutcome::CompletedWithErrors
        } else {
            WorkflowOutcome::Completed
        };
        info!(
            task_id = %plan.task_id().short(),
            %outcome,
            succeeded = trace.count(StepStatus::Succeeded),
            failed = trace.count(StepStatus::Failed),
            skipped = trace.count(StepStatus::Skipped),
            "workflow run finished"
        );
        self.emit(ExecutorEvent::RunFinished { outcome });

        Ok(RunReport {
            trace: Arc::new(trace),
            outcome,
            aborted_by,
            cancelled,
        })
    }

    /// Record the abort caused by critical step `index`.
    ///
    /// Called when the step failed, or was skipped behind a chain of
    /// dependencies that starts at a failed step.
    fn abort(
        &self,
        plan: &WorkflowPlan,
        index: usize,
        aborted_by: &mut Option<StepKey>,
        trace: &mut WorkflowTrace,
        in_flight: &mut JoinSet<CallResult>,
        handles: &mut HashMap<usize, AbortHandle>,
    ) -> Result<()> {
        let key = plan
            .step(index)
            .map(|s| s.key.clone())
            .ok_or(Error::UnknownStep(index))?;
        warn!(
            step = %key,
            policy = %self.config.abort_policy,
            in_flight = handles.len(),
            "critical step did not succeed, aborting workflow"
        );
        if self.config.abort_policy == AbortPolicy::Cancel {
            let reason = SkipReason::Aborted {
                critical_step: key.to_string(),
            };
            self.cancel_in_flight(trace, in_flight, handles, reason)?;
        }
        *aborted_by = Some(key);
        Ok(())
    }

    /// Abort every running call and mark its step Skipped.
    fn cancel_in_flight(
        &self,
        trace: &mut WorkflowTrace,
        in_flight: &mut JoinSet<CallResult>,
        handles: &mut HashMap<usize, AbortHandle>,
        reason: SkipReason,
    ) -> Result<()> {
        let mut running: Vec<usize> = Vec::with_capacity(handles.len());
        for (index, handle) in handles.drain() {
            handle.abort();
            running.push(index);
        }
        running.sort_unstable();
        in_flight.abort_all();
        for index in running {
            if step_status(trace, index)? == StepStatus::Running {
                let reason = reason.clone();
                self.finish(trace, index, |r| r.skip(reason))?;
            }
        }
        Ok(())
    }

    /// Apply a terminal transition and publish the resulting snapshot.
    fn finish<F>(&self, trace: &mut WorkflowTrace, index: usize, transition: F) -> Result<()>
    where
        F: FnOnce(&mut StepResult) -> Result<()>,
    {
        let result = entry(trace, index)?;
        transition(&mut *result)?;
        let snapshot = result.clone();
        self.emit(ExecutorEvent::StepFinished(snapshot));
        Ok(())
    }

    /// Publish `event` without waiting on the observer.
    ///
    /// A full channel drops the event; a closed one means nobody is watching.
    fn emit(&self, event: ExecutorEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        if let Err(TrySendError::Full(event)) = tx.try_send(event) {
            debug!(?event, "event channel full, dropping event");
        }
    }
}

fn entry(trace: &mut WorkflowTrace, index: usize) -> Result<&mut StepResult> {
    trace.get_mut(index).ok_or(Error::UnknownStep(index))
}

fn step_status(trace: &WorkflowTrace, index: usize) -> Result<StepStatus> {
    trace
        .get(index)
        .map(|r| r.status)
        .ok_or(Error::UnknownStep(index))
}

/// Value of `reference` in the output of an already succeeded step.
fn resolve_reference(
    plan: &WorkflowPlan,
    outputs: &HashMap<usize, Value>,
    reference: &Reference,
) -> Option<Value> {
    let index = plan.resolve_label(&reference.step)?;
    outputs.get(&index).and_then(|output| reference.lookup(output)).cloned()
}

/// Substitute references and re-check the parameters against the schema.
fn resolve_parameters<F>(
    operation: OperationKind,
    parameters: &Params,
    resolve: &F,
) -> std::result::Result<Params, String>
where
    F: Fn(&Reference) -> Option<Value>,
{
    let mut substituted = Params::new();
    for (name, value) in parameters {
        let value = reference::substitute(value, resolve)
            .map_err(|reason| format!("parameter '{}': {}", name, reason))?;
        substituted.insert(name.clone(), value);
    }
    let registry = OperationRegistry::builtin();
    registry
        .validate_parameters(registry.get(operation), &substituted)
        .map_err(|problem| problem.to_string())
}

/// Call the backend until it succeeds or the retry policy gives up.
async fn call_with_retry(
    client: Arc<dyn RagClient>,
    index: usize,
    key: StepKey,
    operation: OperationKind,
    params: Params,
    timeout: Duration,
    policy: RetryPolicy,
) -> CallResult {
    let expected = OperationRegistry::builtin().get(operation).result;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = match tokio::time::timeout(timeout, client.call(operation, &params, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };
        let result = result.and_then(|value| {
            expected.coerce(value).map_err(|found| {
                RemoteError::InvalidResponse(format!(
                    "expected {} result, got {}",
                    expected,
                    json_type_name(&found)
                ))
            })
        });

        match result {
            Ok(value) => return (index, Ok(value), attempts),
            Err(err) => match policy.decide(&err, attempts) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(step = %key, attempt = attempts, error = %err, ?delay, "retrying step");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Fail => return (index, Err(err), attempts),
            },
        }
    }
}
