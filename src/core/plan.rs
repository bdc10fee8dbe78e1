//! Workflow plan parsing and validation.
//!
//! Callers declare steps as JSON. [`WorkflowPlan::build`] checks every step
//! against the [`OperationRegistry`], resolves dependencies into a
//! [`StepGraph`] and rejects the whole plan on the first structural problem,
//! before any remote call is made.

use crate::core::condition::Condition;
use crate::core::dag::{DependencyKind, StepGraph};
use crate::core::operation::{OperationKind, OperationRegistry, Params};
use crate::core::reference::{self, Reference};
use crate::core::step::StepKey;
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of a workflow task, echoed in the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target of a `dependsOn` entry: a declaration index or an explicit id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRef {
    Index(usize),
    Id(String),
}

impl std::fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyRef::Index(i) => write!(f, "{}", i),
            DependencyRef::Id(id) => write!(f, "{}", id),
        }
    }
}

/// One step as written by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub operation: String,
    #[serde(default, alias = "params")]
    pub parameters: Params,
    #[serde(
        default,
        rename = "dependsOn",
        alias = "depends_on",
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on: Option<Vec<DependencyRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub critical: bool,
}

impl StepDeclaration {
    pub fn new(operation: &str) -> Self {
        Self {
            id: None,
            operation: operation.to_string(),
            parameters: Params::new(),
            depends_on: None,
            condition: None,
            critical: false,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn depends_on(mut self, deps: Vec<DependencyRef>) -> Self {
        self.depends_on = Some(deps);
        self
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// A workflow request: the steps plus optional task-level context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(alias = "operations")]
    pub steps: Vec<StepDeclaration>,
    #[serde(default)]
    pub metadata: Params,
}

impl WorkflowRequest {
    pub fn new(steps: Vec<StepDeclaration>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    /// Parse plan JSON: either a bare array of steps or a request object.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.is_array() {
            Ok(Self::new(serde_json::from_value(value)?))
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }
}

/// A validated step.
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub key: StepKey,
    pub operation: OperationKind,
    /// Normalized parameters; may still hold `${...}` references.
    pub parameters: Params,
    pub condition: Option<Condition>,
    pub critical: bool,
}

/// A validated plan: steps, their dependency graph and execution order.
#[derive(Debug)]
pub struct WorkflowPlan {
    task_id: TaskId,
    query: Option<String>,
    metadata: Params,
    steps: Vec<WorkflowStep>,
    graph: StepGraph,
    order: Vec<usize>,
    labels: HashMap<String, usize>,
}

impl WorkflowPlan {
    /// Parse and validate plan JSON in one go.
    pub fn parse(text: &str, registry: &OperationRegistry) -> Result<Self> {
        let request = WorkflowRequest::from_json(text)?;
        Ok(Self::build(request, registry)?)
    }

    pub fn build(
        request: WorkflowRequest,
        registry: &OperationRegistry,
    ) -> std::result::Result<Self, PlanError> {
        if request.steps.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let labels = collect_labels(&request.steps)?;
        let keys: Vec<StepKey> = request
            .steps
            .iter()
            .enumerate()
            .map(|(i, decl)| StepKey::new(i, decl.id.clone()))
            .collect();

        let mut steps = Vec::with_capacity(request.steps.len());
        for (decl, key) in request.steps.iter().zip(&keys) {
            steps.push(validate_step(decl, key, request.query.as_deref(), registry)?);
        }

        let mut graph = StepGraph::new(keys.clone());
        let mut forward: Option<PlanError> = None;
        let mut note_forward = |err: PlanError| {
            forward.get_or_insert(err);
        };

        for (i, (decl, step)) in request.steps.iter().zip(&steps).enumerate() {
            let label = keys[i].to_string();

            match &decl.depends_on {
                Some(deps) => {
                    for dep in deps {
                        let target = resolve_dependency(dep, &labels, request.steps.len())
                            .ok_or_else(|| PlanError::UnknownDependency {
                                step: label.clone(),
                                target: dep.to_string(),
                            })?;
                        if target > i {
                            note_forward(PlanError::ForwardReference {
                                step: label.clone(),
                                target: dep.to_string(),
                            });
                        }
                        graph.add_dependency(target, i, DependencyKind::Declared);
                    }
                }
                None if i > 0 => graph.add_dependency(i - 1, i, DependencyKind::Sequential),
                None => {}
            }

            for reference in step_references(step, &label)? {
                let target = resolve_label(&reference.step, &labels, request.steps.len())
                    .ok_or_else(|| PlanError::InvalidReference {
                        step: label.clone(),
                        reference: reference.to_string(),
                        reason: format!("unknown step '{}'", reference.step),
                    })?;
                if target > i {
                    note_forward(PlanError::ForwardReference {
                        step: label.clone(),
                        target: reference.step.clone(),
                    });
                }
                graph.add_dependency(target, i, DependencyKind::Data);
            }
        }

        graph.check_acyclic()?;
        if let Some(err) = forward {
            return Err(err);
        }

        let order = graph.execution_order();
        Ok(Self {
            task_id: request.task_id.map(TaskId).unwrap_or_default(),
            query: request.query,
            metadata: request.metadata,
            steps,
            graph,
            order,
            labels,
        })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn metadata(&self) -> &Params {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Declaration indices in the order steps are scheduled.
    pub fn execution_order(&self) -> &[usize] {
        &self.order
    }

    /// Steps that `index` waits for.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.graph.dependencies(index)
    }

    /// Map a step id or index string to its declaration index.
    pub fn resolve_label(&self, label: &str) -> Option<usize> {
        resolve_label(label, &self.labels, self.steps.len())
    }
}

fn collect_labels(steps: &[StepDeclaration]) -> std::result::Result<HashMap<String, usize>, PlanError> {
    let mut labels = HashMap::new();
    for (i, decl) in steps.iter().enumerate() {
        let Some(id) = &decl.id else { continue };
        if id.parse::<usize>().is_ok() {
            return Err(PlanError::NumericStepId(id.clone()));
        }
        let valid = Reference::parse(id).map(|r| r.path.is_empty()).unwrap_or(false);
        if !valid {
            return Err(PlanError::InvalidReference {
                step: format!("#{}", i),
                reference: id.clone(),
                reason: "step ids may only contain letters, digits, '_' and '-'".to_string(),
            });
        }
        if labels.insert(id.clone(), i).is_some() {
            return Err(PlanError::DuplicateStepId(id.clone()));
        }
    }
    Ok(labels)
}

fn resolve_label(label: &str, labels: &HashMap<String, usize>, len: usize) -> Option<usize> {
    if let Some(&i) = labels.get(label) {
        return Some(i);
    }
    label.parse::<usize>().ok().filter(|&i| i < len)
}

fn resolve_dependency(dep: &DependencyRef, labels: &HashMap<String, usize>, len: usize) -> Option<usize> {
    match dep {
        DependencyRef::Index(i) => (*i < len).then_some(*i),
        DependencyRef::Id(id) => resolve_label(id, labels, len),
    }
}

fn validate_step(
    decl: &StepDeclaration,
    key: &StepKey,
    task_query: Option<&str>,
    registry: &OperationRegistry,
) -> std::result::Result<WorkflowStep, PlanError> {
    let operation = registry
        .resolve(&decl.operation)
        .ok_or_else(|| PlanError::UnknownOperation {
            step: key.to_string(),
            name: decl.operation.clone(),
        })?;

    let mut supplied = decl.parameters.clone();
    if let Some(query) = task_query {
        if operation.takes_query() && supplied.get("query").map_or(true, Value::is_null) {
            supplied.insert("query".to_string(), Value::String(query.to_string()));
        }
    }

    let parameters = registry
        .validate_parameters(operation, &supplied)
        .map_err(|problem| PlanError::InvalidParameters {
            step: key.to_string(),
            operation: operation.name().to_string(),
            problem,
        })?;

    let condition = decl
        .condition
        .as_deref()
        .map(Condition::parse)
        .transpose()
        .map_err(|reason| PlanError::InvalidCondition {
            step: key.to_string(),
            reason,
        })?;

    Ok(WorkflowStep {
        key: key.clone(),
        operation: operation.kind,
        parameters,
        condition,
        critical: decl.critical,
    })
}

/// References read by a step's parameters and condition.
fn step_references(step: &WorkflowStep, label: &str) -> std::result::Result<Vec<Reference>, PlanError> {
    let mut refs = Vec::new();
    for value in step.parameters.values() {
        for expr in reference::collect(value) {
            let parsed = Reference::parse(&expr).map_err(|reason| PlanError::InvalidReference {
                step: label.to_string(),
                reference: expr.clone(),
                reason,
            })?;
            refs.push(parsed);
        }
    }
    if let Some(condition) = &step.condition {
        refs.extend(condition.references().into_iter().cloned());
    }
    Ok(refs)
}
