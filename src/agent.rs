//! Agents: the two entry points that turn a request into an [`AgentResult`].

use crate::client::RagClient;
use crate::core::operation::Params;
use crate::core::plan::WorkflowPlan;
use crate::orchestration::{
    synthesize, Answer, ExecutorConfig, ExecutorEvent, StepView, WorkflowExecutor, WorkflowOutcome,
};
use crate::text::synthesize_answer;
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

pub const SOURCE_NAME: &str = "CoE-RagPipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AgentKind {
    /// Single question answered from retrieved snippets.
    #[default]
    Query,
    /// Multi-step plan executed against the pipeline.
    Workflow,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Query => write!(f, "query"),
            AgentKind::Workflow => write!(f, "workflow"),
        }
    }
}

/// A single question for the query agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTask {
    pub task_id: String,
    pub query: String,
    pub metadata: Params,
}

impl AgentTask {
    pub fn new(query: &str) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            metadata: Params::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Params) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What an agent run reports back; serialized as the CLI output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    pub task_id: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<WorkflowOutcome>,
    pub context_snippets: Vec<String>,
    pub metadata: Params,
}

impl AgentResult {
    /// Result view of a workflow answer.
    pub fn from_answer(plan: &WorkflowPlan, answer: &Answer) -> Self {
        let mut metadata = Params::new();
        metadata.insert("workflow_operation_count".to_string(), json!(plan.len()));
        merge(&mut metadata, plan.metadata());
        Self {
            task_id: plan.task_id().to_string(),
            answer: answer.text.clone(),
            steps: Some(answer.steps()),
            outcome: Some(answer.outcome),
            context_snippets: answer.context_snippets.clone(),
            metadata,
        }
    }

    /// Process exit code: the workflow outcome's, or success for a plain query.
    pub fn exit_code(&self) -> i32 {
        self.outcome.map(|o| o.exit_code()).unwrap_or(0)
    }
}

fn merge(into: &mut Params, from: &Params) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

/// Answers one question from the pipeline's `/query` endpoint.
pub struct QueryAgent {
    client: Arc<dyn RagClient>,
    timeout: Duration,
}

impl QueryAgent {
    pub fn new(client: Arc<dyn RagClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn run(&self, task: &AgentTask, top_k: usize) -> Result<AgentResult> {
        info!(task_id = %task.task_id, top_k, "query agent started");
        let snippets = self
            .client
            .fetch_context(&task.query, top_k, self.timeout)
            .await?;
        let answer = synthesize_answer(&task.query, &snippets);

        let mut metadata = Params::new();
        metadata.insert("source".to_string(), Value::from(SOURCE_NAME));
        metadata.insert("snippet_count".to_string(), json!(snippets.len()));
        merge(&mut metadata, &task.metadata);

        info!(task_id = %task.task_id, snippet_count = snippets.len(), "query agent finished");
        Ok(AgentResult {
            task_id: task.task_id.clone(),
            answer,
            steps: None,
            outcome: None,
            context_snippets: snippets,
            metadata,
        })
    }
}

/// Executes a validated plan and synthesizes the answer.
pub struct WorkflowAgent {
    executor: WorkflowExecutor,
}

impl WorkflowAgent {
    pub fn new(client: Arc<dyn RagClient>, config: ExecutorConfig) -> Self {
        Self {
            executor: WorkflowExecutor::new(client, config),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(token);
        self
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<ExecutorEvent>) -> Self {
        self.executor = self.executor.with_events(event_tx);
        self
    }

    /// Run the plan and return the full answer with its trace.
    pub async fn execute(&self, plan: &WorkflowPlan) -> Result<Answer> {
        info!(
            task_id = %plan.task_id(),
            operations = plan.len(),
            "workflow agent started"
        );
        let report = self.executor.run(plan).await?;
        let answer = synthesize(report.trace, report.outcome, plan.query());
        info!(task_id = %plan.task_id(), outcome = %answer.outcome, "workflow agent finished");
        Ok(answer)
    }

    pub async fn run(&self, plan: &WorkflowPlan) -> Result<AgentResult> {
        let answer = self.execute(plan).await?;
        Ok(AgentResult::from_answer(plan, &answer))
    }
}
