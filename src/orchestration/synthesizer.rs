//! Answer synthesis from a finished workflow trace.
//!
//! [`synthesize`] is pure: the same trace, outcome and query always give the
//! same [`Answer`]. It never fails; a run without a single successful step
//! still yields an answer that says so.

use crate::core::condition::truthy;
use crate::core::operation::OperationKind;
use crate::core::reference::render;
use crate::core::step::{StepFailure, StepResult, StepStatus, WorkflowTrace};
use crate::orchestration::executor::WorkflowOutcome;
use crate::text::synthesize_answer;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Fallback text when no step produced anything to report.
pub const EMPTY_ANSWER: &str = "Workflow completed without textual output.";

/// Lead line when nothing succeeded.
pub const NO_SUCCESS_NOTE: &str = "No workflow step succeeded; no answer could be produced.";

/// Maximum repository headlines taken from one analysis result.
const MAX_HEADLINES: usize = 3;

/// The synthesized answer together with the trace it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub outcome: WorkflowOutcome,
    pub trace: Arc<WorkflowTrace>,
    /// Context snippets gathered from successful steps, in trace order.
    pub context_snippets: Vec<String>,
}

/// Output view of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub id: String,
    pub operation: OperationKind,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attempts: u32,
}

impl From<&StepResult> for StepView {
    fn from(result: &StepResult) -> Self {
        Self {
            id: result.key.label(),
            operation: result.operation,
            status: result.status,
            output: result.output.clone(),
            error: result.error.clone(),
            reason: result.skip_reason.as_ref().map(|r| r.to_string()),
            attempts: result.attempts,
        }
    }
}

impl Answer {
    pub fn steps(&self) -> Vec<StepView> {
        self.trace.iter().map(StepView::from).collect()
    }
}

/// Build the answer for a finished run.
pub fn synthesize(trace: Arc<WorkflowTrace>, outcome: WorkflowOutcome, query: Option<&str>) -> Answer {
    let mut snippets = Vec::new();
    let mut notes = Vec::new();

    for result in trace.iter() {
        let position = result.key.index + 1;
        let operation = result.operation;
        match result.status {
            StepStatus::Succeeded => {
                let output = result.output.as_ref().unwrap_or(&Value::Null);
                snippets.extend(step_snippets(operation, output));
                notes.push(format!(
                    "Step {} ({}): {}",
                    position,
                    operation,
                    step_note(result, output)
                ));
            }
            StepStatus::Failed => {
                let error = result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                notes.push(format!("Step {} ({}) failed: {}", position, operation, error));
            }
            StepStatus::Skipped => {
                let reason = result
                    .skip_reason
                    .as_ref()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "not run".to_string());
                notes.push(format!("Step {} ({}) skipped: {}", position, operation, reason));
            }
            StepStatus::Pending | StepStatus::Running => {}
        }
    }

    let mut sections = Vec::new();
    if trace.count(StepStatus::Succeeded) == 0 && !trace.is_empty() {
        sections.push(NO_SUCCESS_NOTE.to_string());
    }
    if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
        if !snippets.is_empty() {
            sections.push(synthesize_answer(query, &snippets));
        }
    }
    sections.extend(notes);
    if outcome == WorkflowOutcome::Aborted {
        sections.push("Workflow aborted before completion.".to_string());
    }

    let text = if sections.is_empty() {
        EMPTY_ANSWER.to_string()
    } else {
        sections.join("\n")
    };

    Answer {
        text,
        outcome,
        trace,
        context_snippets: snippets,
    }
}

/// One-line summary of a successful step.
fn step_note(result: &StepResult, output: &Value) -> String {
    let param = |name: &str| {
        result
            .parameters
            .get(name)
            .map(render)
            .unwrap_or_else(|| "unknown".to_string())
    };
    let field = |name: &str| field_text(output, name).unwrap_or_else(|| "unknown".to_string());
    let count = output.as_array().map(Vec::len).unwrap_or(0);

    match result.operation {
        OperationKind::SemanticSearch => format!("retrieved {} semantic matches", count),
        OperationKind::SourceSummarySearch => format!(
            "retrieved {} source summaries for analysis {}",
            count,
            param("analysis_id")
        ),
        OperationKind::StartAnalysis => {
            format!("analysis started with id {}", field("analysis_id"))
        }
        OperationKind::GetAnalysisResult => format!(
            "analysis {} status {}",
            param("analysis_id"),
            field("status")
        ),
        OperationKind::ListAnalysisResults => format!("found {} recorded analyses", count),
        OperationKind::GenerateDocuments => {
            format!("document generation task {} submitted", field("task_id"))
        }
        OperationKind::GetDocumentStatus => format!(
            "document task {} status {}",
            param("task_id"),
            field("status")
        ),
        OperationKind::EmbeddingStats => "retrieved embedding statistics".to_string(),
    }
}

/// Context snippets contributed by a successful step.
fn step_snippets(operation: OperationKind, output: &Value) -> Vec<String> {
    let items = || output.as_array().into_iter().flatten();
    match operation {
        OperationKind::SemanticSearch => items().filter_map(search_hit_snippet).collect(),
        OperationKind::SourceSummarySearch => items().filter_map(source_summary_snippet).collect(),
        OperationKind::GetAnalysisResult => repository_headlines(output),
        _ => Vec::new(),
    }
}

/// `[label] content`, label taken from the hit's metadata.
fn search_hit_snippet(hit: &Value) -> Option<String> {
    let content = hit.get("content").map(render).unwrap_or_default();
    let metadata = hit.get("metadata").unwrap_or(&Value::Null);
    let label = ["file_name", "file_path", "document_type", "analysis_id"]
        .into_iter()
        .find_map(|key| field_text(metadata, key));
    with_prefix(label, &content)
}

/// `[file_path | language] content`.
fn source_summary_snippet(summary: &Value) -> Option<String> {
    let content = summary.get("content").map(render).unwrap_or_default();
    let parts: Vec<String> = ["file_path", "language"]
        .into_iter()
        .filter_map(|key| field_text(summary, key))
        .collect();
    let label = (!parts.is_empty()).then(|| parts.join(" | "));
    with_prefix(label, &content)
}

fn with_prefix(label: Option<String>, content: &str) -> Option<String> {
    let snippet = match label {
        Some(label) => format!("[{}] {}", label, content),
        None => content.to_string(),
    };
    let snippet = snippet.trim();
    (!snippet.is_empty()).then(|| snippet.to_string())
}

/// Up to three `Repository insight: name (language)` lines.
fn repository_headlines(result: &Value) -> Vec<String> {
    let Some(repositories) = result.get("repositories").and_then(Value::as_array) else {
        return Vec::new();
    };
    repositories
        .iter()
        .take(MAX_HEADLINES)
        .map(|repo| {
            let name = field_text(repo, "name")
                .or_else(|| field_text(repo, "url"))
                .unwrap_or_else(|| "unknown".to_string());
            match field_text(repo, "primary_language").or_else(|| field_text(repo, "language")) {
                Some(language) => format!("Repository insight: {} ({})", name, language),
                None => format!("Repository insight: {}", name),
            }
        })
        .collect()
}

/// Text of `value[key]` when present and truthy.
fn field_text(value: &Value, key: &str) -> Option<String> {
    value.get(key).filter(|v| truthy(v)).map(render)
}
