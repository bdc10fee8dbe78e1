//! Cancellation tests.
//!
//! A run cancelled from outside marks every unfinished step Skipped, drops
//! in-flight calls and still yields an answer from what already succeeded.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use ragent::agent::WorkflowAgent;
use ragent::core::{OperationKind, SkipReason, StepStatus};
use ragent::orchestration::{synthesize, WorkflowOutcome};

use crate::fixtures::{fast_config, plan, ExecutorHarness, MockRagClient};

fn cancel_after(token: CancellationToken, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

/// Test: Cancel during a long call
/// Given a finished first step and a second step stuck in a slow call
/// When the run is cancelled
/// Then the slow and pending steps are Skipped and the first result is kept
#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run_skips_unfinished_steps() {
    let client = MockRagClient::new().with_delay(OperationKind::ListAnalysisResults, Duration::from_secs(10));
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([
        {"operation": "embedding_stats"},
        {"operation": "list_analysis_results"},
        {"operation": "semantic_search", "parameters": {"query": "x"}}
    ]));
    cancel_after(harness.executor.cancellation_token(), Duration::from_secs(1));

    let started = tokio::time::Instant::now();
    let report = harness.run(&plan).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.cancelled);
    assert_eq!(report.outcome, WorkflowOutcome::Aborted);
    assert!(report.aborted_by.is_none());

    assert_eq!(report.trace.get(0).unwrap().status, StepStatus::Succeeded);
    let slow = report.trace.get(1).unwrap();
    assert_eq!(slow.status, StepStatus::Skipped);
    assert_eq!(slow.skip_reason, Some(SkipReason::Cancelled));
    assert!(slow.started_at.is_some());
    assert_eq!(report.trace.get(2).unwrap().skip_reason, Some(SkipReason::Cancelled));
    assert_eq!(harness.client.calls(OperationKind::SemanticSearch), 0);

    let answer = synthesize(report.trace.clone(), report.outcome, None);
    assert_eq!(
        answer.text.lines().collect::<Vec<_>>(),
        vec![
            "Step 1 (embedding_stats): retrieved embedding statistics",
            "Step 2 (list_analysis_results) skipped: run cancelled",
            "Step 3 (semantic_search) skipped: run cancelled",
            "Workflow aborted before completion.",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_all_parallel_calls() {
    let client = MockRagClient::new().with_delay_all(Duration::from_secs(5));
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([
        {"operation": "embedding_stats"},
        {"operation": "list_analysis_results", "dependsOn": []},
        {"operation": "semantic_search", "parameters": {"query": "x"}, "dependsOn": []}
    ]));
    cancel_after(harness.executor.cancellation_token(), Duration::from_millis(100));

    let report = harness.run(&plan).await;

    assert_eq!(report.trace.count(StepStatus::Skipped), 3);
    assert!(report.trace.all_finished());
    assert_eq!(harness.client.total_calls(), 3);

    let answer = synthesize(report.trace.clone(), report.outcome, Some("anything"));
    assert!(answer.text.starts_with(ragent::orchestration::NO_SUCCESS_NOTE));
}

#[tokio::test(start_paused = true)]
async fn test_workflow_agent_honours_cancellation_token() {
    let client = MockRagClient::new()
        .with_delay(OperationKind::GetDocumentStatus, Duration::from_secs(60))
        .into_arc();
    let token = CancellationToken::new();
    let agent = WorkflowAgent::new(client.clone(), fast_config()).with_cancellation(token.clone());
    let plan = plan(json!({
        "query": "auth?",
        "steps": [
            {"operation": "semantic_search"},
            {"operation": "get_document_status", "parameters": {"task_id": "doc-7"}}
        ]
    }));
    cancel_after(token, Duration::from_secs(1));

    let result = agent.run(&plan).await.unwrap();

    assert_eq!(result.outcome, Some(WorkflowOutcome::Aborted));
    assert_eq!(result.exit_code(), 2);
    assert!(result.answer.starts_with("Question: auth? Context: [auth.md]"));
    assert_eq!(result.context_snippets.len(), 2);
    let steps = result.steps.unwrap();
    assert_eq!(steps[0].status, StepStatus::Succeeded);
    assert_eq!(steps[1].reason.as_deref(), Some("run cancelled"));
}
