//! Failure handling tests.
//!
//! These tests verify retries, per-call timeouts, failure propagation and
//! what a failing critical step does to the rest of the run.

use std::time::Duration;

use serde_json::json;

use ragent::client::RemoteError;
use ragent::core::{FailureKind, OperationKind, SkipReason, StepKey, StepStatus};
use ragent::orchestration::{AbortPolicy, ExecutorConfig, OperationOverride, WorkflowOutcome};

use crate::fixtures::{bad_request, fast_config, plan, server_error, ExecutorHarness, MockRagClient};

/// Test: Critical step behind a failed dependency aborts the run
/// Given a search that keeps failing and a critical step depending on it
/// When the plan runs
/// Then the search fails after all retries, the critical step is skipped
/// and the run is aborted
#[tokio::test]
async fn test_failed_dependency_of_critical_step_aborts() {
    let client = MockRagClient::new().always_fail(OperationKind::SemanticSearch, server_error());
    let harness = ExecutorHarness::new(
        client,
        ExecutorConfig {
            max_concurrent: 1,
            ..fast_config()
        },
    );
    let plan = plan(json!([
        {"operation": "semantic_search", "parameters": {"query": "x"}},
        {"operation": "embedding_stats", "dependsOn": [0], "critical": true},
        {"operation": "list_analysis_results", "dependsOn": []}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Aborted);
    assert_eq!(report.aborted_by, Some(StepKey::new(1, None)));

    let search = report.trace.get(0).unwrap();
    assert_eq!(search.status, StepStatus::Failed);
    assert_eq!(search.attempts, 3);
    assert_eq!(search.error.as_ref().unwrap().kind, FailureKind::ServerError);

    let critical = report.trace.get(1).unwrap();
    assert_eq!(critical.status, StepStatus::Skipped);
    assert!(matches!(
        critical.skip_reason,
        Some(SkipReason::DependencyNotSatisfied { .. })
    ));

    // Never started: the single slot was taken by the search.
    let pending = report.trace.get(2).unwrap();
    assert_eq!(
        pending.skip_reason,
        Some(SkipReason::Aborted {
            critical_step: "#1".to_string()
        })
    );

    assert_eq!(harness.client.calls(OperationKind::SemanticSearch), 3);
    assert_eq!(harness.client.calls(OperationKind::EmbeddingStats), 0);
    assert_eq!(harness.client.calls(OperationKind::ListAnalysisResults), 0);
}

/// Test: Critical step behind a false condition does not abort
/// Given a step skipped by its condition and a critical step depending on it
/// When the plan runs
/// Then the critical step is skipped, later steps still run and the run
/// completes
#[tokio::test]
async fn test_condition_skip_before_critical_step_completes() {
    let harness = ExecutorHarness::new(MockRagClient::new(), fast_config());
    let plan = plan(json!([
        {"id": "a", "operation": "embedding_stats"},
        {"id": "b", "operation": "list_analysis_results", "condition": "a.total_documents > 1000"},
        {"id": "c", "operation": "embedding_stats", "dependsOn": ["b"], "critical": true},
        {"id": "d", "operation": "semantic_search", "parameters": {"query": "x"}, "dependsOn": []}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Completed);
    assert!(report.aborted_by.is_none());
    assert!(matches!(
        report.trace.get(1).unwrap().skip_reason,
        Some(SkipReason::ConditionFalse { .. })
    ));
    let critical = report.trace.get(2).unwrap();
    assert_eq!(critical.status, StepStatus::Skipped);
    assert_eq!(
        critical.skip_reason,
        Some(SkipReason::DependencyNotSatisfied {
            dependency: "b".to_string()
        })
    );
    assert_eq!(report.trace.get(3).unwrap().status, StepStatus::Succeeded);
    assert_eq!(harness.client.calls(OperationKind::EmbeddingStats), 1);
}

/// Test: A failure reached through a skip chain still aborts
#[tokio::test]
async fn test_failure_through_skip_chain_aborts_critical_step() {
    let client = MockRagClient::new().always_fail(OperationKind::StartAnalysis, bad_request());
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([
        {"id": "start", "operation": "start_analysis",
         "parameters": {"repositories": [{"url": "https://example.com/r.git"}]}},
        {"id": "result", "operation": "get_analysis_result",
         "parameters": {"analysis_id": "${start.analysis_id}"}},
        {"id": "stats", "operation": "embedding_stats", "dependsOn": ["result"], "critical": true},
        {"operation": "semantic_search", "parameters": {"query": "x"}}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Aborted);
    assert_eq!(report.aborted_by, Some(StepKey::new(2, Some("stats".to_string()))));
    assert_eq!(
        report.trace.get(3).unwrap().skip_reason,
        Some(SkipReason::Aborted {
            critical_step: "stats".to_string()
        })
    );
}

#[tokio::test]
async fn test_critical_step_failure_aborts() {
    let client = MockRagClient::new().always_fail(OperationKind::EmbeddingStats, bad_request());
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([
        {"id": "search", "operation": "semantic_search", "parameters": {"query": "x"}},
        {"id": "stats", "operation": "embedding_stats", "critical": true},
        {"operation": "list_analysis_results"}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Aborted);
    assert_eq!(report.trace.get(0).unwrap().status, StepStatus::Succeeded);
    assert_eq!(report.trace.get(1).unwrap().status, StepStatus::Failed);
    assert_eq!(
        report.trace.get(2).unwrap().skip_reason,
        Some(SkipReason::Aborted {
            critical_step: "stats".to_string()
        })
    );
}

/// Test: Non-critical failures do not stop independent work
/// Given a failing step with a dependent and an independent sibling
/// When the plan runs
/// Then the dependent is skipped, the sibling succeeds and the run
/// completes with errors
#[tokio::test]
async fn test_non_critical_failure_completes_with_errors() {
    let client = MockRagClient::new().always_fail(OperationKind::StartAnalysis, server_error());
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([
        {"id": "start", "operation": "start_analysis",
         "parameters": {"repositories": [{"url": "https://example.com/r.git"}]}},
        {"id": "result", "operation": "get_analysis_result",
         "parameters": {"analysis_id": "${start.analysis_id}"}},
        {"id": "docs", "operation": "generate_documents",
         "parameters": {"analysis_id": "${result.analysis_id}", "document_types": ["summary"]}},
        {"operation": "embedding_stats", "dependsOn": []}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::CompletedWithErrors);
    assert_eq!(report.trace.get(0).unwrap().status, StepStatus::Failed);
    assert_eq!(
        report.trace.get(1).unwrap().skip_reason,
        Some(SkipReason::DependencyNotSatisfied {
            dependency: "start".to_string()
        })
    );
    // Skips propagate transitively.
    assert_eq!(
        report.trace.get(2).unwrap().skip_reason,
        Some(SkipReason::DependencyNotSatisfied {
            dependency: "result".to_string()
        })
    );
    assert_eq!(report.trace.get(3).unwrap().status, StepStatus::Succeeded);
    assert_eq!(harness.client.calls(OperationKind::GetAnalysisResult), 0);
    assert_eq!(harness.client.calls(OperationKind::GenerateDocuments), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let client = MockRagClient::new().fail_times(
        OperationKind::EmbeddingStats,
        2,
        RemoteError::Unreachable("connection refused".to_string()),
    );
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([{"operation": "embedding_stats"}]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Completed);
    let step = report.trace.get(0).unwrap();
    assert_eq!(step.attempts, 3);
    assert_eq!(step.output, Some(json!({"total_documents": 128, "collection": "coe"})));
    assert_eq!(harness.client.calls(OperationKind::EmbeddingStats), 3);
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let client = MockRagClient::new().always_fail(OperationKind::SemanticSearch, bad_request());
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([{"operation": "semantic_search", "parameters": {"query": "x"}}]));

    let report = harness.run(&plan).await;

    let step = report.trace.get(0).unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.attempts, 1);
    assert_eq!(step.error.as_ref().unwrap().kind, FailureKind::BadRequest);
    assert_eq!(harness.client.calls(OperationKind::SemanticSearch), 1);
}

/// Test: A call that exceeds its timeout counts as a retryable failure
#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_then_fail() {
    let client = MockRagClient::new().with_delay(OperationKind::EmbeddingStats, Duration::from_secs(30));
    let harness = ExecutorHarness::new(
        client,
        ExecutorConfig {
            timeout: Duration::from_millis(100),
            ..fast_config()
        },
    );
    let plan = plan(json!([{"operation": "embedding_stats"}]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::CompletedWithErrors);
    let step = report.trace.get(0).unwrap();
    assert_eq!(step.error.as_ref().unwrap().kind, FailureKind::Timeout);
    assert_eq!(step.attempts, 3);
    assert_eq!(harness.client.calls(OperationKind::EmbeddingStats), 3);
}

#[tokio::test(start_paused = true)]
async fn test_operation_override_extends_timeout_and_attempts() {
    let client = MockRagClient::new()
        .with_delay(OperationKind::StartAnalysis, Duration::from_millis(500))
        .fail_times(OperationKind::EmbeddingStats, 4, server_error());
    let mut config = ExecutorConfig {
        timeout: Duration::from_millis(100),
        ..fast_config()
    };
    config.overrides.insert(
        OperationKind::StartAnalysis,
        OperationOverride {
            timeout: Some(Duration::from_secs(2)),
            max_attempts: None,
        },
    );
    config.overrides.insert(
        OperationKind::EmbeddingStats,
        OperationOverride {
            timeout: None,
            max_attempts: Some(5),
        },
    );
    let harness = ExecutorHarness::new(client, config);
    let plan = plan(json!([
        {"operation": "start_analysis",
         "parameters": {"repositories": [{"url": "https://example.com/r.git"}]}},
        {"operation": "embedding_stats", "dependsOn": []}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Completed);
    assert_eq!(report.trace.get(0).unwrap().attempts, 1);
    assert_eq!(report.trace.get(1).unwrap().attempts, 5);
}

#[tokio::test]
async fn test_wrong_output_shape_is_retried_as_invalid_response() {
    let client = MockRagClient::new().respond(OperationKind::SemanticSearch, json!({"hits": []}));
    let harness = ExecutorHarness::new(client, fast_config());
    let plan = plan(json!([{"operation": "semantic_search", "parameters": {"query": "x"}}]));

    let report = harness.run(&plan).await;

    let step = report.trace.get(0).unwrap();
    assert_eq!(step.error.as_ref().unwrap().kind, FailureKind::InvalidResponse);
    assert_eq!(step.attempts, 3);
}

/// Test: Drain keeps in-flight siblings of a failed critical step
#[tokio::test(start_paused = true)]
async fn test_abort_drain_keeps_running_siblings() {
    let client = MockRagClient::new()
        .with_delay(OperationKind::ListAnalysisResults, Duration::from_millis(500))
        .always_fail(OperationKind::EmbeddingStats, bad_request());
    let harness = ExecutorHarness::new(
        client,
        ExecutorConfig {
            abort_policy: AbortPolicy::Drain,
            ..fast_config()
        },
    );
    let plan = plan(json!([
        {"id": "slow", "operation": "list_analysis_results"},
        {"id": "critical", "operation": "embedding_stats", "dependsOn": [], "critical": true},
        {"operation": "semantic_search", "parameters": {"query": "x"}, "dependsOn": ["slow"]}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Aborted);
    let slow = report.trace.get(0).unwrap();
    assert_eq!(slow.status, StepStatus::Succeeded);
    assert!(slow.output.is_some());
    assert_eq!(
        report.trace.get(2).unwrap().skip_reason,
        Some(SkipReason::Aborted {
            critical_step: "critical".to_string()
        })
    );
    assert_eq!(harness.client.calls(OperationKind::SemanticSearch), 0);
}

/// Test: Cancel aborts in-flight siblings of a failed critical step
#[tokio::test(start_paused = true)]
async fn test_abort_cancel_stops_running_siblings() {
    let client = MockRagClient::new()
        .with_delay(OperationKind::ListAnalysisResults, Duration::from_millis(500))
        .always_fail(OperationKind::EmbeddingStats, bad_request());
    let harness = ExecutorHarness::new(
        client,
        ExecutorConfig {
            abort_policy: AbortPolicy::Cancel,
            ..fast_config()
        },
    );
    let plan = plan(json!([
        {"id": "slow", "operation": "list_analysis_results"},
        {"id": "critical", "operation": "embedding_stats", "dependsOn": [], "critical": true},
        {"operation": "semantic_search", "parameters": {"query": "x"}, "dependsOn": ["slow"]}
    ]));

    let report = harness.run(&plan).await;

    assert_eq!(report.outcome, WorkflowOutcome::Aborted);
    let aborted = SkipReason::Aborted {
        critical_step: "critical".to_string(),
    };
    let slow = report.trace.get(0).unwrap();
    assert_eq!(slow.status, StepStatus::Skipped);
    assert!(slow.output.is_none());
    assert_eq!(slow.skip_reason, Some(aborted.clone()));
    assert_eq!(report.trace.get(2).unwrap().skip_reason, Some(aborted));
    assert_eq!(harness.client.calls(OperationKind::ListAnalysisResults), 1);
    assert!(report.trace.all_finished());
}
