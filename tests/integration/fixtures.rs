//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted RAG client with call accounting
//! - Building validated plans from JSON
//! - Executor configurations with negligible backoff

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ragent::client::{RagClient, RemoteError, RetryPolicy};
use ragent::core::{OperationKind, OperationRegistry, Params, WorkflowPlan};
use ragent::orchestration::{ExecutorConfig, ExecutorEvent, RunReport, WorkflowExecutor};

type Reply = Result<Value, RemoteError>;

/// Canned successful payload for every operation.
pub fn canned_output(operation: OperationKind) -> Value {
    match operation {
        OperationKind::SemanticSearch => json!([
            {"content": "Tokens are issued by the auth service.", "metadata": {"file_name": "auth.md"}},
            {"content": "Sessions expire after one hour.", "metadata": {"file_name": "session.md"}}
        ]),
        OperationKind::SourceSummarySearch => json!([
            {"content": "Validates JWT signatures.", "file_path": "src/auth.rs", "language": "rust"}
        ]),
        OperationKind::StartAnalysis => json!({"analysis_id": "an-42", "status": "started"}),
        OperationKind::GetAnalysisResult => json!({
            "analysis_id": "an-42",
            "status": "completed",
            "repositories": [{"name": "gateway", "primary_language": "Rust"}]
        }),
        OperationKind::ListAnalysisResults => json!([{"analysis_id": "an-42"}]),
        OperationKind::GenerateDocuments => json!({"task_id": "doc-7", "status": "accepted"}),
        OperationKind::GetDocumentStatus => json!({"task_id": "doc-7", "status": "completed"}),
        OperationKind::EmbeddingStats => json!({"total_documents": 128, "collection": "coe"}),
    }
}

/// Decrements the in-flight counter when a call ends or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`RagClient`] that answers from a per-operation script.
///
/// Queued replies are consumed first; after that every call gets the
/// operation's fallback reply (the canned output unless overridden).
pub struct MockRagClient {
    queued: Mutex<HashMap<OperationKind, VecDeque<Reply>>>,
    fallback: HashMap<OperationKind, Reply>,
    delays: HashMap<OperationKind, Duration>,
    snippets: Result<Vec<String>, RemoteError>,
    log: Mutex<Vec<(OperationKind, Params)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRagClient {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            fallback: HashMap::new(),
            delays: HashMap::new(),
            snippets: Ok(Vec::new()),
            log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replace the fallback payload of `operation`.
    pub fn respond(mut self, operation: OperationKind, output: Value) -> Self {
        self.fallback.insert(operation, Ok(output));
        self
    }

    /// Every call of `operation` fails with `err`.
    pub fn always_fail(mut self, operation: OperationKind, err: RemoteError) -> Self {
        self.fallback.insert(operation, Err(err));
        self
    }

    /// The next `times` calls of `operation` fail with `err`.
    pub fn fail_times(self, operation: OperationKind, times: usize, err: RemoteError) -> Self {
        {
            let mut queued = self.queued.lock().unwrap();
            let queue = queued.entry(operation).or_default();
            for _ in 0..times {
                queue.push_back(Err(err.clone()));
            }
        }
        self
    }

    /// Each call of `operation` takes `delay` before replying.
    pub fn with_delay(mut self, operation: OperationKind, delay: Duration) -> Self {
        self.delays.insert(operation, delay);
        self
    }

    /// Same delay for every operation.
    pub fn with_delay_all(mut self, delay: Duration) -> Self {
        for operation in OperationKind::ALL {
            self.delays.insert(operation, delay);
        }
        self
    }

    pub fn with_snippets(mut self, snippets: Vec<&str>) -> Self {
        self.snippets = Ok(snippets.into_iter().map(str::to_string).collect());
        self
    }

    pub fn with_context_error(mut self, err: RemoteError) -> Self {
        self.snippets = Err(err);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Calls made for `operation`, including retries.
    pub fn calls(&self, operation: OperationKind) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Operations in the order their calls started.
    pub fn call_order(&self) -> Vec<OperationKind> {
        self.log.lock().unwrap().iter().map(|(op, _)| *op).collect()
    }

    /// Parameters of every call made for `operation`.
    pub fn params_of(&self, operation: OperationKind) -> Vec<Params> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, operation: OperationKind) -> Reply {
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(reply) => reply,
            None => self
                .fallback
                .get(&operation)
                .cloned()
                .unwrap_or_else(|| Ok(canned_output(operation))),
        }
    }
}

impl RagClient for MockRagClient {
    fn call<'a>(
        &'a self,
        operation: OperationKind,
        params: &'a Params,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Value, RemoteError>> {
        Box::pin(async move {
            self.log.lock().unwrap().push((operation, params.clone()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if let Some(delay) = self.delays.get(&operation) {
                tokio::time::sleep(*delay).await;
            }
            self.next_reply(operation)
        })
    }

    fn fetch_context<'a>(
        &'a self,
        _query: &'a str,
        top_k: usize,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Vec<String>, RemoteError>> {
        let result = self
            .snippets
            .clone()
            .map(|snippets| snippets.into_iter().take(top_k).collect());
        Box::pin(async move { result })
    }
}

/// Validate a plan written as JSON.
pub fn plan(value: Value) -> WorkflowPlan {
    WorkflowPlan::parse(&value.to_string(), OperationRegistry::builtin())
        .expect("plan should validate")
}

/// Default executor settings with millisecond backoff.
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(4)),
        ..Default::default()
    }
}

pub fn server_error() -> RemoteError {
    RemoteError::ServerError {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

pub fn bad_request() -> RemoteError {
    RemoteError::BadRequest {
        status: 422,
        message: "query must not be empty".to_string(),
    }
}

/// Runs plans against a [`MockRagClient`] and captures executor events.
pub struct ExecutorHarness {
    pub client: Arc<MockRagClient>,
    pub executor: WorkflowExecutor,
    event_rx: mpsc::Receiver<ExecutorEvent>,
}

impl ExecutorHarness {
    pub fn new(client: MockRagClient, config: ExecutorConfig) -> Self {
        let client = client.into_arc();
        let (event_tx, event_rx) = mpsc::channel(256);
        let executor = WorkflowExecutor::new(client.clone(), config).with_events(event_tx);
        Self {
            client,
            executor,
            event_rx,
        }
    }

    pub async fn run(&self, plan: &WorkflowPlan) -> RunReport {
        self.executor.run(plan).await.expect("run should not fail")
    }

    /// Events emitted so far.
    pub fn drain_events(&mut self) -> Vec<ExecutorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
