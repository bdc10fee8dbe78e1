use std::fs;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ragent::agent::{AgentKind, AgentResult, AgentTask, QueryAgent, WorkflowAgent};
use ragent::client::{HttpRagClient, RagClient};
use ragent::config::{expand_tilde, Config};
use ragent::core::{OperationRegistry, WorkflowPlan, WorkflowRequest};
use ragent::{Error, Result};

/// ragent - answer questions and run multi-step workflows against the CoE RAG pipeline
#[derive(Parser, Debug)]
#[command(name = "ragent")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RAGENT_DEBUG=1  Enable debug logging (alternative to --debug)\n    RUST_LOG        Override log filtering\n\nEXIT CODES:\n    0  completed\n    1  error\n    2  workflow aborted\n    3  workflow completed with errors")]
pub struct Cli {
    /// Natural language question; the task-level query for workflows
    pub query: Option<String>,

    /// Which agent handles the request
    #[arg(long, value_enum, default_value_t = AgentKind::Query)]
    pub agent: AgentKind,

    /// Workflow plan as inline JSON, or @path to a JSON file
    #[arg(short = 'w', long)]
    pub workflow: Option<String>,

    /// Base URL of the RAG pipeline
    #[arg(long)]
    pub base_url: Option<String>,

    /// Number of snippets to retrieve
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Config file (default: ~/.ragent/config.toml)
    #[arg(short = 'c', long)]
    pub config: Option<String>,

    /// Maximum remote calls in flight at once
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not probe the backend before running
    #[arg(long)]
    pub skip_health_check: bool,

    /// Enable debug logging (to stderr)
    #[arg(short = 'd', long)]
    pub debug: bool,
}

fn main() {
    let cli = Cli::parse();

    ragent::log::init_with_debug(cli.debug);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "ragent failed");
            eprintln!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    let agent = if cli.workflow.is_some() {
        AgentKind::Workflow
    } else {
        cli.agent
    };
    info!(%agent, base_url = %config.base_url, "starting");

    // Validate the plan before anything touches the network.
    let plan = match agent {
        AgentKind::Workflow => Some(load_plan(&cli)?),
        AgentKind::Query => None,
    };
    let query = cli.query.clone().unwrap_or_default();
    if agent == AgentKind::Query && query.trim().is_empty() {
        return Err(Error::Config("a query is required".to_string()));
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result: Result<AgentResult> = rt.block_on(async {
        let client: Arc<dyn RagClient> = Arc::new(HttpRagClient::new(&config.base_url)?);

        if !cli.skip_health_check {
            client
                .health_check(config.timeout())
                .await
                .map_err(|e| Error::BackendUnreachable {
                    url: config.base_url.clone(),
                    reason: e.to_string(),
                })?;
        }

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                interrupt.cancel();
            }
        });

        match plan {
            Some(plan) => {
                WorkflowAgent::new(client, config.executor_config()?)
                    .with_cancellation(cancel)
                    .run(&plan)
                    .await
            }
            None => {
                let agent = QueryAgent::new(client, config.timeout());
                let task = AgentTask::new(&query);
                tokio::select! {
                    result = agent.run(&task, config.top_k) => result,
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            }
        }
    });
    let result = result?;

    print_result(&result)?;
    Ok(result.exit_code())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(&expand_tilde(path))?,
        None => Config::load()?,
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }
    if let Some(max_concurrent) = cli.max_concurrent {
        config.max_concurrent = max_concurrent;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    config.validate()?;
    Ok(config)
}

fn load_plan(cli: &Cli) -> Result<WorkflowPlan> {
    let source = cli
        .workflow
        .as_deref()
        .ok_or_else(|| Error::Config("--workflow is required for the workflow agent".to_string()))?;
    let text = match source.strip_prefix('@') {
        Some(path) => fs::read_to_string(expand_tilde(path))?,
        None => source.to_string(),
    };

    let mut request = WorkflowRequest::from_json(&text)?;
    if request.query.is_none() {
        request.query = cli.query.clone().filter(|q| !q.trim().is_empty());
    }
    Ok(WorkflowPlan::build(request, OperationRegistry::builtin())?)
}

fn print_result(result: &AgentResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
