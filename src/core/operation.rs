//! Operation registry for the RAG pipeline.
//!
//! Every remote call a workflow can make is one variant of [`OperationKind`].
//! The registry maps each variant to an [`Operation`] descriptor holding its
//! parameter schema, result shape and HTTP route. Plans are validated against
//! the registry before anything runs.

use crate::core::reference;
use crate::error::ParamProblem;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Normalized parameter map passed to the client adapter.
pub type Params = Map<String, Value>;

/// The closed set of operations the RAG pipeline supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    SemanticSearch,
    SourceSummarySearch,
    StartAnalysis,
    GetAnalysisResult,
    ListAnalysisResults,
    GenerateDocuments,
    GetDocumentStatus,
    EmbeddingStats,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::SemanticSearch,
        OperationKind::SourceSummarySearch,
        OperationKind::StartAnalysis,
        OperationKind::GetAnalysisResult,
        OperationKind::ListAnalysisResults,
        OperationKind::GenerateDocuments,
        OperationKind::GetDocumentStatus,
        OperationKind::EmbeddingStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SemanticSearch => "semantic_search",
            OperationKind::SourceSummarySearch => "source_summary_search",
            OperationKind::StartAnalysis => "start_analysis",
            OperationKind::GetAnalysisResult => "get_analysis_result",
            OperationKind::ListAnalysisResults => "list_analysis_results",
            OperationKind::GenerateDocuments => "generate_documents",
            OperationKind::GetDocumentStatus => "get_document_status",
            OperationKind::EmbeddingStats => "embedding_stats",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Semantic type of a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    StringList,
    Array,
    Object,
}

impl ParamType {
    /// Check `value` against this type, returning the normalized value.
    ///
    /// Floats with no fractional part are accepted as integers.
    pub fn coerce(&self, value: Value) -> std::result::Result<Value, Value> {
        match (self, value) {
            (ParamType::String, v @ Value::String(_)) => Ok(v),
            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Ok(Value::Number(n))
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            Ok(json!(f as i64))
                        }
                        _ => Err(Value::Number(n)),
                    }
                }
            }
            (ParamType::Boolean, v @ Value::Bool(_)) => Ok(v),
            (ParamType::StringList, Value::Array(items)) => {
                if items.iter().all(Value::is_string) {
                    Ok(Value::Array(items))
                } else {
                    Err(Value::Array(items))
                }
            }
            (ParamType::Array, v @ Value::Array(_)) => Ok(v),
            (ParamType::Object, v @ Value::Object(_)) => Ok(v),
            (_, other) => Err(other),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Integer => write!(f, "integer"),
            ParamType::Boolean => write!(f, "boolean"),
            ParamType::StringList => write!(f, "list of strings"),
            ParamType::Array => write!(f, "array"),
            ParamType::Object => write!(f, "object"),
        }
    }
}

/// Name of a JSON value's type, used in mismatch reports.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One entry of an operation's parameter schema.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub aliases: &'static [&'static str],
}

impl ParamSpec {
    fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
            aliases: &[],
        }
    }

    fn optional(name: &'static str, ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn with_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// HTTP route of an operation. `{name}` segments are filled from parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub method: HttpMethod,
    pub path: &'static str,
}

/// Immutable descriptor of a registered operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub params: Vec<ParamSpec>,
    pub result: ParamType,
    pub route: Route,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether the operation accepts a `query` parameter that may be filled
    /// from the task-level query.
    pub fn takes_query(&self) -> bool {
        self.param("query").is_some()
    }

    fn canonical_name(&self, supplied: &str) -> Option<&ParamSpec> {
        self.params
            .iter()
            .find(|p| p.name == supplied || p.aliases.contains(&supplied))
    }
}

fn descriptor(kind: OperationKind) -> Operation {
    use HttpMethod::{Get, Post};
    use ParamType::*;

    let (params, result, route) = match kind {
        OperationKind::SemanticSearch => (
            vec![
                ParamSpec::required("query", String),
                ParamSpec::optional("k", Integer)
                    .with_default(json!(5))
                    .with_aliases(&["top_k"]),
                ParamSpec::optional("filter_metadata", Object),
                ParamSpec::optional("analysis_id", String),
                ParamSpec::optional("repository_url", String),
                ParamSpec::optional("group_name", String),
            ],
            Array,
            Route { method: Post, path: "/api/v1/search" },
        ),
        OperationKind::SourceSummarySearch => (
            vec![
                ParamSpec::required("analysis_id", String),
                ParamSpec::required("query", String),
                ParamSpec::optional("top_k", Integer)
                    .with_default(json!(10))
                    .with_aliases(&["k"]),
            ],
            Array,
            Route { method: Post, path: "/api/v1/source-summary/search/{analysis_id}" },
        ),
        OperationKind::StartAnalysis => (
            vec![
                ParamSpec::required("repositories", Array),
                ParamSpec::optional("include_ast", Boolean),
                ParamSpec::optional("include_tech_spec", Boolean),
                ParamSpec::optional("include_correlation", Boolean),
                ParamSpec::optional("group_name", String),
            ],
            Object,
            Route { method: Post, path: "/api/v1/analyze" },
        ),
        OperationKind::GetAnalysisResult => (
            vec![ParamSpec::required("analysis_id", String)],
            Object,
            Route { method: Get, path: "/api/v1/results/{analysis_id}" },
        ),
        OperationKind::ListAnalysisResults => (
            vec![],
            Array,
            Route { method: Get, path: "/api/v1/results" },
        ),
        OperationKind::GenerateDocuments => (
            vec![
                ParamSpec::required("analysis_id", String),
                ParamSpec::required("document_types", StringList),
                ParamSpec::optional("language", String).with_default(json!("korean")),
                ParamSpec::optional("custom_prompt", String),
                ParamSpec::optional("use_source_summaries", Boolean).with_default(json!(true)),
            ],
            Object,
            Route { method: Post, path: "/api/v1/documents/generate" },
        ),
        OperationKind::GetDocumentStatus => (
            vec![ParamSpec::required("task_id", String)],
            Object,
            Route { method: Get, path: "/api/v1/documents/status/{task_id}" },
        ),
        OperationKind::EmbeddingStats => (
            vec![],
            Object,
            Route { method: Get, path: "/api/v1/embeddings/stats" },
        ),
    };

    Operation {
        kind,
        params,
        result,
        route,
    }
}

/// Read-only map from operation name to descriptor.
#[derive(Debug, Clone)]
pub struct OperationRegistry {
    operations: HashMap<&'static str, Operation>,
}

impl OperationRegistry {
    /// Build a registry holding every [`OperationKind`].
    pub fn new() -> Self {
        let operations = OperationKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str(), descriptor(kind)))
            .collect();
        Self { operations }
    }

    /// Shared process-wide registry.
    pub fn builtin() -> &'static OperationRegistry {
        static REGISTRY: OnceLock<OperationRegistry> = OnceLock::new();
        REGISTRY.get_or_init(OperationRegistry::new)
    }

    /// Look up an operation by its wire name.
    pub fn resolve(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn get(&self, kind: OperationKind) -> &Operation {
        // Every kind is inserted by `new`.
        &self.operations[kind.as_str()]
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Validate `supplied` against the schema of `operation`.
    ///
    /// Aliases are rewritten to canonical names, `null` counts as absent and
    /// defaults are filled in. A string that is exactly one `${...}`
    /// reference is accepted for any type; it is re-checked once resolved.
    pub fn validate_parameters(
        &self,
        operation: &Operation,
        supplied: &Params,
    ) -> std::result::Result<Params, ParamProblem> {
        let mut normalized = Params::new();

        for (name, value) in supplied {
            let spec = operation
                .canonical_name(name)
                .ok_or_else(|| ParamProblem::Extra(name.clone()))?;
            if value.is_null() {
                continue;
            }
            if normalized.contains_key(spec.name) {
                return Err(ParamProblem::Extra(name.clone()));
            }

            let value = match value {
                Value::String(s) if reference::is_whole_reference(s) => value.clone(),
                _ => spec
                    .ty
                    .coerce(value.clone())
                    .map_err(|found| ParamProblem::TypeMismatch {
                        name: spec.name.to_string(),
                        expected: spec.ty,
                        found: json_type_name(&found).to_string(),
                    })?,
            };
            normalized.insert(spec.name.to_string(), value);
        }

        for spec in &operation.params {
            match normalized.get(spec.name) {
                Some(value) if spec.required && is_blank(value) => {
                    return Err(ParamProblem::Missing(spec.name.to_string()));
                }
                Some(_) => {}
                None if spec.required => {
                    return Err(ParamProblem::Missing(spec.name.to_string()));
                }
                None => {
                    if let Some(default) = &spec.default {
                        normalized.insert(spec.name.to_string(), default.clone());
                    }
                }
            }
        }

        Ok(normalized)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
