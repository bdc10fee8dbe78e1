//! HTTP adapter for the CoE RAG pipeline service.

use crate::client::{RagClient, RemoteError};
use crate::core::operation::{HttpMethod, OperationKind, OperationRegistry, Params, Route};
use crate::core::reference::render;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Maximum characters of an error body kept in a [`RemoteError`].
const ERROR_BODY_LIMIT: usize = 200;

pub struct HttpRagClient {
    base: Url,
    client: Client,
}

impl HttpRagClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid base URL '{}'", base_url)));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Fill the route's `{name}` segments from `params`.
    ///
    /// Returns the URL and the parameters left over for the body (POST) or
    /// query string (GET).
    fn endpoint(&self, route: &Route, params: &Params) -> std::result::Result<(Url, Params), RemoteError> {
        let mut rest = params.clone();
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| RemoteError::BadRequest {
                status: 400,
                message: format!("base URL {} cannot carry a path", self.base),
            })?;
            segments.pop_if_empty();
            for segment in route.path.trim_start_matches('/').split('/') {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => {
                        let value = rest.remove(name).ok_or_else(|| RemoteError::BadRequest {
                            status: 400,
                            message: format!("missing path parameter '{}'", name),
                        })?;
                        segments.push(&render(&value));
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }
        Ok((url, rest))
    }

    async fn send(
        &self,
        method: HttpMethod,
        mut url: Url,
        body: Params,
        timeout: Duration,
    ) -> std::result::Result<Value, RemoteError> {
        let request = match method {
            HttpMethod::Get => {
                if !body.is_empty() {
                    let mut pairs = url.query_pairs_mut();
                    for (name, value) in &body {
                        pairs.append_pair(name, &render(value));
                    }
                }
                self.client.get(url)
            }
            HttpMethod::Post => self.client.post(url).json(&body),
        };

        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

impl RagClient for HttpRagClient {
    fn call<'a>(
        &'a self,
        operation: OperationKind,
        params: &'a Params,
        timeout: Duration,
    ) -> BoxFuture<'a, std::result::Result<Value, RemoteError>> {
        Box::pin(async move {
            let route = OperationRegistry::builtin().get(operation).route;
            let (url, rest) = self.endpoint(&route, params)?;
            debug!(operation = %operation, url = %url, "calling RAG pipeline");
            self.send(route.method, url, rest, timeout).await
        })
    }

    fn fetch_context<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
        timeout: Duration,
    ) -> BoxFuture<'a, std::result::Result<Vec<String>, RemoteError>> {
        Box::pin(async move {
            let mut url = self.base.clone();
            url.path_segments_mut()
                .map_err(|_| RemoteError::BadRequest {
                    status: 400,
                    message: format!("base URL {} cannot carry a path", self.base),
                })?
                .pop_if_empty()
                .push("query");
            let body = match json!({"query": query, "top_k": top_k}) {
                Value::Object(map) => map,
                _ => Params::new(),
            };
            debug!(url = %url, top_k, "fetching context snippets");
            let response = self.send(HttpMethod::Post, url, body, timeout).await?;
            Ok(extract_snippets(&response))
        })
    }
}

/// `snippets` of a `/query` response; non-string entries are dropped.
fn extract_snippets(body: &Value) -> Vec<String> {
    body.get("snippets")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(timeout)
    } else if err.is_decode() || err.is_body() {
        RemoteError::InvalidResponse(err.to_string())
    } else {
        RemoteError::Unreachable(err.to_string())
    }
}

/// Map a non-success HTTP status. 408 and 429 count as server-side so
/// they are retried.
fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    let code = status.as_u16();
    match code {
        408 | 429 => RemoteError::ServerError {
            status: code,
            message,
        },
        400..=499 => RemoteError::BadRequest {
            status: code,
            message,
        },
        _ => RemoteError::ServerError {
            status: code,
            message,
        },
    }
}
