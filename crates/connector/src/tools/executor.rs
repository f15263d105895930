//! Tool execution — the outbound half of the command layer.
//!
//! Order of checks matters and is load-bearing: the per-call rate limit
//! runs before anything else (a limited call makes no outbound request
//! and records nothing), resolution failures surface as not-found /
//! forbidden, and schema failures are recorded as executions without
//! ever leaving the process. Only a validated input reaches the wire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use vx_domain::config::Config;
use vx_domain::events::{self, ToolExecutionEvent};
use vx_domain::schema;
use vx_domain::{Error, Result};
use vx_store::calls::{Call, CallStore, ToolExecStatus};
use vx_store::events::EventStore;
use vx_store::secrets::SecretBox;
use vx_store::tools::{ToolRuntimeConfig, ToolStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The recorded result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub execution_id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub status: ToolExecStatus,
    pub response: Option<Value>,
    pub error_code: Option<String>,
    pub latency_ms: i64,
}

impl ToolOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ToolExecStatus::Success
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolExecutor {
    calls: CallStore,
    tools: ToolStore,
    events: EventStore,
    secrets: Option<SecretBox>,
    cfg: Arc<Config>,
    http: reqwest::Client,
}

impl ToolExecutor {
    pub fn new(
        calls: CallStore,
        tools: ToolStore,
        events: EventStore,
        secrets: Option<SecretBox>,
        cfg: Arc<Config>,
    ) -> Result<Self> {
        // Per-request timeouts come from the tool row, so the shared
        // client has none.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            calls,
            tools,
            events,
            secrets,
            cfg,
            http,
        })
    }

    /// Execute one tool call for a live call.
    ///
    /// Pre-flight refusals (rate limit, unknown tool, unmapped tool)
    /// return `Err` and record nothing. Everything after validation is
    /// recorded as a `ToolExecution` row plus a call event, success or
    /// not.
    pub async fn execute(&self, call: &Call, tool_name: &str, input: Value) -> Result<ToolOutcome> {
        // 1. Per-call rate limit.
        let recent = self.calls.tool_executions_last_minute(call.id).await?;
        if recent >= self.cfg.tools.max_per_minute as i64 {
            return Err(Error::RateLimited(format!(
                "call {} exceeded {} tool executions per minute",
                call.id, self.cfg.tools.max_per_minute
            )));
        }

        // 2. Resolve the runtime config.
        let tool = self
            .tools
            .resolve(call.tenant_id, tool_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tool '{tool_name}'")))?;

        if self.cfg.tools.require_agent_mapping
            && !self
                .tools
                .is_mapped_to_published_version(call.agent_id, tool.tool_id)
                .await?
        {
            return Err(Error::Forbidden(format!(
                "tool '{tool_name}' is not mapped to this agent's published version"
            )));
        }

        // 3. Validate against the stored schema. A failure is recorded
        // without any outbound call.
        let issues = schema::validate_value(&tool.input_schema, &input);
        if !issues.is_empty() {
            let detail = json!({
                "issues": issues
                    .iter()
                    .map(|i| json!({ "path": i.path, "message": i.message }))
                    .collect::<Vec<_>>()
            });
            return self
                .record(
                    call,
                    &tool,
                    &input,
                    Some(detail),
                    ToolExecStatus::Error,
                    Some("schema_validation_failed"),
                    0,
                )
                .await;
        }

        // 4–5. Outbound request with retry.
        let started = Instant::now();
        let wire = self.call_endpoint(&tool, &input).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let (status, response, error_code) = match wire {
            Ok(body) => (ToolExecStatus::Success, Some(body), None),
            Err(WireFailure::Timeout) => (ToolExecStatus::Timeout, None, Some("request_timeout")),
            Err(WireFailure::Status(code, body)) => {
                (ToolExecStatus::Error, body, Some(status_code_label(code)))
            }
            Err(WireFailure::Network(message)) => {
                tracing::warn!(tool = %tool.name, error = %message, "tool endpoint unreachable");
                (ToolExecStatus::Error, None, Some("network_error"))
            }
        };

        self.record(call, &tool, &input, response, status, error_code, latency_ms)
            .await
    }

    /// Make the HTTP call, retrying transient failures.
    async fn call_endpoint(
        &self,
        tool: &ToolRuntimeConfig,
        input: &Value,
    ) -> std::result::Result<Value, WireFailure> {
        let headers = self.build_auth_headers(tool).map_err(|e| {
            WireFailure::Network(format!("integration auth unavailable: {e}"))
        })?;
        let timeout = Duration::from_millis(tool.timeout_ms.max(1) as u64);
        let method = tool.method.to_ascii_uppercase();

        let mut last: Option<WireFailure> = None;

        for attempt in 0..=tool.max_retries.max(0) as u32 {
            if attempt > 0 {
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let mut request = match method.as_str() {
                "GET" => self.http.get(&tool.url).query(&query_pairs(input)),
                "DELETE" => self.http.delete(&tool.url).json(input),
                "PUT" => self.http.put(&tool.url).json(input),
                "PATCH" => self.http.patch(&tool.url).json(input),
                _ => self.http.post(&tool.url).json(input),
            }
            .timeout(timeout);

            for (name, value) in &headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let code = response.status();
                    if retryable_status(code) {
                        last = Some(WireFailure::Status(code.as_u16(), None));
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    let parsed = serde_json::from_str::<Value>(&body)
                        .unwrap_or_else(|_| Value::String(body));
                    if code.is_success() {
                        return Ok(parsed);
                    }
                    return Err(WireFailure::Status(code.as_u16(), Some(parsed)));
                }
                Err(e) if e.is_timeout() => {
                    last = Some(WireFailure::Timeout);
                    continue;
                }
                Err(e) => {
                    last = Some(WireFailure::Network(e.to_string()));
                    continue;
                }
            }
        }

        Err(last.unwrap_or_else(|| WireFailure::Network("no attempts made".into())))
    }

    /// Integration auth overlaid with the endpoint's header template.
    fn build_auth_headers(&self, tool: &ToolRuntimeConfig) -> Result<Vec<(String, String)>> {
        let mut headers = Vec::new();

        if let Some(ref sealed) = tool.sealed_secret {
            let sbox = self.secrets.as_ref().ok_or_else(|| {
                Error::Config("integration secret present but secrets.key_hex unset".into())
            })?;
            let secret = sbox.open(sealed)?;
            match tool.auth_mode.as_str() {
                "bearer" => headers.push(("Authorization".into(), format!("Bearer {secret}"))),
                _ => headers.push((tool.auth_header.clone(), secret)),
            }
        }

        headers.extend(template_headers(&tool.header_template));
        Ok(headers)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        call: &Call,
        tool: &ToolRuntimeConfig,
        input: &Value,
        response: Option<Value>,
        status: ToolExecStatus,
        error_code: Option<&str>,
        latency_ms: i64,
    ) -> Result<ToolOutcome> {
        let execution_id = self
            .calls
            .insert_tool_execution(
                call.id,
                tool.tool_id,
                input,
                response.as_ref(),
                status,
                latency_ms,
                error_code,
            )
            .await?;

        let succeeded = status == ToolExecStatus::Success;
        let event = ToolExecutionEvent {
            execution_id,
            tool_id: tool.tool_id,
            tool_name: tool.name.clone(),
            status: status_label(status).into(),
            latency_ms,
            error_code: error_code.map(str::to_owned),
        };
        let event_type = if succeeded {
            events::TOOL_EXECUTION_SUCCEEDED
        } else {
            events::TOOL_EXECUTION_FAILED
        };
        if let Err(e) = self
            .events
            .append(call.id, event_type, serde_json::to_value(&event)?)
            .await
        {
            tracing::error!(error = %e, "tool execution event append failed");
        }

        Ok(ToolOutcome {
            execution_id,
            tool_id: tool.tool_id,
            tool_name: tool.name.clone(),
            status,
            response,
            error_code: error_code.map(str::to_owned),
            latency_ms,
        })
    }
}

enum WireFailure {
    Timeout,
    Status(u16, Option<Value>),
    Network(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn status_label(status: ToolExecStatus) -> &'static str {
    match status {
        ToolExecStatus::Success => "success",
        ToolExecStatus::Error => "error",
        ToolExecStatus::Timeout => "timeout",
    }
}

fn status_code_label(code: u16) -> &'static str {
    match code {
        401 | 403 => "endpoint_auth_failed",
        404 => "endpoint_not_found",
        429 => "endpoint_rate_limited",
        500..=599 => "endpoint_server_error",
        _ => "endpoint_error",
    }
}

/// Translate an object input into query-string pairs for GET tools.
/// Scalars keep their literal form; arrays and objects are stringified
/// JSON. Non-object inputs become a single `input` parameter.
fn query_pairs(input: &Value) -> Vec<(String, String)> {
    match input {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), scalar_string(value)))
            .collect(),
        other => vec![("input".into(), scalar_string(other))],
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Scalar entries of the endpoint header template; nested values are
/// ignored rather than serialized into headers.
fn template_headers(template: &Value) -> Vec<(String, String)> {
    let Some(map) = template.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key.clone(), s.clone())),
            Value::Number(n) => Some((key.clone(), n.to_string())),
            Value::Bool(b) => Some((key.clone(), b.to_string())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_stringify_non_primitives() {
        let input = json!({
            "email": "ana@ejemplo.com",
            "limit": 5,
            "verbose": true,
            "filters": { "status": "open" },
            "tags": ["a", "b"],
        });
        let mut pairs = query_pairs(&input);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("email".to_string(), "ana@ejemplo.com".to_string()),
                ("filters".to_string(), r#"{"status":"open"}"#.to_string()),
                ("limit".to_string(), "5".to_string()),
                ("tags".to_string(), r#"["a","b"]"#.to_string()),
                ("verbose".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn non_object_input_becomes_single_parameter() {
        assert_eq!(
            query_pairs(&json!([1, 2])),
            vec![("input".to_string(), "[1,2]".to_string())]
        );
    }

    #[test]
    fn template_headers_keep_scalars_only() {
        let template = json!({
            "X-Channel": "voice",
            "X-Version": 2,
            "X-Debug": false,
            "X-Nested": { "no": true },
        });
        let mut headers = template_headers(&template);
        headers.sort();
        assert_eq!(
            headers,
            vec![
                ("X-Channel".to_string(), "voice".to_string()),
                ("X-Debug".to_string(), "false".to_string()),
                ("X-Version".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn retryable_statuses_match_the_contract() {
        assert!(retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!retryable_status(StatusCode::BAD_REQUEST));
        assert!(!retryable_status(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!retryable_status(StatusCode::OK));
    }

    #[test]
    fn status_code_labels() {
        assert_eq!(status_code_label(403), "endpoint_auth_failed");
        assert_eq!(status_code_label(404), "endpoint_not_found");
        assert_eq!(status_code_label(503), "endpoint_server_error");
        assert_eq!(status_code_label(418), "endpoint_error");
    }
}
