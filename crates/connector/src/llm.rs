//! LLM reasoning client.
//!
//! Speaks the OpenAI-compatible chat-completions contract; any endpoint
//! following it works. Mock mode returns deterministic text so the full
//! voice loop runs offline. For the implicit tool path the model is
//! asked for strictly one of two JSON shapes; anything else — bad JSON,
//! unknown tool — degrades to a plain response rather than failing the
//! turn.

use std::time::Duration;

use serde_json::{json, Value};

use vx_domain::config::{AiMode, LlmConfig};
use vx_domain::{Error, Result};
use vx_store::tools::ToolCatalogEntry;

const SYSTEM_PROMPT: &str = "Eres un asistente de voz telefónico. Responde en una o dos \
     frases claras y naturales, en el idioma del usuario.";

/// What the model decided to do with a user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmDecision {
    Response { text: String },
    ToolCall { tool_name: String, input: Value },
}

pub struct LlmClient {
    cfg: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { cfg, http })
    }

    /// Whether a turn can produce a response at all. Mock mode always
    /// can; openai mode needs a key.
    pub fn is_configured(&self) -> bool {
        match self.cfg.mode {
            AiMode::Mock => true,
            AiMode::Openai => self.cfg.api_key.is_some(),
        }
    }

    pub fn tool_calls_enabled(&self) -> bool {
        self.cfg.tool_calls_enabled && self.cfg.mode == AiMode::Openai
    }

    /// Plain conversational response.
    pub async fn respond(&self, user_text: &str) -> Result<String> {
        match self.cfg.mode {
            AiMode::Mock => Ok(mock_response(user_text)),
            AiMode::Openai => self.chat(SYSTEM_PROMPT, user_text).await,
        }
    }

    /// Ask the model to answer or pick a tool from the catalog.
    pub async fn decide(
        &self,
        user_text: &str,
        catalog: &[ToolCatalogEntry],
    ) -> Result<LlmDecision> {
        if self.cfg.mode == AiMode::Mock || catalog.is_empty() {
            return Ok(LlmDecision::Response {
                text: self.respond(user_text).await?,
            });
        }

        let tool_lines: Vec<String> = catalog
            .iter()
            .map(|t| format!("- {}: {} (schema: {})", t.name, t.description, t.input_schema))
            .collect();
        let system = format!(
            "{SYSTEM_PROMPT}\n\
             Tienes estas herramientas disponibles:\n{}\n\
             Responde ESTRICTAMENTE con un único objeto JSON, sin texto adicional:\n\
             {{\"type\":\"response\",\"text\":\"...\"}} para contestar directamente, o\n\
             {{\"type\":\"tool_call\",\"tool_name\":\"...\",\"input_json\":{{...}}}} \
             para invocar una herramienta.",
            tool_lines.join("\n")
        );

        let content = self.chat(&system, user_text).await?;
        let known: Vec<&str> = catalog.iter().map(|t| t.name.as_str()).collect();
        Ok(parse_decision(&content, &known))
    }

    async fn chat(&self, system: &str, user_text: &str) -> Result<String> {
        let api_key = self
            .cfg
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("llm.api_key unset".into()))?;

        let response = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.cfg.model,
                "temperature": 0.2,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user_text },
                ],
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("llm request: {e}"))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("llm returned {status}: {body}")));
        }

        let body: Value = response.json().await.map_err(|e| Error::Http(e.to_string()))?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_owned())
            .ok_or_else(|| Error::Http("llm response missing choices[0].message.content".into()))
    }
}

/// Deterministic offline response.
fn mock_response(user_text: &str) -> String {
    format!("(demo) Entendido: \"{}\". ¿Algo más en lo que pueda ayudarle?", user_text.trim())
}

/// Interpret the model's decision output. Anything that isn't a
/// well-formed tool call against a known tool becomes a plain response.
fn parse_decision(content: &str, known_tools: &[&str]) -> LlmDecision {
    let parsed: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(_) => {
            return LlmDecision::Response {
                text: content.to_owned(),
            }
        }
    };

    match parsed.get("type").and_then(Value::as_str) {
        Some("tool_call") => {
            let tool_name = parsed
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or("");
            if !known_tools.contains(&tool_name) {
                let text = parsed
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| {
                        "Lo siento, no puedo usar esa herramienta ahora mismo.".to_owned()
                    });
                return LlmDecision::Response { text };
            }
            // `input_json` may arrive as an object or as a JSON string.
            let input = match parsed.get("input_json") {
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or(Value::Object(Default::default()))
                }
                Some(value) => value.clone(),
                None => Value::Object(Default::default()),
            };
            LlmDecision::ToolCall {
                tool_name: tool_name.to_owned(),
                input,
            }
        }
        Some("response") => LlmDecision::Response {
            text: parsed
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or(content)
                .to_owned(),
        },
        _ => LlmDecision::Response {
            text: content.to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_mode_is_deterministic_and_configured() {
        let client = LlmClient::new(LlmConfig::default()).unwrap();
        assert!(client.is_configured());
        assert!(!client.tool_calls_enabled());
    }

    #[test]
    fn openai_mode_without_key_is_unconfigured() {
        let cfg = LlmConfig {
            mode: AiMode::Openai,
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(!LlmClient::new(cfg).unwrap().is_configured());
    }

    #[test]
    fn decision_parses_tool_call() {
        let decision = parse_decision(
            r#"{"type":"tool_call","tool_name":"lookup","input_json":{"email":"a@b.co"}}"#,
            &["lookup"],
        );
        assert_eq!(
            decision,
            LlmDecision::ToolCall {
                tool_name: "lookup".into(),
                input: json!({"email":"a@b.co"}),
            }
        );
    }

    #[test]
    fn decision_accepts_stringified_input_json() {
        let decision = parse_decision(
            r#"{"type":"tool_call","tool_name":"lookup","input_json":"{\"email\":\"a@b.co\"}"}"#,
            &["lookup"],
        );
        assert_eq!(
            decision,
            LlmDecision::ToolCall {
                tool_name: "lookup".into(),
                input: json!({"email":"a@b.co"}),
            }
        );
    }

    #[test]
    fn unknown_tool_degrades_to_response() {
        let decision = parse_decision(
            r#"{"type":"tool_call","tool_name":"hack","input_json":{}}"#,
            &["lookup"],
        );
        assert!(matches!(decision, LlmDecision::Response { .. }));
    }

    #[test]
    fn plain_text_and_bad_json_degrade_to_response() {
        assert_eq!(
            parse_decision("Claro, puedo ayudarle con eso.", &["lookup"]),
            LlmDecision::Response {
                text: "Claro, puedo ayudarle con eso.".into()
            }
        );
        assert!(matches!(
            parse_decision(r#"{"type":"other"}"#, &["lookup"]),
            LlmDecision::Response { .. }
        ));
    }

    #[test]
    fn response_type_extracts_text() {
        assert_eq!(
            parse_decision(r#"{"type":"response","text":"Hola"}"#, &[]),
            LlmDecision::Response { text: "Hola".into() }
        );
    }
}
