//! One user turn, end to end: command parsing, optional LLM tool
//! choice, execution, and the agent's spoken reply.
//!
//! Shared by the media-stream path (final STT transcripts) and the
//! `user-turn` HTTP endpoint, so both run identical semantics.

use serde_json::{json, Value};
use uuid::Uuid;

use vx_domain::Error;
use vx_store::calls::{Call, Speaker};

use crate::llm::LlmDecision;
use crate::state::AppState;
use crate::tools::command::{self, ToolCommandSyntaxError};
use crate::tools::executor::ToolOutcome;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the turn failed, for the route layer to translate into a status.
pub enum TurnError {
    /// Tool-command grammar violation (HTTP 400).
    Syntax(ToolCommandSyntaxError),
    /// Tool executions for this call are over the per-minute cap (429).
    RateLimited(String),
    /// No LLM configured and mock mode off (503).
    LlmUnconfigured,
    /// Everything else (500).
    Internal(Error),
}

pub struct TurnOutcome {
    pub mode: &'static str,
    pub response_text: String,
    pub tool_execution: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve one caller utterance into the agent's textual response.
pub async fn run_user_turn(
    state: &AppState,
    call: &Call,
    text: &str,
) -> Result<TurnOutcome, TurnError> {
    // Explicit slash-command first.
    match command::parse_command(text, &state.config.tools.command_prefix) {
        Err(e) => return Err(TurnError::Syntax(e)),
        Ok(Some(cmd)) => {
            let (response_text, tool_execution) =
                run_tool(state, call, &cmd.tool_name, cmd.input).await?;
            return Ok(TurnOutcome {
                mode: "command",
                response_text,
                tool_execution,
            });
        }
        Ok(None) => {}
    }

    // Implicit LLM tool choice, when enabled.
    if state.llm.tool_calls_enabled() {
        let catalog = state
            .tools
            .catalog_for_agent(call.agent_id)
            .await
            .map_err(TurnError::Internal)?;
        let decision = state
            .llm
            .decide(text, &catalog)
            .await
            .map_err(TurnError::Internal)?;
        match decision {
            LlmDecision::ToolCall { tool_name, input } => {
                let (response_text, tool_execution) =
                    run_tool(state, call, &tool_name, input).await?;
                return Ok(TurnOutcome {
                    mode: "tool",
                    response_text,
                    tool_execution,
                });
            }
            LlmDecision::Response { text } => {
                return Ok(TurnOutcome {
                    mode: "chat",
                    response_text: text,
                    tool_execution: None,
                });
            }
        }
    }

    // Plain conversational turn.
    if !state.llm.is_configured() {
        return Err(TurnError::LlmUnconfigured);
    }
    let response_text = state
        .llm
        .respond(text)
        .await
        .map_err(TurnError::Internal)?;
    Ok(TurnOutcome {
        mode: "chat",
        response_text,
        tool_execution: None,
    })
}

/// Execute a tool and phrase the outcome for the caller.
async fn run_tool(
    state: &AppState,
    call: &Call,
    tool_name: &str,
    input: Value,
) -> Result<(String, Option<Value>), TurnError> {
    match state.executor.execute(call, tool_name, input).await {
        Ok(outcome) => {
            let text = if outcome.succeeded() {
                success_text(&outcome)
            } else {
                failure_text(
                    tool_name,
                    outcome.error_code.as_deref().unwrap_or("error"),
                )
            };
            Ok((text, Some(outcome_json(&outcome))))
        }
        Err(Error::RateLimited(message)) => Err(TurnError::RateLimited(message)),
        Err(Error::NotFound(_)) => Ok((failure_text(tool_name, "herramienta no encontrada"), None)),
        Err(Error::Forbidden(_)) => Ok((failure_text(tool_name, "herramienta no autorizada"), None)),
        Err(e) => Err(TurnError::Internal(e)),
    }
}

fn success_text(outcome: &ToolOutcome) -> String {
    let summary = outcome
        .response
        .as_ref()
        .map(|v| truncate(&v.to_string(), 280))
        .unwrap_or_else(|| "sin datos".into());
    format!(
        "La herramienta {} se ejecutó correctamente. Resultado: {summary}",
        outcome.tool_name
    )
}

/// The spoken Spanish fallback when a tool cannot run.
fn failure_text(tool_name: &str, detail: &str) -> String {
    format!("No pude ejecutar la herramienta {tool_name}. Error: {detail}")
}

fn outcome_json(outcome: &ToolOutcome) -> Value {
    json!({
        "execution_id": outcome.execution_id,
        "tool_id": outcome.tool_id,
        "tool_name": outcome.tool_name,
        "status": match outcome.status {
            vx_store::calls::ToolExecStatus::Success => "success",
            vx_store::calls::ToolExecStatus::Error => "error",
            vx_store::calls::ToolExecStatus::Timeout => "timeout",
        },
        "latency_ms": outcome.latency_ms,
        "error_code": outcome.error_code,
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent speech
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Speak a response: synthesize into the room, mirror the audio to the
/// carrier stream, and persist the agent utterance with its timing
/// window.
pub async fn agent_say(state: &AppState, call_id: Uuid, text: &str) -> vx_domain::Result<()> {
    let packet = state.sessions.speak(call_id, text).await?;
    state
        .bridges
        .send_media(call_id, &packet.samples, packet.sample_rate);
    state
        .calls
        .append_utterance(
            call_id,
            Speaker::Agent,
            text,
            packet.duration_ms() as i64,
            None,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_text_matches_spoken_fallback() {
        assert_eq!(
            failure_text("lookup", "request_timeout"),
            "No pude ejecutar la herramienta lookup. Error: request_timeout"
        );
    }

    #[test]
    fn truncate_preserves_short_text() {
        assert_eq!(truncate("hola", 10), "hola");
        let long = "x".repeat(300);
        let cut = truncate(&long, 280);
        assert_eq!(cut.chars().count(), 281); // 280 + ellipsis
        assert!(cut.ends_with('…'));
    }
}
