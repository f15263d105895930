//! Explicit tool-command parsing.
//!
//! Grammar: `PREFIX <tool_name> <json>` — the prefix is configurable
//! (default `/tool`), the name is `[A-Za-z0-9_-]+`, and the rest of the
//! line must parse as JSON. Text that doesn't begin with the prefix is
//! not a command at all; text that does but breaks the grammar is a
//! syntax error surfaced to the caller.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// A successfully parsed explicit command.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub tool_name: String,
    pub input: Value,
}

/// The text started with the command prefix but violated the grammar.
#[derive(Debug, Clone)]
pub struct ToolCommandSyntaxError {
    pub message: String,
}

impl std::fmt::Display for ToolCommandSyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolCommandSyntaxError {}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern compiles"))
}

/// The caller-facing hint for a rejected command.
pub fn syntax_hint(prefix: &str) -> String {
    format!(
        "Formato de comando inválido. Use: {prefix} <nombre_herramienta> <json>. \
         Ejemplo: {prefix} lookup {{\"email\":\"ana@ejemplo.com\"}}"
    )
}

/// Parse user text as an explicit tool command.
///
/// `Ok(None)` — plain text, not a command.
/// `Ok(Some(..))` — well-formed command.
/// `Err(..)` — started like a command, but the grammar doesn't hold.
pub fn parse_command(
    text: &str,
    prefix: &str,
) -> Result<Option<ToolCommand>, ToolCommandSyntaxError> {
    let trimmed = text.trim();

    let rest = match trimmed.strip_prefix(prefix) {
        // The prefix must be its own token: "/tool lookup" is a
        // command, "/toolbox" is conversation.
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        _ => return Ok(None),
    };

    let rest = rest.trim_start();
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    if name.is_empty() {
        return Err(ToolCommandSyntaxError {
            message: "falta el nombre de la herramienta".into(),
        });
    }
    if !tool_name_pattern().is_match(name) {
        return Err(ToolCommandSyntaxError {
            message: format!("nombre de herramienta inválido: '{name}'"),
        });
    }
    if args.is_empty() {
        return Err(ToolCommandSyntaxError {
            message: "faltan los argumentos JSON".into(),
        });
    }

    let input: Value = serde_json::from_str(args).map_err(|e| ToolCommandSyntaxError {
        message: format!("los argumentos no son JSON válido: {e}"),
    })?;

    Ok(Some(ToolCommand {
        tool_name: name.to_owned(),
        input,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hola, necesito ayuda", "/tool").unwrap(), None);
        assert_eq!(parse_command("", "/tool").unwrap(), None);
    }

    #[test]
    fn prefix_must_be_a_whole_token() {
        assert_eq!(parse_command("/toolbox abre la caja", "/tool").unwrap(), None);
    }

    #[test]
    fn well_formed_command_parses() {
        let cmd = parse_command(r#"/tool lookup {"email":"ana@ejemplo.com"}"#, "/tool")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.tool_name, "lookup");
        assert_eq!(cmd.input, json!({"email":"ana@ejemplo.com"}));
    }

    #[test]
    fn configured_prefix_is_honored() {
        let cmd = parse_command(r#"/run lookup {}"#, "/run").unwrap().unwrap();
        assert_eq!(cmd.tool_name, "lookup");
        assert_eq!(parse_command(r#"/tool lookup {}"#, "/run").unwrap(), None);
    }

    #[test]
    fn bad_json_is_a_syntax_error() {
        let err = parse_command("/tool lookup not-json", "/tool").unwrap_err();
        assert!(err.message.contains("JSON"));
    }

    #[test]
    fn missing_parts_are_syntax_errors() {
        assert!(parse_command("/tool", "/tool").is_err());
        assert!(parse_command("/tool lookup", "/tool").is_err());
        assert!(parse_command("/tool look up {}", "/tool").is_err());
    }

    #[test]
    fn invalid_name_characters_are_rejected() {
        let err = parse_command(r#"/tool look.up {"a":1}"#, "/tool").unwrap_err();
        assert!(err.message.contains("look.up"));
    }

    #[test]
    fn non_object_json_still_parses() {
        let cmd = parse_command("/tool echo [1,2,3]", "/tool").unwrap().unwrap();
        assert_eq!(cmd.input, json!([1, 2, 3]));
    }

    #[test]
    fn hint_names_the_prefix() {
        assert!(syntax_hint("/run").contains("/run <nombre_herramienta> <json>"));
    }
}
