//! Minimal TwiML builders for webhook responses.

/// Escape a string for use in XML text or attribute values.
fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// `<Say>` the message and hang up — the refusal path.
pub fn say_hangup(message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Say language=\"es-MX\">{}</Say><Hangup/></Response>",
        xml_escape(message)
    )
}

/// Greet and connect the call's media to our stream endpoint. The
/// optional shared token rides along as a `<Parameter>` the carrier
/// echoes back in the stream's start frame.
pub fn connect_stream(greeting: &str, stream_url: &str, token: Option<&str>) -> String {
    let parameter = token
        .map(|t| {
            format!(
                "<Parameter name=\"token\" value=\"{}\"/>",
                xml_escape(t)
            )
        })
        .unwrap_or_default();

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Say language=\"es-MX\">{}</Say>\
         <Connect><Stream url=\"{}\">{}</Stream></Connect></Response>",
        xml_escape(greeting),
        xml_escape(stream_url),
        parameter
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangup_document_shape() {
        let xml = say_hangup("Lo sentimos, intente más tarde.");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Say language=\"es-MX\">Lo sentimos, intente más tarde.</Say>"));
        assert!(xml.ends_with("<Hangup/></Response>"));
    }

    #[test]
    fn stream_document_carries_token_parameter() {
        let xml = connect_stream(
            "Hola",
            "wss://connector.example/twilio/media",
            Some("s3cret"),
        );
        assert!(xml.contains("<Stream url=\"wss://connector.example/twilio/media\">"));
        assert!(xml.contains("<Parameter name=\"token\" value=\"s3cret\"/>"));
        assert!(xml.contains("<Connect>"));
    }

    #[test]
    fn stream_document_without_token_has_no_parameter() {
        let xml = connect_stream("Hola", "wss://c/media", None);
        assert!(!xml.contains("<Parameter"));
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let xml = say_hangup("a < b & \"c\"");
        assert!(xml.contains("a &lt; b &amp; &quot;c&quot;"));
    }
}
