//! Cleanup and validation of raw service responses.

use serde_json::Value;

use crate::error::Unavailable;
use crate::models::task::ExtractedFields;

/// Trim and remove one surrounding markdown code fence.
///
/// Strips a leading "```json" or "```" and a trailing "```", trimming
/// whitespace before and after.
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse a response into fields.
///
/// Only a flat JSON object with string values is accepted.
pub fn parse_fields(raw: &str) -> Result<ExtractedFields, Unavailable> {
    let cleaned = strip_fences(raw);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| Unavailable::Malformed(format!("not JSON ({}): {}", e, preview(cleaned))))?;

    let Value::Object(map) = value else {
        return Err(Unavailable::Malformed(format!(
            "expected a JSON object: {}",
            preview(cleaned)
        )));
    };

    map.into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            other => Err(Unavailable::Malformed(format!(
                "field {} is not a string: {}",
                key, other
            ))),
        })
        .collect()
}

/// First 120 characters, for error messages.
fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_response_key_order_is_kept() {
        let raw = r#"{"tracking_number":"SPX123","sender_address":"Not found","delivery_date":"Not found"}"#;
        let fields = parse_fields(raw).unwrap();

        let keys: Vec<_> = fields.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tracking_number", "sender_address", "delivery_date"]);
        assert_eq!(serde_json::to_string(&fields).unwrap(), raw);
    }

    #[test]
    fn test_fenced_equals_bare() {
        let fenced = parse_fields("```json {\"a\":\"b\"} ```").unwrap();
        let bare = parse_fields("{\"a\":\"b\"}").unwrap();
        assert_eq!(fenced, bare);
        assert_eq!(bare.get("a"), Some("b"));
    }

    #[test]
    fn test_strip_fences_variants() {
        assert_eq!(strip_fences("  ```json\n{}\n```  "), "{}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("{}"), "{}");
        assert_eq!(strip_fences("{}\n```"), "{}");
    }

    #[test]
    fn test_prose_is_malformed() {
        let err = parse_fields("Sure! Here are the fields you asked for.").unwrap_err();
        assert!(matches!(err, Unavailable::Malformed(_)));
    }

    #[test]
    fn test_non_object_or_nested_is_malformed() {
        assert!(matches!(parse_fields("[\"a\"]"), Err(Unavailable::Malformed(_))));
        assert!(matches!(
            parse_fields("{\"a\": {\"b\": \"c\"}}"),
            Err(Unavailable::Malformed(_))
        ));
        assert!(matches!(parse_fields("{\"a\": 1}"), Err(Unavailable::Malformed(_))));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "đ".repeat(200);
        let short = preview(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), 123);
    }
}
