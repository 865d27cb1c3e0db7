//! Shared invoke parameter parsing.
//!
//! All capabilities accept loose JSON and validate field-by-field with
//! messages naming the offending field. Bounded numeric params must be
//! exact integers in range; doubles with a fractional part are rejected.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Utf8,
    Base64,
}

pub fn encoding_name(encoding: ContentEncoding) -> &'static str {
    match encoding {
        ContentEncoding::Utf8 => "utf8",
        ContentEncoding::Base64 => "base64",
    }
}

/// Selector normalization: trim, lowercase, strip `-`, `_`, and spaces.
pub fn normalize_token(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Parse an optional encoding field, defaulting to utf8.
pub fn parse_encoding(params: &Value, field: &str) -> Result<ContentEncoding, String> {
    let value = match params.get(field) {
        None | Some(Value::Null) => return Ok(ContentEncoding::Utf8),
        Some(value) => value,
    };
    let Some(text) = value.as_str() else {
        return Err(format!("{field} must be string"));
    };

    let normalized = normalize_token(text);
    if normalized.is_empty() || normalized == "utf8" {
        return Ok(ContentEncoding::Utf8);
    }
    if normalized == "base64" {
        return Ok(ContentEncoding::Base64);
    }
    Err(format!("{field} must be utf8 or base64"))
}

/// Parse an optional boolean field with a default.
pub fn parse_optional_bool(params: &Value, field: &str, default: bool) -> Result<bool, String> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(value)) => Ok(*value),
        Some(_) => Err(format!("{field} must be boolean")),
    }
}

/// Parse an optional bounded integer field with a default. The value
/// must be an exact integer within `[min, max]`.
pub fn parse_bounded_integer(
    params: &Value,
    field: &str,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, String> {
    let value = match params.get(field) {
        None | Some(Value::Null) => return Ok(default),
        Some(value) => value,
    };
    let Some(raw) = value.as_f64() else {
        return Err(format!("{field} must be number"));
    };

    let parsed = raw as i64;
    if !raw.is_finite() || raw < min as f64 || raw > max as f64 || raw != parsed as f64 {
        return Err(format!("{field} must be integer within [{min}, {max}]"));
    }
    Ok(parsed)
}

/// Decode invoke content per the declared encoding. An empty base64
/// string is an empty byte string; anything else must decode cleanly.
pub fn decode_content(content: &str, encoding: ContentEncoding) -> Result<Vec<u8>, String> {
    match encoding {
        ContentEncoding::Utf8 => Ok(content.as_bytes().to_vec()),
        ContentEncoding::Base64 => {
            if content.trim().is_empty() {
                return Ok(Vec::new());
            }
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|_| "content is not valid base64".to_string())
        }
    }
}

/// Encode file bytes for the result payload.
pub fn encode_content(bytes: &[u8], encoding: ContentEncoding) -> String {
    match encoding {
        ContentEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        ContentEncoding::Base64 => STANDARD.encode(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_token_strips_separators_and_case() {
        assert_eq!(normalize_token(" Base-64 "), "base64");
        assert_eq!(normalize_token("UTF_8"), "utf8");
        assert_eq!(normalize_token(""), "");
    }

    #[test]
    fn parse_encoding_defaults_and_aliases() {
        assert_eq!(
            parse_encoding(&json!({}), "encoding").unwrap(),
            ContentEncoding::Utf8
        );
        assert_eq!(
            parse_encoding(&json!({"encoding": null}), "encoding").unwrap(),
            ContentEncoding::Utf8
        );
        assert_eq!(
            parse_encoding(&json!({"encoding": "UTF-8"}), "encoding").unwrap(),
            ContentEncoding::Utf8
        );
        assert_eq!(
            parse_encoding(&json!({"encoding": "Base64"}), "encoding").unwrap(),
            ContentEncoding::Base64
        );
    }

    #[test]
    fn parse_encoding_rejects_unknown_values() {
        assert_eq!(
            parse_encoding(&json!({"encoding": "hex"}), "encoding"),
            Err("encoding must be utf8 or base64".to_string())
        );
        assert_eq!(
            parse_encoding(&json!({"encoding": 7}), "encoding"),
            Err("encoding must be string".to_string())
        );
    }

    #[test]
    fn parse_optional_bool_handles_defaults_and_shape() {
        assert!(parse_optional_bool(&json!({}), "append", true).unwrap());
        assert!(!parse_optional_bool(&json!({"append": false}), "append", true).unwrap());
        assert_eq!(
            parse_optional_bool(&json!({"append": "yes"}), "append", false),
            Err("append must be boolean".to_string())
        );
    }

    #[test]
    fn parse_bounded_integer_enforces_exact_integers_in_range() {
        let params = json!({"maxBytes": 1024});
        assert_eq!(
            parse_bounded_integer(&params, "maxBytes", 7, 1, 20_971_520).unwrap(),
            1024
        );
        assert_eq!(
            parse_bounded_integer(&json!({}), "maxBytes", 7, 1, 100).unwrap(),
            7
        );

        for bad in [json!(0), json!(20_971_521), json!(1.5), json!(-3)] {
            let params = json!({ "maxBytes": bad });
            assert_eq!(
                parse_bounded_integer(&params, "maxBytes", 7, 1, 20_971_520),
                Err("maxBytes must be integer within [1, 20971520]".to_string()),
                "value {bad} must be rejected"
            );
        }

        assert_eq!(
            parse_bounded_integer(&json!({"maxBytes": "10"}), "maxBytes", 7, 1, 100),
            Err("maxBytes must be number".to_string())
        );
    }

    #[test]
    fn integral_doubles_are_accepted() {
        let params = json!({"maxEntries": 200.0});
        assert_eq!(
            parse_bounded_integer(&params, "maxEntries", 1, 1, 5000).unwrap(),
            200
        );
    }

    #[test]
    fn decode_content_round_trips_both_encodings() {
        assert_eq!(
            decode_content("hello", ContentEncoding::Utf8).unwrap(),
            b"hello"
        );
        assert_eq!(
            decode_content("aGVsbG8=", ContentEncoding::Base64).unwrap(),
            b"hello"
        );
        assert_eq!(
            decode_content("", ContentEncoding::Base64).unwrap(),
            Vec::<u8>::new()
        );
        assert_eq!(
            decode_content("!!!", ContentEncoding::Base64),
            Err("content is not valid base64".to_string())
        );
    }

    #[test]
    fn encode_content_matches_encoding() {
        assert_eq!(encode_content(b"hi", ContentEncoding::Utf8), "hi");
        assert_eq!(encode_content(b"hi", ContentEncoding::Base64), "aGk=");
    }
}
