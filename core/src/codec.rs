//! Form-urlencoded payload codec.
//!
//! POST bodies are `key=value` pairs joined by `&`, each side escaped with
//! the `application/x-www-form-urlencoded` rules (space becomes `+`,
//! reserved bytes are percent-escaped). Encoding fails as a whole when any
//! value has no text form, so a partially-encoded body is never produced.

use serde_json::Value;
use url::form_urlencoded;

use crate::error::EncodeError;

/// A POST payload: field name to JSON-shaped value, in insertion order.
pub type Payload = serde_json::Map<String, Value>;

/// Encode `payload` as a form body.
pub fn encode_form(payload: &Payload) -> Result<String, EncodeError> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in payload {
        let text = stringify(key, value)?;
        serializer.append_pair(key, &text);
    }
    Ok(serializer.finish())
}

/// Decode a form body back into its pairs.
pub fn decode_form(body: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(body.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn stringify(key: &str, value: &Value) -> Result<String, EncodeError> {
    let kind = match value {
        Value::String(s) => return Ok(s.clone()),
        Value::Number(n) => return Ok(n.to_string()),
        Value::Bool(b) => return Ok(b.to_string()),
        Value::Null => "null",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    Err(EncodeError::Unstringifiable {
        key: key.to_string(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn encodes_pairs_in_insertion_order() {
        let body = encode_form(&payload(json!({"user": "ada", "level": 7, "vip": true}))).unwrap();
        assert_eq!(body, "user=ada&level=7&vip=true");
    }

    #[test]
    fn reserved_characters_survive_a_standard_decoder() {
        let original = "a&b=c d+e%f?";
        let body = encode_form(&payload(json!({"note": original}))).unwrap();
        assert!(!body.contains(' '));
        assert_eq!(body.matches('&').count(), 0);
        assert_eq!(decode_form(&body), vec![("note".to_string(), original.to_string())]);
    }

    #[test]
    fn keys_are_escaped_too() {
        let body = encode_form(&payload(json!({"a b": "1"}))).unwrap();
        assert_eq!(body, "a+b=1");
    }

    #[test]
    fn empty_payload_encodes_to_empty_body() {
        assert_eq!(encode_form(&Payload::new()).unwrap(), "");
    }

    #[test]
    fn null_value_fails_fast() {
        let err = encode_form(&payload(json!({"ok": "1", "missing": null}))).unwrap_err();
        assert_eq!(
            err,
            EncodeError::Unstringifiable {
                key: "missing".to_string(),
                kind: "null"
            }
        );
    }

    #[test]
    fn nested_values_are_rejected() {
        assert!(encode_form(&payload(json!({"items": [1, 2]}))).is_err());
        assert!(encode_form(&payload(json!({"inner": {"a": 1}}))).is_err());
    }

    #[test]
    fn unicode_values_round_trip() {
        let body = encode_form(&payload(json!({"name": "Zoë ✓"}))).unwrap();
        assert_eq!(decode_form(&body)[0].1, "Zoë ✓");
    }
}
