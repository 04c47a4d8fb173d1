//! Caesar-shift and base64 text codecs, supplied as raw callables.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use super::{arg_i64, arg_str, Param, ToolFunction, ToolSpec};

fn caesar_shift(text: &str, shift: i64) -> String {
    let shift = shift.rem_euclid(26);
    text.chars()
        .map(|c| {
            let base = if c.is_ascii_uppercase() {
                b'A'
            } else if c.is_ascii_lowercase() {
                b'a'
            } else {
                return c;
            };
            let offset = (c as u8 - base) as i64;
            let shifted = ((offset + shift) % 26) as u8;
            (base + shifted) as char
        })
        .collect()
}

fn text_and_shift() -> Vec<Param> {
    vec![Param::new("text", "str"), Param::new("shift", "int")]
}

/// Encode text using Caesar shift.
pub struct CaesarShiftEncode;

#[async_trait]
impl ToolFunction for CaesarShiftEncode {
    fn name(&self) -> &str {
        "caesar_shift_encode"
    }

    fn description(&self) -> &str {
        "Encode text using Caesar shift.\n\n    Args:\n        text: The text to encode\n        shift: The number of positions to shift forward (positive number)"
    }

    fn parameters(&self) -> Vec<Param> {
        text_and_shift()
    }

    fn returns(&self) -> Option<&str> {
        Some("str")
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let text = arg_str(&args, "text")?;
        let shift = arg_i64(&args, "shift")?;
        Ok(json!(caesar_shift(text, shift)))
    }
}

/// Decode text that was encoded using Caesar shift.
pub struct CaesarShiftDecode;

#[async_trait]
impl ToolFunction for CaesarShiftDecode {
    fn name(&self) -> &str {
        "caesar_shift_decode"
    }

    fn description(&self) -> &str {
        "Decode text that was encoded using Caesar shift.\n\n    Args:\n        text: The encoded text to decode\n        shift: The number of positions to shift back (positive number)"
    }

    fn parameters(&self) -> Vec<Param> {
        text_and_shift()
    }

    fn returns(&self) -> Option<&str> {
        Some("str")
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let text = arg_str(&args, "text")?;
        let shift = arg_i64(&args, "shift")?;
        // rem_euclid first so i64::MIN never reaches a negation.
        Ok(json!(caesar_shift(text, 26 - shift.rem_euclid(26))))
    }
}

/// Encode text using base64.
pub struct Base64Encode;

#[async_trait]
impl ToolFunction for Base64Encode {
    fn name(&self) -> &str {
        "base64_encode"
    }

    fn description(&self) -> &str {
        "Encode text using base64."
    }

    fn parameters(&self) -> Vec<Param> {
        vec![Param::new("text", "str")]
    }

    fn returns(&self) -> Option<&str> {
        Some("str")
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let text = arg_str(&args, "text")?;
        Ok(json!(STANDARD.encode(text.as_bytes())))
    }
}

/// Decode text that was encoded using base64. Missing padding is tolerated.
pub struct Base64Decode;

#[async_trait]
impl ToolFunction for Base64Decode {
    fn name(&self) -> &str {
        "base64_decode"
    }

    fn description(&self) -> &str {
        "Decode text that was encoded using base64.\n\n    Raises:\n        Exception: If the input is not valid base64"
    }

    fn parameters(&self) -> Vec<Param> {
        vec![Param::new("text", "str")]
    }

    fn returns(&self) -> Option<&str> {
        Some("str")
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let mut text = arg_str(&args, "text")?.to_string();
        let padding = (4 - text.len() % 4) % 4;
        text.extend(std::iter::repeat('=').take(padding));

        let bytes = STANDARD
            .decode(text.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid base64 input: {}", e))?;
        let decoded =
            String::from_utf8(bytes).map_err(|e| anyhow::anyhow!("Invalid base64 input: {}", e))?;
        Ok(json!(decoded))
    }
}

pub fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::function(CaesarShiftDecode),
        ToolSpec::function(Base64Decode),
        ToolSpec::function(CaesarShiftEncode),
        ToolSpec::function(Base64Encode),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caesar_wraps_and_keeps_punctuation() {
        assert_eq!(caesar_shift("xyz, ABC!", 3), "abc, DEF!");
        assert_eq!(caesar_shift("abc", -3), "xyz");
    }

    #[test]
    fn extreme_shifts_do_not_overflow() {
        assert_eq!(caesar_shift("b", i64::MAX), caesar_shift("b", i64::MAX % 26));
        assert_eq!(caesar_shift("b", i64::MIN), caesar_shift("b", i64::MIN.rem_euclid(26)));
    }

    #[tokio::test]
    async fn decode_handles_extreme_shifts() {
        let decoded = CaesarShiftDecode
            .call(json!({"text": "abc", "shift": i64::MIN}))
            .await
            .unwrap();
        let encoded = CaesarShiftEncode
            .call(json!({"text": decoded, "shift": i64::MIN}))
            .await
            .unwrap();
        assert_eq!(encoded, json!("abc"));
    }

    #[tokio::test]
    async fn decode_reverses_encode() {
        let encoded = CaesarShiftEncode
            .call(json!({"text": "The work is mysterious", "shift": 7}))
            .await
            .unwrap();
        let decoded = CaesarShiftDecode
            .call(json!({"text": encoded, "shift": 7}))
            .await
            .unwrap();
        assert_eq!(decoded, json!("The work is mysterious"));
    }

    #[tokio::test]
    async fn base64_decode_adds_missing_padding() {
        let decoded = Base64Decode
            .call(json!({"text": "VGhybCB6dnRsYW9wdW4gZHZ1a2x5bWJz"}))
            .await
            .unwrap();
        assert_eq!(decoded, json!("Thrl zvtlaopun dvuklymbs"));

        let padded = Base64Decode
            .call(json!({"text": "aGk"}))
            .await
            .unwrap();
        assert_eq!(padded, json!("hi"));
    }

    #[tokio::test]
    async fn base64_decode_rejects_garbage() {
        let err = Base64Decode
            .call(json!({"text": "!!!!"}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid base64 input"));
    }
}
