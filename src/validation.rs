//! Input validation against JSON schemas

use crate::error::{ConversionError, Result};
use serde_json::Value;

/// Validate input against a function card's input schema
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    if !input.is_object() {
        return Err(ConversionError::InvalidInput(
            "Input must be a JSON object".to_string(),
        ));
    }

    // Required fields
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field_str = field_name.as_str().ok_or_else(|| {
                ConversionError::InvalidInput(
                    "Invalid schema: required field not a string".to_string(),
                )
            })?;

            if input.get(field_str).is_none() {
                return Err(ConversionError::InvalidInput(format!(
                    "Missing required field: {}",
                    field_str
                )));
            }
        }
    }

    // Property types and enums
    if let (Some(properties), Some(input_obj)) = (
        schema.get("properties").and_then(|p| p.as_object()),
        input.as_object(),
    ) {
        for (key, value) in input_obj {
            if let Some(prop_schema) = properties.get(key) {
                validate_property(key, value, prop_schema)?;
            }
        }
    }

    Ok(())
}

fn validate_property(key: &str, value: &Value, schema: &Value) -> Result<()> {
    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let valid = match expected_type {
            "string" => value.is_string(),
            "integer" => value.is_u64() || value.is_i64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true, // Unknown types pass validation
        };

        if !valid {
            return Err(ConversionError::InvalidInput(format!(
                "Type mismatch for {}: expected {}, got {}",
                key, expected_type, value
            )));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(ConversionError::InvalidInput(format!(
                "Invalid value for {}: {} (allowed: {})",
                key,
                value,
                Value::Array(allowed.clone())
            )));
        }
    }

    let minimum = schema.get("minimum").and_then(|m| m.as_f64());
    if let (Some(minimum), Some(n)) = (minimum, value.as_f64()) {
        if n < minimum {
            return Err(ConversionError::InvalidInput(format!(
                "{} must be at least {}",
                key, minimum
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_required_fields() {
        let schema = json!({
            "type": "object",
            "required": ["file_name", "base64"]
        });

        let valid_input = json!({
            "file_name": "IMG_0001.CR2",
            "base64": "AAAA"
        });

        assert!(validate_input(&valid_input, &schema).is_ok());

        let invalid_input = json!({
            "file_name": "IMG_0001.CR2"
        });

        assert!(validate_input(&invalid_input, &schema).is_err());
    }

    #[test]
    fn test_validate_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "max_preview_edge": { "type": "integer", "minimum": 1 },
                "enforce_high_quality": { "type": "boolean" },
                "mode": { "type": "string", "enum": ["preview", "editing"] }
            }
        });

        let valid_input = json!({
            "max_preview_edge": 1600,
            "enforce_high_quality": true,
            "mode": "preview"
        });
        assert!(validate_input(&valid_input, &schema).is_ok());

        for invalid_input in [
            json!({ "max_preview_edge": "big" }),
            json!({ "max_preview_edge": 1.5 }),
            json!({ "max_preview_edge": 0 }),
            json!({ "mode": "fast" }),
            json!("not an object"),
        ] {
            assert!(validate_input(&invalid_input, &schema).is_err(), "{}", invalid_input);
        }
    }
}
