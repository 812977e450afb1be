//! Response contract shared with the model.
//!
//! The same schema value is sent as `responseSchema` in the generation request
//! and used locally to check whatever text comes back, since the model does
//! not always honour it.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::Formulation;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("response is not valid JSON: {0}")]
    Malformed(String),
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{path}` should be {expected}")]
    TypeMismatch { path: String, expected: String },
    #[error("field `{path}` needs at least {min} item(s)")]
    TooFewItems { path: String, min: u64 },
    #[error("field `{path}` must be at least {min}")]
    BelowMinimum { path: String, min: f64 },
}

/// Output shape requested from the model, in Gemini's schema dialect.
pub fn formulation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "productName": { "type": "STRING", "description": "生成された処方の製品名" },
            "productType": { "type": "STRING", "description": "製品のカテゴリ (例: 美容液, クリーム)" },
            "concept": { "type": "STRING", "description": "製品のコンセプトやキャッチコピー" },
            "suitability": { "type": "STRING", "description": "製品が適している肌質や得られる効果の概要" },
            "estimatedCost": { "type": "STRING", "description": "製品1個あたりの概算製造コスト (例: \"¥500〜¥800 / 100g\")" },
            "moq": { "type": "STRING", "description": "最小発注ロット (例: \"3,000個から\")" },
            "phases": {
                "type": "ARRAY",
                "description": "製造工程の各相（水相、油相など）",
                "minItems": 1,
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "phaseName": { "type": "STRING", "description": "相の名前 (例: A. 水相)" },
                        "ingredients": {
                            "type": "ARRAY",
                            "description": "その相に含まれる成分のリスト",
                            "minItems": 1,
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "name": { "type": "STRING", "description": "成分名" },
                                    "percentage": { "type": "NUMBER", "description": "配合率 (%)", "minimum": 0 },
                                    "role": { "type": "STRING", "description": "成分の役割 (例: 保湿剤, 乳化剤)" }
                                },
                                "required": ["name", "percentage", "role"]
                            }
                        }
                    },
                    "required": ["phaseName", "ingredients"]
                }
            },
            "instructions": {
                "type": "ARRAY",
                "description": "製造手順のステップバイステップガイド",
                "items": { "type": "STRING" }
            },
            "notes": {
                "type": "STRING",
                "description": "防腐、安定性、pH調整、使用感に関する追加の注意点"
            }
        },
        "required": [
            "productName", "productType", "concept", "suitability",
            "estimatedCost", "moq", "phases", "instructions", "notes"
        ]
    })
}

/// Removes a markdown code fence wrapped around a JSON reply.
///
/// Drops the whole leading fence line ("```", "```json", "``` js", ...) and a
/// trailing "```". Text without a fence comes back trimmed, so applying this
/// twice is a no-op.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let text = match text.strip_prefix("```") {
        Some(rest) => match rest.split_once('\n') {
            Some((_info, body)) => body,
            // Single-line reply such as ```json{...}```: drop the language tag only.
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == ' ' || c == '\t'),
        },
        None => text,
    };
    let text = text.trim_end();
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Checks `value` against a schema produced by [`formulation_schema`].
///
/// Recurses through `properties` and `items`, so a missing field deep inside
/// a phase is reported with its full path.
pub fn validate(value: &Value, schema: &Value) -> Result<(), SchemaViolation> {
    validate_at(value, schema, "")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), SchemaViolation> {
    let Some(kind) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    match kind {
        "OBJECT" => {
            let object = value.as_object().ok_or_else(|| mismatch(path, "an object"))?;
            validate_object(object, schema, path)
        }
        "ARRAY" => {
            let items = value.as_array().ok_or_else(|| mismatch(path, "an array"))?;
            if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min {
                    return Err(SchemaViolation::TooFewItems { path: display_path(path), min });
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_at(item, item_schema, &format!("{path}[{index}]"))?;
                }
            }
            Ok(())
        }
        "STRING" => value.as_str().map(|_| ()).ok_or_else(|| mismatch(path, "a string")),
        "NUMBER" | "INTEGER" => {
            let number = value.as_f64().ok_or_else(|| mismatch(path, "a number"))?;
            if kind == "INTEGER" && !(value.is_i64() || value.is_u64()) {
                return Err(mismatch(path, "an integer"));
            }
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if number < min {
                    return Err(SchemaViolation::BelowMinimum { path: display_path(path), min });
                }
            }
            Ok(())
        }
        "BOOLEAN" => value.as_bool().map(|_| ()).ok_or_else(|| mismatch(path, "a boolean")),
        _ => Ok(()),
    }
}

fn validate_object(object: &Map<String, Value>, schema: &Value, path: &str) -> Result<(), SchemaViolation> {
    let required = schema.get("required").and_then(Value::as_array).into_iter().flatten();
    for field in required.filter_map(Value::as_str) {
        match object.get(field) {
            None | Some(Value::Null) => return Err(SchemaViolation::MissingField(join(path, field))),
            Some(_) => {}
        }
    }
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, field_schema) in properties {
            if let Some(field_value) = object.get(field).filter(|v| !v.is_null()) {
                validate_at(field_value, field_schema, &join(path, field))?;
            }
        }
    }
    Ok(())
}

/// Turns raw model text into a [`Formulation`]: strip fence, parse, validate.
pub fn parse_formulation(raw: &str) -> Result<Formulation, SchemaViolation> {
    let cleaned = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| SchemaViolation::Malformed(e.to_string()))?;
    validate(&value, &formulation_schema())?;
    serde_json::from_value(value).map_err(|e| SchemaViolation::Malformed(e.to_string()))
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() { field.to_string() } else { format!("{path}.{field}") }
}

fn display_path(path: &str) -> String {
    if path.is_empty() { "$".to_string() } else { path.to_string() }
}

fn mismatch(path: &str, expected: &str) -> SchemaViolation {
    SchemaViolation::TypeMismatch { path: display_path(path), expected: expected.to_string() }
}
