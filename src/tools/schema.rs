//! 工具参数 Schema
//!
//! schema_of::<T>() 用 schemars 从参数结构体生成 JSON Schema；
//! validate_arguments 交给 jsonschema 校验模型给出的参数（含 allOf / $ref / format）。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 参数结构体的 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 校验 args；多条错误以 `; ` 连接，每条带实例路径，如 `/origin: 7 is not of type "string"`
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let validator = jsonschema::options()
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| format!("invalid tool schema: {e}"))?;
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{path}: {e}")
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
