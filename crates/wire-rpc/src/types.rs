//! The JSON type enumeration used by parameter schemas (C3).
//!
//! The wire value itself is `serde_json::Value` — the data model's get
//! type/size/lookup/iterate/append operations are already exactly what
//! `serde_json::Value` provides, so there is no bespoke value type here.

use serde_json::Value;

/// The JSON value kinds a procedure's parameter schema can name. Distinct
/// from `serde_json::Value`'s own discriminant because JSON-RPC call sites
/// (and `examples/original_source/src/server/Procedure.cc`'s `validateGeneric`)
/// distinguish `int32`/`int64`/`double`, where `serde_json::Number` only
/// distinguishes "fits in i64" from "is a float".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Bool,
    Int32,
    Int64,
    Double,
    String,
    Array,
    Object,
}

impl JsonType {
    /// Classifies a `serde_json::Value` into the schema type system above.
    pub fn classify(value: &Value) -> JsonType {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Bool,
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    match i32::try_from(n.as_i64().unwrap_or(i64::MAX)) {
                        Ok(_) if !n.to_string().contains('.') => JsonType::Int32,
                        _ => JsonType::Int64,
                    }
                } else {
                    JsonType::Double
                }
            }
        }
    }

    /// Whether `value` is an instance of this declared type.
    pub fn matches(self, value: &Value) -> bool {
        Self::classify(value) == self
    }
}
