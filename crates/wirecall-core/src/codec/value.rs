//! Default value codec over `serde_json::Value`.

use super::ValueCodec;
use crate::error::{Result, WirecallError};
use crate::types::{TypeDescriptor, ValueKind};
use serde_json::{Number, Value};

/// Lenient JSON value conversion.
///
/// Scalars are coerced where the intent is unambiguous: numeric strings to
/// numbers, integral floats to integers, `"true"`/`"false"` to booleans and
/// numbers or booleans to strings. Containers must already have the right
/// shape. `null` is only accepted by nullable, unit and any targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueCodec;

impl JsonValueCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ValueCodec for JsonValueCodec {
    fn convert(&self, raw: Value, target: &TypeDescriptor) -> Result<Value> {
        if raw.is_null() {
            return match target.kind() {
                ValueKind::Any | ValueKind::Unit => Ok(Value::Null),
                _ if target.is_nullable() => Ok(Value::Null),
                _ => Err(mismatch(&raw, target)),
            };
        }

        match target.kind() {
            ValueKind::Any => Ok(raw),
            ValueKind::Unit => Ok(Value::Null),
            ValueKind::Bool => to_bool(raw, target),
            ValueKind::Integer => to_integer(raw, target),
            ValueKind::Float => to_float(raw, target),
            ValueKind::String => match raw {
                Value::String(_) => Ok(raw),
                Value::Number(_) | Value::Bool(_) => Ok(Value::String(raw.to_string())),
                other => Err(mismatch(&other, target)),
            },
            ValueKind::Array if raw.is_array() => Ok(raw),
            ValueKind::Object if raw.is_object() => Ok(raw),
            ValueKind::Array | ValueKind::Object => Err(mismatch(&raw, target)),
        }
    }
}

fn to_bool(raw: Value, target: &TypeDescriptor) -> Result<Value> {
    match &raw {
        Value::Bool(_) => Ok(raw),
        Value::String(s) => match s.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch(&raw, target)),
        },
        _ => Err(mismatch(&raw, target)),
    }
}

fn to_integer(raw: Value, target: &TypeDescriptor) -> Result<Value> {
    match &raw {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64))
            .ok_or_else(|| mismatch(&raw, target)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::from)
                .or_else(|_| s.parse::<u64>().map(Value::from))
                .map_err(|_| mismatch(&raw, target))
        }
        _ => Err(mismatch(&raw, target)),
    }
}

fn to_float(raw: Value, target: &TypeDescriptor) -> Result<Value> {
    match &raw {
        Value::Number(_) => Ok(raw),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch(&raw, target)),
        _ => Err(mismatch(&raw, target)),
    }
}

fn mismatch(raw: &Value, target: &TypeDescriptor) -> WirecallError {
    WirecallError::serialization(format!(
        "cannot convert {} value to {}",
        ValueKind::of_value(raw),
        target
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_value;
    use serde_json::json;

    fn convert<T: crate::types::Describe>(raw: Value) -> Result<Value> {
        JsonValueCodec::new().convert(raw, &TypeDescriptor::of::<T>())
    }

    #[test]
    fn test_exact_kinds_pass_through() {
        assert_eq!(convert::<String>(json!("hi")).unwrap(), json!("hi"));
        assert_eq!(convert::<i32>(json!(7)).unwrap(), json!(7));
        assert_eq!(convert::<Vec<i32>>(json!([1, 2])).unwrap(), json!([1, 2]));
        assert_eq!(convert::<Value>(json!({"k": 1})).unwrap(), json!({"k": 1}));
    }

    #[test]
    fn test_scalar_coercions() {
        assert_eq!(convert::<i64>(json!("42")).unwrap(), json!(42));
        assert_eq!(convert::<i64>(json!(3.0)).unwrap(), json!(3));
        assert_eq!(convert::<f64>(json!("2.5")).unwrap(), json!(2.5));
        assert_eq!(convert::<bool>(json!("true")).unwrap(), json!(true));
        assert_eq!(convert::<String>(json!(12)).unwrap(), json!("12"));
    }

    #[test]
    fn test_mismatches_are_serialization_errors() {
        assert!(matches!(
            convert::<i64>(json!(3.5)),
            Err(WirecallError::Serialization { .. })
        ));
        assert!(convert::<i64>(json!("forty")).is_err());
        assert!(convert::<Vec<i32>>(json!("not a list")).is_err());
        assert!(convert::<String>(json!({"a": 1})).is_err());
    }

    #[test]
    fn test_null_handling() {
        assert!(convert::<String>(Value::Null).is_err());
        assert_eq!(convert::<Option<String>>(Value::Null).unwrap(), Value::Null);
        assert_eq!(convert::<()>(json!("ignored")).unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_value_into_typed() {
        let n: u16 = decode_value(&JsonValueCodec, json!("80"), &TypeDescriptor::of::<u16>())
            .unwrap();
        assert_eq!(n, 80);

        // Converted fine, but out of range for the Rust type.
        let err = decode_value::<u8>(&JsonValueCodec, json!(300), &TypeDescriptor::of::<u8>())
            .unwrap_err();
        assert!(matches!(err, WirecallError::Serialization { .. }));
    }
}
