//! Conversion between [`Value`] and `serde_json::Value`, used only by the
//! JSON-literal opcode (`0x0F`): its payload is a JKSN text node holding a
//! JSON document, embedded verbatim rather than translated field-by-field.

use crate::value::Value;
use jksn_base::{Error, ErrorKind, Result};

pub(crate) fn parse_json_literal(text: &str) -> Result<Value> {
    let v: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::from(ErrorKind::JsonLiteralInvalid(e.to_string())))?;
    Ok(from_serde_json(v))
}

fn from_serde_json(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_serde_json).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (Value::Text(k), from_serde_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_parse_json_literal_object() {
        let v = parse_json_literal(r#"{"a":1,"b":[true,null]}"#).unwrap();
        assert_eq!(
            v,
            Value::Map(vec![
                (Value::Text("a".into()), Value::Int(1)),
                (
                    Value::Text("b".into()),
                    Value::Array(vec![Value::Bool(true), Value::Null])
                ),
            ])
        );
    }
}
