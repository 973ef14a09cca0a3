//! Conversion between document values and JSON

use crate::{Body, Document, Raw, Value};
use serde_json::{Map, Number};

/// Field marking a JSON object as a typed record
pub const TYPE_KEY: &str = "typeId";

/// Imports plain data into raw values and exports document values back
pub trait AttrCodec: std::fmt::Debug {
    fn decode(&self, json: &serde_json::Value) -> Raw;
    fn encode(&self, doc: &Document, value: &Value) -> serde_json::Value;
}

/// Default codec. Objects carrying a string `typeId` become records, other
/// objects become maps, and integral numbers are exported as integers.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl AttrCodec for JsonCodec {
    fn decode(&self, json: &serde_json::Value) -> Raw {
        match json {
            serde_json::Value::Null => Raw::Null,
            serde_json::Value::Bool(b) => Raw::Bool(*b),
            serde_json::Value::Number(n) => Raw::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Raw::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Raw::Seq(items.iter().map(|item| self.decode(item)).collect())
            }
            serde_json::Value::Object(object) => {
                let fields = object
                    .iter()
                    .filter(|(k, _)| k.as_str() != TYPE_KEY)
                    .map(|(k, v)| (k.clone(), self.decode(v)))
                    .collect();
                match object.get(TYPE_KEY).and_then(|t| t.as_str()) {
                    Some(kind) => Raw::Record {
                        kind: kind.to_string(),
                        fields,
                    },
                    None => Raw::Map(fields),
                }
            }
        }
    }

    fn encode(&self, doc: &Document, value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => encode_number(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Node(id) => match doc.node(*id).map(|n| n.body()) {
                Some(Body::Record { kind, fields }) => {
                    let mut object = Map::new();
                    object.insert(TYPE_KEY.to_string(), serde_json::Value::String(kind.clone()));
                    for (k, v) in fields {
                        object.insert(k.clone(), self.encode(doc, v));
                    }
                    serde_json::Value::Object(object)
                }
                Some(Body::Map(entries)) => serde_json::Value::Object(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), self.encode(doc, v)))
                        .collect(),
                ),
                Some(Body::Seq(items)) => {
                    serde_json::Value::Array(items.iter().map(|v| self.encode(doc, v)).collect())
                }
                None => {
                    tracing::warn!("[JsonCodec] dangling node handle {}", id);
                    serde_json::Value::Null
                }
            },
        }
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn encode_number(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
