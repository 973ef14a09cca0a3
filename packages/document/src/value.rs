//! Slot values and raw (unwrapped) input values

use crate::NodeId;
use std::collections::BTreeMap;

/// Value stored in a container slot. Containers are referenced by handle,
/// never stored inline, so every nested container is an observed node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Node(NodeId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Plain value handed to a write. Nested containers are wrapped into arena
/// nodes on assignment; `Raw::Node` refers to a node that is already
/// observed and is only re-parented.
#[derive(Debug, Clone, PartialEq)]
pub enum Raw {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Record {
        kind: String,
        fields: BTreeMap<String, Raw>,
    },
    Map(BTreeMap<String, Raw>),
    Seq(Vec<Raw>),
    Node(NodeId),
}

impl Raw {
    pub fn record<K: Into<String>>(
        kind: impl Into<String>,
        fields: impl IntoIterator<Item = (K, Raw)>,
    ) -> Raw {
        Raw::Record {
            kind: kind.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Raw)>) -> Raw {
        Raw::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn seq(items: impl IntoIterator<Item = Raw>) -> Raw {
        Raw::Seq(items.into_iter().collect())
    }

    /// True for values that become arena nodes when written
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Raw::Record { .. } | Raw::Map(_) | Raw::Seq(_) | Raw::Node(_)
        )
    }
}

impl From<Value> for Raw {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Raw::Null,
            Value::Bool(b) => Raw::Bool(b),
            Value::Number(n) => Raw::Number(n),
            Value::Str(s) => Raw::Str(s),
            Value::Node(id) => Raw::Node(id),
        }
    }
}

impl From<bool> for Raw {
    fn from(b: bool) -> Self {
        Raw::Bool(b)
    }
}

impl From<f64> for Raw {
    fn from(n: f64) -> Self {
        Raw::Number(n)
    }
}

impl From<i32> for Raw {
    fn from(n: i32) -> Self {
        Raw::Number(n as f64)
    }
}

impl From<i64> for Raw {
    fn from(n: i64) -> Self {
        Raw::Number(n as f64)
    }
}

impl From<usize> for Raw {
    fn from(n: usize) -> Self {
        Raw::Number(n as f64)
    }
}

impl From<&str> for Raw {
    fn from(s: &str) -> Self {
        Raw::Str(s.to_string())
    }
}

impl From<String> for Raw {
    fn from(s: String) -> Self {
        Raw::Str(s)
    }
}

impl From<NodeId> for Raw {
    fn from(id: NodeId) -> Self {
        Raw::Node(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_builders() {
        let raw = Raw::record("shape", [("id", "s1".into()), ("x", 10.into())]);
        match raw {
            Raw::Record { kind, fields } => {
                assert_eq!(kind, "shape");
                assert_eq!(fields.get("x"), Some(&Raw::Number(10.0)));
            }
            other => panic!("expected record, got {:?}", other),
        }

        assert!(Raw::seq([]).is_container());
        assert!(!Raw::from("text").is_container());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Number(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Str("a".into()).as_str(), Some("a"));
        assert_eq!(Value::Bool(true).as_f64(), None);
        assert!(Value::Null.is_null());
    }
}
