//! # Commands
//!
//! Structured, serializable edit operations exchanged between replicas.
//!
//! ## Design
//!
//! - A [`Cmd`] names its target by stable ids, never by internal node ids
//! - `value` is the payload sent to other replicas; `before` stays local and
//!   is only used to build the inverse for undo
//! - Every command has an inverse obtained by pairing kinds
//!   (Insert ↔ Delete, Move ↔ Move, Modify ↔ Modify, group ↔ ungroup) and
//!   swapping `value` and `before`
//! - Unknown op kinds survive a round trip through JSON as
//!   [`OpKind::Other`] so newer senders do not break older receivers

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a command, serialized as its name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OpKind {
    PageInsert,
    PageDelete,
    PageModify,
    PageMove,
    ShapeInsert,
    ShapeDelete,
    ShapeModify,
    ShapeMove,
    ShapeArrayAttrInsert,
    ShapeArrayAttrDelete,
    ShapeArrayAttrModify,
    ShapeArrayAttrMove,
    TextInsert,
    TextDelete,
    TextModify,
    TableInsert,
    TableDelete,
    TableModify,
    Group,
    Other(String),
}

impl OpKind {
    pub fn as_str(&self) -> &str {
        match self {
            OpKind::PageInsert => "PageInsert",
            OpKind::PageDelete => "PageDelete",
            OpKind::PageModify => "PageModify",
            OpKind::PageMove => "PageMove",
            OpKind::ShapeInsert => "ShapeInsert",
            OpKind::ShapeDelete => "ShapeDelete",
            OpKind::ShapeModify => "ShapeModify",
            OpKind::ShapeMove => "ShapeMove",
            OpKind::ShapeArrayAttrInsert => "ShapeArrayAttrInsert",
            OpKind::ShapeArrayAttrDelete => "ShapeArrayAttrDelete",
            OpKind::ShapeArrayAttrModify => "ShapeArrayAttrModify",
            OpKind::ShapeArrayAttrMove => "ShapeArrayAttrMove",
            OpKind::TextInsert => "TextInsert",
            OpKind::TextDelete => "TextDelete",
            OpKind::TextModify => "TextModify",
            OpKind::TableInsert => "TableInsert",
            OpKind::TableDelete => "TableDelete",
            OpKind::TableModify => "TableModify",
            OpKind::Group => "Group",
            OpKind::Other(name) => name,
        }
    }

    /// Attribute writes. Only these may be folded together by the merger.
    pub fn is_modify(&self) -> bool {
        matches!(
            self,
            OpKind::PageModify
                | OpKind::ShapeModify
                | OpKind::ShapeArrayAttrModify
                | OpKind::TextModify
                | OpKind::TableModify
        )
    }

    /// Kinds that change tree structure or element order
    pub fn is_structural(&self) -> bool {
        !self.is_modify()
    }

    /// Kind of the inverse command
    pub fn inverse(&self) -> OpKind {
        match self {
            OpKind::PageInsert => OpKind::PageDelete,
            OpKind::PageDelete => OpKind::PageInsert,
            OpKind::ShapeInsert => OpKind::ShapeDelete,
            OpKind::ShapeDelete => OpKind::ShapeInsert,
            OpKind::ShapeArrayAttrInsert => OpKind::ShapeArrayAttrDelete,
            OpKind::ShapeArrayAttrDelete => OpKind::ShapeArrayAttrInsert,
            OpKind::TextInsert => OpKind::TextDelete,
            OpKind::TextDelete => OpKind::TextInsert,
            OpKind::TableInsert => OpKind::TableDelete,
            OpKind::TableDelete => OpKind::TableInsert,
            other => other.clone(),
        }
    }
}

impl From<String> for OpKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "PageInsert" => OpKind::PageInsert,
            "PageDelete" => OpKind::PageDelete,
            "PageModify" => OpKind::PageModify,
            "PageMove" => OpKind::PageMove,
            "ShapeInsert" => OpKind::ShapeInsert,
            "ShapeDelete" => OpKind::ShapeDelete,
            "ShapeModify" => OpKind::ShapeModify,
            "ShapeMove" => OpKind::ShapeMove,
            "ShapeArrayAttrInsert" => OpKind::ShapeArrayAttrInsert,
            "ShapeArrayAttrDelete" => OpKind::ShapeArrayAttrDelete,
            "ShapeArrayAttrModify" => OpKind::ShapeArrayAttrModify,
            "ShapeArrayAttrMove" => OpKind::ShapeArrayAttrMove,
            "TextInsert" => OpKind::TextInsert,
            "TextDelete" => OpKind::TextDelete,
            "TextModify" => OpKind::TextModify,
            "TableInsert" => OpKind::TableInsert,
            "TableDelete" => OpKind::TableDelete,
            "TableModify" => OpKind::TableModify,
            "Group" => OpKind::Group,
            _ => OpKind::Other(name),
        }
    }
}

impl From<OpKind> for String {
    fn from(kind: OpKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a target path: a stable id, or a table cell coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSeg {
    Id(String),
    Cell { row: usize, col: usize },
}

impl From<&str> for PathSeg {
    fn from(id: &str) -> Self {
        PathSeg::Id(id.to_string())
    }
}

impl fmt::Display for PathSeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSeg::Id(id) => f.write_str(id),
            PathSeg::Cell { row, col } => write!(f, "[{},{}]", row, col),
        }
    }
}

/// A structured edit operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    #[serde(rename = "opKind")]
    pub kind: OpKind,

    /// Page the command applies to
    #[serde(rename = "blockId")]
    pub block_id: String,

    #[serde(rename = "targetPath", default)]
    pub target: Vec<PathSeg>,

    #[serde(rename = "attributeId", default, skip_serializing_if = "String::is_empty")]
    pub attr: String,

    #[serde(default)]
    pub value: Json,

    /// Payload of the inverse command. Local only.
    #[serde(skip)]
    pub before: Json,

    #[serde(rename = "unitId", default, skip_serializing_if = "String::is_empty")]
    pub unit_id: String,
}

impl Cmd {
    pub fn new(kind: OpKind, block_id: impl Into<String>, target: Vec<PathSeg>) -> Self {
        Self {
            kind,
            block_id: block_id.into(),
            target,
            attr: String::new(),
            value: Json::Null,
            before: Json::Null,
            unit_id: String::new(),
        }
    }

    pub fn with_attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = attr.into();
        self
    }

    pub fn with_value(mut self, value: Json) -> Self {
        self.value = value;
        self
    }

    pub fn with_before(mut self, before: Json) -> Self {
        self.before = before;
        self
    }

    /// Command that undoes this one
    pub fn inverse(&self) -> Cmd {
        let kind = self.kind.inverse();
        let attr = match (&kind, self.attr.as_str()) {
            (OpKind::Group, "group") => "ungroup".to_string(),
            (OpKind::Group, "ungroup") => "group".to_string(),
            _ => self.attr.clone(),
        };
        Cmd {
            kind,
            block_id: self.block_id.clone(),
            target: self.target.clone(),
            attr,
            value: self.before.clone(),
            before: self.value.clone(),
            unit_id: self.unit_id.clone(),
        }
    }

    /// True if both commands address the same attribute of the same target
    pub fn same_slot(&self, other: &Cmd) -> bool {
        self.kind == other.kind
            && self.block_id == other.block_id
            && self.target == other.target
            && self.attr == other.attr
    }

    pub fn describe(&self) -> String {
        let path: Vec<String> = self.target.iter().map(|s| s.to_string()).collect();
        if self.attr.is_empty() {
            format!("{} {}/{}", self.kind, self.block_id, path.join("/"))
        } else {
            format!("{} {}/{} .{}", self.kind, self.block_id, path.join("/"), self.attr)
        }
    }
}

/// Several commands sharing one unit id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdGroup {
    #[serde(rename = "unitId")]
    pub unit_id: String,
    pub cmds: Vec<Cmd>,
}

/// Wire envelope emitted by a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    Single(Cmd),
    Group(CmdGroup),
}

impl Envelope {
    pub fn unit_id(&self) -> &str {
        match self {
            Envelope::Single(cmd) => &cmd.unit_id,
            Envelope::Group(group) => &group.unit_id,
        }
    }

    pub fn cmds(&self) -> &[Cmd] {
        match self {
            Envelope::Single(cmd) => std::slice::from_ref(cmd),
            Envelope::Group(group) => &group.cmds,
        }
    }

    pub fn len(&self) -> usize {
        self.cmds().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds().is_empty()
    }

    /// Build an envelope from a list of commands, stamping the unit id on
    /// every member. Returns `None` for an empty list.
    pub fn from_cmds(mut cmds: Vec<Cmd>, unit_id: &str) -> Option<Envelope> {
        for cmd in &mut cmds {
            cmd.unit_id = unit_id.to_string();
        }
        match cmds.len() {
            0 => None,
            1 => cmds.pop().map(Envelope::Single),
            _ => Some(Envelope::Group(CmdGroup {
                unit_id: unit_id.to_string(),
                cmds,
            })),
        }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Envelope, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Position of an element, plus its content when it is being created.
/// Used by insert, delete and move payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Parent group id; `None` for the page root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,

    /// Table cells created with a row or column, keyed `"rowId:colId"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cells: Option<BTreeMap<String, Json>>,

    /// Where a moved element sat when the sender moved it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Box<Placement>>,
}

impl Placement {
    pub fn at(parent: Option<&str>, index: usize) -> Self {
        Self {
            parent: parent.map(str::to_string),
            index,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Json) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_cells(mut self, cells: BTreeMap<String, Json>) -> Self {
        self.cells = Some(cells);
        self
    }

    pub fn with_from(mut self, from: Placement) -> Self {
        self.from = Some(Box::new(from));
        self
    }
}

/// Text insert/delete payload. Inserts carry `text`; deletes carry `len`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextRange {
    pub index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Payload of a `group` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPayload {
    /// Group shape record, without children
    pub group: Json,

    /// Member shape ids in child order
    pub shapes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub index: usize,
}

/// Payload of an `ungroup` command: where each child lands, in ascending
/// placement order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UngroupPayload {
    pub placements: Vec<Placement>,
}

/// Table axis addressed by row/column commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Col,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Row => "row",
            Axis::Col => "col",
        }
    }

    pub fn parse(attr: &str) -> Option<Axis> {
        match attr {
            "row" => Some(Axis::Row),
            "col" => Some(Axis::Col),
            _ => None,
        }
    }

    /// Table field holding the lines of this axis
    pub fn field(self) -> &'static str {
        match self {
            Axis::Row => "rows",
            Axis::Col => "cols",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_kind_survives_json() {
        let json = r#"{"opKind":"ShapeRecolor","blockId":"p1","targetPath":["s1"],"value":1}"#;
        let cmd: Cmd = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.kind, OpKind::Other("ShapeRecolor".into()));

        let back = serde_json::to_value(&cmd).unwrap();
        assert_eq!(back["opKind"], json!("ShapeRecolor"));
    }

    #[test]
    fn test_before_is_not_serialized() {
        let cmd = Cmd::new(OpKind::ShapeModify, "p1", vec!["s1".into()])
            .with_attr("x")
            .with_value(json!(10))
            .with_before(json!(0));
        let json = serde_json::to_value(&cmd).unwrap();
        assert!(json.get("before").is_none());
        assert_eq!(json["attributeId"], json!("x"));
    }

    #[test]
    fn test_inverse_pairs_kinds() {
        let insert = Cmd::new(OpKind::ShapeInsert, "p1", vec!["s1".into()])
            .with_value(json!({"index": 0, "data": {}}))
            .with_before(json!({"index": 0, "id": "s1"}));
        let inverse = insert.inverse();
        assert_eq!(inverse.kind, OpKind::ShapeDelete);
        assert_eq!(inverse.value, json!({"index": 0, "id": "s1"}));
        assert_eq!(inverse.inverse(), insert);

        let group = Cmd::new(OpKind::Group, "p1", vec!["g1".into()]).with_attr("group");
        assert_eq!(group.inverse().attr, "ungroup");
    }

    #[test]
    fn test_cell_path_segments() {
        let path: Vec<PathSeg> = serde_json::from_value(json!(["t1", {"row": 1, "col": 2}])).unwrap();
        assert_eq!(path[1], PathSeg::Cell { row: 1, col: 2 });
    }

    #[test]
    fn test_envelope_shape() {
        let a = Cmd::new(OpKind::ShapeModify, "p1", vec!["s1".into()]).with_attr("x");
        let b = Cmd::new(OpKind::ShapeModify, "p1", vec!["s2".into()]).with_attr("x");

        assert!(Envelope::from_cmds(vec![], "u").is_none());

        let single = Envelope::from_cmds(vec![a.clone()], "u1").unwrap();
        assert!(matches!(single, Envelope::Single(_)));
        assert_eq!(single.unit_id(), "u1");

        let group = Envelope::from_cmds(vec![a, b], "u2").unwrap();
        assert!(group.cmds().iter().all(|c| c.unit_id == "u2"));

        let line = group.to_json_line().unwrap();
        assert_eq!(Envelope::from_json_line(&line).unwrap(), group);
    }
}
