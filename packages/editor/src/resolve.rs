//! Resolution of stable ids and target paths to document nodes

use crate::cmd::{Cmd, PathSeg};
use crate::errors::EditorError;
use vellum_document::{Document, NodeId, Value};

pub const PAGE_KIND: &str = "page";
pub const SHAPE_KIND: &str = "shape";
pub const TEXT_KIND: &str = "text";
pub const CELL_KIND: &str = "tableCell";

/// Where a shape sits: owning group (or page root), sequence and index
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub parent: Option<String>,
    pub seq: NodeId,
    pub index: usize,
}

pub fn target_id(cmd: &Cmd, position: usize) -> Result<&str, EditorError> {
    match cmd.target.get(position) {
        Some(PathSeg::Id(id)) => Ok(id),
        Some(other) => Err(EditorError::Payload(format!(
            "expected an id at target position {}, found {}",
            position, other
        ))),
        None => Err(EditorError::Payload(format!(
            "target path of {} is too short",
            cmd.describe()
        ))),
    }
}

pub fn pages(doc: &Document) -> Result<NodeId, EditorError> {
    doc.child(doc.root(), "pages")
        .ok_or_else(|| EditorError::Unresolved("document has no page list".to_string()))
}

/// Find an id-carrying item of a sequence
pub fn item_by_id(doc: &Document, seq: NodeId, id: &str) -> Option<(usize, NodeId)> {
    doc.items(seq)?
        .iter()
        .enumerate()
        .find_map(|(index, value)| match value {
            Value::Node(node) if doc.stable_id(*node) == Some(id) => Some((index, *node)),
            _ => None,
        })
}

pub fn page_position(doc: &Document, page_id: &str) -> Result<(NodeId, usize), EditorError> {
    let pages = pages(doc)?;
    item_by_id(doc, pages, page_id)
        .map(|(index, node)| (node, index))
        .ok_or_else(|| EditorError::Unresolved(format!("page {}", page_id)))
}

pub fn page(doc: &Document, page_id: &str) -> Result<NodeId, EditorError> {
    page_position(doc, page_id).map(|(node, _)| node)
}

pub fn shapes(doc: &Document, page: NodeId) -> Result<NodeId, EditorError> {
    doc.child(page, "shapes")
        .ok_or_else(|| EditorError::Unresolved(format!("page {} has no shape list", page)))
}

pub fn find_shape(doc: &Document, page: NodeId, shape_id: &str) -> Option<NodeId> {
    doc.find_record(page, Some(SHAPE_KIND), shape_id)
}

pub fn shape(doc: &Document, page: NodeId, shape_id: &str) -> Result<NodeId, EditorError> {
    find_shape(doc, page, shape_id)
        .ok_or_else(|| EditorError::Unresolved(format!("shape {}", shape_id)))
}

pub fn shape_type(doc: &Document, shape: NodeId) -> Option<&str> {
    doc.field(shape, "type").and_then(Value::as_str)
}

pub fn is_group(doc: &Document, shape: NodeId) -> bool {
    shape_type(doc, shape) == Some("group")
}

/// Child sequence that shapes with the given parent live in
pub fn container(doc: &Document, page: NodeId, parent: Option<&str>) -> Result<NodeId, EditorError> {
    let Some(group_id) = parent else {
        return shapes(doc, page);
    };
    let group = shape(doc, page, group_id)?;
    if !is_group(doc, group) {
        return Err(EditorError::Mismatch(format!("shape {} is not a group", group_id)));
    }
    doc.child(group, "childs")
        .ok_or_else(|| EditorError::Mismatch(format!("group {} has no child list", group_id)))
}

pub fn locate(doc: &Document, page: NodeId, shape: NodeId) -> Result<Location, EditorError> {
    let detached = || EditorError::Unresolved(format!("shape {} is detached", shape));
    let seq = doc.parent(shape).ok_or_else(detached)?;
    let index = doc.index_in_parent(shape).ok_or_else(detached)?;
    let owner = doc.parent(seq).ok_or_else(detached)?;
    let parent = if owner == page {
        None
    } else {
        let id = doc.stable_id(owner).ok_or_else(detached)?;
        Some(id.to_string())
    };
    Ok(Location { parent, seq, index })
}

pub fn table(doc: &Document, page: NodeId, table_id: &str) -> Result<NodeId, EditorError> {
    let table = shape(doc, page, table_id)?;
    if shape_type(doc, table) != Some("table") {
        return Err(EditorError::Mismatch(format!("shape {} is not a table", table_id)));
    }
    Ok(table)
}

/// `"rowId:colId"` key of the cell at the given coordinates
pub fn cell_key(doc: &Document, table: NodeId, row: usize, col: usize) -> Result<String, EditorError> {
    let line_id = |field: &str, index: usize| {
        doc.child(table, field)
            .and_then(|seq| doc.items(seq)?.get(index)?.as_node())
            .and_then(|line| doc.stable_id(line))
            .ok_or_else(|| EditorError::Unresolved(format!("table {} {} {}", table, field, index)))
    };
    Ok(format!("{}:{}", line_id("rows", row)?, line_id("cols", col)?))
}

/// Record owning a text body: a shape, or a table cell
pub fn text_owner(doc: &Document, page: NodeId, target: &[PathSeg]) -> Result<NodeId, EditorError> {
    match target {
        [PathSeg::Id(shape_id)] => shape(doc, page, shape_id),
        [PathSeg::Id(table_id), PathSeg::Cell { row, col }] => {
            let table = table(doc, page, table_id)?;
            let key = cell_key(doc, table, *row, *col)?;
            doc.child(table, "cells")
                .and_then(|cells| doc.child(cells, &key))
                .ok_or_else(|| EditorError::Unresolved(format!("cell {} of table {}", key, table_id)))
        }
        _ => Err(EditorError::Payload("text target must be a shape or a table cell".to_string())),
    }
}

pub fn text(doc: &Document, owner: NodeId) -> Result<NodeId, EditorError> {
    doc.child(owner, "text")
        .filter(|text| doc.record_kind(*text) == Some(TEXT_KIND))
        .ok_or_else(|| EditorError::Unresolved(format!("node {} has no text", owner)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_json(&json!({
            "typeId": "document",
            "pages": [{
                "typeId": "page", "id": "p1", "shapes": [
                    {"typeId": "shape", "id": "r1", "type": "rect"},
                    {"typeId": "shape", "id": "g1", "type": "group", "childs": [
                        {"typeId": "shape", "id": "r2", "type": "rect"}
                    ]},
                    {"typeId": "shape", "id": "t1", "type": "table",
                     "rows": [{"typeId": "tableRow", "id": "ra", "height": 20}],
                     "cols": [{"typeId": "tableCol", "id": "ca", "width": 50}],
                     "cells": {"ra:ca": {"typeId": "tableCell",
                        "text": {"typeId": "text", "content": "hi", "attrs": {}}}}}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_locate_nested_shape() {
        let doc = doc();
        let page = page(&doc, "p1").unwrap();
        let r2 = shape(&doc, page, "r2").unwrap();
        let location = locate(&doc, page, r2).unwrap();
        assert_eq!(location.parent.as_deref(), Some("g1"));
        assert_eq!(location.index, 0);

        let r1 = shape(&doc, page, "r1").unwrap();
        assert_eq!(locate(&doc, page, r1).unwrap().parent, None);
    }

    #[test]
    fn test_container_requires_group() {
        let doc = doc();
        let page = page(&doc, "p1").unwrap();
        assert!(container(&doc, page, Some("g1")).is_ok());
        assert!(matches!(
            container(&doc, page, Some("r1")),
            Err(EditorError::Mismatch(_))
        ));
        assert!(matches!(
            container(&doc, page, Some("missing")),
            Err(EditorError::Unresolved(_))
        ));
    }

    #[test]
    fn test_cell_text_owner() {
        let doc = doc();
        let page = page(&doc, "p1").unwrap();
        let owner = text_owner(&doc, page, &["t1".into(), PathSeg::Cell { row: 0, col: 0 }]).unwrap();
        let text = text(&doc, owner).unwrap();
        assert_eq!(doc.field(text, "content"), Some(&Value::Str("hi".into())));
    }
}
