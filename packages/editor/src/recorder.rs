//! # Operation Recorder
//!
//! High-level editing API. Each operation builds a [`Cmd`] from the current
//! document (the new payload plus the `before` payload needed to invert
//! it), applies it through the handler table with recording suspended, and
//! appends it to the open transaction, merging repeated attribute writes.
//!
//! Any failure rolls back the whole transaction. Dropping a recorder that
//! was neither committed nor rolled back also rolls back.
//!
//! ```rust,ignore
//! let (_, envelope) = repo.transact(|rec| {
//!     rec.modify_shape("page-1", "rect-1", "x", json!(120))?;
//!     rec.modify_shape("page-1", "rect-1", "y", json!(40))
//! })?;
//! ```

use crate::attrs::{self, AttrSpec};
use crate::cmd::{Axis, Cmd, Envelope, GroupPayload, OpKind, PathSeg, Placement, TextRange, UngroupPayload};
use crate::errors::EditorError;
use crate::handlers::cell_in_line;
use crate::repository::Repository;
use crate::resolve;
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use vellum_document::{Document, NodeId, RecordMut, Value};

pub struct Recorder<'r> {
    repo: &'r mut Repository,
}

impl Repository {
    /// Start a transaction and return a recorder for it
    pub fn edit(&mut self) -> Result<Recorder<'_>, EditorError> {
        self.start()?;
        Ok(Recorder { repo: self })
    }

    /// Run `f` in a transaction. Commits on success, rolls back on error.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Recorder<'_>) -> Result<T, EditorError>,
    ) -> Result<(T, Option<Envelope>), EditorError> {
        let mut recorder = self.edit()?;
        let value = f(&mut recorder)?;
        let envelope = recorder.commit()?;
        Ok((value, envelope))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Json, EditorError> {
    Ok(serde_json::to_value(value)?)
}

fn stable_id_of<'j>(data: &'j Json, what: &str) -> Result<&'j str, EditorError> {
    data.get("id")
        .and_then(Json::as_str)
        .ok_or_else(|| EditorError::Payload(format!("{} needs a string id", what)))
}

fn known_attr(
    table: &'static [AttrSpec],
    scope: &'static str,
    attr: &str,
) -> Result<&'static AttrSpec, EditorError> {
    attrs::lookup(table, attr).ok_or_else(|| EditorError::UnknownAttribute {
        scope,
        attr: attr.to_string(),
    })
}

/// Read-side helpers over the repository's document and codec
struct View<'a> {
    repo: &'a Repository,
}

impl View<'_> {
    fn doc(&self) -> &Document {
        self.repo.document()
    }

    fn encode(&self, value: Option<&Value>) -> Json {
        match value {
            Some(value) => self.repo.codec.encode(self.doc(), value),
            None => Json::Null,
        }
    }

    fn encode_node(&self, node: NodeId) -> Json {
        self.encode(Some(&Value::Node(node)))
    }

    fn page(&self, page_id: &str) -> Result<NodeId, EditorError> {
        resolve::page(self.doc(), page_id)
    }

    fn shape(&self, page_id: &str, shape_id: &str) -> Result<NodeId, EditorError> {
        resolve::shape(self.doc(), self.page(page_id)?, shape_id)
    }

    fn modify(
        &self,
        kind: OpKind,
        page_id: &str,
        target: Vec<PathSeg>,
        record: Option<NodeId>,
        spec: &AttrSpec,
        value: Json,
    ) -> Cmd {
        let before = self.encode(record.and_then(|r| self.doc().field(r, spec.field)));
        Cmd::new(kind, page_id, target)
            .with_attr(spec.id)
            .with_value(value)
            .with_before(before)
    }

    fn text_content(&self, page_id: &str, owner: &[PathSeg]) -> Result<String, EditorError> {
        let owner = resolve::text_owner(self.doc(), self.page(page_id)?, owner)?;
        let text = resolve::text(self.doc(), owner)?;
        Ok(self
            .doc()
            .field(text, "content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Array of `shape` that holds the item with `item_id`
    fn array_item(&self, shape: NodeId, item_id: &str) -> Result<(&'static str, usize, NodeId), EditorError> {
        attrs::SHAPE_ARRAYS
            .iter()
            .find_map(|name| {
                let array = self.doc().child(shape, name)?;
                resolve::item_by_id(self.doc(), array, item_id).map(|(index, item)| (*name, index, item))
            })
            .ok_or_else(|| EditorError::Unresolved(format!("item {}", item_id)))
    }
}

impl<'r> Recorder<'r> {
    pub fn document(&self) -> &Document {
        self.repo.document()
    }

    pub fn repository(&self) -> &Repository {
        self.repo
    }

    /// Describe the transaction (shown for undo)
    pub fn describe(&mut self, description: impl Into<String>) {
        self.repo.describe(description);
    }

    /// Raw recorded access to a record inside this transaction
    pub fn record_mut(&mut self, id: NodeId) -> Result<RecordMut<'_>, EditorError> {
        self.repo.record_mut(id)
    }

    pub fn commit(self) -> Result<Option<Envelope>, EditorError> {
        self.repo.commit()
    }

    pub fn rollback(self) -> Result<(), EditorError> {
        self.repo.rollback()
    }

    /// Build a command from the current document and record it. Any error
    /// rolls back the whole transaction.
    fn submit(
        &mut self,
        build: impl FnOnce(&View<'_>) -> Result<Cmd, EditorError>,
    ) -> Result<(), EditorError> {
        let built = build(&View { repo: self.repo });
        let result = built.and_then(|cmd| self.repo.record_cmd(cmd));
        if let Err(err) = &result {
            tracing::debug!("[Recorder] aborting transaction: {}", err);
            if self.repo.is_open() {
                if let Err(rollback) = self.repo.rollback() {
                    tracing::error!("[Recorder] rollback failed: {}", rollback);
                }
            }
        }
        result
    }

    pub fn insert_page(&mut self, index: usize, page: Json) -> Result<(), EditorError> {
        self.submit(|_| {
            let id = stable_id_of(&page, "page")?.to_string();
            Ok(Cmd::new(OpKind::PageInsert, &id, vec![PathSeg::Id(id.clone())])
                .with_before(to_json(&Placement::at(None, index).with_id(&id))?)
                .with_value(to_json(&Placement::at(None, index).with_data(page))?))
        })
    }

    pub fn delete_page(&mut self, page_id: &str) -> Result<(), EditorError> {
        self.submit(|view| {
            let (page, index) = resolve::page_position(view.doc(), page_id)?;
            Ok(Cmd::new(OpKind::PageDelete, page_id, vec![page_id.into()])
                .with_value(to_json(&Placement::at(None, index).with_id(page_id))?)
                .with_before(to_json(&Placement::at(None, index).with_data(view.encode_node(page)))?))
        })
    }

    pub fn move_page(&mut self, page_id: &str, to: usize) -> Result<(), EditorError> {
        self.submit(|view| {
            let (_, from) = resolve::page_position(view.doc(), page_id)?;
            Ok(Cmd::new(OpKind::PageMove, page_id, vec![page_id.into()])
                .with_value(to_json(&Placement::at(None, to).with_from(Placement::at(None, from)))?)
                .with_before(to_json(&Placement::at(None, from).with_from(Placement::at(None, to)))?))
        })
    }

    pub fn modify_page(&mut self, page_id: &str, attr: &str, value: Json) -> Result<(), EditorError> {
        self.submit(|view| {
            let spec = known_attr(attrs::PAGE_ATTRS, "page", attr)?;
            let page = view.page(page_id)?;
            Ok(view.modify(OpKind::PageModify, page_id, vec![page_id.into()], Some(page), spec, value))
        })
    }

    /// Insert a shape under `parent` (a group id, or `None` for the page root)
    pub fn insert_shape(
        &mut self,
        page_id: &str,
        parent: Option<&str>,
        index: usize,
        shape: Json,
    ) -> Result<(), EditorError> {
        self.submit(|_| {
            let id = stable_id_of(&shape, "shape")?.to_string();
            Ok(Cmd::new(OpKind::ShapeInsert, page_id, vec![PathSeg::Id(id.clone())])
                .with_before(to_json(&Placement::at(parent, index).with_id(id))?)
                .with_value(to_json(&Placement::at(parent, index).with_data(shape))?))
        })
    }

    pub fn delete_shape(&mut self, page_id: &str, shape_id: &str) -> Result<(), EditorError> {
        self.submit(|view| {
            let shape = view.shape(page_id, shape_id)?;
            let at = resolve::locate(view.doc(), view.page(page_id)?, shape)?;
            let parent = at.parent.as_deref();
            Ok(Cmd::new(OpKind::ShapeDelete, page_id, vec![shape_id.into()])
                .with_value(to_json(&Placement::at(parent, at.index).with_id(shape_id))?)
                .with_before(to_json(&Placement::at(parent, at.index).with_data(view.encode_node(shape)))?))
        })
    }

    /// Move a shape so that it ends up at `index` under `parent`
    pub fn move_shape(
        &mut self,
        page_id: &str,
        shape_id: &str,
        parent: Option<&str>,
        index: usize,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            let shape = view.shape(page_id, shape_id)?;
            let from = resolve::locate(view.doc(), view.page(page_id)?, shape)?;
            Ok(Cmd::new(OpKind::ShapeMove, page_id, vec![shape_id.into()])
                .with_value(to_json(
                    &Placement::at(parent, index).with_from(Placement::at(from.parent.as_deref(), from.index)),
                )?)
                .with_before(to_json(
                    &Placement::at(from.parent.as_deref(), from.index).with_from(Placement::at(parent, index)),
                )?))
        })
    }

    pub fn modify_shape(&mut self, page_id: &str, shape_id: &str, attr: &str, value: Json) -> Result<(), EditorError> {
        self.submit(|view| {
            let spec = known_attr(attrs::SHAPE_ATTRS, "shape", attr)?;
            let shape = view.shape(page_id, shape_id)?;
            Ok(view.modify(OpKind::ShapeModify, page_id, vec![shape_id.into()], Some(shape), spec, value))
        })
    }

    pub fn insert_array_item(
        &mut self,
        page_id: &str,
        shape_id: &str,
        array: &str,
        index: usize,
        item: Json,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            if attrs::array_attrs(array).is_none() {
                return Err(EditorError::UnknownAttribute {
                    scope: "shape array",
                    attr: array.to_string(),
                });
            }
            view.shape(page_id, shape_id)?;
            let id = stable_id_of(&item, "array item")?.to_string();
            Ok(Cmd::new(OpKind::ShapeArrayAttrInsert, page_id, vec![shape_id.into()])
                .with_attr(array)
                .with_before(to_json(&Placement::at(None, index).with_id(&id))?)
                .with_value(to_json(&Placement::at(None, index).with_id(id).with_data(item))?))
        })
    }

    pub fn delete_array_item(&mut self, page_id: &str, shape_id: &str, array: &str, item_id: &str) -> Result<(), EditorError> {
        self.submit(|view| {
            let shape = view.shape(page_id, shape_id)?;
            let (found_in, index, item) = view.array_item(shape, item_id)?;
            if found_in != array {
                return Err(EditorError::Unresolved(format!("item {} in {}", item_id, array)));
            }
            Ok(Cmd::new(OpKind::ShapeArrayAttrDelete, page_id, vec![shape_id.into()])
                .with_attr(array)
                .with_value(to_json(&Placement::at(None, index).with_id(item_id))?)
                .with_before(to_json(
                    &Placement::at(None, index)
                        .with_id(item_id)
                        .with_data(view.encode_node(item)),
                )?))
        })
    }

    pub fn move_array_item(
        &mut self,
        page_id: &str,
        shape_id: &str,
        array: &str,
        item_id: &str,
        to: usize,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            let shape = view.shape(page_id, shape_id)?;
            let (found_in, from, _) = view.array_item(shape, item_id)?;
            if found_in != array {
                return Err(EditorError::Unresolved(format!("item {} in {}", item_id, array)));
            }
            Ok(Cmd::new(OpKind::ShapeArrayAttrMove, page_id, vec![shape_id.into()])
                .with_attr(array)
                .with_value(to_json(&Placement::at(None, to).with_id(item_id))?)
                .with_before(to_json(&Placement::at(None, from).with_id(item_id))?))
        })
    }

    pub fn modify_array_item(
        &mut self,
        page_id: &str,
        shape_id: &str,
        item_id: &str,
        attr: &str,
        value: Json,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            let shape = view.shape(page_id, shape_id)?;
            let (array, _, item) = view.array_item(shape, item_id)?;
            let table = attrs::array_attrs(array).unwrap_or(&[]);
            let spec = known_attr(table, "array item", attr)?;
            Ok(view.modify(
                OpKind::ShapeArrayAttrModify,
                page_id,
                vec![shape_id.into(), item_id.into()],
                Some(item),
                spec,
                value,
            ))
        })
    }

    /// Insert text at a character index. `owner` is `[shape]` or
    /// `[table, cell]`.
    pub fn insert_text(&mut self, page_id: &str, owner: &[PathSeg], index: usize, text: &str) -> Result<(), EditorError> {
        self.submit(|view| {
            let content = view.text_content(page_id, owner)?;
            if index > content.chars().count() {
                return Err(EditorError::Payload(format!("text index {} out of range", index)));
            }
            let value = TextRange {
                index,
                len: None,
                text: Some(text.to_string()),
            };
            let before = TextRange {
                index,
                len: Some(text.chars().count()),
                text: None,
            };
            Ok(Cmd::new(OpKind::TextInsert, page_id, owner.to_vec())
                .with_value(to_json(&value)?)
                .with_before(to_json(&before)?))
        })
    }

    pub fn delete_text(&mut self, page_id: &str, owner: &[PathSeg], index: usize, len: usize) -> Result<(), EditorError> {
        self.submit(|view| {
            let content = view.text_content(page_id, owner)?;
            let in_range = index
                .checked_add(len)
                .map_or(false, |end| end <= content.chars().count());
            if !in_range {
                return Err(EditorError::Payload(format!("text range {}+{} out of range", index, len)));
            }
            let removed: String = content.chars().skip(index).take(len).collect();
            let value = TextRange {
                index,
                len: Some(len),
                text: None,
            };
            let before = TextRange {
                index,
                len: None,
                text: Some(removed),
            };
            Ok(Cmd::new(OpKind::TextDelete, page_id, owner.to_vec())
                .with_value(to_json(&value)?)
                .with_before(to_json(&before)?))
        })
    }

    pub fn modify_text(&mut self, page_id: &str, owner: &[PathSeg], attr: &str, value: Json) -> Result<(), EditorError> {
        self.submit(|view| {
            let spec = known_attr(attrs::TEXT_ATTRS, "text", attr)?;
            let owner_node = resolve::text_owner(view.doc(), view.page(page_id)?, owner)?;
            let text = resolve::text(view.doc(), owner_node)?;
            let attrs_map = view.doc().child(text, "attrs");
            Ok(view.modify(OpKind::TextModify, page_id, owner.to_vec(), attrs_map, spec, value))
        })
    }

    /// Insert a table row or column, with the cells that come with it
    pub fn insert_table_line(
        &mut self,
        page_id: &str,
        table_id: &str,
        axis: Axis,
        index: usize,
        line: Json,
        cells: BTreeMap<String, Json>,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            resolve::table(view.doc(), view.page(page_id)?, table_id)?;
            let id = stable_id_of(&line, axis.as_str())?.to_string();
            let mut value = Placement::at(None, index).with_id(&id).with_data(line);
            if !cells.is_empty() {
                value = value.with_cells(cells);
            }
            Ok(Cmd::new(OpKind::TableInsert, page_id, vec![table_id.into()])
                .with_attr(axis.as_str())
                .with_before(to_json(&Placement::at(None, index).with_id(id))?)
                .with_value(to_json(&value)?))
        })
    }

    pub fn delete_table_line(&mut self, page_id: &str, table_id: &str, axis: Axis, line_id: &str) -> Result<(), EditorError> {
        self.submit(|view| {
            let doc = view.doc();
            let table = resolve::table(doc, view.page(page_id)?, table_id)?;
            let (index, line) = doc
                .child(table, axis.field())
                .and_then(|lines| resolve::item_by_id(doc, lines, line_id))
                .ok_or_else(|| EditorError::Unresolved(format!("{} {}", axis.as_str(), line_id)))?;

            let mut cells = BTreeMap::new();
            if let Some(cell_map) = doc.child(table, "cells") {
                if let Some(node) = doc.node(cell_map) {
                    if let vellum_document::Body::Map(entries) = node.body() {
                        for (key, cell) in entries {
                            if cell_in_line(key, axis, line_id) {
                                cells.insert(key.clone(), view.encode(Some(cell)));
                            }
                        }
                    }
                }
            }

            let mut before = Placement::at(None, index)
                .with_id(line_id)
                .with_data(view.encode_node(line));
            if !cells.is_empty() {
                before = before.with_cells(cells);
            }
            Ok(Cmd::new(OpKind::TableDelete, page_id, vec![table_id.into()])
                .with_attr(axis.as_str())
                .with_value(to_json(&Placement::at(None, index).with_id(line_id))?)
                .with_before(to_json(&before)?))
        })
    }

    /// Set `rowHeight` of a row or `colWidth` of a column
    pub fn modify_table_line(
        &mut self,
        page_id: &str,
        table_id: &str,
        line_id: &str,
        attr: &str,
        value: Json,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            let spec = known_attr(attrs::TABLE_LINE_ATTRS, "table line", attr)?;
            let axis = if attr == "rowHeight" { Axis::Row } else { Axis::Col };
            let doc = view.doc();
            let table = resolve::table(doc, view.page(page_id)?, table_id)?;
            let (_, line) = doc
                .child(table, axis.field())
                .and_then(|lines| resolve::item_by_id(doc, lines, line_id))
                .ok_or_else(|| EditorError::Unresolved(format!("{} {}", axis.as_str(), line_id)))?;
            Ok(view.modify(
                OpKind::TableModify,
                page_id,
                vec![table_id.into(), line_id.into()],
                Some(line),
                spec,
                value,
            ))
        })
    }

    pub fn modify_cell(
        &mut self,
        page_id: &str,
        table_id: &str,
        row: usize,
        col: usize,
        attr: &str,
        value: Json,
    ) -> Result<(), EditorError> {
        self.submit(|view| {
            let spec = known_attr(attrs::CELL_ATTRS, "cell", attr)?;
            let doc = view.doc();
            let table = resolve::table(doc, view.page(page_id)?, table_id)?;
            let key = resolve::cell_key(doc, table, row, col)?;
            let cell = doc.child(table, "cells").and_then(|cells| doc.child(cells, &key));
            Ok(view.modify(
                OpKind::ShapeModify,
                page_id,
                vec![table_id.into(), PathSeg::Cell { row, col }],
                cell,
                spec,
                value,
            ))
        })
    }

    /// Group shapes under a new group shape. The group takes the place of
    /// the first member. Returns the new group's id.
    pub fn group(&mut self, page_id: &str, shape_ids: &[&str], name: Option<&str>) -> Result<String, EditorError> {
        let group_id = self.repo.new_id();
        let id = group_id.clone();
        self.submit(|view| {
            if shape_ids.is_empty() {
                return Err(EditorError::Payload("nothing to group".to_string()));
            }
            let doc = view.doc();
            let page = view.page(page_id)?;
            let mut members = Vec::with_capacity(shape_ids.len());
            for shape_id in shape_ids {
                let shape = resolve::shape(doc, page, shape_id)?;
                members.push((resolve::locate(doc, page, shape)?, shape, shape_id.to_string()));
            }
            for (_, shape, shape_id) in &members {
                let nested = members
                    .iter()
                    .any(|(_, other, _)| other != shape && doc.ancestors(*shape).any(|a| a == *other));
                if nested {
                    return Err(EditorError::Payload(format!(
                        "{} is inside another shape being grouped",
                        shape_id
                    )));
                }
            }
            members.sort_by(|a, b| {
                a.0.parent
                    .cmp(&b.0.parent)
                    .then(a.0.index.cmp(&b.0.index))
            });

            let first = &members[0].0;
            let value = GroupPayload {
                group: json!({
                    "typeId": resolve::SHAPE_KIND,
                    "id": id,
                    "type": "group",
                    "name": name.unwrap_or("Group"),
                    "x": 0, "y": 0, "width": 0, "height": 0, "rotation": 0,
                }),
                shapes: members.iter().map(|(_, _, id)| id.clone()).collect(),
                parent: first.parent.clone(),
                index: first.index,
            };
            let before = UngroupPayload {
                placements: members
                    .iter()
                    .map(|(at, _, id)| Placement::at(at.parent.as_deref(), at.index).with_id(id))
                    .collect(),
            };
            Ok(Cmd::new(OpKind::Group, page_id, vec![PathSeg::Id(id.clone())])
                .with_attr("group")
                .with_value(to_json(&value)?)
                .with_before(to_json(&before)?))
        })?;
        Ok(group_id)
    }

    /// Dissolve a group, putting its children where the group was
    pub fn ungroup(&mut self, page_id: &str, group_id: &str) -> Result<(), EditorError> {
        self.submit(|view| {
            let doc = view.doc();
            let page = view.page(page_id)?;
            let group = resolve::shape(doc, page, group_id)?;
            if !resolve::is_group(doc, group) {
                return Err(EditorError::Payload(format!("{} is not a group", group_id)));
            }
            let at = resolve::locate(doc, page, group)?;
            let children: Vec<String> = doc
                .child(group, "childs")
                .and_then(|childs| doc.items(childs))
                .unwrap_or(&[])
                .iter()
                .filter_map(Value::as_node)
                .filter_map(|child| doc.stable_id(child).map(str::to_string))
                .collect();

            let mut data = view.encode_node(group);
            if let Some(object) = data.as_object_mut() {
                object.remove("childs");
            }
            let value = UngroupPayload {
                placements: children
                    .iter()
                    .enumerate()
                    .map(|(i, id)| Placement::at(at.parent.as_deref(), at.index + i).with_id(id))
                    .collect(),
            };
            let before = GroupPayload {
                group: data,
                shapes: children,
                parent: at.parent.clone(),
                index: at.index,
            };
            Ok(Cmd::new(OpKind::Group, page_id, vec![group_id.into()])
                .with_attr("ungroup")
                .with_value(to_json(&value)?)
                .with_before(to_json(&before)?))
        })
    }
}

impl Drop for Recorder<'_> {
    fn drop(&mut self) {
        if self.repo.is_open() {
            tracing::debug!("[Recorder] dropped with an open transaction, rolling back");
            if let Err(err) = self.repo.rollback() {
                tracing::error!("[Recorder] rollback failed: {}", err);
            }
        }
    }
}
