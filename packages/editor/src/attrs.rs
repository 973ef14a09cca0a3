//! Attribute tables: known attribute ids per element type

use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Number,
    Bool,
    Str,
    /// Structured value (color record, style map, ...)
    Any,
}

impl AttrType {
    /// Null is accepted by every type and means "remove the attribute"
    pub fn accepts(self, value: &Json) -> bool {
        match (self, value) {
            (_, Json::Null) => true,
            (AttrType::Number, v) => v.is_number(),
            (AttrType::Bool, v) => v.is_boolean(),
            (AttrType::Str, v) => v.is_string(),
            (AttrType::Any, _) => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttrSpec {
    pub id: &'static str,
    /// Record field the attribute is stored in
    pub field: &'static str,
    pub ty: AttrType,
    /// Changing it moves or resizes the element
    pub geometry: bool,
}

const fn attr(id: &'static str, ty: AttrType) -> AttrSpec {
    AttrSpec {
        id,
        field: id,
        ty,
        geometry: false,
    }
}

const fn geometry(id: &'static str) -> AttrSpec {
    AttrSpec {
        id,
        field: id,
        ty: AttrType::Number,
        geometry: true,
    }
}

pub const PAGE_ATTRS: &[AttrSpec] = &[
    attr("name", AttrType::Str),
    attr("background", AttrType::Any),
];

pub const SHAPE_ATTRS: &[AttrSpec] = &[
    geometry("x"),
    geometry("y"),
    geometry("width"),
    geometry("height"),
    geometry("rotation"),
    attr("name", AttrType::Str),
    attr("isVisible", AttrType::Bool),
    attr("isLocked", AttrType::Bool),
    attr("opacity", AttrType::Number),
    attr("cornerRadius", AttrType::Number),
    attr("style", AttrType::Any),
];

pub const FILL_ATTRS: &[AttrSpec] = &[
    attr("color", AttrType::Any),
    attr("enabled", AttrType::Bool),
    attr("opacity", AttrType::Number),
];

pub const BORDER_ATTRS: &[AttrSpec] = &[
    attr("color", AttrType::Any),
    attr("thickness", AttrType::Number),
    attr("enabled", AttrType::Bool),
];

pub const POINT_ATTRS: &[AttrSpec] = &[geometry("x"), geometry("y")];

pub const TEXT_ATTRS: &[AttrSpec] = &[
    attr("fontSize", AttrType::Number),
    attr("fontName", AttrType::Str),
    attr("color", AttrType::Any),
    attr("bold", AttrType::Bool),
    attr("italic", AttrType::Bool),
    attr("align", AttrType::Str),
];

pub const TABLE_LINE_ATTRS: &[AttrSpec] = &[
    AttrSpec {
        id: "rowHeight",
        field: "height",
        ty: AttrType::Number,
        geometry: false,
    },
    AttrSpec {
        id: "colWidth",
        field: "width",
        ty: AttrType::Number,
        geometry: false,
    },
];

pub const CELL_ATTRS: &[AttrSpec] = &[
    attr("fill", AttrType::Any),
    attr("verticalAlign", AttrType::Str),
    attr("padding", AttrType::Number),
];

/// Sequence fields of a shape that hold id-carrying items
pub const SHAPE_ARRAYS: &[&str] = &["fills", "borders", "points"];

pub fn lookup(table: &'static [AttrSpec], id: &str) -> Option<&'static AttrSpec> {
    table.iter().find(|spec| spec.id == id)
}

/// Attribute table for items of a shape array
pub fn array_attrs(array: &str) -> Option<&'static [AttrSpec]> {
    match array {
        "fills" => Some(FILL_ATTRS),
        "borders" => Some(BORDER_ATTRS),
        "points" => Some(POINT_ATTRS),
        _ => None,
    }
}
