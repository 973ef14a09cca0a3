use super::{load_document, resolve_path};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use vellum_document::visitor::{walk_document, KindCounter};
use vellum_document::{Document, NodeId, Value};

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Document snapshot (JSON)
    pub document: String,

    /// Only print record counts
    #[arg(long)]
    pub counts: bool,
}

pub fn inspect(args: InspectArgs, cwd: &str) -> Result<()> {
    let path = resolve_path(cwd, &args.document);
    let doc = load_document(&path)?;

    println!("{} {}", "📄".bright_blue(), path.display());

    if !args.counts {
        for line in outline(&doc) {
            println!("{}", line);
        }
        println!();
    }

    let mut counter = KindCounter::default();
    walk_document(&mut counter, &doc);
    for (kind, count) in &counter.counts {
        println!("   {:<12} {}", kind.cyan(), count);
    }

    Ok(())
}

/// One line per page and shape, indented by depth
pub fn outline(doc: &Document) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(pages) = doc.child(doc.root(), "pages") else {
        return lines;
    };

    for page in node_items(doc, pages) {
        let id = doc.stable_id(page).unwrap_or("?");
        let name = text_field(doc, page, "name").unwrap_or("");
        lines.push(format!("page {} {}", id, name).trim_end().to_string());
        if let Some(shapes) = doc.child(page, "shapes") {
            outline_shapes(doc, shapes, 1, &mut lines);
        }
    }
    lines
}

fn outline_shapes(doc: &Document, seq: NodeId, depth: usize, lines: &mut Vec<String>) {
    for shape in node_items(doc, seq) {
        let id = doc.stable_id(shape).unwrap_or("?");
        let kind = text_field(doc, shape, "type").unwrap_or("shape");
        lines.push(format!("{}{} {}", "  ".repeat(depth), kind, id));
        if let Some(childs) = doc.child(shape, "childs") {
            outline_shapes(doc, childs, depth + 1, lines);
        }
    }
}

fn node_items(doc: &Document, seq: NodeId) -> Vec<NodeId> {
    doc.items(seq)
        .map(|items| items.iter().filter_map(Value::as_node).collect())
        .unwrap_or_default()
}

fn text_field<'d>(doc: &'d Document, id: NodeId, key: &str) -> Option<&'d str> {
    doc.field(id, key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outline_nests_group_children() {
        let doc = Document::from_json(&json!({
            "typeId": "document",
            "pages": [
                {"typeId": "page", "id": "p1", "name": "Home", "shapes": [
                    {"typeId": "shape", "id": "g", "type": "group", "childs": [
                        {"typeId": "shape", "id": "a", "type": "rect"},
                    ]},
                    {"typeId": "shape", "id": "t", "type": "text"},
                ]},
                {"typeId": "page", "id": "p2", "shapes": []},
            ],
        }))
        .unwrap();

        assert_eq!(
            outline(&doc),
            vec!["page p1 Home", "  group g", "    rect a", "  text t", "page p2"]
        );
    }

    #[test]
    fn test_inspect_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = InspectArgs {
            document: "missing.json".to_string(),
            counts: false,
        };
        assert!(inspect(args, &dir.path().display().to_string()).is_err());
    }
}
