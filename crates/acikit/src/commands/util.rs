//! Shared helpers for command handlers.

use std::path::Path;

use serde_json::Value;
use tabled::Tabled;

use crate::error::CliError;

/// One listed object, as the table shows it.
#[derive(Tabled)]
pub struct ObjectRow {
    #[tabled(rename = "Class")]
    pub class: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "DN")]
    pub dn: String,
}

/// Summarize a `{class: {attributes: {...}}}` tree for a table row.
pub fn object_row(tree: &Value) -> ObjectRow {
    let Some((class, body)) = tree.as_object().and_then(|o| o.iter().next()) else {
        return ObjectRow {
            class: String::new(),
            name: String::new(),
            dn: String::new(),
        };
    };
    let attr = |key: &str| {
        body.pointer(&format!("/attributes/{key}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };
    ObjectRow {
        class: class.clone(),
        name: attr("name"),
        dn: attr("dn"),
    }
}

/// Read and parse a JSON file holding exactly one top-level object.
pub fn read_tree_file(path: &Path) -> Result<Value, CliError> {
    let contents = std::fs::read_to_string(path)?;
    let tree: Value = serde_json::from_str(&contents)?;
    match tree.as_object() {
        Some(map) if map.len() == 1 => Ok(tree),
        _ => Err(CliError::Validation {
            field: "file".into(),
            reason: "expected a single {\"<class>\": {...}} object".into(),
        }),
    }
}
