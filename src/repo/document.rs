// src/repo/document.rs

//! Parsed repository document: a TOML table with dotted-key lookup.
//!
//! The engine is structurally bound to the document, not textually; typed
//! views (stage definitions, repo refs) deserialize from subtrees on demand.

use toml::value::{Table, Value};

use crate::errors::Result;

/// Look up a dotted key (`"repo.kind"`) inside a TOML table.
pub fn lookup_dotted<'a>(table: &'a Table, dotted: &str) -> Option<&'a Value> {
    let mut parts = dotted.split('.');
    let first = parts.next()?;
    let mut current = table.get(first)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current)
}

/// One repository's declarative document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    root: Table,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self> {
        let root: Table = toml::from_str(text)?;
        Ok(Self { root })
    }

    pub fn from_table(root: Table) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Table {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Table {
        &mut self.root
    }

    /// Dotted-key lookup (`"repo.kind"`).
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        lookup_dotted(&self.root, dotted)
    }

    pub fn get_str(&self, dotted: &str) -> Option<&str> {
        self.get(dotted).and_then(Value::as_str)
    }

    pub fn get_bool(&self, dotted: &str) -> Option<bool> {
        self.get(dotted).and_then(Value::as_bool)
    }

    pub fn get_array(&self, dotted: &str) -> Option<&Vec<Value>> {
        self.get(dotted).and_then(Value::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_lookup() {
        let doc = Document::parse(
            r#"
            [repo]
            kind = "recipe"

            [repo.relative]
            default = "out/{target}.fits"
            "#,
        )
        .unwrap();
        assert_eq!(doc.get_str("repo.kind"), Some("recipe"));
        assert_eq!(doc.get_str("repo.relative.default"), Some("out/{target}.fits"));
        assert!(doc.get("repo.missing").is_none());
    }

    #[test]
    fn arrays_are_reachable() {
        let doc = Document::parse(
            r#"
            [[stage]]
            name = "a"

            [[stage]]
            name = "b"
            "#,
        )
        .unwrap();
        assert_eq!(doc.get_array("stage").unwrap().len(), 2);
    }
}
