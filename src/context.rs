// src/context.rs

//! Per-target, per-run processing context: string keys to values, threaded
//! through every stage so templated paths and scripts can refer to the run.
//!
//! Values containing `{name}` placeholders expand iteratively against the
//! context; anything still unresolved after a bounded number of passes is
//! fatal (a typo in a recipe must not silently produce a literal `{target}`
//! file on disk).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Result, StarbashError};

/// Expansion passes before unresolved placeholders become an error.
const MAX_PASSES: usize = 8;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("valid regex"))
}

/// A context value: a single string or an ordered list (file lists).
#[derive(Debug, Clone, PartialEq)]
pub enum CtxValue {
    Str(String),
    List(Vec<String>),
}

impl CtxValue {
    /// Rendering used during placeholder substitution; lists join on spaces.
    fn render(&self) -> String {
        match self {
            CtxValue::Str(s) => s.clone(),
            CtxValue::List(items) => items.join(" "),
        }
    }
}

impl From<String> for CtxValue {
    fn from(s: String) -> Self {
        CtxValue::Str(s)
    }
}

impl From<&str> for CtxValue {
    fn from(s: &str) -> Self {
        CtxValue::Str(s.to_string())
    }
}

impl From<Vec<String>> for CtxValue {
    fn from(items: Vec<String>) -> Self {
        CtxValue::List(items)
    }
}

/// The processing context for one target (or one master-generation run).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingContext {
    values: BTreeMap<String, CtxValue>,
}

impl ProcessingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<CtxValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<&CtxValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(CtxValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_list(&self, key: &str) -> Option<&[String]> {
        match self.values.get(key) {
            Some(CtxValue::List(items)) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Overlay another context on top of this one; the overlay wins.
    pub fn overlay(&mut self, other: &ProcessingContext) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Set a context value from a TOML scalar (stage `context` overlays and
    /// parameter defaults).
    pub fn set_toml(&mut self, key: impl Into<String>, value: &toml::Value) {
        let rendered = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => other.to_string(),
        };
        self.set(key, rendered);
    }

    /// Expand `{name}` placeholders until a fixed point.
    ///
    /// Expansion is iterative so values may reference other templated values;
    /// a bounded pass count keeps mutually-recursive definitions from looping
    /// forever. A template with no placeholders comes back unchanged.
    pub fn expand(&self, template: &str) -> Result<String> {
        let re = placeholder_re();
        let mut current = template.to_string();

        for _ in 0..MAX_PASSES {
            let mut changed = false;
            let next = re
                .replace_all(&current, |caps: &regex::Captures<'_>| {
                    let name = &caps[1];
                    match self.values.get(name) {
                        Some(value) => {
                            changed = true;
                            value.render()
                        }
                        None => caps[0].to_string(),
                    }
                })
                .into_owned();
            current = next;
            if !changed {
                break;
            }
        }

        let unresolved: Vec<String> = re
            .captures_iter(&current)
            .map(|caps| caps[1].to_string())
            .collect();
        if !unresolved.is_empty() {
            return Err(StarbashError::UnresolvedTemplate {
                value: template.to_string(),
                placeholders: unresolved,
            });
        }
        Ok(current)
    }

    /// Expand a list of templates, preserving order.
    pub fn expand_all(&self, templates: &[String]) -> Result<Vec<String>> {
        templates.iter().map(|t| self.expand(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_strings_pass_through_unchanged() {
        let ctx = ProcessingContext::new();
        assert_eq!(ctx.expand("no placeholders here").unwrap(), "no placeholders here");
    }

    #[test]
    fn simple_substitution() {
        let mut ctx = ProcessingContext::new();
        ctx.set("target", "ngc281");
        assert_eq!(ctx.expand("out/{target}.fits").unwrap(), "out/ngc281.fits");
    }

    #[test]
    fn nested_values_reach_a_fixed_point() {
        let mut ctx = ProcessingContext::new();
        ctx.set("target", "m31");
        ctx.set("work", "/cache/{target}");
        ctx.set("out", "{work}/stacked.fits");
        let expanded = ctx.expand("{out}").unwrap();
        assert_eq!(expanded, "/cache/m31/stacked.fits");
        assert!(!expanded.contains('{'));
    }

    #[test]
    fn lists_join_with_spaces() {
        let mut ctx = ProcessingContext::new();
        ctx.set("input_files", vec!["a.fits".to_string(), "b.fits".to_string()]);
        assert_eq!(ctx.expand("stack {input_files}").unwrap(), "stack a.fits b.fits");
    }

    #[test]
    fn unresolved_placeholder_is_fatal() {
        let ctx = ProcessingContext::new();
        let err = ctx.expand("out/{nope}.fits").unwrap_err();
        match err {
            StarbashError::UnresolvedTemplate { placeholders, .. } => {
                assert_eq!(placeholders, vec!["nope".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mutual_recursion_is_bounded() {
        let mut ctx = ProcessingContext::new();
        ctx.set("a", "{b}");
        ctx.set("b", "{a}");
        assert!(ctx.expand("{a}").is_err());
    }

    #[test]
    fn overlay_wins_on_collision() {
        let mut base = ProcessingContext::new();
        base.set("target", "m31");
        base.set("keep", "yes");
        let mut over = ProcessingContext::new();
        over.set("target", "ngc281");
        base.overlay(&over);
        assert_eq!(base.get_str("target"), Some("ngc281"));
        assert_eq!(base.get_str("keep"), Some("yes"));
    }
}
