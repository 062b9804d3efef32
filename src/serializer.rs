//! Text form of a [`ConfigTree`].
//!
//! Trees are written as YAML with `!entry` / `!group` tags on every element so
//! an operator can edit the file by hand and the decoder never has to guess
//! which variant a mapping is.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::tree::{join_path, render_display, ConfigTree, Element, Entry, Group};

/// Encode a tree. The output is stable: the same tree always yields the same
/// text, in insertion order.
pub fn encode(tree: &ConfigTree) -> Result<String> {
    to_text(tree)
}

/// Decode and validate a tree. Nothing is returned unless the whole document
/// parses and every element passes [`validate`]. A blank document is rejected;
/// an empty tree is spelled `{}`.
pub fn decode(text: &str) -> Result<ConfigTree> {
    if text.trim().is_empty() {
        return Err(Error::MalformedSnapshot(
            "the document is empty (write `{}` for a tree without sections)".to_string(),
        ));
    }
    let tree: ConfigTree = serde_yaml::from_str(text)?;
    validate(&tree)?;
    Ok(tree)
}

pub(crate) fn to_text<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| Error::MalformedSnapshot(format!("encoding failed: {e}")))
}

/// Structural checks that YAML typing alone cannot express.
pub fn validate(tree: &ConfigTree) -> Result<()> {
    for (key, group) in &tree.sections {
        check_key("", key)?;
        validate_group(&join_path("", key), group)?;
    }
    Ok(())
}

fn validate_group(path: &str, group: &Group) -> Result<()> {
    for (key, element) in &group.elements {
        check_key(path, key)?;
        let child = join_path(path, key);
        match element {
            Element::Entry(entry) => validate_entry(&child, entry)?,
            Element::Group(nested) => validate_group(&child, nested)?,
        }
    }
    Ok(())
}

fn validate_entry(path: &str, entry: &Entry) -> Result<()> {
    if !entry.raw_value.is_finite() {
        return Err(Error::MalformedSnapshot(format!(
            "{path}: raw_value must be a finite number"
        )));
    }
    if !entry.scale.is_finite() || entry.scale == 0.0 {
        return Err(Error::MalformedSnapshot(format!(
            "{path}: scale must be a finite, non-zero number"
        )));
    }
    if let Some(expected) = render_display(entry.kind, entry.raw_value, entry.scale, entry.precision) {
        if entry.display_value != expected {
            return Err(Error::MalformedSnapshot(format!(
                "{path}: display_value '{}' does not match raw_value {} (expected '{expected}')",
                entry.display_value, entry.raw_value
            )));
        }
    }
    Ok(())
}

fn check_key(parent: &str, key: &str) -> Result<()> {
    let at = if parent.is_empty() { "top level" } else { parent };
    if key.is_empty() {
        return Err(Error::MalformedSnapshot(format!("{at}: empty key")));
    }
    if key.contains('/') {
        return Err(Error::MalformedSnapshot(format!(
            "{at}: key `{key}` must not contain '/'"
        )));
    }
    Ok(())
}
