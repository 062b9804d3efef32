//! Reference-driven structural comparison.
//!
//! The walk follows the reference tree only: keys that exist solely on the
//! live side are never reported, because the reference defines what is being
//! watched.

use std::fmt;

use crate::tree::{join_path, ConfigTree, Element, Entry, Group};

/// One discrepancy between the reference and the live tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    /// Slash-delimited location, e.g. `heating/boiler/temp`
    pub path: String,
    /// Reference side. A group only when a whole group is missing or
    /// replaced by an entry on the live side.
    pub old: Element,
    /// Live side; `None` when the key is missing or the shapes disagree.
    pub new: Option<Entry>,
}

impl Diff {
    /// True for a plain value change between two matching entries.
    pub fn is_value_change(&self) -> bool {
        matches!(self.old, Element::Entry(_)) && self.new.is_some()
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = match &self.old {
            Element::Entry(entry) => describe(entry),
            Element::Group(group) => format!("<group of {} entries>", group.entry_count()),
        };
        let new = self.new.as_ref().map_or_else(|| "None".to_string(), describe);
        write!(f, " {}\n {} -> {}", self.path, old, new)
    }
}

fn describe(entry: &Entry) -> String {
    format!("{} = {} ('{}')", entry.name, entry.raw_value, entry.display_value)
}

/// Compare `reference` against `live`, section by section in reference order.
pub fn diff(reference: &ConfigTree, live: &ConfigTree) -> Vec<Diff> {
    let mut out = Vec::new();
    for (key, group) in &reference.sections {
        let path = join_path("", key);
        match live.section(key) {
            Some(live_group) => diff_into(group, live_group, &path, &mut out),
            None => out.push(Diff {
                path,
                old: Element::Group(group.clone()),
                new: None,
            }),
        }
    }
    out
}

/// Compare two groups directly. Paths are relative to the groups.
pub fn diff_group(reference: &Group, live: &Group) -> Vec<Diff> {
    let mut out = Vec::new();
    diff_into(reference, live, "", &mut out);
    out
}

fn diff_into(reference: &Group, live: &Group, prefix: &str, out: &mut Vec<Diff>) {
    for (key, element) in &reference.elements {
        let path = join_path(prefix, key);
        match (element, live.get(key)) {
            (Element::Group(ours), Some(Element::Group(theirs))) => {
                diff_into(ours, theirs, &path, out);
            }
            (Element::Entry(ours), Some(Element::Entry(theirs))) => {
                if !ours.value_eq(theirs) {
                    out.push(Diff {
                        path,
                        old: element.clone(),
                        new: Some(theirs.clone()),
                    });
                }
            }
            _ => out.push(Diff {
                path,
                old: element.clone(),
                new: None,
            }),
        }
    }
}

/// Plain-text report of a diff, or a "no difference" line.
pub fn render(diffs: &[Diff]) -> String {
    if diffs.is_empty() {
        return "No difference to the reference settings.".to_string();
    }
    let mut text = format!("{} difference(s) to the reference settings:", diffs.len());
    for d in diffs {
        text.push('\n');
        text.push_str(&d.to_string());
    }
    text
}
