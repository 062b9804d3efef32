//! Configuration tree model.
//!
//! A [`ConfigTree`] maps section keys to [`Group`]s; a group maps element keys
//! to either a leaf [`Entry`] or a nested group. Key order is kept as inserted
//! so a persisted snapshot reads the same way the controller lists its menu.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

/// Value type reported by the controller for a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Numeric,
    Text,
    Boolean,
    Timeslot,
}

/// A single device variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    pub name: String,
    /// Device locator, e.g. `/120/10101/0/0/12197`
    pub address: String,
    pub kind: EntryKind,
    pub raw_value: f64,
    pub display_value: String,
    pub scale: f64,
    pub precision: u8,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Entry {
    /// Build a numeric entry whose display value is rendered from the raw value.
    pub fn numeric(
        name: impl Into<String>,
        address: impl Into<String>,
        raw_value: f64,
        scale: f64,
        precision: u8,
        unit: impl Into<String>,
    ) -> Self {
        let display_value = render_display(EntryKind::Numeric, raw_value, scale, precision)
            .unwrap_or_default();
        Self {
            name: name.into(),
            address: address.into(),
            kind: EntryKind::Numeric,
            raw_value,
            display_value,
            scale,
            precision,
            unit: unit.into(),
            last_updated: None,
        }
    }

    /// Build an entry whose label comes from the device (text, time slots).
    pub fn labelled(
        name: impl Into<String>,
        address: impl Into<String>,
        kind: EntryKind,
        raw_value: f64,
        display_value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            kind,
            raw_value,
            display_value: display_value.into(),
            scale: 1.0,
            precision: 0,
            unit: String::new(),
            last_updated: None,
        }
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }

    /// Two entries hold the same value when both the raw and the rendered value
    /// agree. Name, address, unit and timestamp are metadata.
    pub fn value_eq(&self, other: &Entry) -> bool {
        self.raw_value == other.raw_value && self.display_value == other.display_value
    }
}

/// Render the display string for kinds whose label is derived from the raw
/// value. Device-labelled kinds return `None`.
pub fn render_display(kind: EntryKind, raw_value: f64, scale: f64, precision: u8) -> Option<String> {
    match kind {
        EntryKind::Numeric => {
            let scaled = if scale == 0.0 { raw_value } else { raw_value / scale };
            Some(format!("{:.*}", usize::from(precision), scaled))
        }
        EntryKind::Boolean => Some(if raw_value != 0.0 { "on" } else { "off" }.to_string()),
        EntryKind::Text | EntryKind::Timeslot => None,
    }
}

/// Either a leaf or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    Entry(Entry),
    Group(Group),
}

impl From<Entry> for Element {
    fn from(entry: Entry) -> Self {
        Element::Entry(entry)
    }
}

impl From<Group> for Element {
    fn from(group: Group) -> Self {
        Element::Group(group)
    }
}

/// Keyed collection of elements. Equality ignores key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Group {
    pub elements: IndexMap<String, Element>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for assembling fixtures and shapes.
    pub fn with(mut self, key: impl Into<String>, element: impl Into<Element>) -> Self {
        self.insert(key, element);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, element: impl Into<Element>) {
        self.elements.insert(key.into(), element.into());
    }

    pub fn get(&self, key: &str) -> Option<&Element> {
        self.elements.get(key)
    }

    /// Number of entries anywhere below this group.
    pub fn entry_count(&self) -> usize {
        self.elements
            .values()
            .map(|element| match element {
                Element::Entry(_) => 1,
                Element::Group(group) => group.entry_count(),
            })
            .sum()
    }
}

impl<'de> Deserialize<'de> for Group {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        unique_keys(deserializer).map(|elements| Group { elements })
    }
}

/// Top-level tree: section key -> group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigTree {
    pub sections: IndexMap<String, Group>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section(mut self, key: impl Into<String>, group: Group) -> Self {
        self.sections.insert(key.into(), group);
        self
    }

    pub fn section(&self, key: &str) -> Option<&Group> {
        self.sections.get(key)
    }

    pub fn entry_count(&self) -> usize {
        self.sections.values().map(Group::entry_count).sum()
    }
}

impl<'de> Deserialize<'de> for ConfigTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        unique_keys(deserializer).map(|sections| ConfigTree { sections })
    }
}

/// Join a path prefix and a key with the `/` delimiter used in diff records.
pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

/// Deserialize a mapping into an `IndexMap`, rejecting repeated keys instead of
/// letting the last one win.
fn unique_keys<'de, D, V>(deserializer: D) -> Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct UniqueKeys<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueKeys<V> {
        type Value = IndexMap<String, V>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping with unique keys")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate key `{key}`")));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueKeys(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_numeric_display_rendering() {
        let entry = Entry::numeric("Boiler", "/120/10101/0/0/12161", 625.0, 10.0, 1, "°C");
        assert_eq!(entry.display_value, "62.5");

        let entry = Entry::numeric("Pump runs", "/40/10021/0/0/12080", 3.0, 1.0, 0, "");
        assert_eq!(entry.display_value, "3");
    }

    #[test]
    fn test_boolean_and_labelled_rendering() {
        assert_eq!(render_display(EntryKind::Boolean, 1.0, 1.0, 0).as_deref(), Some("on"));
        assert_eq!(render_display(EntryKind::Boolean, 0.0, 1.0, 0).as_deref(), Some("off"));
        assert_eq!(render_display(EntryKind::Text, 1803.0, 1.0, 0), None);
    }

    #[test]
    fn test_value_eq_ignores_metadata() {
        let a = Entry::numeric("Boiler", "/a", 600.0, 10.0, 1, "°C");
        let mut b = a.clone();
        b.name = "Kessel".into();
        b.address = "/b".into();
        b.unit = "K".into();
        let b = b.with_timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());

        assert!(a.value_eq(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_eq_checks_raw_and_display() {
        let a = Entry::labelled("Mode", "/m", EntryKind::Text, 1803.0, "Auto");
        let relabelled = Entry::labelled("Mode", "/m", EntryKind::Text, 1803.0, "Manual");
        let recoded = Entry::labelled("Mode", "/m", EntryKind::Text, 1804.0, "Auto");
        assert!(!a.value_eq(&relabelled));
        assert!(!a.value_eq(&recoded));
    }

    #[test]
    fn test_group_equality_ignores_order() {
        let x = Entry::numeric("x", "/x", 1.0, 1.0, 0, "");
        let y = Entry::numeric("y", "/y", 2.0, 1.0, 0, "");
        let g1 = Group::new().with("x", x.clone()).with("y", y.clone());
        let g2 = Group::new().with("y", y).with("x", x);
        assert_eq!(g1, g2);
    }

    #[test]
    fn test_entry_count_nested() {
        let leaf = Entry::numeric("t", "/t", 1.0, 1.0, 0, "");
        let tree = ConfigTree::new()
            .with_section(
                "boiler",
                Group::new()
                    .with("temp", leaf.clone())
                    .with("inner", Group::new().with("a", leaf.clone()).with("b", leaf.clone())),
            )
            .with_section("tank", Group::new());
        assert_eq!(tree.entry_count(), 3);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "temp"), "temp");
        assert_eq!(join_path("a", "b"), "a/b");
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let text = "a: {}\na: {}\n";
        let result: Result<ConfigTree, _> = serde_yaml::from_str(text);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("duplicate"), "{err}");
    }
}
