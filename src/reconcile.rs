//! One-way merge of live values into the reference tree.

use tracing::debug;

use crate::tree::{ConfigTree, Element, Group};

/// Overwrite every entry in `target` whose value differs from the matching
/// entry in `source`. Returns the number of replaced entries.
///
/// Elements missing from `source`, or shaped differently there, are left as
/// they are; one unmatched key never stops the rest of the walk.
pub fn reconcile(target: &mut ConfigTree, source: &ConfigTree) -> usize {
    target
        .sections
        .iter_mut()
        .filter_map(|(key, group)| source.section(key).map(|theirs| (key, group, theirs)))
        .map(|(key, group, theirs)| {
            let changed = reconcile_group(group, theirs);
            if changed > 0 {
                debug!(section = %key, changed, "section reconciled");
            }
            changed
        })
        .sum()
}

/// Same as [`reconcile`] for a single group.
pub fn reconcile_group(target: &mut Group, source: &Group) -> usize {
    let mut changes = 0;
    for (key, element) in target.elements.iter_mut() {
        match (element, source.get(key)) {
            (Element::Group(ours), Some(Element::Group(theirs))) => {
                changes += reconcile_group(ours, theirs);
            }
            (Element::Entry(ours), Some(Element::Entry(theirs))) => {
                if !ours.value_eq(theirs) {
                    *ours = theirs.clone();
                    changes += 1;
                }
            }
            _ => {}
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff, diff_group};
    use crate::tree::Entry;

    fn num(raw: f64) -> Entry {
        Entry::numeric("Temp", "/t", raw, 1.0, 0, "°C")
    }

    fn sample(base: f64) -> ConfigTree {
        ConfigTree::new()
            .with_section(
                "boiler",
                Group::new()
                    .with("temp", num(base))
                    .with("nested", Group::new().with("a", num(base + 1.0)).with("b", num(2.0))),
            )
            .with_section("tank", Group::new().with("top", num(base * 2.0)))
    }

    #[test]
    fn test_single_replacement() {
        let mut target = Group::new().with("temp", num(10.0));
        let source = Group::new().with("temp", num(12.0));

        assert_eq!(reconcile_group(&mut target, &source), 1);
        assert_eq!(target.get("temp"), Some(&Element::Entry(num(12.0))));
    }

    #[test]
    fn test_missing_key_left_alone() {
        let mut target = Group::new().with("a", Group::new().with("b", num(1.0)));
        let before = target.clone();
        let source = Group::new().with("a", Group::new());

        assert_eq!(reconcile_group(&mut target, &source), 0);
        assert_eq!(target, before);
    }

    #[test]
    fn test_replacement_takes_source_metadata() {
        let mut target = Group::new().with("temp", num(10.0));
        let mut fresh = num(11.0);
        fresh.address = "/moved".into();
        let source = Group::new().with("temp", fresh.clone());

        reconcile_group(&mut target, &source);
        assert_eq!(target.get("temp"), Some(&Element::Entry(fresh)));
    }

    #[test]
    fn test_metadata_only_change_not_counted() {
        let mut target = Group::new().with("temp", num(10.0));
        let mut renamed = num(10.0);
        renamed.name = "Other".into();
        let source = Group::new().with("temp", renamed);

        assert_eq!(reconcile_group(&mut target, &source), 0);
        assert_eq!(target.get("temp"), Some(&Element::Entry(num(10.0))));
    }

    #[test]
    fn test_shape_mismatch_tolerated() {
        let mut target = Group::new()
            .with("leaf", num(1.0))
            .with("group", Group::new().with("x", num(1.0)))
            .with("changed", num(1.0));
        let source = Group::new()
            .with("leaf", Group::new())
            .with("group", num(9.0))
            .with("changed", num(2.0));

        assert_eq!(reconcile_group(&mut target, &source), 1);
        assert_eq!(target.get("leaf"), Some(&Element::Entry(num(1.0))));
        assert!(matches!(target.get("group"), Some(Element::Group(_))));
    }

    #[test]
    fn test_count_matches_value_diffs_and_converges() {
        let mut target = sample(10.0);
        let source = sample(20.0)
            .with_section("extra", Group::new().with("ignored", num(0.0)));

        let expected = diff(&target, &source).iter().filter(|d| d.is_value_change()).count();
        assert_eq!(expected, 3);

        assert_eq!(reconcile(&mut target, &source), expected);
        assert!(diff(&target, &source).iter().all(|d| !d.is_value_change()));
        assert!(target.section("extra").is_none());
    }

    #[test]
    fn test_idempotent() {
        let mut target = sample(1.0);
        let source = sample(5.0);

        let first = reconcile(&mut target, &source);
        let after_first = target.clone();
        let second = reconcile(&mut target, &source);

        assert!(first > 0);
        assert_eq!(second, 0);
        assert_eq!(target, after_first);
    }

    #[test]
    fn test_missing_section_untouched() {
        let mut target = sample(1.0);
        let source = ConfigTree::new().with_section("boiler", Group::new().with("temp", num(1.0)));
        let tank_before = target.section("tank").cloned();

        assert_eq!(reconcile(&mut target, &source), 0);
        assert_eq!(target.section("tank").cloned(), tank_before);
        assert!(diff_group(target.section("boiler").unwrap(), source.section("boiler").unwrap())
            .iter()
            .all(|d| !d.is_value_change()));
    }
}
