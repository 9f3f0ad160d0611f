use crate::types::{FieldChange, StatusSnapshot};

/// Per-field differences between two snapshots, in key order.
///
/// A missing `previous` reports every field of `current` as new. Keys that
/// disappear are reported with `new: None`.
pub(crate) fn diff_snapshots(
    previous: Option<&StatusSnapshot>,
    current: &StatusSnapshot,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (key, curr_val) in current.iter() {
        let prev_val = previous.and_then(|p| p.get(key));
        if prev_val != Some(curr_val) {
            changes.push(FieldChange {
                key: key.to_string(),
                old: prev_val.cloned(),
                new: Some(curr_val.clone()),
            });
        }
    }

    if let Some(prev) = previous {
        for (key, prev_val) in prev.iter() {
            if !current.contains_key(key) {
                changes.push(FieldChange {
                    key: key.to_string(),
                    old: Some(prev_val.clone()),
                    new: None,
                });
            }
        }
        changes.sort_by(|a, b| a.key.cmp(&b.key));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use std::collections::BTreeMap;

    fn snapshot(pairs: &[(&str, i64)]) -> StatusSnapshot {
        let fields: BTreeMap<_, _> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Int(*v)))
            .collect();
        StatusSnapshot::new(fields)
    }

    #[test]
    fn diff_detects_leaf_change() {
        let prev = snapshot(&[("currenttemp", 710), ("battv", 124)]);
        let curr = snapshot(&[("currenttemp", 720), ("battv", 124)]);
        let changes = diff_snapshots(Some(&prev), &curr);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, "currenttemp");
        assert_eq!(changes[0].old, Some(FieldValue::Int(710)));
        assert_eq!(changes[0].new, Some(FieldValue::Int(720)));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let s = snapshot(&[("currenttemp", 710), ("battv", 124)]);
        assert!(diff_snapshots(Some(&s), &s).is_empty());
    }

    #[test]
    fn first_snapshot_reports_everything() {
        let curr = snapshot(&[("a", 1), ("b", 2)]);
        let changes = diff_snapshots(None, &curr);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.old.is_none()));
    }

    #[test]
    fn diff_detects_removed_and_new_keys() {
        let prev = snapshot(&[("fault_AF", 1), ("setpoint", 680)]);
        let curr = snapshot(&[("fault_CF", 1), ("setpoint", 680)]);
        let changes = diff_snapshots(Some(&prev), &curr);
        let keys: Vec<_> = changes.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["fault_AF", "fault_CF"]);
        assert_eq!(changes[0].new, None);
        assert_eq!(changes[1].old, None);
    }
}
