use crate::core::Fields;
use crate::storage::FieldUpdates;

/// Ordered field-level changes between two snapshots of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    changes: FieldUpdates,
}

impl Diff {
    /// Collects every field of `after` that differs from `before`, in field
    /// order. A field dropped from `after` is recorded as `null`. Fields
    /// rejected by `include` are ignored on both sides.
    pub fn between(before: &Fields, after: &Fields, include: impl Fn(&str) -> bool) -> Self {
        let mut changes = Vec::new();

        for (field, value) in after {
            if include(field) && before.get(field) != Some(value) {
                changes.push((field.clone(), value.clone()));
            }
        }
        for field in before.keys() {
            if include(field) && !after.contains_key(field) {
                changes.push((field.clone(), serde_json::Value::Null));
            }
        }

        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn push(&mut self, field: &str, value: serde_json::Value) {
        self.changes.push((field.to_string(), value));
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|(field, _)| field.as_str())
    }

    pub fn into_updates(self) -> FieldUpdates {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_diff_keeps_only_changed_fields() {
        let before = fields(&[("status", json!(1)), ("note", json!("a")), ("discount", json!(5))]);
        let after = fields(&[("status", json!(3)), ("note", json!("a")), ("discount", json!(5))]);

        let diff = Diff::between(&before, &after, |_| true);

        assert_eq!(diff.into_updates(), vec![("status".to_string(), json!(3))]);
    }

    #[test]
    fn test_diff_skips_excluded_and_nulls_removed() {
        let before = fields(&[("member_ids", json!(["U1"])), ("note", json!("a"))]);
        let after = fields(&[("member_ids", json!(["U1", "U2"]))]);

        let diff = Diff::between(&before, &after, |field| field != "member_ids");

        assert_eq!(diff.fields().collect::<Vec<_>>(), vec!["note"]);
        assert_eq!(diff.into_updates()[0].1, serde_json::Value::Null);
    }

    #[test]
    fn test_identical_snapshots_give_empty_diff() {
        let snapshot = fields(&[("a", json!({"nested": [1, 2]}))]);
        assert!(Diff::between(&snapshot, &snapshot.clone(), |_| true).is_empty());
    }
}
