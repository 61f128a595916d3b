//! Structural diff and merge over JSON rows.
//!
//! An update never writes a whole row. The store diffs the modified clone
//! against the snapshot it was read from and writes only the fields that
//! changed. The same patch is then folded back into the caller's in-memory
//! copy with [`merge_defined`]:
//!
//! - a field present in the patch wins, including an explicit `null`;
//! - a field absent from the patch keeps its previous value;
//! - nested objects merge field by field, arrays and scalars are replaced.
//!
//! Two loops that own disjoint fields of the same row therefore never
//! overwrite each other.

use serde_json::{Map, Value};

/// Compute the patch that turns `before` into `after`.
///
/// Returns `None` when the two values are equal. Keys removed from an
/// object appear in the patch as `null`.
pub fn diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) => {
                        if let Some(sub) = diff(old_value, new_value) {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(after.clone()),
    }
}

/// Merge `patch` into `target` using defined-value-wins, absent-value-preserves.
pub fn merge_defined(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_defined(existing, value);
                    }
                    Some(existing) => *existing = value.clone(),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_have_no_diff() {
        let v = json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(diff(&v, &v.clone()), None);
    }

    #[test]
    fn diff_keeps_only_changed_leaves() {
        let before = json!({"capacity": 1, "state": {"verdict": null, "extra": {"zone": "a"}}});
        let after = json!({"capacity": 1, "state": {"verdict": {"terminate": true}, "extra": {"zone": "a"}}});
        let patch = diff(&before, &after).unwrap();
        assert_eq!(patch, json!({"state": {"verdict": {"terminate": true}}}));
    }

    #[test]
    fn removed_keys_become_null() {
        let before = json!({"extra": {"zone": "a", "rack": "r1"}});
        let after = json!({"extra": {"zone": "a"}});
        assert_eq!(diff(&before, &after).unwrap(), json!({"extra": {"rack": null}}));
    }

    #[test]
    fn explicit_null_is_applied() {
        let mut target = json!({"quarantine_until": "2026-01-01T00:00:00Z", "capacity": 2});
        merge_defined(&mut target, &json!({"quarantine_until": null}));
        assert_eq!(target, json!({"quarantine_until": null, "capacity": 2}));
    }

    #[test]
    fn absent_fields_are_preserved_at_every_level() {
        let mut target = json!({
            "capacity": 1,
            "provider_state": {"verdict": null, "zombie": {"checked": 1}, "extra": {"zone": "a"}}
        });
        merge_defined(
            &mut target,
            &json!({"provider_state": {"verdict": {"terminate": false}}}),
        );
        assert_eq!(
            target,
            json!({
                "capacity": 1,
                "provider_state": {
                    "verdict": {"terminate": false},
                    "zombie": {"checked": 1},
                    "extra": {"zone": "a"}
                }
            })
        );
    }

    #[test]
    fn disjoint_patches_compose() {
        let base = json!({"capacity": 1, "provider_state": {"verdict": null}});

        let mut scanner_copy = base.clone();
        scanner_copy["provider_state"]["verdict"] = json!({"terminate": true});
        let scanner_patch = diff(&base, &scanner_copy).unwrap();

        let mut provisioner_copy = base.clone();
        provisioner_copy["capacity"] = json!(4);
        let provisioner_patch = diff(&base, &provisioner_copy).unwrap();

        let mut row = base;
        merge_defined(&mut row, &scanner_patch);
        merge_defined(&mut row, &provisioner_patch);
        assert_eq!(
            row,
            json!({"capacity": 4, "provider_state": {"verdict": {"terminate": true}}})
        );
    }

    #[test]
    fn arrays_are_replaced_whole() {
        let mut target = json!({"ids": ["a", "b"]});
        merge_defined(&mut target, &json!({"ids": ["c"]}));
        assert_eq!(target, json!({"ids": ["c"]}));
    }
}
