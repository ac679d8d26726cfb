use serde_json::{Map, Value};

/// The result of comparing an incoming item against the existing stored
/// record for the same key.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDiff {
    /// No existing record: write the item in full.
    Create(Value),
    /// An existing record, but every field already matches: no write.
    NoOp,
    /// An existing record with some fields changed: write only those,
    /// plus `key_field`.
    Update(Value),
}

/// Compare `incoming` against `existing` (`None` if the item is new),
/// excluding `key_field` from the equality check, and return the minimal
/// write.
pub fn diff_fields(existing: Option<&Value>, incoming: &Value, key_field: &str) -> FieldDiff {
    let Some(existing) = existing else {
        return FieldDiff::Create(incoming.clone());
    };

    let (Some(existing_obj), Some(incoming_obj)) = (existing.as_object(), incoming.as_object()) else {
        return if existing == incoming { FieldDiff::NoOp } else { FieldDiff::Update(incoming.clone()) };
    };

    let mut changed = Map::new();
    for (field, value) in incoming_obj {
        if field == key_field {
            continue;
        }
        if existing_obj.get(field) != Some(value) {
            changed.insert(field.clone(), value.clone());
        }
    }

    if changed.is_empty() {
        FieldDiff::NoOp
    } else {
        if let Some(key_value) = incoming_obj.get(key_field) {
            changed.insert(key_field.to_string(), key_value.clone());
        }
        FieldDiff::Update(Value::Object(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_record_is_a_full_create() {
        let incoming = json!({"id": "CVE-2024-1", "severity": "high"});
        assert_eq!(diff_fields(None, &incoming, "id"), FieldDiff::Create(incoming));
    }

    #[test]
    fn identical_record_is_a_noop() {
        let existing = json!({"id": "CVE-2024-1", "severity": "high"});
        let incoming = existing.clone();
        assert_eq!(diff_fields(Some(&existing), &incoming, "id"), FieldDiff::NoOp);
    }

    #[test]
    fn changed_field_produces_a_minimal_update_carrying_the_key() {
        let existing = json!({"id": "CVE-2024-1", "severity": "medium", "cvss": 5.5});
        let incoming = json!({"id": "CVE-2024-1", "severity": "high", "cvss": 5.5});
        let diff = diff_fields(Some(&existing), &incoming, "id");
        assert_eq!(diff, FieldDiff::Update(json!({"id": "CVE-2024-1", "severity": "high"})));
    }

    #[test]
    fn key_field_itself_is_never_the_sole_trigger_of_a_diff() {
        let existing = json!({"id": "CVE-2024-1", "severity": "high"});
        let incoming = json!({"id": "CVE-2024-1", "severity": "high"});
        assert_eq!(diff_fields(Some(&existing), &incoming, "id"), FieldDiff::NoOp);
    }
}
