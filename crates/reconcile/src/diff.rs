//! State diffing
//!
//! [`diff`] compares a desired field map against the last observed state and
//! classifies every desired field. A single `ForcesReplace` entry turns the
//! whole pass into a replace; there is no partial update.

use crate::capability::CapabilityDescriptor;
use crate::state::ObservedState;
use crate::value::{Fields, Value};
use serde::Serialize;
use std::fmt;

/// Classification of one desired field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Unchanged,
    UpdateInPlace,
    ForcesReplace,
    /// Differs, but the engine will not act on it (computed or secret field)
    Ignored,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::UpdateInPlace => f.write_str("update in place"),
            Self::ForcesReplace => f.write_str("forces replacement"),
            Self::Ignored => f.write_str("ignored"),
        }
    }
}

/// Why an `Ignored` field is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Owned by the remote side
    Computed,
    /// Only settable at creation and not immutable, so a new value is dropped
    SecretOnce,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Computed => f.write_str("value is computed by the remote API"),
            Self::SecretOnce => f.write_str("one-time secret cannot be changed after creation"),
        }
    }
}

/// One classified field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub kind: ChangeKind,
    /// Observed value, if any
    pub from: Option<Value>,
    /// Desired value
    pub to: Value,
    /// Whether values must be redacted when displayed
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IgnoreReason>,
}

/// What a change set requires of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    NoOp,
    Create,
    Update,
    Replace,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => f.write_str("no changes"),
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update in place"),
            Self::Replace => f.write_str("replace"),
        }
    }
}

/// Per-field classification for one pass, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet {
    entries: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.entries.iter().find(|c| c.field == field)
    }

    pub fn kind(&self, field: &str) -> Option<ChangeKind> {
        self.get(field).map(|c| c.kind)
    }

    /// Every classified field, unchanged ones included.
    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.entries.iter()
    }

    /// Entries that are not `Unchanged`.
    pub fn changes(&self) -> impl Iterator<Item = &FieldChange> {
        self.entries
            .iter()
            .filter(|c| c.kind != ChangeKind::Unchanged)
    }

    /// Entries the reconciler would act on.
    pub fn actionable(&self) -> impl Iterator<Item = &FieldChange> {
        self.entries
            .iter()
            .filter(|c| matches!(c.kind, ChangeKind::UpdateInPlace | ChangeKind::ForcesReplace))
    }

    pub fn requires_replace(&self) -> bool {
        self.entries
            .iter()
            .any(|c| c.kind == ChangeKind::ForcesReplace)
    }

    pub fn has_changes(&self) -> bool {
        self.actionable().next().is_some()
    }

    /// Desired values of the in-place changes, as sent to Update.
    pub fn update_fields(&self) -> Fields {
        self.entries
            .iter()
            .filter(|c| c.kind == ChangeKind::UpdateInPlace)
            .map(|c| (c.field.clone(), c.to.clone()))
            .collect()
    }

    pub fn decision(&self) -> Decision {
        if self.requires_replace() {
            Decision::Replace
        } else if self.has_changes() {
            Decision::Update
        } else {
            Decision::NoOp
        }
    }

    /// Only the `Ignored` entries; what is left after the rest was applied.
    #[must_use]
    pub fn ignored_only(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|c| c.kind == ChangeKind::Ignored)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Classify every field of `desired` against `observed`.
///
/// Fields only present in `observed` are not part of the result; the remote
/// side may report more than the caller manages.
pub fn diff(desired: &Fields, observed: &ObservedState, caps: &CapabilityDescriptor) -> ChangeSet {
    let entries = desired
        .iter()
        .map(|(field, to)| {
            let from = observed.fields.get(field).cloned();
            let (kind, reason) = classify(field, to, from.as_ref(), observed, caps);
            FieldChange {
                field: field.clone(),
                kind,
                from,
                to: to.clone(),
                sensitive: caps.is_sensitive(field),
                reason,
            }
        })
        .collect();
    ChangeSet { entries }
}

fn classify(
    field: &str,
    to: &Value,
    from: Option<&Value>,
    observed: &ObservedState,
    caps: &CapabilityDescriptor,
) -> (ChangeKind, Option<IgnoreReason>) {
    if caps.is_secret_once(field) && observed.secrets.contains(field) {
        return if observed.secrets.matches(field, to) {
            (ChangeKind::Unchanged, None)
        } else if caps.is_immutable(field) {
            (ChangeKind::ForcesReplace, None)
        } else {
            (ChangeKind::Ignored, Some(IgnoreReason::SecretOnce))
        };
    }

    let same = match from {
        Some(current) => current == to,
        None => to.is_null(),
    };
    if same {
        (ChangeKind::Unchanged, None)
    } else if caps.is_computed(field) {
        (ChangeKind::Ignored, Some(IgnoreReason::Computed))
    } else if caps.is_immutable(field) {
        (ChangeKind::ForcesReplace, None)
    } else {
        (ChangeKind::UpdateInPlace, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Verb;
    use crate::fields;
    use crate::id::ExternalId;

    fn org_caps() -> CapabilityDescriptor {
        CapabilityDescriptor::new("organization")
            .immutable(["maintainer_id"])
            .computed(["created"])
    }

    fn org(fields: Fields) -> ObservedState {
        ObservedState::present("organization", ExternalId::new("5"), fields)
    }

    #[test]
    fn test_no_changes() {
        let caps = org_caps();
        let observed = org(fields! { "name" => "acme", "maintainer_id" => "1", "extra" => 3_i64 });
        let cs = diff(&fields! { "name" => "acme", "maintainer_id" => "1" }, &observed, &caps);

        assert_eq!(cs.len(), 2);
        assert_eq!(cs.decision(), Decision::NoOp);
        assert!(!cs.has_changes());
        assert!(cs.get("extra").is_none());
    }

    #[test]
    fn test_mutable_change_updates_in_place() {
        let caps = org_caps();
        let observed = org(fields! { "name" => "acme", "maintainer_id" => "1" });
        let cs = diff(&fields! { "name" => "acme-2", "maintainer_id" => "1" }, &observed, &caps);

        assert_eq!(cs.kind("name"), Some(ChangeKind::UpdateInPlace));
        assert_eq!(cs.kind("maintainer_id"), Some(ChangeKind::Unchanged));
        assert_eq!(cs.decision(), Decision::Update);
        assert_eq!(cs.update_fields(), fields! { "name" => "acme-2" });
    }

    #[test]
    fn test_only_immutable_change_is_all_replace() {
        let caps = org_caps();
        let observed = org(fields! { "name" => "acme", "maintainer_id" => "1" });
        let cs = diff(&fields! { "name" => "acme", "maintainer_id" => "2" }, &observed, &caps);

        assert!(cs.changes().all(|c| c.kind == ChangeKind::ForcesReplace));
        assert_eq!(cs.changes().count(), 1);
        assert_eq!(cs.decision(), Decision::Replace);
    }

    #[test]
    fn test_replace_wins_over_update() {
        let caps = org_caps();
        let observed = org(fields! { "name" => "acme", "maintainer_id" => "1" });
        let cs = diff(&fields! { "name" => "acme-2", "maintainer_id" => "2" }, &observed, &caps);

        assert_eq!(cs.decision(), Decision::Replace);
        assert_eq!(cs.kind("name"), Some(ChangeKind::UpdateInPlace));
    }

    #[test]
    fn test_new_field_counts_as_change() {
        let caps = org_caps();
        let observed = org(fields! { "name" => "acme" });
        let cs = diff(&fields! { "name" => "acme", "maintainer_id" => "1" }, &observed, &caps);
        assert_eq!(cs.kind("maintainer_id"), Some(ChangeKind::ForcesReplace));

        let cs = diff(&fields! { "name" => "acme", "description" => Value::Null }, &observed, &caps);
        assert_eq!(cs.kind("description"), Some(ChangeKind::Unchanged));
    }

    #[test]
    fn test_computed_is_ignored() {
        let caps = org_caps();
        let observed = org(fields! { "created" => "2024-01-01" });
        let cs = diff(&fields! { "created" => "2025-01-01" }, &observed, &caps);

        let change = cs.get("created").unwrap();
        assert_eq!(change.kind, ChangeKind::Ignored);
        assert_eq!(change.reason, Some(IgnoreReason::Computed));
        assert_eq!(cs.decision(), Decision::NoOp);
        assert_eq!(cs.ignored_only().len(), 1);
    }

    #[test]
    fn test_captured_secret_is_not_drift() {
        let caps = CapabilityDescriptor::new("project-token")
            .verbs([Verb::Create, Verb::Delete])
            .immutable(["description", "token"])
            .secret_once(["token"]);
        let mut observed = ObservedState::present(
            "project-token",
            ExternalId::new("17"),
            fields! { "description" => "ci" },
        );
        observed.secrets.insert("token", "abc123");

        let cs = diff(&fields! { "description" => "ci" }, &observed, &caps);
        assert!(cs.get("token").is_none());
        assert_eq!(cs.decision(), Decision::NoOp);

        let cs = diff(&fields! { "description" => "ci", "token" => "abc123" }, &observed, &caps);
        assert_eq!(cs.kind("token"), Some(ChangeKind::Unchanged));

        let cs = diff(&fields! { "description" => "ci", "token" => "new" }, &observed, &caps);
        assert_eq!(cs.kind("token"), Some(ChangeKind::ForcesReplace));
        assert!(cs.get("token").unwrap().sensitive);
    }

    #[test]
    fn test_mutable_secret_change_is_ignored() {
        let caps = CapabilityDescriptor::new("project").secret_once(["storage_token"]);
        let mut observed = ObservedState::present("project", ExternalId::new("3"), Fields::new());
        observed.secrets.insert("storage_token", "s3cr3t");

        let cs = diff(&fields! { "storage_token" => "other" }, &observed, &caps);
        let change = cs.get("storage_token").unwrap();
        assert_eq!(change.kind, ChangeKind::Ignored);
        assert_eq!(change.reason, Some(IgnoreReason::SecretOnce));
    }

    #[test]
    fn test_number_and_string_are_different() {
        let caps = CapabilityDescriptor::new("backend");
        let observed = ObservedState::present("backend", ExternalId::new("1"), fields! { "port" => "5432" });
        let cs = diff(&fields! { "port" => 5432_i64 }, &observed, &caps);
        assert_eq!(cs.kind("port"), Some(ChangeKind::UpdateInPlace));
    }
}
