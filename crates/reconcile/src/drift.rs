//! Drift reporting
//!
//! A [`DriftReport`] lists the discrepancies between desired and observed
//! state that a pass did not (or could not) reconcile. Building one is a pure
//! projection of a [`ChangeSet`] and the unsupported operations hit during the
//! pass.

use crate::capability::Verb;
use crate::diff::{ChangeKind, ChangeSet, FieldChange};
use crate::secret::REDACTED;
use crate::value::Value;
use serde::Serialize;
use std::fmt;

/// How loudly an item should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

/// What kind of discrepancy an item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DriftKind {
    /// A field change that is pending (plans) or left alone (ignored)
    Changed { change: ChangeKind },
    /// The remote API cannot perform a verb this pass needed
    Unsupported { verb: Verb },
    /// Informational note about a deliberate asymmetry
    Notice,
}

/// One discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(flatten)]
    pub kind: DriftKind,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for DriftItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// An operation the capability table ruled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedOp {
    pub verb: Verb,
    /// Field that could not be honoured, if the operation was field-driven
    pub field: Option<String>,
    pub reason: String,
}

impl UnsupportedOp {
    pub fn verb(verb: Verb, reason: impl Into<String>) -> Self {
        Self {
            verb,
            field: None,
            reason: reason.into(),
        }
    }

    pub fn field(verb: Verb, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            verb,
            field: Some(field.into()),
            reason: reason.into(),
        }
    }
}

/// Ordered list of discrepancies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DriftReport {
    items: Vec<DriftItem>,
}

impl DriftReport {
    pub fn items(&self) -> &[DriftItem] {
        &self.items
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DriftItem> {
        self.items
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    pub fn push(&mut self, item: DriftItem) {
        self.items.push(item);
    }

    /// Append an informational note.
    pub fn push_notice(&mut self, field: Option<&str>, message: impl Into<String>) {
        self.items.push(DriftItem {
            field: field.map(str::to_string),
            kind: DriftKind::Notice,
            severity: Severity::Info,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Project a change set and the unsupported operations of a pass into a
/// report.
///
/// Field changes come first in field order, followed by the unsupported
/// operations in the order they were hit. Sensitive values are redacted.
pub fn report(change_set: &ChangeSet, unsupported: &[UnsupportedOp]) -> DriftReport {
    let mut items: Vec<DriftItem> = change_set.changes().map(change_item).collect();

    items.extend(unsupported.iter().map(|op| DriftItem {
        field: op.field.clone(),
        kind: DriftKind::Unsupported { verb: op.verb },
        severity: Severity::Warning,
        message: format!("cannot {}: {}", op.verb, op.reason),
    }));

    DriftReport { items }
}

fn change_item(change: &FieldChange) -> DriftItem {
    let shown = |value: &Value| {
        if change.sensitive {
            REDACTED.to_string()
        } else {
            value.to_string()
        }
    };
    let from = change
        .from
        .as_ref()
        .map_or_else(|| "(none)".to_string(), shown);
    let to = shown(&change.to);

    let (severity, message) = match (change.kind, change.reason) {
        (ChangeKind::Ignored, Some(reason)) => (
            Severity::Warning,
            format!("{from} -> {to} ignored: {reason}"),
        ),
        (kind, _) => (Severity::Info, format!("{from} -> {to} ({kind})")),
    };

    DriftItem {
        field: Some(change.field.clone()),
        kind: DriftKind::Changed { change: change.kind },
        severity,
        message,
    }
}
