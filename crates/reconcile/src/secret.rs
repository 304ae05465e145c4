//! One-time secrets
//!
//! Secret-once fields (storage tokens, project tokens) appear in exactly one
//! remote response: the Create response. They are moved out of the observed
//! field map into [`SecretFields`] at that point and never refreshed again.

use crate::capability::CapabilityDescriptor;
use crate::state::ObservedState;
use crate::value::{Fields, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placeholder shown instead of secret or sensitive values.
pub const REDACTED: &str = "(sensitive)";

/// Captured secret-once values, keyed by field name.
///
/// `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretFields(BTreeMap<String, String>);

impl SecretFields {
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Plain secret value, for the API client that must authenticate with it.
    pub fn expose(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Whether `value` is the captured secret for `field`.
    pub fn matches(&self, field: &str, value: &Value) -> bool {
        match (self.0.get(field), secret_text(value)) {
            (Some(captured), Some(candidate)) => *captured == candidate,
            _ => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, REDACTED)))
            .finish()
    }
}

/// Move the secret-once fields of a Create response into [`SecretFields`].
///
/// The remaining entries of `response` are the observable fields. A
/// secret-once field missing from the response (or null) is simply not
/// captured.
pub fn capture_on_create(caps: &CapabilityDescriptor, response: &mut Fields) -> SecretFields {
    let mut secrets = SecretFields::default();
    for field in caps.secret_once_fields() {
        if let Some(value) = response.remove(field) {
            match secret_text(&value) {
                Some(text) => secrets.insert(field, text),
                None => log::debug!(
                    "{}: create response carried no value for secret field '{field}'",
                    caps.resource_type()
                ),
            }
        }
    }
    secrets
}

/// Observed state with every secret removed, suitable for comparison and
/// display.
pub fn redact_for_diff(caps: &CapabilityDescriptor, observed: &ObservedState) -> ObservedState {
    let mut redacted = observed.clone();
    redacted.secrets = SecretFields::default();
    redacted
        .fields
        .retain(|name, _| !caps.is_secret_once(name));
    redacted
}

/// Render a value for display, hiding it when the field is sensitive.
pub fn display_value(caps: &CapabilityDescriptor, field: &str, value: &Value) -> String {
    if caps.is_sensitive(field) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

fn secret_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(_) => value.as_id_string(),
        Value::Bool(b) => Some(b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Verb;
    use crate::fields;
    use crate::id::ExternalId;

    fn token_caps() -> CapabilityDescriptor {
        CapabilityDescriptor::new("project-token")
            .verbs([Verb::Create, Verb::Delete])
            .secret_once(["token"])
    }

    #[test]
    fn test_capture_moves_secret_out() {
        let caps = token_caps();
        let mut response = fields! { "description" => "ci", "token" => "abc123" };
        let secrets = capture_on_create(&caps, &mut response);

        assert_eq!(secrets.expose("token"), Some("abc123"));
        assert!(!response.contains_key("token"));
        assert_eq!(response["description"], Value::from("ci"));
    }

    #[test]
    fn test_capture_without_secret_in_response() {
        let caps = token_caps();
        let mut response = fields! { "description" => "ci", "token" => Value::Null };
        let secrets = capture_on_create(&caps, &mut response);
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let mut secrets = SecretFields::default();
        secrets.insert("token", "abc123");
        let debug = format!("{secrets:?}");
        assert!(!debug.contains("abc123"));
        assert!(debug.contains("token"));
    }

    #[test]
    fn test_matches() {
        let mut secrets = SecretFields::default();
        secrets.insert("token", "abc123");
        assert!(secrets.matches("token", &Value::from("abc123")));
        assert!(!secrets.matches("token", &Value::from("other")));
        assert!(!secrets.matches("password", &Value::from("abc123")));
    }

    #[test]
    fn test_redact_for_diff() {
        let caps = token_caps();
        let mut observed = ObservedState::present(
            "project-token",
            ExternalId::new("17"),
            fields! { "description" => "ci", "token" => "stale" },
        );
        observed.secrets.insert("token", "abc123");

        let redacted = redact_for_diff(&caps, &observed);
        assert!(redacted.secrets.is_empty());
        assert!(!redacted.fields.contains_key("token"));
        assert_eq!(redacted.fields["description"], Value::from("ci"));
        assert_eq!(display_value(&caps, "token", &Value::from("x")), REDACTED);
    }
}
