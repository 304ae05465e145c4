//! External identifier codec
//!
//! Composite identifiers join their components with `:`. Inside a component,
//! `%` is written `%25` and `:` is written `%3A`, so ids built from plain
//! components look exactly like the familiar `parent:child` form while every
//! component string still round-trips.

use crate::capability::CapabilityDescriptor;
use crate::error::ReconcileError;
use crate::value::Fields;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Component separator.
pub const SEPARATOR: char = ':';

/// Opaque string addressing one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Wrap an already-encoded identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Encode components into an identifier.
pub fn encode<S: AsRef<str>>(components: &[S]) -> ExternalId {
    let encoded: Vec<String> = components
        .iter()
        .map(|c| escape(c.as_ref()))
        .collect();
    ExternalId(encoded.join(&SEPARATOR.to_string()))
}

/// Decode an identifier against the resource type's expected shape.
pub fn decode(id: &ExternalId, caps: &CapabilityDescriptor) -> Result<Vec<String>, ReconcileError> {
    let malformed =
        |message: String| ReconcileError::malformed_id(caps.resource_type(), id.as_str(), message);

    let shape = caps.shape();
    let raw: Vec<&str> = id.as_str().split(SEPARATOR).collect();
    if raw.len() != shape.arity() {
        return Err(malformed(format!(
            "expected {} component(s), found {}",
            shape.arity(),
            raw.len()
        )));
    }

    let mut components = Vec::with_capacity(raw.len());
    for (index, (part, spec)) in raw.iter().zip(shape.components()).enumerate() {
        let value = unescape(part).ok_or_else(|| {
            malformed(format!("component {} has an invalid escape sequence", index + 1))
        })?;
        if value.is_empty() {
            return Err(malformed(format!("component {} is empty", index + 1)));
        }
        if spec.numeric && value.parse::<u64>().is_err() {
            return Err(malformed(format!(
                "component {} ('{value}') is not a valid integer",
                index + 1
            )));
        }
        components.push(value);
    }
    Ok(components)
}

/// Build an identifier from the fields its components mirror.
///
/// Returns `None` when the shape has an unnamed component or a mirrored
/// field is missing or has no identifier form.
pub fn encode_from_fields(caps: &CapabilityDescriptor, fields: &Fields) -> Option<ExternalId> {
    let components = caps
        .shape()
        .components()
        .iter()
        .map(|c| fields.get(c.field?)?.as_id_string())
        .collect::<Option<Vec<String>>>()?;
    Some(encode(&components))
}

/// Named components of a decoded identifier, as `(field, value)` pairs.
pub fn mirrored_fields<'a>(
    caps: &'a CapabilityDescriptor,
    components: &'a [String],
) -> impl Iterator<Item = (&'static str, &'a str)> + 'a {
    caps.shape()
        .components()
        .iter()
        .zip(components)
        .filter_map(|(spec, value)| spec.field.map(|f| (f, value.as_str())))
}

fn escape(component: &str) -> String {
    component.replace('%', "%25").replace(SEPARATOR, "%3A")
}

fn unescape(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.to_ascii_uppercase().as_str() {
            "25" => out.push('%'),
            "3A" => out.push(SEPARATOR),
            _ => return None,
        }
    }
    Some(out)
}
