//! Desired and observed resource state

use crate::id::ExternalId;
use crate::secret::SecretFields;
use crate::value::Fields;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status recorded for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Remote object exists and is managed
    Present,
    /// No remote object is managed
    #[default]
    Absent,
    /// Remote object was consumed out of band; terminal
    AlreadyConsumed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
            Self::AlreadyConsumed => f.write_str("already_consumed"),
        }
    }
}

/// Caller's intended configuration for one resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub resource_type: String,
    pub fields: Fields,
}

impl DesiredState {
    pub fn new(resource_type: impl Into<String>, fields: Fields) -> Self {
        Self {
            resource_type: resource_type.into(),
            fields,
        }
    }
}

/// Last known remote truth for one resource instance.
///
/// This is the persisted shape handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "externalID", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<ExternalId>,
    #[serde(rename = "observedFields", default)]
    pub fields: Fields,
    #[serde(rename = "secretFields", default, skip_serializing_if = "SecretFields::is_empty")]
    pub secrets: SecretFields,
    pub status: ResourceStatus,
}

impl ObservedState {
    /// State of a resource with nothing behind it.
    pub fn absent(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            external_id: None,
            fields: Fields::new(),
            secrets: SecretFields::default(),
            status: ResourceStatus::Absent,
        }
    }

    pub fn present(resource_type: impl Into<String>, external_id: ExternalId, fields: Fields) -> Self {
        Self {
            resource_type: resource_type.into(),
            external_id: Some(external_id),
            fields,
            secrets: SecretFields::default(),
            status: ResourceStatus::Present,
        }
    }

    pub fn is_present(&self) -> bool {
        self.status == ResourceStatus::Present
    }

    pub fn is_absent(&self) -> bool {
        self.status == ResourceStatus::Absent
    }

    pub fn is_consumed(&self) -> bool {
        self.status == ResourceStatus::AlreadyConsumed
    }

    pub fn id_str(&self) -> Option<&str> {
        self.external_id.as_ref().map(ExternalId::as_str)
    }
}
