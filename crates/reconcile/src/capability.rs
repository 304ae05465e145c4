//! Capability descriptors
//!
//! A [`CapabilityDescriptor`] declares, per resource type, which lifecycle
//! verbs the remote API really supports and how individual fields behave
//! (immutable, secret-once, computed, sensitive). The
//! [`CapabilityRegistry`] is built once at startup and only read afterwards,
//! so it can be shared across threads without synchronization.

use crate::error::ReconcileError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Verb {
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Create => 1,
            Self::Read => 1 << 1,
            Self::Update => 1 << 2,
            Self::Delete => 1 << 3,
            Self::Import => 1 << 4,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of supported verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerbSet(u8);

impl VerbSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Full CRUD plus import.
    pub const fn all() -> Self {
        Self(0b1_1111)
    }

    #[must_use]
    pub const fn with(self, verb: Verb) -> Self {
        Self(self.0 | verb.bit())
    }

    #[must_use]
    pub const fn without(self, verb: Verb) -> Self {
        Self(self.0 & !verb.bit())
    }

    pub const fn contains(&self, verb: Verb) -> bool {
        self.0 & verb.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Verb> + '_ {
        Verb::ALL.into_iter().filter(|v| self.contains(*v))
    }
}

impl FromIterator<Verb> for VerbSet {
    fn from_iter<I: IntoIterator<Item = Verb>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// How a `NotFound` on Read of a present resource is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// The object is gone; local state becomes absent
    #[default]
    Absent,
    /// The object was consumed out of band (e.g. an accepted invitation);
    /// local state is kept with a terminal status
    AlreadyConsumed,
}

/// One component of an external identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdComponent {
    /// Field this component mirrors, if any (`project_id`)
    pub field: Option<&'static str>,
    /// Whether the component must parse as an unsigned integer
    pub numeric: bool,
}

impl IdComponent {
    pub const fn numeric() -> Self {
        Self {
            field: None,
            numeric: true,
        }
    }

    pub const fn text() -> Self {
        Self {
            field: None,
            numeric: false,
        }
    }

    #[must_use]
    pub const fn mirrors(mut self, field: &'static str) -> Self {
        self.field = Some(field);
        self
    }
}

/// Expected structure of an external identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdShape {
    components: Vec<IdComponent>,
}

impl IdShape {
    /// Single numeric-as-string id, the common case.
    pub fn numeric() -> Self {
        Self {
            components: vec![IdComponent::numeric()],
        }
    }

    /// Single opaque string id.
    pub fn text() -> Self {
        Self {
            components: vec![IdComponent::text()],
        }
    }

    /// Composite id, e.g. `project_id:feature`.
    pub fn composite(components: Vec<IdComponent>) -> Self {
        Self { components }
    }

    pub fn arity(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[IdComponent] {
        &self.components
    }
}

impl Default for IdShape {
    fn default() -> Self {
        Self::numeric()
    }
}

/// Static description of what a resource type supports.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    resource_type: &'static str,
    verbs: VerbSet,
    immutable: BTreeSet<&'static str>,
    secret_once: BTreeSet<&'static str>,
    computed: BTreeSet<&'static str>,
    sensitive: BTreeSet<&'static str>,
    id_shape: IdShape,
    on_missing: MissingPolicy,
}

impl CapabilityDescriptor {
    /// Descriptor with full CRUD + import, a numeric id and no special fields.
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            verbs: VerbSet::all(),
            immutable: BTreeSet::new(),
            secret_once: BTreeSet::new(),
            computed: BTreeSet::new(),
            sensitive: BTreeSet::new(),
            id_shape: IdShape::numeric(),
            on_missing: MissingPolicy::Absent,
        }
    }

    #[must_use]
    pub fn verbs(mut self, verbs: impl IntoIterator<Item = Verb>) -> Self {
        self.verbs = verbs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn immutable(mut self, fields: impl IntoIterator<Item = &'static str>) -> Self {
        self.immutable.extend(fields);
        self
    }

    #[must_use]
    pub fn secret_once(mut self, fields: impl IntoIterator<Item = &'static str>) -> Self {
        self.secret_once.extend(fields);
        self
    }

    #[must_use]
    pub fn computed(mut self, fields: impl IntoIterator<Item = &'static str>) -> Self {
        self.computed.extend(fields);
        self
    }

    #[must_use]
    pub fn sensitive(mut self, fields: impl IntoIterator<Item = &'static str>) -> Self {
        self.sensitive.extend(fields);
        self
    }

    #[must_use]
    pub fn id_shape(mut self, shape: IdShape) -> Self {
        self.id_shape = shape;
        self
    }

    #[must_use]
    pub fn on_missing(mut self, policy: MissingPolicy) -> Self {
        self.on_missing = policy;
        self
    }

    pub fn resource_type(&self) -> &'static str {
        self.resource_type
    }

    pub fn supported_verbs(&self) -> VerbSet {
        self.verbs
    }

    pub fn supports(&self, verb: Verb) -> bool {
        self.verbs.contains(verb)
    }

    /// An immutable table field covers each of its dotted entries.
    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable.contains(field)
            || field
                .match_indices('.')
                .any(|(at, _)| self.immutable.contains(&field[..at]))
    }

    pub fn is_secret_once(&self, field: &str) -> bool {
        self.secret_once.contains(field)
    }

    pub fn is_computed(&self, field: &str) -> bool {
        self.computed.contains(field)
    }

    /// Sensitive fields and secret-once fields are both redacted on display.
    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive.contains(field) || self.secret_once.contains(field)
    }

    pub fn immutable_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.immutable.iter().copied()
    }

    pub fn secret_once_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.secret_once.iter().copied()
    }

    pub fn shape(&self) -> &IdShape {
        &self.id_shape
    }

    pub fn missing_policy(&self) -> MissingPolicy {
        self.on_missing
    }
}

/// Process-wide table of capability descriptors.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    descriptors: BTreeMap<&'static str, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor, replacing any previous one for the same type.
    #[must_use]
    pub fn register(mut self, descriptor: CapabilityDescriptor) -> Self {
        if let Some(previous) = self
            .descriptors
            .insert(descriptor.resource_type, descriptor)
        {
            log::warn!(
                "capability descriptor for '{}' registered twice",
                previous.resource_type
            );
        }
        self
    }

    /// Look up the descriptor for a resource type.
    pub fn capabilities_for(&self, resource_type: &str) -> Result<&CapabilityDescriptor, ReconcileError> {
        self.descriptors
            .get(resource_type)
            .ok_or_else(|| ReconcileError::unknown_type(resource_type))
    }

    /// Registered types in name order.
    pub fn resource_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_verb_set() {
        let set: VerbSet = [Verb::Create, Verb::Update].into_iter().collect();
        assert!(set.contains(Verb::Create));
        assert!(set.contains(Verb::Update));
        assert!(!set.contains(Verb::Read));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Verb::Create, Verb::Update]);

        let all = VerbSet::all();
        assert_eq!(all.iter().count(), 5);
        assert!(!all.without(Verb::Delete).contains(Verb::Delete));
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = CapabilityDescriptor::new("maintainer");
        for verb in Verb::ALL {
            assert!(desc.supports(verb));
        }
        assert_eq!(desc.shape().arity(), 1);
        assert_eq!(desc.missing_policy(), MissingPolicy::Absent);
        assert!(!desc.is_immutable("name"));
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = CapabilityDescriptor::new("project-token")
            .verbs([Verb::Create, Verb::Delete])
            .immutable(["description", "token"])
            .secret_once(["token"]);

        assert!(!desc.supports(Verb::Read));
        assert!(!desc.supports(Verb::Update));
        assert!(desc.is_immutable("token"));
        assert!(desc.is_secret_once("token"));
        assert!(desc.is_sensitive("token"));
        assert!(!desc.is_sensitive("description"));
    }

    #[test]
    fn test_immutable_table_covers_entries() {
        let desc = CapabilityDescriptor::new("project-token")
            .immutable(["bucket_permissions", "component_access"]);

        assert!(desc.is_immutable("bucket_permissions"));
        assert!(desc.is_immutable("bucket_permissions.in.c-main"));
        assert!(desc.is_immutable("component_access"));
        assert!(!desc.is_immutable("bucket"));
        assert!(!desc.is_immutable("bucket_permissions_extra"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CapabilityRegistry::new()
            .register(CapabilityDescriptor::new("organization"))
            .register(CapabilityDescriptor::new("backend"));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resource_types().collect::<Vec<_>>(),
            vec!["backend", "organization"]
        );
        assert!(registry.capabilities_for("backend").is_ok());

        let err = registry.capabilities_for("widget").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownResourceType);
        assert_eq!(err.resource_type, "widget");
        assert_eq!(err.external_id, None);
    }

    #[test]
    fn test_registry_shared_across_threads() {
        let registry = CapabilityRegistry::new().register(CapabilityDescriptor::new("maintainer"));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    assert!(registry.capabilities_for("maintainer").is_ok());
                });
            }
        });
    }
}
