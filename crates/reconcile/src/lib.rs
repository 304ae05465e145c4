//! # Reconcile
//!
//! Declarative reconciliation of remote resources whose API has an irregular
//! lifecycle surface.
//!
//! The crate keeps a locally recorded observed state in sync with a remote
//! management API by translating the generic verbs Create, Read, Update,
//! Delete and Import into calls against a [`ResourceApi`]. Per resource type,
//! a [`CapabilityDescriptor`] says which of those verbs actually exist and how
//! individual fields behave; the [`Reconciler`] uses it to pick a safe verb
//! sequence and reports whatever it could not do as drift instead of failing.
//!
//! ## Core Concepts
//!
//! - **CapabilityRegistry**: read-only table of descriptors, built once
//! - **ExternalId**: opaque, possibly composite remote identifier
//! - **ChangeSet**: per-field classification (unchanged, update in place,
//!   forces replace, ignored)
//! - **SecretFields**: one-time secrets captured from a Create response
//! - **DriftReport**: what a pass could not or did not reconcile
//!
//! ## Example
//!
//! ```
//! use reconcile::{
//!     fields, CancelToken, CapabilityDescriptor, CapabilityRegistry, DesiredState,
//!     MockApi, Reconciler, Verb,
//! };
//!
//! let registry = CapabilityRegistry::new()
//!     .register(CapabilityDescriptor::new("bigquery-backend").verbs([Verb::Create, Verb::Update]));
//! let api = MockApi::new();
//! let reconciler = Reconciler::new(&registry, &api);
//! let cancel = CancelToken::new();
//!
//! let desired = DesiredState::new("bigquery-backend", fields! { "region" => "us" });
//! let created = reconciler.reconcile(&desired, None, &cancel)?;
//! assert!(created.observed.is_present());
//!
//! // No Delete verb: the remote object is abandoned, local state is dropped.
//! let destroyed = reconciler.destroy(&created.observed, &cancel)?;
//! assert!(destroyed.observed.is_absent());
//! # Ok::<(), reconcile::ReconcileError>(())
//! ```

pub mod api;
pub mod capability;
pub mod diff;
pub mod drift;
pub mod error;
pub mod id;
pub mod mock;
pub mod reconciler;
pub mod secret;
pub mod state;
pub mod value;

// Re-export main types at crate root
pub use api::{CancelToken, Created, RemoteRef, ResourceApi};
pub use capability::{
    CapabilityDescriptor, CapabilityRegistry, IdComponent, IdShape, MissingPolicy, Verb, VerbSet,
};
pub use diff::{ChangeKind, ChangeSet, Decision, FieldChange, IgnoreReason, diff};
pub use drift::{DriftItem, DriftKind, DriftReport, Severity, UnsupportedOp};
pub use error::{ApiError, ErrorKind, ReconcileError, Result, classify_status};
pub use id::ExternalId;
pub use mock::MockApi;
pub use reconciler::{Action, Plan, ReconciliationResult, Reconciler};
pub use secret::{REDACTED, SecretFields};
pub use state::{DesiredState, ObservedState, ResourceStatus};
pub use value::{Fields, Value, fields_from_json, fields_to_json};
