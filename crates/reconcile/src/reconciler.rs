//! Reconciler / verb dispatcher
//!
//! Drives one resource instance from its last observed state towards the
//! desired state, issuing only the verbs the capability table allows:
//!
//! ```text
//! Absent --create--> Present --read--> Present | Absent | AlreadyConsumed
//!                    Present --update--> Present
//!                    Present --delete+create--> Present   (replace)
//!                    Present --delete--> Absent
//! ```
//!
//! The reconciler holds no state between calls. Each entry point takes the
//! prior [`ObservedState`] and returns the new one inside a
//! [`ReconciliationResult`], together with the drift it could not resolve and
//! the remote failures it hit. Failures leave `observed` at the last durably
//! known value: a replace whose Create fails after a successful Delete
//! reports `Absent`, not the deleted object.

use crate::api::{CancelToken, Created, RemoteRef, ResourceApi};
use crate::capability::{CapabilityDescriptor, CapabilityRegistry, MissingPolicy, Verb};
use crate::diff::{ChangeKind, ChangeSet, Decision, diff};
use crate::drift::{DriftReport, UnsupportedOp, report};
use crate::error::{ApiError, ErrorKind, ReconcileError, Result};
use crate::id::{self, ExternalId};
use crate::secret::capture_on_create;
use crate::state::{DesiredState, ObservedState, ResourceStatus};
use crate::value::Fields;
use serde::Serialize;
use std::fmt;

/// What a pass actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    Created,
    Refreshed,
    Updated,
    Replaced,
    Deleted,
    /// Local state dropped while the remote object was left in place
    Abandoned,
    Imported,
    /// Remote object was consumed out of band
    Consumed,
    /// Remote object disappeared out of band
    Vanished,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no changes",
            Self::Created => "created",
            Self::Refreshed => "refreshed",
            Self::Updated => "updated",
            Self::Replaced => "replaced",
            Self::Deleted => "deleted",
            Self::Abandoned => "abandoned",
            Self::Imported => "imported",
            Self::Consumed => "already consumed",
            Self::Vanished => "vanished",
        };
        f.write_str(s)
    }
}

/// Outcome of one reconciliation call.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub action: Action,
    /// New observed state to persist
    pub observed: ObservedState,
    pub drift: DriftReport,
    /// Remote failures; empty on success
    pub errors: Vec<ReconcileError>,
}

impl ReconciliationResult {
    fn new(action: Action, observed: ObservedState) -> Self {
        Self {
            action,
            observed,
            drift: DriftReport::default(),
            errors: Vec::new(),
        }
    }

    fn failed(observed: ObservedState, error: ReconcileError) -> Self {
        let mut result = Self::new(Action::NoOp, observed);
        result.errors.push(error);
        result
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether every error is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        !self.errors.is_empty() && self.errors.iter().all(ReconcileError::is_retryable)
    }
}

/// Dry-run outcome of [`Reconciler::plan`].
#[derive(Debug, Clone)]
pub struct Plan {
    pub decision: Decision,
    pub change_set: ChangeSet,
    pub drift: DriftReport,
    /// Observed state after the refresh the plan performed
    pub observed: ObservedState,
    pub errors: Vec<ReconcileError>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.decision != Decision::NoOp
    }
}

/// Stages logged while a pass moves through the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Creating,
    Reading,
    Updating,
    Replacing,
    Deleting,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Reading => "reading",
            Self::Updating => "updating",
            Self::Replacing => "replacing",
            Self::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// Step chosen after refreshing and diffing.
enum Step {
    NoOp,
    Create,
    Update(Fields),
    Replace,
}

/// Everything decided before any mutating call is made.
struct Assessment {
    observed: ObservedState,
    change_set: ChangeSet,
    step: Step,
    unsupported: Vec<UnsupportedOp>,
    notices: Vec<String>,
    /// Out-of-band transition detected by the refresh
    transition: Option<Action>,
}

/// Outcome of a Read against a present resource.
enum Refresh {
    Fresh(ObservedState),
    Skipped(ObservedState),
    Vanished,
    Consumed(ObservedState),
}

/// Reconciles resource instances against a [`ResourceApi`].
///
/// Holds only shared references, so one reconciler can serve any number of
/// threads as long as each resource instance is reconciled by one of them
/// at a time.
#[derive(Clone, Copy)]
pub struct Reconciler<'a> {
    registry: &'a CapabilityRegistry,
    api: &'a dyn ResourceApi,
}

impl fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("resource_types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(registry: &'a CapabilityRegistry, api: &'a dyn ResourceApi) -> Self {
        Self { registry, api }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.registry
    }

    /// Converge one resource towards `desired`.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for failures detected before any remote call:
    /// unknown resource type, malformed identifier, or prior state that
    /// belongs to another resource type. Remote failures are reported in
    /// [`ReconciliationResult::errors`].
    pub fn reconcile(
        &self,
        desired: &DesiredState,
        prior: Option<&ObservedState>,
        cancel: &CancelToken,
    ) -> Result<ReconciliationResult> {
        let caps = self.registry.capabilities_for(&desired.resource_type)?;
        let prior = prepare_prior(caps, prior)?;

        let assessment = match self.assess(caps, desired, prior, cancel)? {
            Ok(assessment) => assessment,
            Err(failed) => return Ok(failed),
        };
        let Assessment {
            observed,
            change_set,
            step,
            unsupported,
            notices,
            transition,
        } = assessment;

        let mut result = match step {
            Step::NoOp => ReconciliationResult::new(transition.unwrap_or(Action::NoOp), observed),
            Step::Create => match self.create(caps, desired, cancel) {
                Ok(created) => created_result(caps, Action::Created, created),
                Err(err) => ReconciliationResult::failed(observed, err),
            },
            Step::Update(changed) => self.update(caps, observed, &changed, cancel)?,
            Step::Replace => self.replace(caps, desired, observed, cancel)?,
        };

        result.drift = report(&change_set.ignored_only(), &unsupported);
        for notice in notices {
            result.drift.push_notice(None, notice);
        }
        Ok(result)
    }

    /// Decide what [`reconcile`](Self::reconcile) would do without creating,
    /// updating or deleting anything. Reads are still issued.
    ///
    /// # Errors
    ///
    /// Same pre-flight failures as `reconcile`.
    pub fn plan(
        &self,
        desired: &DesiredState,
        prior: Option<&ObservedState>,
        cancel: &CancelToken,
    ) -> Result<Plan> {
        let caps = self.registry.capabilities_for(&desired.resource_type)?;
        let prior = prepare_prior(caps, prior)?;

        let assessment = match self.assess(caps, desired, prior, cancel)? {
            Ok(assessment) => assessment,
            Err(failed) => {
                return Ok(Plan {
                    decision: Decision::NoOp,
                    change_set: ChangeSet::default(),
                    drift: failed.drift,
                    observed: failed.observed,
                    errors: failed.errors,
                });
            }
        };

        let decision = match assessment.step {
            Step::NoOp => Decision::NoOp,
            Step::Create => Decision::Create,
            Step::Update(_) => Decision::Update,
            Step::Replace => Decision::Replace,
        };
        let mut drift = report(&assessment.change_set, &assessment.unsupported);
        for notice in assessment.notices {
            drift.push_notice(None, notice);
        }
        Ok(Plan {
            decision,
            change_set: assessment.change_set,
            drift,
            observed: assessment.observed,
            errors: Vec::new(),
        })
    }

    /// Refresh observed state from the remote side.
    ///
    /// Types without Read keep their prior state verbatim and issue no call.
    ///
    /// # Errors
    ///
    /// Unknown resource type or malformed identifier.
    pub fn refresh(&self, prior: &ObservedState, cancel: &CancelToken) -> Result<ReconciliationResult> {
        let caps = self.registry.capabilities_for(&prior.resource_type)?;
        if !prior.is_present() {
            return Ok(ReconciliationResult::new(Action::NoOp, prior.clone()));
        }

        let mut notices = Vec::new();
        let mut result = match self.read_present(caps, prior.clone(), cancel)? {
            Ok(Refresh::Fresh(observed)) => ReconciliationResult::new(Action::Refreshed, observed),
            Ok(Refresh::Skipped(observed)) => ReconciliationResult::new(Action::NoOp, observed),
            Ok(Refresh::Consumed(observed)) => ReconciliationResult::new(Action::Consumed, observed),
            Ok(Refresh::Vanished) => {
                notices.push(vanished_notice(caps));
                ReconciliationResult::new(Action::Vanished, ObservedState::absent(caps.resource_type()))
            }
            Err(err) => ReconciliationResult::failed(prior.clone(), err),
        };
        for notice in notices {
            result.drift.push_notice(None, notice);
        }
        Ok(result)
    }

    /// Remove the remote object behind `prior`.
    ///
    /// Types without Delete are abandoned: local state becomes absent while
    /// the remote object stays where it is. NotFound counts as success and
    /// already-consumed objects are not touched.
    ///
    /// # Errors
    ///
    /// Unknown resource type or malformed identifier.
    pub fn destroy(&self, prior: &ObservedState, cancel: &CancelToken) -> Result<ReconciliationResult> {
        let caps = self.registry.capabilities_for(&prior.resource_type)?;
        let rt = caps.resource_type();
        let absent = ObservedState::absent(rt);

        match prior.status {
            ResourceStatus::Absent => return Ok(ReconciliationResult::new(Action::NoOp, absent)),
            ResourceStatus::AlreadyConsumed => {
                log::info!("{rt} {}: already consumed, nothing to delete", display_id(prior));
                let mut result = ReconciliationResult::new(Action::Deleted, absent);
                result
                    .drift
                    .push_notice(None, format!("{rt} was already consumed remotely; nothing to delete"));
                return Ok(result);
            }
            ResourceStatus::Present => {}
        }

        let (external_id, components) = decode_target(caps, prior)?;

        if !caps.supports(Verb::Delete) {
            log::info!("{rt} {external_id}: delete unsupported, abandoning remote object");
            let mut result = ReconciliationResult::new(Action::Abandoned, absent);
            result.drift.push_notice(
                None,
                format!(
                    "{rt} {external_id} was removed from local state only; the remote API cannot delete it"
                ),
            );
            return Ok(result);
        }

        let target = RemoteRef::new(&external_id, &components, prior);
        Ok(match self.delete(caps, &target, cancel) {
            Ok(()) => ReconciliationResult::new(Action::Deleted, absent),
            Err(err) => ReconciliationResult::failed(prior.clone(), err),
        })
    }

    /// Adopt an existing remote object.
    ///
    /// `seed` supplies fields the identifier alone cannot carry, such as the
    /// parent project of an invitation.
    ///
    /// # Errors
    ///
    /// Unknown resource type or malformed identifier.
    pub fn import(
        &self,
        resource_type: &str,
        raw_id: &str,
        seed: &Fields,
        cancel: &CancelToken,
    ) -> Result<ReconciliationResult> {
        let caps = self.registry.capabilities_for(resource_type)?;
        let rt = caps.resource_type();

        if !caps.supports(Verb::Import) {
            let mut result = ReconciliationResult::new(Action::NoOp, ObservedState::absent(rt));
            result.drift = report(
                &ChangeSet::default(),
                &[UnsupportedOp::verb(
                    Verb::Import,
                    format!("{rt} does not support import"),
                )],
            );
            return Ok(result);
        }

        let external_id = ExternalId::new(raw_id);
        let components = id::decode(&external_id, caps)?;

        let mut fields = seed.clone();
        for (name, value) in id::mirrored_fields(caps, &components) {
            fields.insert(name.to_string(), value.into());
        }
        let seeded = ObservedState::present(rt, external_id.clone(), fields);

        if !caps.supports(Verb::Read) {
            log::info!("{rt} {external_id}: imported without refresh");
            let mut result = ReconciliationResult::new(Action::Imported, seeded);
            result.drift = report(
                &ChangeSet::default(),
                &[UnsupportedOp::verb(
                    Verb::Read,
                    format!("{rt} cannot be read back; imported state was built from the identifier"),
                )],
            );
            return Ok(result);
        }

        let absent = ObservedState::absent(rt);
        Ok(match self.read_present(caps, seeded, cancel)? {
            Ok(Refresh::Fresh(observed) | Refresh::Skipped(observed)) => {
                log::info!("{rt} {external_id}: imported");
                ReconciliationResult::new(Action::Imported, observed)
            }
            Ok(Refresh::Consumed(observed)) => ReconciliationResult::new(Action::Imported, observed),
            Ok(Refresh::Vanished) => ReconciliationResult::failed(
                absent,
                ReconcileError::new(
                    ErrorKind::NotFound,
                    rt,
                    Some(external_id.as_str()),
                    "import failed: remote object does not exist",
                ),
            ),
            Err(err) => ReconciliationResult::failed(absent, err),
        })
    }

    /// Refresh, diff and pick a step. The inner `Err` is a finished result
    /// for a pass that already failed remotely.
    fn assess(
        &self,
        caps: &CapabilityDescriptor,
        desired: &DesiredState,
        prior: ObservedState,
        cancel: &CancelToken,
    ) -> Result<std::result::Result<Assessment, ReconciliationResult>> {
        let rt = caps.resource_type();
        let mut notices = Vec::new();
        let mut transition = None;

        let observed = match prior.status {
            ResourceStatus::Absent | ResourceStatus::AlreadyConsumed => prior,
            ResourceStatus::Present => match self.read_present(caps, prior.clone(), cancel)? {
                Ok(Refresh::Fresh(observed) | Refresh::Skipped(observed)) => observed,
                Ok(Refresh::Consumed(observed)) => {
                    transition = Some(Action::Consumed);
                    observed
                }
                Ok(Refresh::Vanished) => {
                    notices.push(vanished_notice(caps));
                    ObservedState::absent(rt)
                }
                Err(err) => return Ok(Err(ReconciliationResult::failed(prior, err))),
            },
        };

        let change_set = diff(&desired.fields, &observed, caps);
        let mut unsupported = Vec::new();

        let step = match observed.status {
            ResourceStatus::Absent if caps.supports(Verb::Create) => Step::Create,
            ResourceStatus::Absent => {
                unsupported.push(UnsupportedOp::verb(
                    Verb::Create,
                    format!("{rt} cannot be created through the API"),
                ));
                Step::NoOp
            }
            ResourceStatus::AlreadyConsumed => {
                unsupported.extend(change_set.actionable().map(|c| {
                    UnsupportedOp::field(
                        Verb::Update,
                        &c.field,
                        format!("{rt} was already consumed remotely and can no longer change"),
                    )
                }));
                Step::NoOp
            }
            ResourceStatus::Present => match change_set.decision() {
                Decision::NoOp | Decision::Create => Step::NoOp,
                Decision::Update if caps.supports(Verb::Update) => {
                    Step::Update(change_set.update_fields())
                }
                Decision::Update => {
                    unsupported.extend(change_set.actionable().map(|c| {
                        UnsupportedOp::field(
                            Verb::Update,
                            &c.field,
                            format!("{rt} does not support update; remediate manually"),
                        )
                    }));
                    Step::NoOp
                }
                Decision::Replace if caps.supports(Verb::Delete) && caps.supports(Verb::Create) => {
                    Step::Replace
                }
                Decision::Replace => {
                    let missing = if caps.supports(Verb::Delete) {
                        Verb::Create
                    } else {
                        Verb::Delete
                    };
                    unsupported.extend(
                        change_set
                            .changes()
                            .filter(|c| c.kind == ChangeKind::ForcesReplace)
                            .map(|c| {
                                UnsupportedOp::field(
                                    Verb::Delete,
                                    &c.field,
                                    format!(
                                        "changing this field requires replacement, but {rt} does not support {missing}"
                                    ),
                                )
                            }),
                    );
                    Step::NoOp
                }
            },
        };

        Ok(Ok(Assessment {
            observed,
            change_set,
            step,
            unsupported,
            notices,
            transition,
        }))
    }

    /// Read a present resource and apply the missing-object policy.
    fn read_present(
        &self,
        caps: &CapabilityDescriptor,
        mut observed: ObservedState,
        cancel: &CancelToken,
    ) -> Result<std::result::Result<Refresh, ReconcileError>> {
        let rt = caps.resource_type();
        let (external_id, components) = decode_target(caps, &observed)?;

        if !caps.supports(Verb::Read) {
            log::debug!("{rt} {external_id}: read unsupported, keeping prior state");
            return Ok(Ok(Refresh::Skipped(observed)));
        }

        log::debug!("{rt} {external_id}: {}", Lifecycle::Reading);
        let target = RemoteRef::new(&external_id, &components, &observed);
        let read = call(cancel, || self.api.read(&target, cancel));
        Ok(match read {
            Ok(fields) => {
                merge_fields(caps, &mut observed.fields, fields);
                Ok(Refresh::Fresh(observed))
            }
            Err(err) if err.is_not_found() => match caps.missing_policy() {
                MissingPolicy::Absent => {
                    log::info!("{rt} {external_id}: no longer exists remotely");
                    Ok(Refresh::Vanished)
                }
                MissingPolicy::AlreadyConsumed => {
                    log::info!("{rt} {external_id}: consumed out of band");
                    observed.status = ResourceStatus::AlreadyConsumed;
                    Ok(Refresh::Consumed(observed))
                }
            },
            Err(err) => Err(ReconcileError::from_api(
                err,
                Verb::Read,
                rt,
                Some(external_id.as_str()),
            )),
        })
    }

    fn create(
        &self,
        caps: &CapabilityDescriptor,
        desired: &DesiredState,
        cancel: &CancelToken,
    ) -> std::result::Result<ObservedState, ReconcileError> {
        let rt = caps.resource_type();
        let payload: Fields = desired
            .fields
            .iter()
            .filter(|(name, value)| !caps.is_computed(name) && !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        log::debug!("{rt}: {}", Lifecycle::Creating);
        let Created {
            external_id,
            fields: mut response,
        } = call(cancel, || self.api.create(rt, &payload, cancel))
            .map_err(|err| ReconcileError::from_api(err, Verb::Create, rt, None))?;

        let secrets = capture_on_create(caps, &mut response);
        let mut fields = payload;
        fields.retain(|name, _| !caps.is_secret_once(name));
        merge_fields(caps, &mut fields, response);

        log::info!("{rt} {external_id}: created");
        let mut observed = ObservedState::present(rt, external_id, fields);
        observed.secrets = secrets;
        Ok(observed)
    }

    fn update(
        &self,
        caps: &CapabilityDescriptor,
        observed: ObservedState,
        changed: &Fields,
        cancel: &CancelToken,
    ) -> Result<ReconciliationResult> {
        let rt = caps.resource_type();
        let (external_id, components) = decode_target(caps, &observed)?;

        log::debug!("{rt} {external_id}: {}", Lifecycle::Updating);
        let target = RemoteRef::new(&external_id, &components, &observed);
        let echoed = match call(cancel, || self.api.update(&target, changed, cancel)) {
            Ok(echoed) => echoed,
            Err(err) => {
                let err = ReconcileError::from_api(err, Verb::Update, rt, Some(external_id.as_str()));
                return Ok(ReconciliationResult::failed(observed, err));
            }
        };

        let mut updated = observed;
        merge_fields(caps, &mut updated.fields, changed.clone());
        merge_fields(caps, &mut updated.fields, echoed);
        log::info!("{rt} {external_id}: updated {} field(s)", changed.len());
        Ok(ReconciliationResult::new(Action::Updated, updated))
    }

    fn replace(
        &self,
        caps: &CapabilityDescriptor,
        desired: &DesiredState,
        observed: ObservedState,
        cancel: &CancelToken,
    ) -> Result<ReconciliationResult> {
        let rt = caps.resource_type();
        let (external_id, components) = decode_target(caps, &observed)?;
        log::debug!("{rt} {external_id}: {}", Lifecycle::Replacing);

        let target = RemoteRef::new(&external_id, &components, &observed);
        if let Err(err) = self.delete(caps, &target, cancel) {
            return Ok(ReconciliationResult::failed(observed, err));
        }

        // The old object is gone; from here on absence is the durable state.
        Ok(match self.create(caps, desired, cancel) {
            Ok(created) => {
                log::info!(
                    "{rt}: replaced {external_id} with {}",
                    display_id(&created)
                );
                created_result(caps, Action::Replaced, created)
            }
            Err(err) => {
                let mut result = ReconciliationResult::failed(ObservedState::absent(rt), err);
                result.action = Action::Deleted;
                result
            }
        })
    }

    /// Delete; NotFound means the goal already holds.
    fn delete(
        &self,
        caps: &CapabilityDescriptor,
        target: &RemoteRef<'_>,
        cancel: &CancelToken,
    ) -> std::result::Result<(), ReconcileError> {
        let rt = caps.resource_type();
        log::debug!("{rt} {}: {}", target.external_id, Lifecycle::Deleting);
        match call(cancel, || self.api.delete(target, cancel)) {
            Ok(()) => {
                log::info!("{rt} {}: deleted", target.external_id);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                log::debug!("{rt} {}: already gone", target.external_id);
                Ok(())
            }
            Err(err) => Err(ReconcileError::from_api(
                err,
                Verb::Delete,
                rt,
                Some(target.external_id.as_str()),
            )),
        }
    }
}

/// Result for a freshly created object. An undecodable identifier is
/// reported as an error; the object stays recorded as present.
fn created_result(caps: &CapabilityDescriptor, action: Action, observed: ObservedState) -> ReconciliationResult {
    let mut result = ReconciliationResult::new(action, observed);
    if let Some(external_id) = &result.observed.external_id
        && let Err(err) = id::decode(external_id, caps)
    {
        log::warn!("{err}");
        result.errors.push(err);
    }
    result
}

/// Check the cancel token, then issue the call.
fn call<T>(cancel: &CancelToken, f: impl FnOnce() -> std::result::Result<T, ApiError>) -> std::result::Result<T, ApiError> {
    cancel.check()?;
    f()
}

fn prepare_prior(caps: &CapabilityDescriptor, prior: Option<&ObservedState>) -> Result<ObservedState> {
    let rt = caps.resource_type();
    match prior {
        None => Ok(ObservedState::absent(rt)),
        Some(prior) if prior.resource_type != rt => Err(ReconcileError::new(
            ErrorKind::Malformed,
            rt,
            prior.id_str(),
            format!(
                "observed state belongs to resource type '{}'",
                prior.resource_type
            ),
        )),
        Some(prior) => Ok(prior.clone()),
    }
}

fn decode_target(
    caps: &CapabilityDescriptor,
    observed: &ObservedState,
) -> Result<(ExternalId, Vec<String>)> {
    let external_id = observed.external_id.clone().ok_or_else(|| {
        ReconcileError::new(
            ErrorKind::Malformed,
            caps.resource_type(),
            None,
            "present resource has no external identifier",
        )
    })?;
    let components = id::decode(&external_id, caps)?;
    Ok((external_id, components))
}

/// Merge remote fields over `fields`; secret-once values never come from here.
fn merge_fields(caps: &CapabilityDescriptor, fields: &mut Fields, incoming: Fields) {
    fields.extend(
        incoming
            .into_iter()
            .filter(|(name, _)| !caps.is_secret_once(name)),
    );
}

fn display_id(observed: &ObservedState) -> &str {
    observed.id_str().unwrap_or("(not yet assigned)")
}

fn vanished_notice(caps: &CapabilityDescriptor) -> String {
    format!(
        "{} no longer exists remotely; local state was dropped",
        caps.resource_type()
    )
}
