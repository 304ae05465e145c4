//! In-memory [`ResourceApi`] for tests and dry runs.

use crate::api::{CancelToken, Created, RemoteRef, ResourceApi};
use crate::capability::Verb;
use crate::error::ApiError;
use crate::id::{self, ExternalId};
use crate::value::Fields;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub resource_type: String,
    /// Target identifier; `None` for Create
    pub external_id: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    objects: BTreeMap<(String, String), Fields>,
    id_fields: HashMap<String, Vec<String>>,
    defaults: HashMap<String, Fields>,
    create_extras: HashMap<String, VecDeque<Fields>>,
    failures: HashMap<Verb, VecDeque<ApiError>>,
    calls: Vec<Call>,
}

/// Mock remote API storing objects in memory.
///
/// Identifiers are sequential numbers unless a type is configured with
/// [`with_id_fields`](Self::with_id_fields), in which case the id is
/// composed from those fields like the real API does for
/// parent-scoped objects.
#[derive(Debug, Clone)]
pub struct MockApi {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl MockApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose first generated id is `first_id`.
    #[must_use]
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: first_id,
                ..Inner::default()
            })),
        }
    }

    /// Build ids of `resource_type` from these fields instead of a counter.
    #[must_use]
    pub fn with_id_fields(self, resource_type: &str, fields: &[&str]) -> Self {
        self.lock().id_fields.insert(
            resource_type.to_string(),
            fields.iter().map(|f| (*f).to_string()).collect(),
        );
        self
    }

    /// Fields the remote side adds to every created object of a type
    /// (e.g. `status = "pending"`).
    #[must_use]
    pub fn with_defaults(self, resource_type: &str, defaults: Fields) -> Self {
        self.lock()
            .defaults
            .insert(resource_type.to_string(), defaults);
        self
    }

    /// Extra fields for the next Create response of a type. They are
    /// returned once and never stored, like one-time secrets.
    pub fn queue_create_extras(&self, resource_type: &str, extras: Fields) {
        self.lock()
            .create_extras
            .entry(resource_type.to_string())
            .or_default()
            .push_back(extras);
    }

    /// Make the next call of `verb` fail with `error`.
    pub fn fail_next(&self, verb: Verb, error: ApiError) {
        self.lock().failures.entry(verb).or_default().push_back(error);
    }

    /// Seed an existing remote object.
    pub fn insert(&self, resource_type: &str, external_id: &str, fields: Fields) {
        self.lock()
            .objects
            .insert((resource_type.to_string(), external_id.to_string()), fields);
    }

    /// Remove an object out of band, e.g. an invitation being accepted.
    pub fn remove(&self, resource_type: &str, external_id: &str) -> Option<Fields> {
        self.lock()
            .objects
            .remove(&(resource_type.to_string(), external_id.to_string()))
    }

    pub fn object(&self, resource_type: &str, external_id: &str) -> Option<Fields> {
        self.lock()
            .objects
            .get(&(resource_type.to_string(), external_id.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of `verb`.
    pub fn calls_for(&self, verb: Verb) -> usize {
        self.lock().calls.iter().filter(|c| c.verb == verb).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(
        &self,
        verb: Verb,
        resource_type: &str,
        external_id: Option<&ExternalId>,
        cancel: &CancelToken,
    ) -> Result<MutexGuard<'_, Inner>, ApiError> {
        cancel.check()?;
        let mut inner = self.lock();
        inner.calls.push(Call {
            verb,
            resource_type: resource_type.to_string(),
            external_id: external_id.map(|id| id.as_str().to_string()),
        });
        if let Some(err) = inner.failures.get_mut(&verb).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(inner)
    }
}

fn key(target: &RemoteRef<'_>) -> (String, String) {
    (
        target.resource_type.to_string(),
        target.external_id.as_str().to_string(),
    )
}

fn not_found(target: &RemoteRef<'_>) -> ApiError {
    ApiError::not_found(format!(
        "{} {} does not exist",
        target.resource_type, target.external_id
    ))
}

impl ResourceApi for MockApi {
    fn create(
        &self,
        resource_type: &str,
        fields: &Fields,
        cancel: &CancelToken,
    ) -> Result<Created, ApiError> {
        let mut inner = self.begin(Verb::Create, resource_type, None, cancel)?;

        let external_id = match inner.id_fields.get(resource_type) {
            Some(names) => {
                let components = names
                    .iter()
                    .map(|n| {
                        fields
                            .get(n)
                            .and_then(crate::Value::as_id_string)
                            .ok_or_else(|| ApiError::malformed(format!("missing id field '{n}'")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                id::encode(&components)
            }
            None => {
                let next = inner.next_id;
                inner.next_id += 1;
                ExternalId::new(next.to_string())
            }
        };

        let key = (resource_type.to_string(), external_id.as_str().to_string());
        if inner.objects.contains_key(&key) {
            return Err(ApiError::conflict(format!(
                "{resource_type} {external_id} already exists"
            )));
        }

        let mut stored = fields.clone();
        if let Some(defaults) = inner.defaults.get(resource_type) {
            for (name, value) in defaults {
                stored.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        inner.objects.insert(key, stored.clone());

        let mut response = stored;
        if let Some(extras) = inner
            .create_extras
            .get_mut(resource_type)
            .and_then(VecDeque::pop_front)
        {
            response.extend(extras);
        }

        Ok(Created {
            external_id,
            fields: response,
        })
    }

    fn read(&self, target: &RemoteRef<'_>, cancel: &CancelToken) -> Result<Fields, ApiError> {
        let inner = self.begin(Verb::Read, target.resource_type, Some(target.external_id), cancel)?;
        inner
            .objects
            .get(&key(target))
            .cloned()
            .ok_or_else(|| not_found(target))
    }

    fn update(
        &self,
        target: &RemoteRef<'_>,
        changed: &Fields,
        cancel: &CancelToken,
    ) -> Result<Fields, ApiError> {
        let mut inner =
            self.begin(Verb::Update, target.resource_type, Some(target.external_id), cancel)?;
        let object = inner
            .objects
            .get_mut(&key(target))
            .ok_or_else(|| not_found(target))?;
        object.extend(changed.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(object.clone())
    }

    fn delete(&self, target: &RemoteRef<'_>, cancel: &CancelToken) -> Result<(), ApiError> {
        let mut inner =
            self.begin(Verb::Delete, target.resource_type, Some(target.external_id), cancel)?;
        inner
            .objects
            .remove(&key(target))
            .map(|_| ())
            .ok_or_else(|| not_found(target))
    }
}
