//! Blocking HTTP client for the Management API.
//!
//! [`ManagementClient`] implements [`ResourceApi`] on top of the route table,
//! so the reconciler can drive real Keboola stacks. Every failure is
//! classified into an [`ErrorKind`] from the HTTP status or the transport
//! error; response bodies are never inspected for that.

use crate::catalog;
use crate::routes::{self, DeleteRoute, ReadStrategy, Route, UpdateMethod};
use reconcile::id;
use reconcile::{
    ApiError, CancelToken, CapabilityDescriptor, Created, ErrorKind, Fields, RemoteRef,
    ResourceApi, Value, classify_status,
};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Header carrying the management token.
pub const MANAGE_TOKEN_HEADER: &str = "X-KBC-ManageApiToken";

/// Header carrying a Storage API token.
pub const STORAGE_TOKEN_HEADER: &str = "X-StorageApi-Token";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Stack suffix, e.g. `keboola.com` for `https://connection.keboola.com`
    pub hostname_suffix: String,
    pub token: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(hostname_suffix: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            hostname_suffix: hostname_suffix.into(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("hostname_suffix", &self.hostname_suffix)
            .field("token", &reconcile::REDACTED)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Identity behind a management token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenInfo {
    pub description: String,
    pub scopes: Vec<String>,
    pub is_session_token: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

impl From<UpdateMethod> for Method {
    fn from(method: UpdateMethod) -> Self {
        match method {
            UpdateMethod::Patch => Self::Patch,
            UpdateMethod::Put => Self::Put,
        }
    }
}

#[derive(Clone, Copy)]
enum Auth<'a> {
    Manage,
    Storage(&'a str),
}

/// Management API client.
pub struct ManagementClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ManagementClient {
    /// Client for `https://connection.{hostname_suffix}`.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let suffix = config.hostname_suffix.trim().trim_matches('.');
        if suffix.is_empty() {
            return Err(ApiError::malformed("hostname suffix is empty"));
        }
        if config.token.trim().is_empty() {
            return Err(ApiError::unauthorized("management token is empty"));
        }

        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build();

        Ok(Self {
            agent: ureq::Agent::new_with_config(agent_config),
            base_url: format!("https://connection.{suffix}"),
            token: config.token,
            timeout: config.timeout,
        })
    }

    /// Point the client at another base URL (alternate stacks, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the management token is accepted.
    pub fn verify_token(&self) -> Result<TokenInfo, ApiError> {
        let json = self.send(
            Method::Get,
            "/manage/tokens/verify",
            None,
            Auth::Manage,
            &CancelToken::new(),
        )?;
        serde_json::from_value(json)
            .map_err(|e| ApiError::malformed(format!("unexpected token verification response: {e}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        auth: Auth<'_>,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, ApiError> {
        cancel.check()?;
        let timeout = cancel
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));
        let (header, secret) = match auth {
            Auth::Manage => (MANAGE_TOKEN_HEADER, self.token.as_str()),
            Auth::Storage(token) => (STORAGE_TOKEN_HEADER, token),
        };
        let url = self.url(path);
        let empty = serde_json::Value::Object(serde_json::Map::new());
        let body = body.unwrap_or(&empty);

        log::debug!("{method} {url}");
        let result = match method {
            Method::Get => self
                .agent
                .get(&url)
                .header(header, secret)
                .config()
                .timeout_global(Some(timeout))
                .build()
                .call(),
            Method::Delete => self
                .agent
                .delete(&url)
                .header(header, secret)
                .config()
                .timeout_global(Some(timeout))
                .build()
                .call(),
            Method::Post => self
                .agent
                .post(&url)
                .header(header, secret)
                .config()
                .timeout_global(Some(timeout))
                .build()
                .send_json(body),
            Method::Put => self
                .agent
                .put(&url)
                .header(header, secret)
                .config()
                .timeout_global(Some(timeout))
                .build()
                .send_json(body),
            Method::Patch => self
                .agent
                .patch(&url)
                .header(header, secret)
                .config()
                .timeout_global(Some(timeout))
                .build()
                .send_json(body),
        };

        let mut response = result.map_err(api_error)?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().map_err(api_error)?;
        log::trace!("{method} {url} -> {status}");

        if classify_status(status).is_some() || !(200..300).contains(&status) {
            return Err(ApiError::from_status(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ApiError::malformed(format!("invalid JSON from {method} {path}: {e}")))
    }

    fn create_follow_up(
        &self,
        route: &Route,
        external_id: &str,
        fields: &Fields,
        created: &mut Fields,
        cancel: &CancelToken,
    ) {
        let Some(follow_up) = route.follow_up else {
            return;
        };
        if !fields.keys().any(|k| k.starts_with(follow_up.prefix)) {
            return;
        }

        let result = routes::render(follow_up.path, |name| {
            (name == "id").then(|| external_id.to_string())
        })
        .and_then(|path| {
            let body = routes::body_from(follow_up.fields, fields, follow_up.prefix);
            self.send(Method::Post, &path, Some(&body), Auth::Manage, cancel)
        });

        let (remote, local) = follow_up.capture;
        match result {
            Ok(json) => match json.get(remote).and_then(serde_json::Value::as_str) {
                Some(value) => {
                    created.insert(local.to_string(), Value::from(value));
                }
                None => log::warn!(
                    "{} {external_id}: follow-up response has no '{remote}'",
                    route.resource_type
                ),
            },
            Err(e) => log::warn!(
                "{} {external_id} was created but {} failed: {e}",
                route.resource_type,
                follow_up.path
            ),
        }
    }
}

/// Classify a transport-level failure.
pub fn api_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::StatusCode(code) => ApiError::from_status(code, ""),
        ureq::Error::Json(e) => ApiError::malformed(format!("invalid JSON: {e}")),
        ureq::Error::BadUri(uri) => ApiError::malformed(format!("invalid URL: {uri}")),
        other => ApiError::transport(other.to_string()),
    }
}

fn route_for(resource_type: &str) -> Result<&'static Route, ApiError> {
    routes::route(resource_type).ok_or_else(|| {
        ApiError::new(
            ErrorKind::UnknownResourceType,
            format!("no route for '{resource_type}'"),
        )
    })
}

fn caps_for(resource_type: &str) -> Result<&'static CapabilityDescriptor, ApiError> {
    catalog::registry()
        .capabilities_for(resource_type)
        .map_err(|e| ApiError::new(e.kind, e.message))
}

fn unsupported(route: &Route, verb: &str) -> ApiError {
    ApiError::new(
        ErrorKind::Unsupported,
        format!("{} has no {verb} endpoint", route.resource_type),
    )
}

/// Value for a placeholder of an existing object.
fn target_value(caps: &CapabilityDescriptor, target: &RemoteRef<'_>, name: &str) -> Option<String> {
    if name == "id" {
        return Some(target.primary().to_string());
    }
    id::mirrored_fields(caps, target.components)
        .find(|(field, _)| *field == name)
        .map(|(_, value)| value.to_string())
        .or_else(|| target.observed.fields.get(name).and_then(Value::as_id_string))
}

/// Element of a list response whose `id` matches.
fn find_by_id<'a>(json: &'a serde_json::Value, wanted: &str) -> Option<&'a serde_json::Value> {
    json.as_array()?.iter().find(|item| {
        item.get("id")
            .and_then(|id| Value::from_json(id).ok()?.as_id_string())
            .is_some_and(|id| id == wanted)
    })
}

/// Whether a project detail lists `feature`.
fn has_feature(project: &serde_json::Value, feature: &str) -> bool {
    project
        .get("features")
        .and_then(serde_json::Value::as_array)
        .is_some_and(|features| {
            features.iter().any(|f| {
                f.as_str()
                    .or_else(|| f.get("name").and_then(serde_json::Value::as_str))
                    == Some(feature)
            })
        })
}

impl ResourceApi for ManagementClient {
    fn create(
        &self,
        resource_type: &str,
        fields: &Fields,
        cancel: &CancelToken,
    ) -> Result<Created, ApiError> {
        let route = route_for(resource_type)?;
        let caps = caps_for(resource_type)?;

        let path = routes::render(route.create, |name| {
            fields.get(name).and_then(Value::as_id_string)
        })?;
        let mut payload = fields.clone();
        for name in routes::placeholders(route.create) {
            payload.remove(name);
        }
        let body = route.to_remote(&payload);

        let json = self.send(Method::Post, &path, Some(&body), Auth::Manage, cancel)?;
        let mut created = route.to_local(&json)?;

        let external_id = if caps.shape().arity() > 1 {
            id::encode_from_fields(caps, fields)
        } else {
            json.get("id")
                .and_then(|id| Value::from_json(id).ok()?.as_id_string())
                .map(id::ExternalId::new)
        }
        .ok_or_else(|| {
            ApiError::malformed(format!("{resource_type}: create response carries no id"))
        })?;

        self.create_follow_up(route, external_id.as_str(), fields, &mut created, cancel);
        log::debug!("created {resource_type} {external_id}");

        Ok(Created {
            external_id,
            fields: created,
        })
    }

    fn read(&self, target: &RemoteRef<'_>, cancel: &CancelToken) -> Result<Fields, ApiError> {
        let route = route_for(target.resource_type)?;
        let caps = caps_for(target.resource_type)?;
        let resolve = |name: &str| target_value(caps, target, name);
        let missing = || {
            ApiError::not_found(format!(
                "{} {} does not exist",
                target.resource_type, target.external_id
            ))
        };

        match route.read {
            ReadStrategy::Unsupported => Err(unsupported(route, "read")),
            ReadStrategy::Detail(template) => {
                let path = routes::render(template, resolve)?;
                let json = self.send(Method::Get, &path, None, Auth::Manage, cancel)?;
                route.to_local(&json)
            }
            ReadStrategy::ListFind(template) => {
                let path = routes::render(template, resolve)?;
                let json = self.send(Method::Get, &path, None, Auth::Manage, cancel)?;
                if !json.is_array() {
                    return Err(ApiError::malformed(format!("expected a list from {path}")));
                }
                find_by_id(&json, target.primary())
                    .ok_or_else(missing)
                    .and_then(|item| route.to_local(item))
            }
            ReadStrategy::ProjectFeature(template) => {
                let path = routes::render(template, resolve)?;
                let feature = target_value(caps, target, "feature").ok_or_else(|| {
                    ApiError::malformed(format!("{} has no feature component", target.external_id))
                })?;
                let project = self.send(Method::Get, &path, None, Auth::Manage, cancel)?;
                if !has_feature(&project, &feature) {
                    return Err(missing());
                }
                let mut fields = Fields::new();
                if let Some(project_id) = resolve("project_id") {
                    fields.insert("project_id".to_string(), Value::String(project_id));
                }
                fields.insert("feature".to_string(), Value::String(feature));
                Ok(fields)
            }
        }
    }

    fn update(
        &self,
        target: &RemoteRef<'_>,
        changed: &Fields,
        cancel: &CancelToken,
    ) -> Result<Fields, ApiError> {
        let route = route_for(target.resource_type)?;
        let caps = caps_for(target.resource_type)?;
        let (method, template) = route.update.ok_or_else(|| unsupported(route, "update"))?;

        let path = routes::render(template, |name| target_value(caps, target, name))?;
        let body = route.to_remote(changed);
        let json = self.send(method.into(), &path, Some(&body), Auth::Manage, cancel)?;
        if json.is_object() {
            route.to_local(&json)
        } else {
            Ok(Fields::new())
        }
    }

    fn delete(&self, target: &RemoteRef<'_>, cancel: &CancelToken) -> Result<(), ApiError> {
        let route = route_for(target.resource_type)?;
        let caps = caps_for(target.resource_type)?;
        let resolve = |name: &str| target_value(caps, target, name);

        match route.delete.ok_or_else(|| unsupported(route, "delete"))? {
            DeleteRoute::Manage(template) => {
                let path = routes::render(template, resolve)?;
                self.send(Method::Delete, &path, None, Auth::Manage, cancel)?;
            }
            DeleteRoute::StorageToken { path, secret } => {
                let token = target.observed.secrets.expose(secret).ok_or_else(|| {
                    ApiError::unauthorized(format!(
                        "{} {}: '{secret}' was not captured, the token cannot authorise its own removal",
                        target.resource_type, target.external_id
                    ))
                })?;
                let path = routes::render(path, resolve)?;
                self.send(Method::Delete, &path, None, Auth::Storage(token), cancel)?;
            }
        }
        Ok(())
    }
}
