//! Endpoint table for the Management API.
//!
//! Each resource type maps to a [`Route`]: endpoint templates per verb, the
//! way the object is read back, and a [`FieldMap`] translating local field
//! names to the remote JSON keys. Templates use `{name}` placeholders that
//! the client fills from the decoded identifier or from the fields.

use reconcile::{ApiError, Fields, Value};
use serde_json::{Map, json};

/// How a local value is translated to and from its JSON form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Strings; numbers coming back are rendered as text
    Text,
    /// Numeric ids surfaced locally as strings
    IdText,
    Flag,
    Number,
    /// Comma-separated text locally, a JSON array of strings remotely.
    /// Kept sorted so element order never shows as a change.
    List,
    /// Table of text values; entry `key` is the local field `{local}.{key}`
    Entries,
}

impl Coercion {
    /// JSON sent to the API for a local value.
    pub fn to_remote(self, value: &Value) -> serde_json::Value {
        match (self, value) {
            (Self::IdText, Value::String(s)) => s
                .parse::<u64>()
                .map_or_else(|_| json!(s), |n| json!(n)),
            (Self::Number, Value::String(s)) => s
                .parse::<f64>()
                .map_or_else(|_| json!(s), number_json),
            (Self::List, Value::String(s)) => json!(list_items(s)),
            (_, Value::Number(n)) => number_json(*n),
            _ => value.to_json(),
        }
    }

    /// Local value for a JSON scalar returned by the API.
    pub fn to_local(self, json: &serde_json::Value) -> Result<Value, ApiError> {
        if let (Self::List, serde_json::Value::Array(items)) = (self, json) {
            let items = items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s.clone()),
                    other => Err(ApiError::malformed(format!("expected a list of strings, got {other}"))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::String(join_items(items)));
        }
        if self == Self::Entries {
            return Err(ApiError::malformed("expected a table of values"));
        }
        let value = Value::from_json(json)?;
        let coerced = match (self, &value) {
            (Self::IdText, Value::Number(_)) => value.as_id_string().map(Value::String),
            (Self::Text, Value::Number(_)) => Some(Value::String(value.to_string())),
            (Self::Number, Value::String(s)) => s.parse().ok().map(Value::Number),
            (Self::Flag, Value::String(s)) => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        Ok(coerced.unwrap_or(value))
    }

    /// The local value a read would produce for `value`.
    pub fn normalize(self, value: &Value) -> Result<Value, ApiError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.to_local(&self.to_remote(value))
    }
}

fn list_items(raw: &str) -> Vec<String> {
    let mut items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect();
    items.sort_unstable();
    items.dedup();
    items
}

fn join_items(mut items: Vec<String>) -> String {
    items.sort_unstable();
    items.dedup();
    items.join(",")
}

/// Integral numbers go out as JSON integers.
fn number_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// One local field and where it lives in the remote JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    pub local: &'static str,
    /// Dotted path into the remote object
    pub remote: &'static str,
    pub coercion: Coercion,
}

const fn text(local: &'static str, remote: &'static str) -> FieldMap {
    FieldMap {
        local,
        remote,
        coercion: Coercion::Text,
    }
}

const fn id_text(local: &'static str, remote: &'static str) -> FieldMap {
    FieldMap {
        local,
        remote,
        coercion: Coercion::IdText,
    }
}

const fn flag(local: &'static str, remote: &'static str) -> FieldMap {
    FieldMap {
        local,
        remote,
        coercion: Coercion::Flag,
    }
}

const fn number(local: &'static str, remote: &'static str) -> FieldMap {
    FieldMap {
        local,
        remote,
        coercion: Coercion::Number,
    }
}

const fn list(local: &'static str, remote: &'static str) -> FieldMap {
    FieldMap {
        local,
        remote,
        coercion: Coercion::List,
    }
}

const fn entries(local: &'static str, remote: &'static str) -> FieldMap {
    FieldMap {
        local,
        remote,
        coercion: Coercion::Entries,
    }
}

/// How an existing object is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// No read endpoint exists
    Unsupported,
    /// `GET` the object itself
    Detail(&'static str),
    /// `GET` a collection and pick the element whose `id` matches
    ListFind(&'static str),
    /// `GET` the project and look for the feature in its `features` list
    ProjectFeature(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    Patch,
    Put,
}

/// How an object is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRoute {
    /// `DELETE` authorised by the management token
    Manage(&'static str),
    /// `DELETE` against the Storage API, authorised by a secret the object
    /// handed out when it was created
    StorageToken {
        path: &'static str,
        secret: &'static str,
    },
}

/// Secondary call issued right after a successful create when any field
/// under `prefix` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUp {
    pub path: &'static str,
    pub prefix: &'static str,
    pub fields: &'static [FieldMap],
    /// Response key copied into the created fields
    pub capture: (&'static str, &'static str),
}

/// Endpoints and field mapping of one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub resource_type: &'static str,
    pub create: &'static str,
    pub read: ReadStrategy,
    pub update: Option<(UpdateMethod, &'static str)>,
    pub delete: Option<DeleteRoute>,
    pub follow_up: Option<FollowUp>,
    pub fields: &'static [FieldMap],
}

impl Route {
    /// Request body for `fields`. Fields without a mapping are left out.
    pub fn to_remote(&self, fields: &Fields) -> serde_json::Value {
        body_from(self.fields, fields, "")
    }

    /// Local fields from a response object. Unmapped keys are dropped and
    /// absent keys are left absent.
    pub fn to_local(&self, json: &serde_json::Value) -> Result<Fields, ApiError> {
        let mut fields = Fields::new();
        for map in self.fields {
            if map.coercion == Coercion::Entries {
                if let Some(serde_json::Value::Object(table)) = lookup(json, map.remote) {
                    for (key, raw) in table {
                        let value = Coercion::Text.to_local(raw).map_err(|e| {
                            ApiError::malformed(format!("{}: field '{}.{key}': {}", self.resource_type, map.local, e.message))
                        })?;
                        fields.insert(format!("{}.{key}", map.local), value);
                    }
                }
                continue;
            }
            if let Some(raw) = lookup(json, map.remote) {
                let value = map.coercion.to_local(raw).map_err(|e| {
                    ApiError::malformed(format!("{}: field '{}': {}", self.resource_type, map.local, e.message))
                })?;
                fields.insert(map.local.to_string(), value);
            }
        }
        Ok(fields)
    }

    pub fn field(&self, local: &str) -> Option<&FieldMap> {
        self.fields.iter().find(|m| m.local == local)
    }

    /// Desired fields in the form a read returns them, so that a value the
    /// API echoes back unchanged never shows up as a difference.
    ///
    /// Fields this route cannot send are rejected instead of being dropped
    /// from the request.
    pub fn normalize(&self, fields: &Fields) -> Result<Fields, ApiError> {
        let parents = placeholders(self.create);
        let mut normalized = Fields::new();
        for (name, value) in fields {
            let coercion = self
                .coercion_for(name)
                .or_else(|| parents.contains(&name.as_str()).then_some(Coercion::IdText))
                .ok_or_else(|| {
                    ApiError::malformed(format!("{}: unknown field '{name}'", self.resource_type))
                })?;
            let value = coercion.normalize(value).map_err(|e| {
                ApiError::malformed(format!("{}: field '{name}': {}", self.resource_type, e.message))
            })?;
            normalized.insert(name.clone(), value);
        }
        Ok(normalized)
    }

    fn coercion_for(&self, name: &str) -> Option<Coercion> {
        if let Some(coercion) = coercion_in(self.fields, name) {
            return Some(coercion);
        }
        let follow_up = self.follow_up?;
        coercion_in(follow_up.fields, name.strip_prefix(follow_up.prefix)?)
    }
}

/// Coercion of local field `name`; entries of an `Entries` table are text.
fn coercion_in(maps: &[FieldMap], name: &str) -> Option<Coercion> {
    maps.iter().find_map(|map| {
        if map.local == name {
            return Some(map.coercion);
        }
        let key = name.strip_prefix(map.local)?.strip_prefix('.')?;
        (map.coercion == Coercion::Entries && !key.is_empty()).then_some(Coercion::Text)
    })
}

/// Build a nested JSON body from the fields named `{prefix}{local}`.
pub(crate) fn body_from(maps: &[FieldMap], fields: &Fields, prefix: &str) -> serde_json::Value {
    let mut body = Map::new();
    for map in maps {
        let key = format!("{prefix}{}", map.local);
        if map.coercion == Coercion::Entries {
            let entry_prefix = format!("{key}.");
            let table: Map<String, serde_json::Value> = fields
                .iter()
                .filter_map(|(name, value)| {
                    let entry = name.strip_prefix(&entry_prefix)?;
                    Some((entry.to_string(), Coercion::Text.to_remote(value)))
                })
                .collect();
            if !table.is_empty() {
                insert_path(&mut body, map.remote, serde_json::Value::Object(table));
            }
            continue;
        }
        if let Some(value) = fields.get(&key) {
            insert_path(&mut body, map.remote, map.coercion.to_remote(value));
        }
    }
    serde_json::Value::Object(body)
}

fn insert_path(object: &mut Map<String, serde_json::Value>, path: &str, value: serde_json::Value) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(Map::new()));
            if !child.is_object() {
                *child = serde_json::Value::Object(Map::new());
            }
            if let serde_json::Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Follow a dotted path into a JSON object.
pub(crate) fn lookup<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(json, |node, key| node.get(key))
}

/// Fill `{name}` placeholders in a template.
///
/// Values are percent-encoded as path segments. A placeholder without a
/// value is a `Malformed` error naming it.
pub fn render<F>(template: &str, resolve: F) -> Result<String, ApiError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let end = rest[start..]
            .find('}')
            .map(|e| start + e)
            .ok_or_else(|| ApiError::malformed(format!("unterminated placeholder in {template}")))?;
        let name = &rest[start + 1..end];
        let value = resolve(name)
            .ok_or_else(|| ApiError::malformed(format!("no value for '{name}' in {template}")))?;
        out.push_str(&encode_segment(&value));
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Placeholder names of a template, in order.
pub fn placeholders(template: &str) -> Vec<&str> {
    template
        .split('{')
        .skip(1)
        .filter_map(|part| part.split_once('}').map(|(name, _)| name))
        .collect()
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

const MAINTAINER_FIELDS: &[FieldMap] = &[
    text("name", "name"),
    id_text("default_connection_redshift_id", "defaultConnectionRedshiftId"),
    id_text("default_connection_snowflake_id", "defaultConnectionSnowflakeId"),
    id_text("default_connection_synapse_id", "defaultConnectionSynapseId"),
    id_text("default_connection_exasol_id", "defaultConnectionExasolId"),
    id_text("default_connection_teradata_id", "defaultConnectionTeradataId"),
    id_text("default_file_storage_id", "defaultFileStorageId"),
    text("zendesk_url", "zendeskUrl"),
];

const ORGANIZATION_FIELDS: &[FieldMap] = &[
    text("name", "name"),
    id_text("maintainer_id", "maintainer.id"),
    flag("allow_auto_join", "allowAutoJoin"),
    text("crm_id", "crmId"),
    id_text("activity_center_project_id", "activityCenterProjectId"),
    flag("mfa_required", "mfaRequired"),
];

const PROJECT_FIELDS: &[FieldMap] = &[
    text("name", "name"),
    id_text("organization_id", "organization.id"),
    text("type", "type"),
    text("default_backend", "defaultBackend"),
    number("data_retention_time_in_days", "dataRetentionTimeInDays"),
];

const TOKEN_FIELDS: &[FieldMap] = &[
    text("description", "description"),
    flag("can_manage_buckets", "canManageBuckets"),
    flag("can_read_all_file_uploads", "canReadAllFileUploads"),
    flag("can_purge_trash", "canPurgeTrash"),
    number("expires_in", "expiresIn"),
    entries("bucket_permissions", "bucketPermissions"),
    list("component_access", "componentAccess"),
];

const PROJECT_TOKEN_FIELDS: &[FieldMap] = &[
    text("description", "description"),
    flag("can_manage_buckets", "canManageBuckets"),
    flag("can_read_all_file_uploads", "canReadAllFileUploads"),
    flag("can_purge_trash", "canPurgeTrash"),
    number("expires_in", "expiresIn"),
    entries("bucket_permissions", "bucketPermissions"),
    list("component_access", "componentAccess"),
    text("token", "token"),
];

const INVITATION_FIELDS: &[FieldMap] = &[
    text("email", "email"),
    text("role", "role"),
    number("expiration_seconds", "expirationSeconds"),
    text("reason", "reason"),
    text("status", "status"),
];

const FEATURE_FIELDS: &[FieldMap] = &[text("feature", "feature")];

const BACKEND_FIELDS: &[FieldMap] = &[
    text("backend", "backend"),
    text("host", "host"),
    text("username", "username"),
    text("password", "password"),
    text("region", "region"),
    text("owner", "owner"),
    text("warehouse", "warehouse"),
    text("database", "database"),
    flag("use_synapse_managed_identity", "useSynapseManagedIdentity"),
    flag("use_dynamic_backends", "useDynamicBackends"),
];

const BIGQUERY_FIELDS: &[FieldMap] = &[
    text("owner", "owner"),
    text("folder_id", "folderId"),
    text("region", "region"),
    text("credentials.type", "credentials.type"),
    text("credentials.project_id", "credentials.project_id"),
    text("credentials.private_key_id", "credentials.private_key_id"),
    text("credentials.private_key", "credentials.private_key"),
    text("credentials.client_email", "credentials.client_email"),
    text("credentials.client_id", "credentials.client_id"),
    text("credentials.auth_uri", "credentials.auth_uri"),
    text("credentials.token_uri", "credentials.token_uri"),
];

const S3_FIELDS: &[FieldMap] = &[
    text("aws_key", "awsKey"),
    text("aws_secret", "awsSecret"),
    text("files_bucket", "filesBucket"),
    text("region", "region"),
    text("owner", "owner"),
];

const GCS_FIELDS: &[FieldMap] = &[
    text("files_bucket", "filesBucket"),
    text("owner", "owner"),
    text("region", "region"),
    text("gcs_credentials.type", "gcsCredentials.type"),
    text("gcs_credentials.project_id", "gcsCredentials.project_id"),
    text("gcs_credentials.private_key_id", "gcsCredentials.private_key_id"),
    text("gcs_credentials.private_key", "gcsCredentials.private_key"),
    text("gcs_credentials.client_email", "gcsCredentials.client_email"),
    text("gcs_credentials.client_id", "gcsCredentials.client_id"),
    text("gcs_credentials.auth_uri", "gcsCredentials.auth_uri"),
    text("gcs_credentials.token_uri", "gcsCredentials.token_uri"),
];

const AZURE_BLOB_FIELDS: &[FieldMap] = &[
    text("account_name", "accountName"),
    text("account_key", "accountKey"),
    text("owner", "owner"),
    text("container_name", "containerName"),
];

/// Every route, one per catalog type.
pub static ROUTES: &[Route] = &[
    Route {
        resource_type: "maintainer",
        create: "/manage/maintainers",
        read: ReadStrategy::Detail("/manage/maintainers/{id}"),
        update: Some((UpdateMethod::Patch, "/manage/maintainers/{id}")),
        delete: Some(DeleteRoute::Manage("/manage/maintainers/{id}")),
        follow_up: None,
        fields: MAINTAINER_FIELDS,
    },
    Route {
        resource_type: "organization",
        create: "/manage/maintainers/{maintainer_id}/organizations",
        read: ReadStrategy::Detail("/manage/organizations/{id}"),
        update: Some((UpdateMethod::Patch, "/manage/organizations/{id}")),
        delete: Some(DeleteRoute::Manage("/manage/organizations/{id}")),
        follow_up: None,
        fields: ORGANIZATION_FIELDS,
    },
    Route {
        resource_type: "project",
        create: "/manage/organizations/{organization_id}/projects",
        read: ReadStrategy::Detail("/manage/projects/{id}"),
        update: Some((UpdateMethod::Put, "/manage/projects/{id}")),
        delete: Some(DeleteRoute::Manage("/manage/projects/{id}")),
        follow_up: Some(FollowUp {
            path: "/manage/projects/{id}/tokens",
            prefix: "token.",
            fields: TOKEN_FIELDS,
            capture: ("token", "storage_token"),
        }),
        fields: PROJECT_FIELDS,
    },
    Route {
        resource_type: "project-token",
        create: "/manage/projects/{project_id}/tokens",
        read: ReadStrategy::Unsupported,
        update: None,
        delete: Some(DeleteRoute::StorageToken {
            path: "/v2/storage/tokens/{id}",
            secret: "token",
        }),
        follow_up: None,
        fields: PROJECT_TOKEN_FIELDS,
    },
    Route {
        resource_type: "project-invitation",
        create: "/manage/projects/{project_id}/invitations",
        read: ReadStrategy::Detail("/manage/projects/{project_id}/invitations/{id}"),
        update: None,
        delete: Some(DeleteRoute::Manage(
            "/manage/projects/{project_id}/invitations/{id}",
        )),
        follow_up: None,
        fields: INVITATION_FIELDS,
    },
    Route {
        resource_type: "project-feature",
        create: "/manage/projects/{project_id}/features",
        read: ReadStrategy::ProjectFeature("/manage/projects/{project_id}"),
        update: None,
        delete: Some(DeleteRoute::Manage(
            "/manage/projects/{project_id}/features/{feature}",
        )),
        follow_up: None,
        fields: FEATURE_FIELDS,
    },
    Route {
        resource_type: "backend",
        create: "/manage/storage-backend",
        read: ReadStrategy::Detail("/manage/storage-backend/{id}"),
        update: Some((UpdateMethod::Patch, "/manage/storage-backend/{id}")),
        delete: Some(DeleteRoute::Manage("/manage/storage-backend/{id}")),
        follow_up: None,
        fields: BACKEND_FIELDS,
    },
    Route {
        resource_type: "bigquery-backend",
        create: "/manage/storage-backend/bigquery",
        read: ReadStrategy::Unsupported,
        update: Some((UpdateMethod::Patch, "/manage/storage-backend/bigquery/{id}")),
        delete: None,
        follow_up: None,
        fields: BIGQUERY_FIELDS,
    },
    Route {
        resource_type: "file-storage-s3",
        create: "/manage/file-storage-s3",
        read: ReadStrategy::ListFind("/manage/file-storage-s3"),
        update: None,
        delete: None,
        follow_up: None,
        fields: S3_FIELDS,
    },
    Route {
        resource_type: "file-storage-gcs",
        create: "/manage/file-storage-gcs",
        read: ReadStrategy::ListFind("/manage/file-storage-gcs"),
        update: None,
        delete: None,
        follow_up: None,
        fields: GCS_FIELDS,
    },
    Route {
        resource_type: "file-storage-azure-blob",
        create: "/manage/file-storage-abs",
        read: ReadStrategy::ListFind("/manage/file-storage-abs"),
        update: None,
        delete: None,
        follow_up: None,
        fields: AZURE_BLOB_FIELDS,
    },
];

/// Route for a resource type.
pub fn route(resource_type: &str) -> Option<&'static Route> {
    ROUTES.iter().find(|r| r.resource_type == resource_type)
}

/// [`Route::normalize`] for `resource_type`.
pub fn normalize(resource_type: &str, fields: &Fields) -> Result<Fields, ApiError> {
    route(resource_type)
        .ok_or_else(|| ApiError::malformed(format!("no route for resource type '{resource_type}'")))?
        .normalize(fields)
}
