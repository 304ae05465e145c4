//! Manifest loading and provider settings.
//!
//! ```toml
//! [provider]
//! hostname_suffix = "keboola.com"
//! token = "${KBC_MANAGE_TOKEN}"
//!
//! [resources.acme]
//! type = "maintainer"
//! fields = { name = "Acme" }
//!
//! [resources.analytics]
//! type = "organization"
//! fields = { name = "Analytics", maintainer_id = "${acme.id}" }
//! ```
//!
//! String fields of the form `${name.field}` refer to another resource;
//! `${name.id}` is its remote identifier.

use anyhow::{Context, Result, bail};
use kbcapi::ClientConfig;
use reconcile::{Fields, Value};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HOSTNAME_SUFFIX_ENV: &str = "KBC_HOSTNAME_SUFFIX";
pub const TOKEN_ENV: &str = "KBC_MANAGE_TOKEN";

/// Connection settings from the `[provider]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub hostname_suffix: Option<String>,
    pub token: Option<String>,
    /// Per-request timeout in seconds
    pub timeout: Option<u64>,
}

/// One `[resources.<name>]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub fields: toml::Table,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
}

/// Expand `~` in a user-supplied path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_path(path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read manifest {}", path.display()))?;
        let manifest = Self::parse(&content)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        log::debug!(
            "Loaded {} resource(s) from {}",
            manifest.resources.len(),
            path.display()
        );
        Ok(manifest)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)?;
        for (name, spec) in &manifest.resources {
            if name.contains('.') {
                bail!("resource name '{name}' must not contain '.'");
            }
            kbcapi::registry()
                .capabilities_for(&spec.resource_type)
                .with_context(|| format!("resource '{name}'"))?;
            kbcapi::normalize(&spec.resource_type, &spec.raw_fields()?)
                .with_context(|| format!("resource '{name}'"))?;
            for reference in spec.references()? {
                if !manifest.resources.contains_key(&reference.resource) {
                    bail!(
                        "resource '{name}' refers to unknown resource '{}'",
                        reference.resource
                    );
                }
            }
        }
        Ok(manifest)
    }

    pub fn get(&self, name: &str) -> Result<&ResourceSpec> {
        self.resources
            .get(name)
            .with_context(|| format!("No resource named '{name}' in the manifest"))
    }

    /// Client settings: manifest values first, then the environment.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.client_config_with(|key| std::env::var(key).ok())
    }

    fn client_config_with<F>(&self, env: F) -> Result<ClientConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let setting = |value: Option<&String>, name: &str, key: &str, what: &str| -> Result<String> {
            let raw = value
                .cloned()
                .or_else(|| env(key))
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Missing {what}: set provider.{name} or {key}"))?;
            let expanded = shellexpand::env_with_context(&raw, |var| Ok::<_, std::env::VarError>(env(var)))
                .with_context(|| format!("Could not expand {what}"))?;
            Ok(expanded.into_owned())
        };

        let suffix = setting(
            self.provider.hostname_suffix.as_ref(),
            "hostname_suffix",
            HOSTNAME_SUFFIX_ENV,
            "hostname suffix",
        )?;
        let token = setting(
            self.provider.token.as_ref(),
            "token",
            TOKEN_ENV,
            "management token",
        )?;

        let mut config = ClientConfig::new(suffix, token);
        if let Some(secs) = self.provider.timeout {
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Apply order: each inner list only depends on earlier lists.
    pub fn waves(&self, names: &BTreeSet<String>) -> Result<Vec<Vec<String>>> {
        let mut pending: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for name in names {
            let deps = self
                .get(name)?
                .references()?
                .into_iter()
                .map(|r| r.resource)
                .filter(|dep| names.contains(dep) && dep != name)
                .collect();
            pending.insert(name.as_str(), deps);
        }

        let mut waves = Vec::new();
        let mut done: BTreeSet<String> = BTreeSet::new();
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, deps)| deps.is_subset(&done))
                .map(|(name, _)| (*name).to_string())
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = pending.keys().copied().collect();
                bail!("Reference cycle between: {}", stuck.join(", "));
            }
            for name in &ready {
                pending.remove(name.as_str());
            }
            done.extend(ready.iter().cloned());
            waves.push(ready);
        }
        Ok(waves)
    }

    /// Resources that `name` (transitively) depends on, plus itself.
    pub fn with_dependencies(&self, name: &str) -> Result<BTreeSet<String>> {
        let mut selected = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !selected.insert(current.clone()) {
                continue;
            }
            for reference in self.get(&current)?.references()? {
                stack.push(reference.resource);
            }
        }
        Ok(selected)
    }
}

/// A `${resource.field}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub resource: String,
    pub field: String,
}

impl Reference {
    /// Parse a whole-string reference; anything else is a literal.
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
        let (resource, field) = inner.split_once('.')?;
        if resource.is_empty() || field.is_empty() {
            return None;
        }
        Some(Self {
            resource: resource.to_string(),
            field: field.to_string(),
        })
    }
}

impl ResourceSpec {
    /// Manifest fields flattened to the dotted names the API layer uses.
    pub fn raw_fields(&self) -> Result<Fields> {
        let mut fields = Fields::new();
        flatten("", &self.fields, &mut fields)?;
        Ok(fields)
    }

    pub fn references(&self) -> Result<Vec<Reference>> {
        Ok(self
            .raw_fields()?
            .values()
            .filter_map(|v| v.as_str().and_then(Reference::parse))
            .collect())
    }

    /// Desired fields with references substituted. `resolve` returns `None`
    /// for values not known yet.
    pub fn resolve_fields<F>(&self, resolve: F) -> Result<Resolved>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        let mut resolved = Resolved::default();
        for (name, value) in self.raw_fields()? {
            match value.as_str().and_then(Reference::parse) {
                Some(reference) => match resolve(&reference) {
                    Some(actual) => {
                        resolved.fields.insert(name, actual);
                    }
                    None => resolved.unknown.push(name),
                },
                None => {
                    resolved.fields.insert(name, value);
                }
            }
        }
        Ok(resolved)
    }
}

/// Desired fields after reference substitution.
#[derive(Debug, Default)]
pub struct Resolved {
    pub fields: Fields,
    /// Fields whose reference is not known until apply
    pub unknown: Vec<String>,
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut Fields) -> Result<()> {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let converted = match value {
            toml::Value::String(s) => Value::String(s.clone()),
            toml::Value::Integer(i) => Value::from(*i),
            toml::Value::Float(f) => Value::Number(*f),
            toml::Value::Boolean(b) => Value::Bool(*b),
            toml::Value::Datetime(d) => Value::String(d.to_string()),
            toml::Value::Table(inner) => {
                flatten(&name, inner, out)?;
                continue;
            }
            toml::Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .with_context(|| format!("field '{name}': only arrays of strings are supported"))?;
                Value::String(items.join(","))
            }
        };
        out.insert(name, converted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[provider]
hostname_suffix = "north-europe.azure.keboola.com"

[resources.acme]
type = "maintainer"
fields = { name = "Acme" }

[resources.analytics]
type = "organization"
fields = { name = "Analytics", maintainer_id = "${acme.id}", mfa_required = true }

[resources.warehouse]
type = "project"
fields = { name = "Warehouse", organization_id = "${analytics.id}", type = "production" }

[resources.gcs]
type = "file-storage-gcs"

[resources.gcs.fields]
files_bucket = "kbc-files"
region = "europe-west1"
gcs_credentials = { type = "service_account", client_id = "123" }
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.resources.len(), 4);
        let spec = manifest.get("analytics").unwrap();
        assert_eq!(spec.resource_type, "organization");

        let fields = spec.raw_fields().unwrap();
        assert_eq!(fields["mfa_required"], Value::Bool(true));
        assert_eq!(
            spec.references().unwrap(),
            vec![Reference {
                resource: "acme".to_string(),
                field: "id".to_string()
            }]
        );
    }

    #[test]
    fn test_nested_tables_are_flattened() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let fields = manifest.get("gcs").unwrap().raw_fields().unwrap();
        assert_eq!(fields["gcs_credentials.type"], Value::from("service_account"));
        assert_eq!(fields["gcs_credentials.client_id"], Value::from("123"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = Manifest::parse("[resources.x]\ntype = \"workspace\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("workspace"));
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let err = Manifest::parse(
            "[resources.org]\ntype = \"organization\"\nfields = { maintainer_id = \"${nope.id}\" }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_string_arrays_become_lists() {
        let manifest = Manifest::parse(
            r#"
[resources.ci]
type = "project-token"

[resources.ci.fields]
project_id = "12"
component_access = ["keboola.ex-db-mysql", "keboola.wr-db-snowflake"]
bucket_permissions = { "in.c-main" = "read" }
"#,
        )
        .unwrap();
        let fields = manifest.get("ci").unwrap().raw_fields().unwrap();
        assert_eq!(
            fields["component_access"],
            Value::from("keboola.ex-db-mysql,keboola.wr-db-snowflake")
        );
        assert_eq!(fields["bucket_permissions.in.c-main"], Value::from("read"));
    }

    #[test]
    fn test_mixed_arrays_are_rejected() {
        let err = Manifest::parse(
            "[resources.t]\ntype = \"project-token\"\nfields = { component_access = [\"a\", 1] }\n",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("only arrays of strings"));
    }

    #[test]
    fn test_unmapped_field_is_rejected() {
        let err = Manifest::parse(
            "[resources.t]\ntype = \"project-token\"\nfields = { project_id = \"12\", can_fly = true }\n",
        )
        .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("resource 't'"));
        assert!(message.contains("unknown field 'can_fly'"));
    }

    #[test]
    fn test_waves_follow_references() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let all: BTreeSet<String> = manifest.resources.keys().cloned().collect();
        let waves = manifest.waves(&all).unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["acme".to_string(), "gcs".to_string()],
                vec!["analytics".to_string()],
                vec!["warehouse".to_string()],
            ]
        );
    }

    #[test]
    fn test_reference_cycle() {
        let manifest = Manifest::parse(
            r#"
[resources.a]
type = "maintainer"
fields = { default_file_storage_id = "${b.id}" }

[resources.b]
type = "file-storage-s3"
fields = { owner = "${a.name}" }
"#,
        )
        .unwrap();
        let all: BTreeSet<String> = manifest.resources.keys().cloned().collect();
        let err = manifest.waves(&all).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_with_dependencies() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let selected = manifest.with_dependencies("warehouse").unwrap();
        assert_eq!(
            selected.into_iter().collect::<Vec<_>>(),
            vec!["acme", "analytics", "warehouse"]
        );
    }

    #[test]
    fn test_resolve_fields_marks_unknown() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let spec = manifest.get("warehouse").unwrap();
        let resolved = spec.resolve_fields(|_| None).unwrap();
        assert_eq!(resolved.unknown, vec!["organization_id".to_string()]);
        assert!(!resolved.fields.contains_key("organization_id"));

        let resolved = spec
            .resolve_fields(|r| (r.resource == "analytics").then(|| Value::from("42")))
            .unwrap();
        assert!(resolved.unknown.is_empty());
        assert_eq!(resolved.fields["organization_id"], Value::from("42"));
    }

    #[test]
    fn test_client_config_prefers_manifest_then_env() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let config = manifest
            .client_config_with(|key| match key {
                TOKEN_ENV => Some("env-token".to_string()),
                HOSTNAME_SUFFIX_ENV => Some("keboola.com".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.hostname_suffix, "north-europe.azure.keboola.com");
        assert_eq!(config.token, "env-token");
    }

    #[test]
    fn test_client_config_expands_variables() {
        let manifest = Manifest::parse(
            "[provider]\nhostname_suffix = \"keboola.com\"\ntoken = \"${MY_TOKEN}\"\ntimeout = 5\n",
        )
        .unwrap();
        let config = manifest
            .client_config_with(|key| (key == "MY_TOKEN").then(|| "expanded".to_string()))
            .unwrap();
        assert_eq!(config.token, "expanded");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_client_config_missing_token() {
        let manifest = Manifest::parse("[provider]\nhostname_suffix = \"keboola.com\"\n").unwrap();
        let err = manifest.client_config_with(|_| None).unwrap_err();
        assert!(err.to_string().contains(TOKEN_ENV));
    }
}
