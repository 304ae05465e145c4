//! Local state file.
//!
//! Records the observed state of every managed resource by name. The file
//! holds one-time secrets, so it is written atomically and readable by the
//! owner only.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reconcile::ObservedState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub resources: BTreeMap<String, ObservedState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StateFile {
    /// Load state, or an empty state when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file {} does not exist, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        if state.version > STATE_VERSION {
            bail!(
                "State file {} has version {}, this build understands up to {STATE_VERSION}",
                path.display(),
                state.version
            );
        }

        log::debug!("Loaded {} resource(s) from {}", state.resources.len(), path.display());
        Ok(state)
    }

    /// Write state through a temporary file and rename it into place.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Utc::now();
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize state to JSON")?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        write_private(&tmp, content.as_bytes())
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ObservedState> {
        self.resources.get(name)
    }

    /// Record the outcome for `name`; absent resources are dropped.
    pub fn record(&mut self, name: &str, observed: ObservedState) {
        if observed.is_absent() {
            self.resources.remove(name);
        } else {
            self.resources.insert(name.to_string(), observed);
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}
