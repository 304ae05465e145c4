pub mod apply;
pub mod destroy;
pub mod import;
pub mod plan;
pub mod refresh;
pub mod show;

use crate::Context;
use crate::config::{Manifest, Reference, Resolved, expand_path};
use crate::executor::Outcome;
use crate::state::StateFile;
use crate::ui;
use anyhow::{Context as AnyhowContext, Result, bail};
use kbcapi::ManagementClient;
use reconcile::{Decision, DesiredState, Plan, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Parallelism for commands without a `--jobs` flag.
pub const DEFAULT_JOBS: usize = 4;

/// Manifest and state loaded for one command.
pub struct Workspace {
    pub manifest: Manifest,
    pub state: StateFile,
    state_path: PathBuf,
}

impl Workspace {
    /// Load the manifest and the state file.
    pub fn open(ctx: &Context) -> Result<Self> {
        let manifest = Manifest::load(&expand_path(&ctx.manifest))?;
        Self::with_manifest(ctx, manifest)
    }

    /// Like [`open`](Self::open), but a missing manifest is treated as empty.
    /// Commands that only work from state use this; provider settings then
    /// come from the environment.
    pub fn open_lenient(ctx: &Context) -> Result<Self> {
        let path = expand_path(&ctx.manifest);
        let manifest = if path.exists() {
            Manifest::load(&path)?
        } else {
            log::debug!("No manifest at {}, using environment only", path.display());
            Manifest::default()
        };
        Self::with_manifest(ctx, manifest)
    }

    fn with_manifest(ctx: &Context, manifest: Manifest) -> Result<Self> {
        let state_path = expand_path(&ctx.state);
        let state = StateFile::load(&state_path)?;
        Ok(Self {
            manifest,
            state,
            state_path,
        })
    }

    /// Connect and check the management token before doing anything else.
    pub fn client(&self) -> Result<ManagementClient> {
        let client = ManagementClient::new(self.manifest.client_config()?)
            .context("Invalid provider settings")?;
        let info = client
            .verify_token()
            .with_context(|| format!("Token verification against {} failed", client.base_url()))?;
        log::info!("Authenticated as '{}'", info.description);
        Ok(client)
    }

    pub fn save(&mut self) -> Result<()> {
        self.state.save(&self.state_path)
    }

    /// Manifest resources selected by `target`, dependencies included.
    pub fn selected(&self, target: Option<&str>) -> Result<BTreeSet<String>> {
        match target {
            Some(name) => self.manifest.with_dependencies(name),
            None => Ok(self.manifest.resources.keys().cloned().collect()),
        }
    }

    /// Resources in state that the manifest no longer declares.
    pub fn orphans(&self) -> Vec<String> {
        self.state
            .resources
            .keys()
            .filter(|name| !self.manifest.resources.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Desired state of `name` with references resolved from recorded state.
    ///
    /// References to `unsettled` values stay unknown. Resolved values are
    /// normalized to the form a read returns them in.
    pub fn desired(&self, name: &str, unsettled: &Unsettled) -> Result<(DesiredState, Resolved)> {
        let spec = self.manifest.get(name)?;
        let mut resolved = spec.resolve_fields(|reference| {
            if unsettled.contains(reference) {
                None
            } else {
                lookup(&self.state, reference)
            }
        })?;
        resolved.fields = kbcapi::normalize(&spec.resource_type, &resolved.fields)
            .with_context(|| format!("resource '{name}'"))?;
        let desired = DesiredState::new(spec.resource_type.clone(), resolved.fields.clone());
        Ok((desired, resolved))
    }
}

/// Recorded values that planned changes will replace before dependents
/// are applied.
#[derive(Debug, Default)]
pub struct Unsettled {
    resources: BTreeSet<String>,
    fields: BTreeSet<(String, String)>,
}

impl Unsettled {
    /// Note what applying `plan` to `name` will change. A new identity or
    /// a pending reference unsettles every value of the resource.
    pub fn note(&mut self, name: &str, plan: &Plan, unknown: &[String]) {
        if matches!(plan.decision, Decision::Create | Decision::Replace) || !unknown.is_empty() {
            self.resources.insert(name.to_string());
            return;
        }
        for change in plan.change_set.actionable() {
            self.fields.insert((name.to_string(), change.field.clone()));
        }
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.resources.contains(&reference.resource)
            || self
                .fields
                .contains(&(reference.resource.clone(), reference.field.clone()))
    }
}

/// Value of a `${resource.field}` reference, if the resource is recorded.
pub fn lookup(state: &StateFile, reference: &Reference) -> Option<Value> {
    let observed = state.get(&reference.resource)?;
    if !observed.is_present() {
        return None;
    }
    if reference.field == "id" {
        return observed.id_str().map(Value::from);
    }
    observed
        .fields
        .get(&reference.field)
        .filter(|value| !value.is_null())
        .cloned()
        .or_else(|| observed.secrets.expose(&reference.field).map(Value::from))
}

/// Print the outcome line for one resource.
pub fn report(name: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Done(result) => ui::print_result(name, result),
        Outcome::Rejected(err) => {
            ui::error(&format!("{name}: {err}"));
            ui::dim(err.kind.advice());
        }
        Outcome::Skipped(reason) => ui::dim(&format!("{name}: skipped, {reason}")),
    }
}

/// Refuse to continue when a run left failures behind.
pub fn bail_on_failures(failed: usize, verb: &str) -> Result<()> {
    if failed > 0 {
        bail!("{verb} failed for {failed} resource(s)");
    }
    Ok(())
}

/// Print shell completions.
pub fn completions(shell: clap_complete::Shell) {
    use crate::cli::Cli;
    use clap::CommandFactory;
    use clap_complete::generate;

    generate(shell, &mut Cli::command(), "kbc-manage", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{ExternalId, ObservedState, fields};

    fn state() -> StateFile {
        let mut state = StateFile::default();
        let mut project = ObservedState::present(
            "project",
            ExternalId::new("12"),
            fields! { "name" => "Sales", "organization_id" => "7" },
        );
        project.secrets.insert("storage_token", "12-secret");
        state.record("sales", project);
        state
    }

    fn reference(resource: &str, field: &str) -> Reference {
        Reference {
            resource: resource.to_string(),
            field: field.to_string(),
        }
    }

    #[test]
    fn test_lookup_id() {
        assert_eq!(lookup(&state(), &reference("sales", "id")), Some(Value::from("12")));
    }

    #[test]
    fn test_lookup_field_and_secret() {
        let state = state();
        assert_eq!(
            lookup(&state, &reference("sales", "organization_id")),
            Some(Value::from("7"))
        );
        assert_eq!(
            lookup(&state, &reference("sales", "storage_token")),
            Some(Value::from("12-secret"))
        );
    }

    #[test]
    fn test_lookup_unknown() {
        let state = state();
        assert_eq!(lookup(&state, &reference("sales", "missing")), None);
        assert_eq!(lookup(&state, &reference("nope", "id")), None);
    }

    #[test]
    fn test_unsettled_by_decision() {
        let mut unsettled = Unsettled::default();
        let replace = Plan {
            decision: Decision::Replace,
            change_set: reconcile::ChangeSet::default(),
            drift: reconcile::DriftReport::default(),
            observed: ObservedState::absent("organization"),
            errors: Vec::new(),
        };
        unsettled.note("analytics", &replace, &[]);
        assert!(unsettled.contains(&reference("analytics", "id")));
        assert!(unsettled.contains(&reference("analytics", "name")));
        assert!(!unsettled.contains(&reference("sales", "id")));

        let noop = Plan {
            decision: Decision::NoOp,
            ..replace
        };
        unsettled.note("sales", &noop, &["organization_id".to_string()]);
        assert!(unsettled.contains(&reference("sales", "id")));

        unsettled.note("acme", &noop, &[]);
        assert!(!unsettled.contains(&reference("acme", "id")));
    }

    #[test]
    fn test_bail_on_failures() {
        assert!(bail_on_failures(0, "Apply").is_ok());
        let err = bail_on_failures(2, "Apply").unwrap_err();
        assert_eq!(err.to_string(), "Apply failed for 2 resource(s)");
    }
}
