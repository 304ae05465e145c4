use super::Workspace;
use crate::Context;
use crate::cli::ImportArgs;
use crate::retry::{RetryConfig, with_retry};
use crate::ui;
use anyhow::{Context as AnyhowContext, Result, bail};
use reconcile::{CancelToken, Fields, Reconciler, Value};

/// Seed fields from `--set KEY=VALUE` pairs.
fn seed_fields(pairs: Vec<(String, String)>) -> Fields {
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::from(value)))
        .collect()
}

/// Check that `name` may be recorded as a `resource_type`.
fn check_target(ws: &Workspace, name: &str, resource_type: &str) -> Result<()> {
    if let Some(existing) = ws.state.get(name).filter(|o| o.is_present()) {
        bail!(
            "'{name}' is already managed as {} {}",
            existing.resource_type,
            existing.id_str().unwrap_or("")
        );
    }
    if let Some(spec) = ws.manifest.resources.get(name)
        && spec.resource_type != resource_type
    {
        bail!(
            "The manifest declares '{name}' as {}, not {resource_type}",
            spec.resource_type
        );
    }
    Ok(())
}

pub fn run(ctx: &Context, args: ImportArgs) -> Result<()> {
    let mut ws = Workspace::open_lenient(ctx)?;
    check_target(&ws, &args.name, &args.resource_type)?;
    let seed = kbcapi::normalize(&args.resource_type, &seed_fields(args.set))
        .context("Invalid --set value")?;

    let client = ws.client()?;
    let reconciler = Reconciler::new(kbcapi::registry(), &client);
    let cancel = CancelToken::new();

    let result = with_retry(&RetryConfig::default(), &args.name, || {
        reconciler.import(&args.resource_type, &args.id, &seed, &cancel)
    })?;
    ui::print_result(&args.name, &result);

    if !result.is_ok() {
        bail!("Import of {} {} failed", args.resource_type, args.id);
    }
    if result.observed.is_absent() {
        bail!("Nothing was imported for {} {}", args.resource_type, args.id);
    }

    ws.state.record(&args.name, result.observed);
    ws.save()?;
    if !ws.manifest.resources.contains_key(&args.name) {
        ui::warn(&format!(
            "'{}' is not in the manifest; the next apply will destroy it",
            args.name
        ));
    }
    ui::success(&format!("Imported {} as '{}'", args.id, args.name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manifest;
    use crate::state::StateFile;
    use reconcile::{ExternalId, ObservedState, fields};
    use std::path::PathBuf;

    fn workspace() -> Workspace {
        let manifest = Manifest::parse(
            r#"
[resources.sales]
type = "project"
fields = { name = "Sales", organization_id = "7" }
"#,
        )
        .unwrap();
        let mut state = StateFile::default();
        state.record(
            "acme",
            ObservedState::present("maintainer", ExternalId::new("3"), fields! { "name" => "Acme" }),
        );
        Workspace {
            manifest,
            state,
            state_path: PathBuf::from("kbc.state.json"),
        }
    }

    #[test]
    fn test_seed_fields_are_strings() {
        let seed = seed_fields(vec![("project_id".to_string(), "12".to_string())]);
        assert_eq!(seed.get("project_id"), Some(&Value::from("12")));
    }

    #[test]
    fn test_already_managed_is_rejected() {
        let err = check_target(&workspace(), "acme", "maintainer").unwrap_err();
        assert!(err.to_string().contains("already managed"));
    }

    #[test]
    fn test_type_mismatch_with_manifest_is_rejected() {
        let ws = workspace();
        assert!(check_target(&ws, "sales", "organization").is_err());
        assert!(check_target(&ws, "sales", "project").is_ok());
        assert!(check_target(&ws, "fresh", "project-feature").is_ok());
    }
}
