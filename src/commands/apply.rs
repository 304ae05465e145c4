use super::plan::{self, Planned};
use super::{Unsettled, Workspace, bail_on_failures, destroy, report};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::executor::{self, ExecuteSummary, Outcome};
use crate::retry::{RetryConfig, with_retry};
use crate::ui;
use anyhow::Result;
use reconcile::{CancelToken, Reconciler};
use std::collections::BTreeSet;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let mut ws = Workspace::open(ctx)?;
    let client = ws.client()?;
    let reconciler = Reconciler::new(kbcapi::registry(), &client);
    let cancel = CancelToken::new();

    let waves = ws.manifest.waves(&ws.selected(args.target.as_deref())?)?;
    ui::header("Plan");
    let planned = plan::plan_all(&ws, &reconciler, &waves, &cancel)?;

    let mut summary = ExecuteSummary::default();
    let mut pending = BTreeSet::new();
    let mut blocked = BTreeSet::new();
    for entry in &planned {
        if entry.is_pending() {
            plan::print_planned(entry);
            pending.insert(entry.name.clone());
        } else if entry.is_failed() {
            plan::print_planned(entry);
            blocked.insert(entry.name.clone());
            summary.failed += 1;
        } else if !ctx.quiet {
            plan::print_planned(entry);
        }
    }

    let orphans = if args.target.is_none() {
        ws.orphans()
    } else {
        Vec::new()
    };
    plan::print_orphans(&ws, &orphans);
    println!();

    if pending.is_empty() && orphans.is_empty() {
        if !args.dry_run {
            record_refreshed(&mut ws, &planned);
            ws.save()?;
        }
        ui::success("No changes. Remote resources match the manifest.");
        return bail_on_failures(summary.failed, "Apply");
    }

    if args.dry_run {
        ui::info("Dry run, no changes made");
        return Ok(());
    }

    if !args.yes && !executor::confirm_proceed("Apply these changes?")? {
        ui::info("Cancelled");
        return Ok(());
    }

    record_refreshed(&mut ws, &planned);
    let retry = RetryConfig::default();
    let total = waves.len();
    for (index, wave) in waves.iter().enumerate() {
        let batch: Vec<String> = wave.iter().filter(|n| pending.contains(*n)).cloned().collect();
        if batch.is_empty() {
            continue;
        }
        if !ctx.quiet {
            ui::step(index + 1, total, &batch.join(", "));
        }

        let outcomes = {
            let ws = &ws;
            let blocked = &blocked;
            executor::run_parallel(&batch, args.jobs, |name| {
                apply_one(ws, &reconciler, blocked, name, &retry, &cancel)
            })?
        };

        for (name, outcome) in outcomes {
            report(&name, &outcome);
            summary.add(&outcome);
            if outcome.is_failure() || matches!(outcome, Outcome::Skipped(_)) {
                blocked.insert(name.clone());
            }
            if let Outcome::Done(result) = outcome {
                ws.state.record(&name, result.observed);
            }
        }
        ws.save()?;
    }

    if !orphans.is_empty() {
        ui::section("Removing resources no longer in the manifest");
        let teardown = destroy::teardown_waves(&ws, &orphans);
        destroy::destroy_waves(&mut ws, &reconciler, &teardown, args.jobs, &cancel, &mut summary)?;
    }

    executor::print_summary(&summary, "Apply");
    bail_on_failures(summary.failed, "Apply")
}

/// Keep the refreshed state of resources that need no change.
fn record_refreshed(ws: &mut Workspace, planned: &[Planned]) {
    for entry in planned {
        if entry.is_pending() || entry.is_failed() {
            continue;
        }
        if let Ok(plan) = &entry.plan {
            ws.state.record(&entry.name, plan.observed.clone());
        }
    }
}

/// Reconcile one resource against the state recorded by earlier waves.
fn apply_one(
    ws: &Workspace,
    reconciler: &Reconciler<'_>,
    blocked: &BTreeSet<String>,
    name: &str,
    retry: &RetryConfig,
    cancel: &CancelToken,
) -> Outcome {
    if let Some(dependency) = blocked_dependency(ws, blocked, name) {
        return Outcome::Skipped(format!("depends on '{dependency}', which was not applied"));
    }

    let (desired, resolved) = match ws.desired(name, &Unsettled::default()) {
        Ok(pair) => pair,
        Err(err) => return Outcome::Skipped(format!("{err:#}")),
    };
    if !resolved.unknown.is_empty() {
        return Outcome::Skipped(format!(
            "unresolved references in {}",
            resolved.unknown.join(", ")
        ));
    }

    let prior = ws.state.get(name);
    Outcome::from_result(with_retry(retry, name, || {
        reconciler.reconcile(&desired, prior, cancel)
    }))
}

fn blocked_dependency(ws: &Workspace, blocked: &BTreeSet<String>, name: &str) -> Option<String> {
    ws.manifest
        .get(name)
        .ok()?
        .references()
        .ok()?
        .into_iter()
        .map(|reference| reference.resource)
        .find(|dependency| blocked.contains(dependency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manifest;
    use crate::state::StateFile;
    use reconcile::{CapabilityDescriptor, CapabilityRegistry, MockApi, Verb};
    use std::path::PathBuf;

    const MANIFEST: &str = r#"
[resources.acme]
type = "maintainer"
fields = { name = "Acme" }

[resources.analytics]
type = "organization"
fields = { name = "Analytics", maintainer_id = "${acme.id}" }
"#;

    fn workspace() -> Workspace {
        Workspace {
            manifest: Manifest::parse(MANIFEST).unwrap(),
            state: StateFile::default(),
            state_path: PathBuf::from("kbc.state.json"),
        }
    }

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new()
            .register(CapabilityDescriptor::new("maintainer"))
            .register(
                CapabilityDescriptor::new("organization")
                    .verbs([Verb::Create, Verb::Read, Verb::Update, Verb::Delete, Verb::Import])
                    .immutable(["maintainer_id"]),
            )
    }

    #[test]
    fn test_blocked_dependency_is_skipped() {
        let ws = workspace();
        let registry = registry();
        let api = MockApi::new();
        let reconciler = Reconciler::new(&registry, &api);
        let blocked: BTreeSet<String> = ["acme".to_string()].into();

        let outcome = apply_one(
            &ws,
            &reconciler,
            &blocked,
            "analytics",
            &RetryConfig::no_retry(),
            &CancelToken::new(),
        );
        assert!(matches!(outcome, Outcome::Skipped(reason) if reason.contains("'acme'")));
    }

    #[test]
    fn test_unresolved_reference_is_skipped() {
        let ws = workspace();
        let registry = registry();
        let api = MockApi::new();
        let reconciler = Reconciler::new(&registry, &api);

        let outcome = apply_one(
            &ws,
            &reconciler,
            &BTreeSet::new(),
            "analytics",
            &RetryConfig::no_retry(),
            &CancelToken::new(),
        );
        assert!(matches!(outcome, Outcome::Skipped(reason) if reason.contains("maintainer_id")));
    }

    #[test]
    fn test_waves_feed_references() {
        let mut ws = workspace();
        let registry = registry();
        let api = MockApi::new();
        let reconciler = Reconciler::new(&registry, &api);
        let cancel = CancelToken::new();
        let retry = RetryConfig::no_retry();
        let none = BTreeSet::new();

        let Outcome::Done(acme) = apply_one(&ws, &reconciler, &none, "acme", &retry, &cancel) else {
            panic!("maintainer should be created");
        };
        let acme_id = acme.observed.id_str().unwrap().to_string();
        ws.state.record("acme", acme.observed);

        let Outcome::Done(org) = apply_one(&ws, &reconciler, &none, "analytics", &retry, &cancel)
        else {
            panic!("organization should be created");
        };
        assert!(org.is_ok());
        assert_eq!(
            org.observed.fields.get("maintainer_id"),
            Some(&reconcile::Value::from(acme_id))
        );
    }
}
