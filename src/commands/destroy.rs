use super::{DEFAULT_JOBS, Workspace, bail_on_failures, report};
use crate::Context;
use crate::cli::DestroyArgs;
use crate::executor::{self, ExecuteSummary, Outcome};
use crate::retry::{RetryConfig, with_retry};
use crate::ui;
use anyhow::{Result, bail};
use colored::Colorize;
use reconcile::{CancelToken, Reconciler, Verb};
use std::collections::BTreeMap;

/// Teardown position of a resource type: children before their parents.
fn teardown_rank(resource_type: &str) -> u8 {
    match resource_type {
        "project" => 1,
        "organization" => 2,
        "maintainer" => 3,
        _ => 0,
    }
}

/// Group `names` into waves that can each be deleted in parallel.
pub fn teardown_waves(ws: &Workspace, names: &[String]) -> Vec<Vec<String>> {
    let mut by_rank: BTreeMap<u8, Vec<String>> = BTreeMap::new();
    for name in names {
        let rank = ws
            .state
            .get(name)
            .map_or(0, |observed| teardown_rank(&observed.resource_type));
        by_rank.entry(rank).or_default().push(name.clone());
    }
    by_rank.into_values().collect()
}

/// Destroy each wave in turn, recording outcomes and saving state after
/// every wave.
pub fn destroy_waves(
    ws: &mut Workspace,
    reconciler: &Reconciler<'_>,
    waves: &[Vec<String>],
    jobs: usize,
    cancel: &CancelToken,
    summary: &mut ExecuteSummary,
) -> Result<()> {
    let retry = RetryConfig::default();
    for wave in waves {
        let outcomes = {
            let state = &ws.state;
            executor::run_parallel(wave, jobs, |name| match state.get(name) {
                Some(prior) => Outcome::from_result(with_retry(&retry, name, || {
                    reconciler.destroy(prior, cancel)
                })),
                None => Outcome::Skipped("not in state".to_string()),
            })?
        };

        for (name, outcome) in outcomes {
            report(&name, &outcome);
            summary.add(&outcome);
            if let Outcome::Done(result) = outcome {
                ws.state.record(&name, result.observed);
            }
        }
        ws.save()?;
    }
    Ok(())
}

pub fn run(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let mut ws = Workspace::open_lenient(ctx)?;
    let names: Vec<String> = match args.target.as_deref() {
        Some(name) => {
            if ws.state.get(name).is_none() {
                bail!("'{name}' is not recorded in state");
            }
            vec![name.to_string()]
        }
        None => ws.state.resources.keys().cloned().collect(),
    };
    if names.is_empty() {
        ui::info("Nothing to destroy");
        return Ok(());
    }

    let waves = teardown_waves(&ws, &names);
    let registry = kbcapi::registry();
    ui::header("Destroy");
    for name in waves.iter().flatten() {
        let Some(observed) = ws.state.get(name) else {
            continue;
        };
        let note = match registry.capabilities_for(&observed.resource_type) {
            Ok(caps) if !caps.supports(Verb::Delete) => "removed from state only".yellow().to_string(),
            _ => String::new(),
        };
        println!(
            "  {} {} {} {}  {note}",
            "-".red(),
            name.bold(),
            observed.resource_type.dimmed(),
            observed.id_str().unwrap_or("").dimmed()
        );
    }
    println!();

    if !args.yes && !executor::confirm_proceed("Destroy these resources?")? {
        ui::info("Cancelled");
        return Ok(());
    }

    let client = ws.client()?;
    let reconciler = Reconciler::new(registry, &client);
    let cancel = CancelToken::new();
    let mut summary = ExecuteSummary::default();
    destroy_waves(&mut ws, &reconciler, &waves, DEFAULT_JOBS, &cancel, &mut summary)?;

    executor::print_summary(&summary, "Destroy");
    bail_on_failures(summary.failed, "Destroy")
}
