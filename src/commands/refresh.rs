use super::{DEFAULT_JOBS, Workspace, bail_on_failures, report};
use crate::Context;
use crate::executor::{self, ExecuteSummary, Outcome};
use crate::retry::{RetryConfig, with_retry};
use crate::ui;
use anyhow::{Result, bail};
use reconcile::{CancelToken, Reconciler};

pub fn run(ctx: &Context, target: Option<&str>) -> Result<()> {
    let mut ws = Workspace::open_lenient(ctx)?;
    let names: Vec<String> = match target {
        Some(name) => {
            if ws.state.get(name).is_none() {
                bail!("'{name}' is not recorded in state");
            }
            vec![name.to_string()]
        }
        None => ws.state.resources.keys().cloned().collect(),
    };
    if names.is_empty() {
        ui::info("No resources in state");
        return Ok(());
    }

    let client = ws.client()?;
    let reconciler = Reconciler::new(kbcapi::registry(), &client);
    let cancel = CancelToken::new();
    let retry = RetryConfig::default();

    ui::header("Refresh");
    let outcomes = {
        let state = &ws.state;
        executor::run_parallel(&names, DEFAULT_JOBS, |name| match state.get(name) {
            Some(prior) => Outcome::from_result(with_retry(&retry, name, || {
                reconciler.refresh(prior, &cancel)
            })),
            None => Outcome::Skipped("not in state".to_string()),
        })?
    };

    let mut summary = ExecuteSummary::default();
    for (name, outcome) in outcomes {
        report(&name, &outcome);
        summary.add(&outcome);
        if let Outcome::Done(result) = outcome {
            ws.state.record(&name, result.observed);
        }
    }
    ws.save()?;

    executor::print_summary(&summary, "Refresh");
    bail_on_failures(summary.failed, "Refresh")
}
