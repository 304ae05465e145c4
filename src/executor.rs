//! Parallel execution of independent resources.

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use rayon::prelude::*;
use reconcile::{Action, ReconcileError, ReconciliationResult};
use std::sync::{Arc, Mutex};

/// What happened to one resource.
#[derive(Debug)]
pub enum Outcome {
    Done(ReconciliationResult),
    /// Refused before any remote call
    Rejected(ReconcileError),
    /// Not attempted, e.g. because a dependency failed
    Skipped(String),
}

impl Outcome {
    pub fn from_result(result: reconcile::Result<ReconciliationResult>) -> Self {
        match result {
            Ok(result) => Self::Done(result),
            Err(err) => Self::Rejected(err),
        }
    }

    pub fn is_failure(&self) -> bool {
        match self {
            Self::Done(result) => !result.is_ok(),
            Self::Rejected(_) => true,
            Self::Skipped(_) => false,
        }
    }
}

/// Counts per action across a run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub abandoned: usize,
    pub refreshed: usize,
    pub no_change: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted + self.abandoned
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Done(result) if !result.is_ok() => self.failed += 1,
            Outcome::Done(result) => match result.action {
                Action::Created | Action::Imported => self.created += 1,
                Action::Updated => self.updated += 1,
                Action::Replaced => self.replaced += 1,
                Action::Deleted => self.deleted += 1,
                Action::Abandoned | Action::Vanished | Action::Consumed => self.abandoned += 1,
                Action::Refreshed => self.refreshed += 1,
                Action::NoOp => self.no_change += 1,
            },
            Outcome::Rejected(_) => self.failed += 1,
            Outcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Run `job` for every name on a pool of `jobs` threads. Results come back
/// sorted by name.
pub fn run_parallel<F>(names: &[String], jobs: usize, job: F) -> Result<Vec<(String, Outcome)>>
where
    F: Fn(&str) -> Outcome + Sync,
{
    let results: Arc<Mutex<Vec<(String, Outcome)>>> = Arc::new(Mutex::new(Vec::new()));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("Failed to create reconcile thread pool")?;

    pool.install(|| {
        names.par_iter().for_each(|name| {
            log::debug!("{name}: started");
            let outcome = job(name);
            push_outcome(&results, (name.clone(), outcome));
        });
    });

    let mut collected = into_outcomes(results)?;
    collected.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(collected)
}

fn push_outcome(results: &Arc<Mutex<Vec<(String, Outcome)>>>, outcome: (String, Outcome)) {
    match results.lock() {
        Ok(mut locked) => locked.push(outcome),
        Err(poisoned) => poisoned.into_inner().push(outcome),
    }
}

fn into_outcomes(results: Arc<Mutex<Vec<(String, Outcome)>>>) -> Result<Vec<(String, Outcome)>> {
    let mutex = Arc::try_unwrap(results)
        .map_err(|_| anyhow::anyhow!("Failed to collect results: shared result state"))?;

    match mutex.into_inner() {
        Ok(collected) => Ok(collected),
        Err(poisoned) => Ok(poisoned.into_inner()),
    }
}

/// Confirm with user
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary, verb: &str) {
    println!();
    if summary.is_success() {
        println!("  {} {verb} complete", "✓".green().bold());
    } else {
        println!("  {} {verb} finished with errors", "⚠".yellow().bold());
    }

    let lines = [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.abandoned, "dropped from state only"),
        (summary.refreshed, "refreshed"),
        (summary.skipped, "skipped"),
    ];
    for (count, what) in lines {
        if count > 0 {
            println!("    • {count} {what}");
        }
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{DriftReport, ErrorKind, ObservedState};

    fn done(action: Action) -> Outcome {
        Outcome::Done(ReconciliationResult {
            action,
            observed: ObservedState::absent("maintainer"),
            drift: DriftReport::default(),
            errors: Vec::new(),
        })
    }

    #[test]
    fn test_run_parallel_sorts_by_name() {
        let names: Vec<String> = ["c", "a", "b"].iter().map(ToString::to_string).collect();
        let results = run_parallel(&names, 3, |name| Outcome::Skipped(name.to_uppercase())).unwrap();
        let order: Vec<_> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(matches!(&results[0].1, Outcome::Skipped(s) if s == "A"));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add(&done(Action::Created));
        summary.add(&done(Action::Deleted));
        summary.add(&done(Action::NoOp));
        summary.add(&Outcome::Rejected(ReconcileError::unknown_type("workspace")));
        summary.add(&Outcome::Skipped("dependency failed".to_string()));

        assert_eq!(summary.created, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.no_change, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_changes(), 2);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_failed_result_counts_as_failure() {
        let mut result = ReconciliationResult {
            action: Action::NoOp,
            observed: ObservedState::absent("maintainer"),
            drift: DriftReport::default(),
            errors: Vec::new(),
        };
        result.errors.push(ReconcileError::new(
            ErrorKind::Conflict,
            "maintainer",
            None,
            "name taken",
        ));
        let outcome = Outcome::Done(result);
        assert!(outcome.is_failure());

        let mut summary = ExecuteSummary::default();
        summary.add(&outcome);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_push_outcome_handles_poisoned_mutex() {
        let results: Arc<Mutex<Vec<(String, Outcome)>>> = Arc::new(Mutex::new(Vec::new()));
        let poisoned = Arc::clone(&results);

        let _ = std::thread::spawn(move || {
            let _guard = poisoned.lock().expect("lock should succeed before poisoning");
            panic!("intentional poison");
        })
        .join();

        push_outcome(&results, ("a".to_string(), done(Action::NoOp)));
        let collected = into_outcomes(results).expect("poisoned mutex should be recovered");
        assert_eq!(collected.len(), 1);
    }
}
