use super::{Unsettled, Workspace, bail_on_failures};
use crate::Context;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use reconcile::{CancelToken, Plan, Reconciler};

/// Planned outcome for one manifest resource.
pub struct Planned {
    pub name: String,
    pub resource_type: String,
    pub plan: reconcile::Result<Plan>,
    /// Fields whose references are only known after apply
    pub unknown: Vec<String>,
}

impl Planned {
    /// Whether apply has something to do for this resource.
    pub fn is_pending(&self) -> bool {
        match &self.plan {
            Ok(plan) => plan.errors.is_empty() && (plan.has_changes() || !self.unknown.is_empty()),
            Err(_) => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        match &self.plan {
            Ok(plan) => !plan.errors.is_empty(),
            Err(_) => true,
        }
    }
}

/// Plan every resource of `waves` in order.
///
/// A reference to a value an earlier resource is about to change is left
/// unknown, which makes its dependent pending.
pub fn plan_all(
    ws: &Workspace,
    reconciler: &Reconciler<'_>,
    waves: &[Vec<String>],
    cancel: &CancelToken,
) -> Result<Vec<Planned>> {
    let mut planned = Vec::new();
    let mut unsettled = Unsettled::default();
    for name in waves.iter().flatten() {
        let (desired, resolved) = ws.desired(name, &unsettled)?;
        log::debug!("{name}: planning {}", desired.resource_type);
        let plan = reconciler.plan(&desired, ws.state.get(name), cancel);
        if let Ok(plan) = &plan {
            unsettled.note(name, plan, &resolved.unknown);
        }
        planned.push(Planned {
            name: name.clone(),
            resource_type: desired.resource_type,
            plan,
            unknown: resolved.unknown,
        });
    }
    Ok(planned)
}

pub fn print_planned(planned: &Planned) {
    match &planned.plan {
        Ok(plan) => ui::print_plan(&planned.name, &planned.resource_type, plan, &planned.unknown),
        Err(err) => {
            ui::error(&format!("{}: {err}", planned.name));
            ui::dim(err.kind.advice());
        }
    }
}

/// Print resources that are in state but no longer in the manifest.
pub fn print_orphans(ws: &Workspace, orphans: &[String]) {
    for name in orphans {
        let Some(observed) = ws.state.get(name) else {
            continue;
        };
        let id = observed
            .id_str()
            .map_or_else(String::new, |id| format!(" ({id})"));
        println!(
            "  {} {} {}{}  {}",
            "-".red(),
            name.bold(),
            observed.resource_type.dimmed(),
            id.dimmed(),
            "not in manifest, will be destroyed".dimmed()
        );
    }
}

pub fn run(ctx: &Context, target: Option<&str>) -> Result<()> {
    let ws = Workspace::open(ctx)?;
    let client = ws.client()?;
    let reconciler = Reconciler::new(kbcapi::registry(), &client);
    let cancel = CancelToken::new();

    let waves = ws.manifest.waves(&ws.selected(target)?)?;
    ui::header("Plan");
    let planned = plan_all(&ws, &reconciler, &waves, &cancel)?;
    for entry in &planned {
        if ctx.quiet && !entry.is_pending() && !entry.is_failed() {
            continue;
        }
        print_planned(entry);
    }

    let orphans = if target.is_none() { ws.orphans() } else { Vec::new() };
    print_orphans(&ws, &orphans);

    let pending = planned.iter().filter(|p| p.is_pending()).count() + orphans.len();
    let failed = planned.iter().filter(|p| p.is_failed()).count();
    println!();
    if pending == 0 {
        ui::success("No changes. Remote resources match the manifest.");
    } else {
        ui::info(&format!("{pending} resource(s) to change. Run 'kbc-manage apply' to proceed."));
    }
    bail_on_failures(failed, "Plan")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manifest;
    use crate::state::StateFile;
    use reconcile::{
        CapabilityDescriptor, CapabilityRegistry, ChangeSet, Decision, DriftReport, ErrorKind,
        ExternalId, MockApi, ObservedState, ReconcileError, Verb, fields,
    };
    use std::path::PathBuf;

    fn planned(decision: Decision, unknown: &[&str], errors: Vec<ReconcileError>) -> Planned {
        Planned {
            name: "acme".to_string(),
            resource_type: "maintainer".to_string(),
            plan: Ok(Plan {
                decision,
                change_set: ChangeSet::default(),
                drift: DriftReport::default(),
                observed: ObservedState::absent("maintainer"),
                errors,
            }),
            unknown: unknown.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_noop_is_not_pending() {
        let entry = planned(Decision::NoOp, &[], Vec::new());
        assert!(!entry.is_pending());
        assert!(!entry.is_failed());
    }

    #[test]
    fn test_unknown_reference_is_pending() {
        assert!(planned(Decision::NoOp, &["maintainer_id"], Vec::new()).is_pending());
        assert!(planned(Decision::Create, &[], Vec::new()).is_pending());
    }

    #[test]
    fn test_plan_errors_block_apply() {
        let err = ReconcileError::new(ErrorKind::Unauthorized, "maintainer", Some("1"), "denied");
        let entry = planned(Decision::Update, &[], vec![err]);
        assert!(!entry.is_pending());
        assert!(entry.is_failed());
    }

    #[test]
    fn test_preflight_error_is_failed() {
        let entry = Planned {
            name: "x".to_string(),
            resource_type: "workspace".to_string(),
            plan: Err(ReconcileError::unknown_type("workspace")),
            unknown: Vec::new(),
        };
        assert!(entry.is_failed());
        assert!(!entry.is_pending());
    }

    #[test]
    fn test_replaced_parent_leaves_dependent_pending() {
        let manifest = Manifest::parse(
            r#"
[resources.analytics]
type = "organization"
fields = { name = "Analytics", maintainer_id = "4" }

[resources.sales]
type = "project"
fields = { name = "Sales", organization_id = "${analytics.id}" }
"#,
        )
        .unwrap();
        let org = fields! { "name" => "Analytics", "maintainer_id" => "3" };
        let project = fields! { "name" => "Sales", "organization_id" => "1" };

        let api = MockApi::new();
        api.insert("organization", "1", org.clone());
        api.insert("project", "2", project.clone());
        let mut state = StateFile::default();
        state.record(
            "analytics",
            ObservedState::present("organization", ExternalId::new("1"), org),
        );
        state.record(
            "sales",
            ObservedState::present("project", ExternalId::new("2"), project),
        );
        let ws = Workspace {
            manifest,
            state,
            state_path: PathBuf::from("kbc.state.json"),
        };

        let every = [Verb::Create, Verb::Read, Verb::Update, Verb::Delete, Verb::Import];
        let registry = CapabilityRegistry::new()
            .register(
                CapabilityDescriptor::new("organization")
                    .verbs(every)
                    .immutable(["maintainer_id"]),
            )
            .register(
                CapabilityDescriptor::new("project")
                    .verbs(every)
                    .immutable(["organization_id"]),
            );
        let reconciler = Reconciler::new(&registry, &api);
        let waves = vec![vec!["analytics".to_string()], vec!["sales".to_string()]];

        let planned = plan_all(&ws, &reconciler, &waves, &CancelToken::new()).unwrap();
        assert_eq!(planned[0].plan.as_ref().unwrap().decision, Decision::Replace);
        assert!(planned[1].is_pending());
        assert_eq!(planned[1].unknown, vec!["organization_id".to_string()]);
    }
}
