use colored::Colorize;
use reconcile::{
    Action, CapabilityDescriptor, ChangeKind, Decision, DriftItem, DriftKind, DriftReport,
    ObservedState, Plan, ReconcileError, ReconciliationResult, Severity, Verb, secret,
};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

// ============================================================================
// Plans and results
// ============================================================================

fn decision_symbol(decision: Decision) -> String {
    match decision {
        Decision::Create => "+".green().to_string(),
        Decision::Update => "~".yellow().to_string(),
        Decision::Replace => "±".red().to_string(),
        Decision::NoOp => "=".dimmed().to_string(),
    }
}

/// One resource of a plan, with its field changes.
pub fn print_plan(name: &str, resource_type: &str, plan: &Plan, unknown: &[String]) {
    let id = plan
        .observed
        .id_str()
        .map_or_else(String::new, |id| format!(" ({id})"));
    println!(
        "  {} {} {}{}  {}",
        decision_symbol(plan.decision),
        name.bold(),
        resource_type.dimmed(),
        id.dimmed(),
        plan.decision.to_string().dimmed()
    );

    for change in plan.change_set.actionable() {
        let marker = match change.kind {
            ChangeKind::ForcesReplace => "!".red(),
            _ => "~".yellow(),
        };
        let from = match (&change.from, change.sensitive) {
            (_, true) => secret::REDACTED.to_string(),
            (Some(value), false) => value.to_string(),
            (None, false) => "(none)".to_string(),
        };
        let to = if change.sensitive {
            secret::REDACTED.to_string()
        } else {
            change.to.to_string()
        };
        println!(
            "      {marker} {}: {} → {}{}",
            change.field,
            from.dimmed(),
            to,
            if change.kind == ChangeKind::ForcesReplace {
                " (forces replacement)".red().to_string()
            } else {
                String::new()
            }
        );
    }
    for field in unknown {
        println!("      {} {field}: {}", "~".yellow(), "(known after apply)".dimmed());
    }
    print_drift(&non_change_items(&plan.drift));
    print_errors(&plan.errors);
}

fn non_change_items(drift: &DriftReport) -> DriftReport {
    let mut filtered = DriftReport::default();
    for item in drift.items() {
        let pending = matches!(
            item.kind,
            DriftKind::Changed {
                change: ChangeKind::UpdateInPlace | ChangeKind::ForcesReplace | ChangeKind::Unchanged
            }
        );
        if !pending {
            filtered.push(item.clone());
        }
    }
    filtered
}

fn drift_line(item: &DriftItem) -> String {
    match (item.severity, item.kind) {
        (Severity::Warning, DriftKind::Unsupported { .. }) => {
            format!("      {} {item}", "⚠".yellow())
        }
        (Severity::Warning, _) => format!("      {} {item}", "≠".yellow()),
        (Severity::Info, _) => format!("      {} {}", "ℹ".blue(), item.to_string().dimmed()),
    }
}

/// Drift items under a resource line.
pub fn print_drift(drift: &DriftReport) {
    for item in drift.items() {
        println!("{}", drift_line(item));
    }
}

pub fn print_errors(errors: &[ReconcileError]) {
    for err in errors {
        eprintln!("      {} {err}", "✗".red());
        eprintln!("        {}", err.kind.advice().dimmed());
    }
}

/// Outcome line for one resource after apply, destroy or refresh.
pub fn print_result(name: &str, result: &ReconciliationResult) {
    let symbol = if !result.is_ok() {
        "✗".red()
    } else {
        match result.action {
            Action::NoOp | Action::Refreshed => "=".dimmed(),
            Action::Created | Action::Imported => "+".green(),
            Action::Updated => "~".yellow(),
            Action::Replaced => "±".yellow(),
            Action::Deleted => "-".red(),
            Action::Abandoned | Action::Consumed | Action::Vanished => "⚠".yellow(),
        }
    };
    let id = result
        .observed
        .id_str()
        .map_or_else(String::new, |id| format!(" ({id})"));
    println!(
        "  {symbol} {}{}  {}",
        name.bold(),
        id.dimmed(),
        result.action.to_string().dimmed()
    );
    print_drift(&result.drift);
    print_errors(&result.errors);
}

/// Recorded state of one resource, secrets and sensitive values redacted.
pub fn print_observed(name: &str, observed: &ObservedState, caps: &CapabilityDescriptor) {
    section(name);
    kv("type", &observed.resource_type);
    kv("status", &observed.status.to_string());
    if let Some(id) = observed.id_str() {
        kv("id", id);
    }
    for (field, value) in field_rows(observed, caps) {
        kv(&field, &value);
    }
}

/// Displayable field rows. Secret values never appear, only their names.
fn field_rows(observed: &ObservedState, caps: &CapabilityDescriptor) -> Vec<(String, String)> {
    let redacted = secret::redact_for_diff(caps, observed);
    let mut rows: Vec<(String, String)> = redacted
        .fields
        .iter()
        .map(|(field, value)| (field.clone(), secret::display_value(caps, field, value)))
        .collect();
    rows.extend(
        observed
            .secrets
            .names()
            .map(|field| (field.to_string(), secret::REDACTED.to_string())),
    );
    rows
}

/// Capability matrix of every registered type.
pub fn print_capabilities<'a>(descriptors: impl Iterator<Item = &'a CapabilityDescriptor>) {
    header("Resource types");
    println!(
        "  {:<26} {:^3} {:^3} {:^3} {:^3} {:^3}  {}",
        "type".dimmed(),
        "C".dimmed(),
        "R".dimmed(),
        "U".dimmed(),
        "D".dimmed(),
        "I".dimmed(),
        "notes".dimmed()
    );
    for caps in descriptors {
        let mark = |verb: Verb| {
            if caps.supports(verb) {
                "✓".green().to_string()
            } else {
                "–".dimmed().to_string()
            }
        };
        let mut notes = Vec::new();
        let immutable: Vec<_> = caps.immutable_fields().collect();
        if !immutable.is_empty() {
            notes.push(format!("immutable: {}", immutable.join(", ")));
        }
        let secrets: Vec<_> = caps.secret_once_fields().collect();
        if !secrets.is_empty() {
            notes.push(format!("one-time: {}", secrets.join(", ")));
        }
        if caps.shape().arity() > 1 {
            notes.push(format!("id: {} components", caps.shape().arity()));
        }
        println!(
            "  {:<26} {:^3} {:^3} {:^3} {:^3} {:^3}  {}",
            caps.resource_type(),
            mark(Verb::Create),
            mark(Verb::Read),
            mark(Verb::Update),
            mark(Verb::Delete),
            mark(Verb::Import),
            notes.join("; ").dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: DriftKind, severity: Severity) -> DriftItem {
        DriftItem {
            field: Some("name".to_string()),
            kind,
            severity,
            message: "x".to_string(),
        }
    }

    #[test]
    fn test_pending_changes_are_not_repeated_as_drift() {
        let mut drift = DriftReport::default();
        drift.push(item(
            DriftKind::Changed {
                change: ChangeKind::UpdateInPlace,
            },
            Severity::Info,
        ));
        drift.push(item(
            DriftKind::Changed {
                change: ChangeKind::Ignored,
            },
            Severity::Warning,
        ));
        drift.push(item(DriftKind::Unsupported { verb: Verb::Update }, Severity::Warning));
        drift.push_notice(None, "note");

        let filtered = non_change_items(&drift);
        assert_eq!(filtered.len(), 3);
        assert!(filtered.items().iter().all(|i| !matches!(
            i.kind,
            DriftKind::Changed {
                change: ChangeKind::UpdateInPlace
            }
        )));
    }

    #[test]
    fn test_secret_values_are_never_displayed() {
        let caps = CapabilityDescriptor::new("project")
            .secret_once(["storage_token"])
            .sensitive(["password"]);
        let mut observed = ObservedState::present(
            "project",
            reconcile::ExternalId::new("12"),
            reconcile::fields! {
                "name" => "Sales",
                "password" => "hunter2",
                "storage_token" => "12-leaked",
            },
        );
        observed.secrets.insert("storage_token", "12-secret");

        let rows = field_rows(&observed, &caps);
        assert!(rows.contains(&("name".to_string(), "Sales".to_string())));
        assert!(rows.contains(&("password".to_string(), secret::REDACTED.to_string())));
        assert!(rows.contains(&("storage_token".to_string(), secret::REDACTED.to_string())));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|(_, value)| !value.contains("12-")));
    }

    #[test]
    fn test_drift_line_contains_message() {
        colored::control::set_override(false);
        let line = drift_line(&item(DriftKind::Unsupported { verb: Verb::Delete }, Severity::Warning));
        assert!(line.contains("name: x"));
        assert!(line.contains('⚠'));
    }
}
