use crate::Context;
use crate::config::expand_path;
use crate::state::StateFile;
use crate::ui;
use anyhow::{Result, bail};

pub fn run(ctx: &Context, name: Option<&str>) -> Result<()> {
    let state = StateFile::load(&expand_path(&ctx.state))?;
    let entries: Vec<_> = match name {
        Some(name) => match state.resources.get_key_value(name) {
            Some(entry) => vec![entry],
            None => bail!("'{name}' is not recorded in state"),
        },
        None => state.resources.iter().collect(),
    };
    if entries.is_empty() {
        ui::info("No resources in state");
        return Ok(());
    }

    let registry = kbcapi::registry();
    for (name, observed) in entries {
        match registry.capabilities_for(&observed.resource_type) {
            Ok(caps) => ui::print_observed(name, observed, caps),
            Err(err) => ui::warn(&format!("{name}: {err}")),
        }
    }
    if !ctx.quiet {
        println!();
        ui::dim(&format!("Last updated {}", state.last_updated.to_rfc3339()));
    }
    Ok(())
}

pub fn types() {
    ui::print_capabilities(kbcapi::registry().descriptors());
}
