//! `converge apply`: apply a catalog file

use anyhow::{Context as _, Result};
use declarative::{Catalog, ResourceGraph};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{ExecuteOptions, Runtime, execute};
use crate::{signals, ui};

/// Returns the process exit code
pub fn run(ctx: &Context, args: ApplyArgs) -> Result<i32> {
    let (registry, facts) = super::host(ctx);
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("Failed to load catalog {}", args.catalog.display()))?;
    let catalog = ctx.config.apply_providers(catalog)?;
    let graph = ResourceGraph::build(catalog, &registry)?;
    let privilege = super::claim_privilege()?;

    if !args.json && !ctx.quiet {
        ui::header("converge apply");
        ui::kv("catalog", &args.catalog.display().to_string());
        ui::kv("host", &format!("{} {} ({})", facts.os, facts.arch, facts.family));
        ui::kv("resources", &graph.len().to_string());
        if !privilege.is_privileged() {
            ui::dim("not running as root: resources run as the current user");
        }
    }

    let runtime = Runtime {
        registry: &registry,
        facts: &facts,
        privilege: &privilege,
        stop: signals::install()?,
    };
    let summary = execute(
        &graph,
        &runtime,
        ExecuteOptions {
            noop: args.run.noop(ctx.config.noop),
            json: args.json,
            quiet: ctx.quiet,
        },
    )?;

    let detailed = args.run.detailed_exitcodes || ctx.config.detailed_exitcodes;
    Ok(summary.exit_status().code(detailed))
}
