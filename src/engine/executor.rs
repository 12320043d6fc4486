//! Transaction runner with console output and JSON reports

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::sync::atomic::AtomicBool;

use declarative::{
    ChangeEvent, HostFacts, LocalFileSource, PrivilegeContext, Registry, ResourceGraph,
    RunSummary, Transaction, TransactionOptions,
};

use super::differ::ConsoleEvents;

/// Options for one run
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Don't make changes, just report what would change
    pub noop: bool,
    /// Print a JSON report instead of progress
    pub json: bool,
    /// Only print failures
    pub quiet: bool,
}

/// Everything needed to run a graph
pub struct Runtime<'a> {
    pub registry: &'a Registry,
    pub facts: &'a HostFacts,
    pub privilege: &'a PrivilegeContext,
    pub stop: &'a AtomicBool,
}

/// Machine-readable outcome of a run
#[derive(Serialize)]
pub struct Report<'a> {
    pub noop: bool,
    pub facts: &'a HostFacts,
    pub summary: &'a RunSummary,
    pub events: &'a [ChangeEvent],
}

/// Apply the graph, printing progress and a summary
pub fn execute(
    graph: &ResourceGraph,
    runtime: &Runtime<'_>,
    opts: ExecuteOptions,
) -> Result<RunSummary> {
    let echo = !opts.json && !opts.quiet;
    if echo {
        println!();
        println!(
            "  {} Applying {} resources{}...",
            "→".cyan(),
            graph.len(),
            if opts.noop { " (noop)" } else { "" }
        );
    }
    log::debug!("{:?}, facts: {:?}", runtime.privilege, runtime.facts);

    let mut sink = ConsoleEvents::new(echo);
    let summary = Transaction::new(
        graph,
        runtime.registry,
        runtime.facts,
        runtime.privilege,
        &LocalFileSource,
    )
    .with_options(TransactionOptions { noop: opts.noop })
    .with_stop(runtime.stop)
    .run(&mut sink);

    if opts.json {
        let report = Report {
            noop: opts.noop,
            facts: runtime.facts,
            summary: &summary,
            events: sink.events(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !opts.quiet {
        print_summary(&summary, opts.noop);
    }

    Ok(summary)
}

/// Print final summary
pub fn print_summary(summary: &RunSummary, noop: bool) {
    println!();
    if summary.stopped {
        println!("  {} Run stopped before completion", "⚠".yellow().bold());
    } else if summary.is_success() {
        let message = if summary.changed == 0 && summary.pending == 0 {
            "Already in sync"
        } else if noop {
            "Noop run complete"
        } else {
            "Configuration applied successfully!"
        };
        println!("  {} {}", "✓".green().bold(), message);
    } else {
        println!(
            "  {} Configuration applied with errors",
            "⚠".yellow().bold()
        );
    }

    if summary.changed > 0 {
        println!("    • {} resources changed", summary.changed);
    }
    if summary.pending > 0 {
        println!("    • {} changes pending (noop)", summary.pending);
    }
    if summary.refreshed > 0 {
        println!("    • {} resources refreshed", summary.refreshed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
    println!("    • {} resources in total", summary.total());
}
