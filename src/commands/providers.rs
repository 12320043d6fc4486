//! `converge providers`: resource types and provider suitability

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{HostFacts, ProviderEntry, ResourceType};

use crate::Context;
use crate::ui;

/// One line describing a provider on this host
fn describe(entry: &ProviderEntry, facts: &HostFacts, selected: bool) -> String {
    let unmet = entry.unmet(facts);
    let features: Vec<String> = entry.features.iter().map(ToString::to_string).collect();
    let features = if features.is_empty() {
        String::new()
    } else {
        format!(" [{}]", features.join(", "))
    };

    if !unmet.is_empty() {
        return format!(
            "{} {}{} {}",
            "✗".red(),
            entry.name,
            features.dimmed(),
            format!("({})", unmet.join("; ")).dimmed()
        );
    }
    let marker = if selected {
        " (default)".bold().to_string()
    } else {
        String::new()
    };
    format!("{} {}{}{}", "✓".green(), entry.name, marker, features.dimmed())
}

pub fn run(ctx: &Context, filter: Option<&str>) -> Result<()> {
    let (registry, facts) = super::host(ctx);
    let types: Vec<&ResourceType> = registry
        .types()
        .iter()
        .filter(|t| filter.is_none_or(|f| t.name.eq_ignore_ascii_case(f)))
        .collect();
    if types.is_empty() {
        bail!("unknown resource type '{}'", filter.unwrap_or_default());
    }

    ui::header("Providers");
    ui::kv("os", &format!("{} {}", facts.os, facts.arch));
    ui::kv("family", &facts.family.to_string());
    ui::kv(
        "private user groups",
        if facts.user_private_groups { "yes" } else { "no" },
    );

    for ty in types {
        ui::section(ty.name);
        let configured = ctx.config.providers.get(ty.name).map(String::as_str);
        let selected = match ty.select_provider(&facts, configured) {
            Ok(entry) => Some(entry.name),
            Err(e) => {
                ui::warn(&e.to_string());
                None
            }
        };
        for entry in &ty.providers {
            println!("  {}", describe(entry, &facts, selected == Some(entry.name)));
        }
    }
    Ok(())
}
