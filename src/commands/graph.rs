//! `converge graph`: show application order and edges

use anyhow::{Context as _, Result};
use declarative::{Catalog, ResourceGraph};
use std::path::Path;

use crate::Context;
use crate::{provider, ui};

pub fn run(ctx: &Context, catalog: &Path) -> Result<()> {
    let registry = provider::registry();
    let loaded = Catalog::load(catalog)
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    let graph = ResourceGraph::build(ctx.config.apply_providers(loaded)?, &registry)?;

    ui::section("Order");
    for (position, &index) in graph.order().iter().enumerate() {
        println!("  {:>3}. {}", position + 1, graph.resource(index).reference());
    }

    ui::section("Edges");
    if graph.edges().is_empty() {
        ui::dim("(none)");
    }
    for edge in graph.edges() {
        println!("  {}", graph.describe(edge));
    }
    Ok(())
}
