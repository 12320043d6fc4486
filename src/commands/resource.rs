//! `converge resource`: apply or show a single resource

use anyhow::{Result, bail};
use declarative::{
    Catalog, LocalFileSource, Registry, Resource, ResourceGraph, ResourceType, Value, inspect,
};

use crate::Context;
use crate::cli::ResourceArgs;
use crate::engine::{ExecuteOptions, Runtime, execute, render_state};
use crate::{signals, ui};

/// Build the resource described on the command line
fn build_resource(ty: &ResourceType, args: &ResourceArgs) -> Resource {
    let mut resource = Resource::new(ty.name, args.title.as_str());
    for (name, value) in &args.properties {
        resource = resource.with(name.as_str(), ty.coerce(name, Value::from(value.as_str())));
    }
    if let Some(provider) = &args.provider {
        resource = resource.with_provider(provider.as_str());
    }
    resource
}

fn lookup<'r>(registry: &'r Registry, type_name: &str) -> Result<&'r ResourceType> {
    match registry.get(&type_name.to_ascii_lowercase()) {
        Some(ty) => Ok(ty),
        None => {
            let known: Vec<&str> = registry.types().iter().map(|t| t.name).collect();
            bail!(
                "unknown resource type '{type_name}' (known: {})",
                known.join(", ")
            )
        }
    }
}

/// Returns the process exit code
pub fn run(ctx: &Context, args: ResourceArgs) -> Result<i32> {
    let (registry, facts) = super::host(ctx);
    let ty = lookup(&registry, &args.type_name)?;
    let resource = ctx.config.with_provider(build_resource(ty, &args));
    let privilege = super::claim_privilege()?;

    if resource.properties().is_empty() {
        let (provider, state) = inspect(&resource, &registry, &facts, &privilege, &LocalFileSource)?;
        log::info!("{} read with provider {provider}", resource.reference());
        println!("{}", render_state(ty.name, resource.title(), &state));
        return Ok(0);
    }

    let graph = ResourceGraph::build(Catalog::from_resources([resource.clone()])?, &registry)?;
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
            json: false,
            quiet: ctx.quiet,
        },
    )?;

    println!();
    match inspect(&resource, &registry, &facts, &privilege, &LocalFileSource) {
        Ok((_, state)) => println!("{}", render_state(ty.name, resource.title(), &state)),
        Err(e) => ui::warn(&format!("Could not read the resulting state: {e}")),
    }

    let detailed = args.run.detailed_exitcodes || ctx.config.detailed_exitcodes;
    Ok(summary.exit_status().code(detailed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RunFlags;
    use crate::provider;

    fn args(properties: &[(&str, &str)]) -> ResourceArgs {
        ResourceArgs {
            type_name: "User".to_string(),
            title: "bob".to_string(),
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            provider: Some("useradd".to_string()),
            run: RunFlags {
                noop: false,
                no_noop: false,
                detailed_exitcodes: false,
            },
        }
    }

    #[test]
    fn test_build_resource_coerces_lists() {
        let registry = provider::registry();
        let ty = lookup(&registry, "User").unwrap();
        let resource = build_resource(ty, &args(&[("ensure", "present"), ("groups", "a,b")]));

        assert_eq!(resource.type_name(), "user");
        assert_eq!(resource.get("groups"), Some(&Value::list(["a", "b"])));
        assert_eq!(resource.get_str("ensure"), Some("present"));
        assert_eq!(resource.meta().provider.as_deref(), Some("useradd"));
    }

    #[test]
    fn test_unknown_type_lists_known_types() {
        let registry = provider::registry();
        let err = lookup(&registry, "mailbox").unwrap_err();
        assert!(err.to_string().contains("known: file, group, user"));
    }
}
