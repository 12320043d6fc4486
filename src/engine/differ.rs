//! Change and state display

use colored::Colorize;
use declarative::diff::ENSURE;
use declarative::{
    ChangeEvent, CollectEvents, EventKind, EventSink, PropertyMap, ResourceStatus, Status, Value,
};

/// Event sink printing each change as it happens
///
/// Events are also kept for the JSON report. With `echo` off nothing is
/// printed except failures.
pub struct ConsoleEvents {
    echo: bool,
    collected: CollectEvents,
}

impl ConsoleEvents {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            collected: CollectEvents::new(),
        }
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.collected.events
    }
}

impl EventSink for ConsoleEvents {
    fn on_event(&mut self, event: &ChangeEvent) {
        self.collected.on_event(event);
        if !self.echo {
            return;
        }
        let symbol = match event.kind {
            EventKind::Change => "✓".green(),
            EventKind::Noop => "~".yellow(),
            EventKind::Refresh => "↻".cyan(),
            EventKind::Failure => "✗".red(),
        };
        println!(
            "  {} {}: {}",
            symbol,
            event.resource.to_string().bold(),
            event.message
        );
    }

    fn on_resource_complete(&mut self, status: &ResourceStatus) {
        match status.status {
            Status::Failed => {
                if let Some(error) = &status.error {
                    eprintln!(
                        "  {} {}: {}",
                        "✗".red(),
                        status.resource.to_string().bold(),
                        error.message
                    );
                }
            }
            Status::Skipped if self.echo => {
                println!(
                    "  {} {}: skipped ({})",
                    "⊘".dimmed(),
                    status.resource,
                    status.skip_reason.as_deref().unwrap_or("unknown reason")
                );
            }
            _ => {}
        }
    }
}

/// Render a resource's state in catalog-like syntax
///
/// ```text
/// user { 'bob':
///   ensure => 'present',
///   groups => ['admins', 'staff'],
/// }
/// ```
pub fn render_state(type_name: &str, title: &str, state: &PropertyMap) -> String {
    let mut props: Vec<(&String, &Value)> = state.iter().collect();
    // ensure first, the rest alphabetically
    props.sort_by_key(|(name, _)| (name.as_str() != ENSURE, name.as_str()));
    let width = props.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    let mut out = format!("{type_name} {{ '{}':\n", escape(title));
    for (name, value) in props {
        let rendered = match value {
            Value::Scalar(s) => format!("'{}'", escape(s)),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(|i| format!("'{}'", escape(i))).collect();
                format!("[{}]", items.join(", "))
            }
        };
        out.push_str(&format!("  {name:<width$} => {rendered},\n"));
    }
    out.push('}');
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
