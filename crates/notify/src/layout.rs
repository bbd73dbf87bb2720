//! Minijinja layouts for reshaping events before delivery.
//!
//! A layout is a YAML/JSON tree whose string leaves are templates. Each
//! leaf is rendered with the serialized event as context, so
//! `{{ involvedObject.name }}` or `{{ reason | lower }}` work as expected.
//! Non-string leaves are copied through unchanged.

use herald_core::EnrichedEvent;
use serde_json::Value;

use crate::traits::SinkError;

#[derive(Debug, Clone)]
pub struct Layout {
    tree: Value,
}

impl Layout {
    /// Build a layout, checking every template leaf parses.
    pub fn new(tree: Value) -> Result<Self, SinkError> {
        let env = build_env();
        let mut leaves = Vec::new();
        collect_templates(&tree, &mut leaves);
        for leaf in leaves {
            env.template_from_str(leaf)
                .map_err(|e| SinkError::Config(format!("invalid layout template {leaf:?}: {e}")))?;
        }
        Ok(Self { tree })
    }

    pub fn render(&self, event: &Value) -> Result<Value, SinkError> {
        let env = build_env();
        render_node(&env, &self.tree, event)
    }
}

/// Serialize an event for delivery, applying de-dotting and a layout.
pub fn encode(event: &EnrichedEvent, layout: Option<&Layout>, de_dot: bool) -> Result<Value, SinkError> {
    let value = if de_dot {
        event.de_dot().to_value()?
    } else {
        event.to_value()?
    };
    match layout {
        Some(layout) => layout.render(&value),
        None => Ok(value),
    }
}

fn build_env() -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();
    env.add_function("env", env_function);
    env
}

fn collect_templates<'a>(node: &'a Value, out: &mut Vec<&'a str>) {
    match node {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_templates(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_templates(item, out)),
        _ => {}
    }
}

fn render_node(env: &minijinja::Environment<'_>, node: &Value, ctx: &Value) -> Result<Value, SinkError> {
    Ok(match node {
        Value::String(template) => Value::String(
            env.render_str(template, ctx)
                .map_err(|e| SinkError::Template(e.to_string()))?,
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_node(env, item, ctx))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_node(env, v, ctx)?)))
                .collect::<Result<_, SinkError>>()?,
        ),
        other => other.clone(),
    })
}

/// Global function: read an environment variable by name.
///
/// Returns an empty string if not set.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}
