//! Table and JSON rendering of pipeline results.

use std::collections::BTreeMap;

use anyhow::Result;
use kube::core::DynamicObject;
use serde_json::{Value, json};

use tern_core::change::{ChangeSet, ResourceState};
use tern_core::diff::{FieldChange, compute_diff};
use tern_core::object::ObjectKey;
use tern_core::pipeline::PipelineResult;

use crate::OutputFormat;

pub(crate) fn print_result(result: &PipelineResult, format: OutputFormat) -> Result<()> {
    let rows: Vec<(&ObjectKey, ResourceState, Option<&str>)> = result
        .output_objects
        .iter()
        .map(|o| (&o.key, o.state, None))
        .collect();
    print_rows(&rows, format)
}

/// The outcome of a run that failed part way through applying.
pub(crate) fn print_changes(changes: &ChangeSet, format: OutputFormat) -> Result<()> {
    let rows: Vec<(&ObjectKey, ResourceState, Option<&str>)> = changes
        .iter()
        .map(|(key, change)| (key, change.status_state(), change.error.as_deref()))
        .collect();
    print_rows(&rows, format)
}

fn print_rows(rows: &[(&ObjectKey, ResourceState, Option<&str>)], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No objects.");
                return Ok(());
            }
            println!("{:<24} {:<32} {:<14} Message", "Kind", "Name", "State");
            println!("{}", "-".repeat(80));
            for (key, state, message) in rows {
                println!(
                    "{:<24} {:<32} {:<14} {}",
                    truncate(&key.kind, 24),
                    truncate(&qualified_name(key), 32),
                    state.as_str(),
                    message.unwrap_or("")
                );
            }
        }
        OutputFormat::Json => {
            let output: Vec<Value> = rows
                .iter()
                .map(|(key, state, message)| {
                    json!({
                        "apiVersion": key.api_version(),
                        "kind": key.kind,
                        "namespace": key.namespace(),
                        "name": key.name,
                        "state": state.as_str(),
                        "message": message,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Render each output object with the field changes a reconcile would make.
pub(crate) fn print_preview(result: &PipelineResult, format: OutputFormat) -> Result<()> {
    let inputs: BTreeMap<ObjectKey, &DynamicObject> = result
        .input_objects
        .iter()
        .filter_map(|obj| Some((ObjectKey::from_object(obj).ok()?, obj)))
        .collect();

    let previews: Vec<(&ObjectKey, ResourceState, Vec<FieldChange>)> = result
        .output_objects
        .iter()
        .map(|output| {
            let before = inputs.get(&output.key).copied();
            let diff = match output.state {
                ResourceState::Created | ResourceState::Updated => {
                    compute_diff(before, Some(&output.object))
                }
                ResourceState::Deleted => compute_diff(before.or(Some(&output.object)), None),
                _ => Vec::new(),
            };
            (&output.key, output.state, diff)
        })
        .collect();

    match format {
        OutputFormat::Table => {
            if previews.is_empty() {
                println!("No objects.");
            }
            for (key, state, diff) in &previews {
                println!("{} {} ({})", key.kind, qualified_name(key), state.as_str());
                for change in diff {
                    println!(
                        "    {}: {} -> {}",
                        change.path,
                        render(change.before.as_ref()),
                        render(change.after.as_ref())
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output: Vec<Value> = previews
                .iter()
                .map(|(key, state, diff)| {
                    json!({
                        "apiVersion": key.api_version(),
                        "kind": key.kind,
                        "namespace": key.namespace(),
                        "name": key.name,
                        "state": state.as_str(),
                        "diff": diff,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn qualified_name(key: &ObjectKey) -> String {
    match key.namespace() {
        Some(namespace) => format!("{namespace}/{}", key.name),
        None => key.name.clone(),
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
