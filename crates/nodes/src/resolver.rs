//! Shared `{{path}}` resolver over a [`ContextSnapshot`].
//!
//! Every handler that interpolates configuration goes through this module
//! instead of rolling its own lookup. The grammar is fixed:
//!
//! - `inputs.<path>`       — workflow inputs
//! - `variables.<path>`    — workflow variables (`var.` is an alias)
//! - `loop.<path>`         — innermost loop scope (`loopId`, `index`, `item`, `total`)
//! - `parallel.<path>`     — innermost parallel scope (`parallelId`, `branchIndex`)
//! - `<nodeId>.<path>`     — a resolved node's output
//!
//! Dotted segments select object fields; a numeric segment indexes an array.
//! The resolver never executes code.

use serde_json::Value;

use crate::traits::ContextSnapshot;

/// Look up a dotted path in the snapshot. Returns `None` when any segment
/// fails to resolve.
pub fn resolve_path(snapshot: &ContextSnapshot, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?.trim();
    if root.is_empty() {
        return None;
    }

    let base: Value = match root {
        "inputs" => Value::Object(snapshot.inputs.clone()),
        "variables" | "var" => Value::Object(snapshot.variables.clone()),
        "loop" => serde_json::to_value(snapshot.loop_scope.as_ref()?).ok()?,
        "parallel" => serde_json::to_value(snapshot.parallel_scope.as_ref()?).ok()?,
        node_id => Value::Object(snapshot.node_outputs.get(node_id)?.clone()),
    };

    let mut current = base;
    for segment in segments {
        let segment = segment.trim();
        current = match &current {
            Value::Object(map) => map.get(segment)?.clone(),
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?.clone()
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Interpolate every `{{…}}` placeholder in `template`.
///
/// A string that is exactly one placeholder resolves to the referenced
/// value with its type preserved (a missing path yields `null`). Mixed
/// templates concatenate; missing paths interpolate as the empty string.
pub fn resolve_template(snapshot: &ContextSnapshot, template: &str) -> Value {
    let trimmed = template.trim();
    if let Some(path) = single_placeholder(trimmed) {
        return resolve_path(snapshot, path).unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                if let Some(value) = resolve_path(snapshot, path) {
                    out.push_str(&display(&value));
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder: keep the text literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Deep-resolve a config value: strings are treated as templates, arrays and
/// objects are walked recursively, everything else passes through.
pub fn resolve_value(snapshot: &ContextSnapshot, value: &Value) -> Value {
    match value {
        Value::String(s) => resolve_template(snapshot, s),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(snapshot, v)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(snapshot, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// If the whole string is a single `{{…}}` placeholder, return its path.
fn single_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LoopScope;
    use serde_json::json;

    fn snapshot() -> ContextSnapshot {
        let mut snap = ContextSnapshot::default();
        snap.inputs = json!({ "x": 2, "user": { "name": "ada" } })
            .as_object()
            .unwrap()
            .clone();
        snap.variables = json!({ "retries": 3 }).as_object().unwrap().clone();
        snap.node_outputs.insert(
            "fetch".into(),
            json!({ "items": [10, 20, 30], "ok": true })
                .as_object()
                .unwrap()
                .clone(),
        );
        snap.loop_scope = Some(LoopScope {
            loop_id: "loop_1".into(),
            index: 1,
            item: json!("beta"),
            total: Some(3),
        });
        snap
    }

    #[test]
    fn resolves_input_and_variable_roots() {
        let snap = snapshot();
        assert_eq!(resolve_path(&snap, "inputs.x"), Some(json!(2)));
        assert_eq!(resolve_path(&snap, "inputs.user.name"), Some(json!("ada")));
        assert_eq!(resolve_path(&snap, "variables.retries"), Some(json!(3)));
        assert_eq!(resolve_path(&snap, "var.retries"), Some(json!(3)));
    }

    #[test]
    fn resolves_node_outputs_and_array_indices() {
        let snap = snapshot();
        assert_eq!(resolve_path(&snap, "fetch.items.1"), Some(json!(20)));
        assert_eq!(resolve_path(&snap, "fetch.ok"), Some(json!(true)));
        assert_eq!(resolve_path(&snap, "fetch.items.9"), None);
        assert_eq!(resolve_path(&snap, "missing.field"), None);
    }

    #[test]
    fn resolves_loop_scope() {
        let snap = snapshot();
        assert_eq!(resolve_path(&snap, "loop.index"), Some(json!(1)));
        assert_eq!(resolve_path(&snap, "loop.item"), Some(json!("beta")));
        assert_eq!(resolve_path(&snap, "parallel.branchIndex"), None);
    }

    #[test]
    fn single_placeholder_keeps_type() {
        let snap = snapshot();
        assert_eq!(resolve_template(&snap, "{{inputs.x}}"), json!(2));
        assert_eq!(resolve_template(&snap, "{{ fetch.items }}"), json!([10, 20, 30]));
        assert_eq!(resolve_template(&snap, "{{nope.nope}}"), Value::Null);
    }

    #[test]
    fn mixed_template_concatenates() {
        let snap = snapshot();
        assert_eq!(
            resolve_template(&snap, "x={{inputs.x}}, name={{inputs.user.name}}"),
            json!("x=2, name=ada")
        );
        // Missing paths interpolate as the empty string.
        assert_eq!(resolve_template(&snap, "v={{ghost.field}}!"), json!("v=!"));
    }

    #[test]
    fn deep_resolution_walks_arrays_and_objects() {
        let snap = snapshot();
        let resolved = resolve_value(
            &snap,
            &json!({ "a": "{{inputs.x}}", "b": ["{{variables.retries}}", 7] }),
        );
        assert_eq!(resolved, json!({ "a": 2, "b": [3, 7] }));
    }
}
