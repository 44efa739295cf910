//! Progress message templates.
//!
//! Supports `{{variable_name}}` syntax. Unknown variables are left as-is.

use std::collections::HashMap;

use serde_json::Value;

/// Expand `{{variable_name}}` patterns in a template string.
///
/// Each `{{name}}` is looked up in `vars`. Unknown names, names containing
/// whitespace, and unclosed `{{` are emitted literally.
#[must_use]
#[allow(clippy::implicit_hasher)]
pub fn expand_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            // No closing braces anywhere: the remainder is literal
            out.push_str(&rest[open..]);
            return out;
        };

        let name = &after_open[..close];
        if name.is_empty() || name.contains(char::is_whitespace) {
            out.push_str("{{");
            rest = after_open;
            continue;
        }

        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

/// Variables available to a stage's progress template.
///
/// Top-level string fields of the session input are exposed under their own
/// names; the built-ins `stage`, `step` and `total` override them.
#[must_use]
pub fn stage_vars(input: &Value, stage: &str, step: usize, total: usize) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = input
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    vars.insert("stage".to_string(), stage.to_string());
    vars.insert("step".to_string(), step.to_string());
    vars.insert("total".to_string(), total.to_string());
    vars
}
