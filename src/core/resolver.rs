//! PV-004: Template resolution.
//!
//! Resolves `{{params.key}}`, `{{settings.prefix}}`, `{{settings.profile}}`
//! and `{{env.NAME}}` in step targets, string params, and check operands.
//! Everything is resolved at load time: an unknown variable fails the whole
//! list before any step runs.

use super::types::*;
use indexmap::IndexMap;

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &IndexMap<String, serde_yaml_ng::Value>,
    settings: &Settings,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if let Some(field) = key.strip_prefix("settings.") {
            match field {
                "prefix" => settings.prefix.clone(),
                "profile" => settings.profile.clone(),
                "package_manager" => settings.package_manager.to_string(),
                _ => return Err(format!("unknown settings field: {}", field)),
            }
        } else if let Some(var) = key.strip_prefix("env.") {
            std::env::var(var).map_err(|_| format!("environment variable {} is not set", var))?
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in settings (params and env only).
fn resolve_settings(
    settings: &Settings,
    params: &IndexMap<String, serde_yaml_ng::Value>,
) -> Result<Settings, String> {
    // Settings may not reference themselves
    let bare = Settings::default();
    let mut resolved = settings.clone();
    resolved.prefix = resolve_template(&settings.prefix, params, &bare)
        .map_err(|e| format!("settings.prefix: {}", e))?;
    resolved.profile = resolve_template(&settings.profile, params, &bare)
        .map_err(|e| format!("settings.profile: {}", e))?;
    let optional = |field: &str, value: &Option<String>| -> Result<Option<String>, String> {
        value
            .as_deref()
            .map(|v| resolve_template(v, params, &bare))
            .transpose()
            .map_err(|e| format!("settings.{}: {}", field, e))
    };
    resolved.work_dir = optional("work_dir", &settings.work_dir)?;
    resolved.install_command = optional("install_command", &settings.install_command)?;
    resolved.query_command = optional("query_command", &settings.query_command)?;
    Ok(resolved)
}

/// Resolve all templates in one step.
pub fn resolve_step(
    step: &Step,
    params: &IndexMap<String, serde_yaml_ng::Value>,
    settings: &Settings,
) -> Result<Step, String> {
    let id = step.id();
    let ctx = |e: String| format!("step '{}': {}", id, e);

    let mut resolved = step.clone();
    resolved.target = resolve_template(&step.target, params, settings).map_err(ctx)?;

    for (key, value) in resolved.params.iter_mut() {
        if let serde_yaml_ng::Value::String(s) = value {
            *s = resolve_template(s, params, settings)
                .map_err(|e| format!("step '{}' param '{}': {}", id, key, e))?;
        }
    }

    resolved.check = step
        .check
        .map_operands(&mut |s: &str| resolve_template(s, params, settings))
        .map_err(|e| format!("step '{}' check: {}", id, e))?;

    Ok(resolved)
}

/// Resolve every template in a list. Step order and ids are preserved.
pub fn resolve_list(list: &StepList) -> Result<StepList, String> {
    let settings = resolve_settings(&list.settings, &list.params)?;
    let steps = list
        .steps
        .iter()
        .map(|s| resolve_step(s, &list.params, &settings))
        .collect::<Result<Vec<_>, _>>()?;

    let mut resolved = list.clone();
    resolved.settings = settings;
    resolved.steps = steps;
    Ok(resolved)
}
