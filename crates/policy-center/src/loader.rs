use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::defaults::default_policy;
use crate::errors::PolicyError;
use crate::model::{EnginePolicy, PolicySource};

const ENV_PREFIX: &str = "ANCHOR_POLICY__";
const ENV_JSON: &str = "ANCHOR_POLICY_OVERRIDE_JSON";

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

pub fn load_policy(path: Option<&Path>) -> Result<EnginePolicy, PolicyError> {
    let mut options = LoadOptions {
        include_env: true,
        ..LoadOptions::default()
    };
    if let Some(p) = path {
        options.paths.push(p.to_path_buf());
    }
    load_policy_with_options(&options)
}

pub fn load_policy_with_options(options: &LoadOptions) -> Result<EnginePolicy, PolicyError> {
    let mut policy = default_policy();
    bootstrap_builtin_provenance(&mut policy)?;

    for path in &options.paths {
        if path.exists() {
            let overlays = overlays_from_file(path)?;
            apply_overlays(&mut policy, overlays)?;
        } else {
            debug!(path = %path.display(), "policy file missing; keeping defaults");
        }
    }

    if options.include_env {
        let overlays = overlays_from_env()?;
        apply_overlays(&mut policy, overlays)?;
    }

    policy.validate()?;
    Ok(policy)
}

/// Set one dotted `section.key` path on the policy and record where it came from.
pub fn apply_override(
    policy: &mut EnginePolicy,
    path: &str,
    value: &Value,
    source: PolicySource,
) -> Result<(), PolicyError> {
    let mut tree = serde_json::to_value(&*policy)
        .map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    let pointer = format!("/{}", path.replace('.', "/"));
    let slot = tree
        .pointer_mut(&pointer)
        .ok_or_else(|| PolicyError::UnsupportedPath(path.to_string()))?;
    if slot.is_object() {
        return Err(PolicyError::UnsupportedPath(path.to_string()));
    }
    *slot = value.clone();

    let mut updated: EnginePolicy =
        serde_json::from_value(tree).map_err(|err| PolicyError::InvalidValue {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
    updated.provenance = std::mem::take(&mut policy.provenance);
    updated.set_provenance(path, source);
    *policy = updated;
    Ok(())
}

struct PolicyOverlay {
    path: String,
    value: Value,
    source: PolicySource,
}

fn apply_overlays(
    policy: &mut EnginePolicy,
    overlays: Vec<PolicyOverlay>,
) -> Result<(), PolicyError> {
    for overlay in overlays {
        apply_override(policy, &overlay.path, &overlay.value, overlay.source)?;
    }
    Ok(())
}

fn overlays_from_file(path: &Path) -> Result<Vec<PolicyOverlay>, PolicyError> {
    let content = fs::read_to_string(path).map_err(|err| PolicyError::Io(format!("{}", err)))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    let json_value =
        serde_json::to_value(yaml_value).map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    Ok(flatten_value(json_value, None, PolicySource::File))
}

fn overlays_from_env() -> Result<Vec<PolicyOverlay>, PolicyError> {
    let mut overlays = Vec::new();
    for (key, raw) in env::vars() {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let path = stripped
                .split("__")
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(".");
            if path.is_empty() {
                continue;
            }
            overlays.push(PolicyOverlay {
                path,
                value: parse_env_value(&raw),
                source: PolicySource::Env,
            });
        }
    }

    if let Ok(raw_json) = env::var(ENV_JSON) {
        if !raw_json.trim().is_empty() {
            let json_value: Value = serde_json::from_str(&raw_json)
                .map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
            overlays.extend(flatten_value(json_value, None, PolicySource::Env));
        }
    }

    Ok(overlays)
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

fn flatten_value(value: Value, prefix: Option<String>, source: PolicySource) -> Vec<PolicyOverlay> {
    match value {
        Value::Object(map) => {
            let mut result = Vec::new();
            for (key, value) in map {
                let key_segment = key.trim().to_ascii_lowercase();
                let next_prefix = match &prefix {
                    Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, key_segment),
                    _ => key_segment,
                };
                result.extend(flatten_value(value, Some(next_prefix), source));
            }
            result
        }
        other => match prefix {
            Some(path) => vec![PolicyOverlay {
                path,
                value: other,
                source,
            }],
            None => Vec::new(),
        },
    }
}

fn bootstrap_builtin_provenance(policy: &mut EnginePolicy) -> Result<(), PolicyError> {
    let tree =
        serde_json::to_value(&*policy).map_err(|err| PolicyError::Invalid(format!("{}", err)))?;
    for overlay in flatten_value(tree, None, PolicySource::Builtin) {
        policy.set_provenance(&overlay.path, overlay.source);
    }
    Ok(())
}
