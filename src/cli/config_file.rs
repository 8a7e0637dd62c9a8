//! YAML settings file.
//!
//! Nested keys are joined with `_`, upper-cased and prefixed with `GATEKEEP_`, so
//!
//! ```yaml
//! account: trader
//! gateway:
//!   url: https://localhost:5000
//!   route:
//!     tickle: /v1/api/tickle
//! two-fa:
//!   strategy: totp
//! ```
//!
//! sets `GATEKEEP_ACCOUNT`, `GATEKEEP_GATEWAY_URL`, `GATEKEEP_GATEWAY_ROUTE_TICKLE` and
//! `GATEKEEP_TWO_FA_STRATEGY`. Variables already present in the environment win.

use anyhow::{anyhow, bail, Context, Result};
use serde_yaml::Value;
use std::{env, fs, path::PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "GATEKEEP_";
const ENV_CONFIG: &str = "GATEKEEP_CONFIG";

/// Find `--config`/`-c` before clap runs, falling back to `GATEKEEP_CONFIG`.
pub fn config_path<I>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
    }

    env::var_os(ENV_CONFIG)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn env_key(prefix: &str, key: &str) -> String {
    let key = key.trim().to_uppercase().replace(['-', '.'], "_");
    if prefix.is_empty() {
        key
    } else {
        format!("{prefix}_{key}")
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(flag) => out.push((prefix.to_string(), flag.to_string())),
        Value::Number(number) => out.push((prefix.to_string(), number.to_string())),
        Value::String(text) => out.push((prefix.to_string(), text.clone())),
        Value::Mapping(mapping) => {
            for (key, nested) in mapping {
                let key = match key {
                    Value::String(key) => key.clone(),
                    Value::Number(key) => key.to_string(),
                    Value::Bool(key) => key.to_string(),
                    _ => bail!("unsupported key under {prefix:?}: keys must be scalars"),
                };
                flatten(&env_key(prefix, &key), nested, out)?;
            }
        }
        Value::Sequence(_) => bail!("{prefix}: lists are not supported"),
        Value::Tagged(tagged) => bail!("{prefix}: unsupported YAML tag {}", tagged.tag),
    }
    Ok(())
}

/// Parse a settings document into `(variable, value)` pairs.
///
/// # Errors
///
/// Returns an error if the document is not a mapping or holds lists or tags.
pub fn parse(contents: &str) -> Result<Vec<(String, String)>> {
    let document: Value = serde_yaml::from_str(contents).context("invalid YAML")?;

    let mut vars = Vec::new();
    match document {
        Value::Null => {}
        Value::Mapping(_) => flatten("", &document, &mut vars)?,
        _ => return Err(anyhow!("the settings file must be a mapping")),
    }

    Ok(vars
        .into_iter()
        .map(|(key, value)| {
            let key = if key.starts_with(ENV_PREFIX) {
                key
            } else {
                format!("{ENV_PREFIX}{key}")
            };
            (key, value)
        })
        .collect())
}

/// Export variables that are not already set. Returns the names that were exported.
pub fn apply(vars: Vec<(String, String)>) -> Vec<String> {
    vars.into_iter()
        .filter(|(key, _)| env::var_os(key).is_none())
        .map(|(key, value)| {
            env::set_var(&key, value);
            key
        })
        .collect()
}

/// Read the settings file named on the command line or in `GATEKEEP_CONFIG`, if any.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load<I>(args: I) -> Result<Option<PathBuf>>
where
    I: IntoIterator<Item = String>,
{
    let Some(path) = config_path(args) else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    let vars = parse(&contents)
        .with_context(|| format!("Invalid settings file: {}", path.display()))?;

    let applied = apply(vars);
    debug!("Settings file {} set {:?}", path.display(), applied);

    Ok(Some(path))
}
