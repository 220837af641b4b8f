use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, Map, builder::DefaultState};
use eyre::{Context, Result};

use crate::config::models::ListenerOptions;

/// Load options from the process environment (`HTTP_PORT`, `ENABLE_TLS`,
/// `TLS_PORT`, `TLS_CERTIFICATE`, `TLS_PRIVATE_KEY`, `API_PREFIX`,
/// `DATABASE_NAME`, `LOG_HEALTH_CHECKS`, ...).
///
/// Empty variables are treated as unset. `MONGODB_DATABASENAME` is read when
/// `DATABASE_NAME` is absent.
pub fn load_options_from_env() -> Result<ListenerOptions> {
    build(Config::builder(), process_env())
}

/// Load options from a file, with environment variables taking precedence.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub fn load_options(config_path: &str) -> Result<ListenerOptions> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let file = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

    build(
        Config::builder().add_source(File::new(file, format)),
        process_env(),
    )
        .with_context(|| format!("Failed to load options from {}", path.display()))
}

const DATABASE_NAME_VAR: &str = "DATABASE_NAME";
const LEGACY_DATABASE_NAME_VAR: &str = "MONGODB_DATABASENAME";

/// Process environment, skipping variables that are not valid UTF-8.
fn process_env() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn environment(vars: impl IntoIterator<Item = (String, String)>) -> Environment {
    let mut source: Map<String, String> = vars
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();
    if let Some(name) = source.remove(LEGACY_DATABASE_NAME_VAR) {
        source.entry(DATABASE_NAME_VAR.to_string()).or_insert(name);
    }
    Environment::default().try_parsing(true).source(Some(source))
}

fn build(
    builder: ConfigBuilder<DefaultState>,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<ListenerOptions> {
    let settings = builder
        .add_source(environment(vars))
        .build()
        .context("Failed to build listener configuration")?;

    let options: ListenerOptions = settings
        .try_deserialize()
        .context("Failed to deserialize listener configuration")?;

    Ok(options.normalized())
}
