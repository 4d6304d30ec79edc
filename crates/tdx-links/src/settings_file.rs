use anyhow::{Context, Result};
use std::path::Path;
use tdx_links_core::Configuration;

/// Load settings from `path`, or the built-in defaults when there is none.
///
/// `.json` files are read as the Obsidian plugin's `data.json`; anything else
/// is TOML.
pub fn load_configuration(path: Option<&Path>) -> Result<Configuration> {
    let Some(path) = path else {
        tracing::debug!("No settings file given, using defaults");
        return Ok(Configuration::default());
    };

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        Configuration::from_json_str(&source)
    } else {
        Configuration::from_toml_str(&source)
    }
    .with_context(|| format!("Invalid settings file {}", path.display()))?;

    tracing::info!(
        "Loaded {} keyword rule(s) and {} path template(s) from {}",
        config.rules.len(),
        config.templates.len(),
        path.display()
    );
    Ok(config)
}
