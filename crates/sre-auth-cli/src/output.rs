//! Output formatting.

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Render `value` as JSON or YAML. Returns `None` for table output, which
/// each handler lays out itself.
pub fn render<T: Serialize>(
    format: OutputFormat,
    value: &T,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let rendered = match format {
        OutputFormat::Table => return Ok(None),
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    Ok(Some(rendered))
}

/// Placeholder for unset optional values in table output.
pub fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
