//! Show the effective engine configuration.

use anyhow::{Context, Result};
use feedsync_client::EngineConfig;

/// Run the config command.
pub fn run(config: &EngineConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}
