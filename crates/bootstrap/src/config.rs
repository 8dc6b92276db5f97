//! Bootstrap configuration

use anyhow::{Context, Result};
use bootstrap_lib::BootstrapSettings;
use std::path::Path;

/// Environment prefix for settings, e.g. `BOOTSTRAP_CONSUL_IMAGE`
const ENV_PREFIX: &str = "BOOTSTRAP";

/// Load image/name settings from an optional config file and the environment
///
/// Unset keys fall back to [`BootstrapSettings::default`]; environment
/// variables override the file.
pub fn load_settings(path: Option<&Path>) -> Result<BootstrapSettings> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    let config = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to load bootstrap settings")?;

    config
        .try_deserialize()
        .context("Invalid bootstrap settings")
}
