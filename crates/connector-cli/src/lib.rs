//! # connector-cli — Command-Line Tool for the Connector
//!
//! Provides the `connector` binary. Both subcommands work offline from a
//! configuration file; neither opens a link.
//!
//! ```bash
//! connector check --config connector.yaml
//! connector route --config connector.yaml --source alice --destination g.bank.vault
//! ```

pub mod check;
pub mod route;

use std::path::Path;

use anyhow::{Context, Result};
use connector_core::ConnectorConfig;

/// Load and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<ConnectorConfig> {
    let config = ConnectorConfig::from_path(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;
    Ok(config)
}
