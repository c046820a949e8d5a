//! # Check Subcommand
//!
//! Loads a configuration, validates it and prints what the node would start
//! with.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use connector_core::ConnectorConfig;

/// Arguments for `connector check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file (YAML, or JSON with a `.json` extension).
    #[arg(long)]
    pub config: PathBuf,
}

/// Execute the check subcommand. Returns the process exit code.
pub fn run_check(args: &CheckArgs) -> Result<u8> {
    let config = crate::load_config(&args.config)?;
    tracing::info!(path = %args.config.display(), "configuration is valid");
    print!("{}", summary(&config));
    Ok(0)
}

/// Human-readable summary of a validated configuration.
pub fn summary(config: &ConnectorConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "operator address: {}", config.operator_address);
    let _ = writeln!(out, "global prefix:    {}", config.global_prefix);
    let _ = writeln!(
        out,
        "route broadcast:  {}",
        if config.route_broadcast.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let _ = writeln!(out, "accounts ({}):", config.accounts.len());
    for account in &config.accounts {
        let _ = writeln!(
            out,
            "  {:<16} {:<6} {} (scale {}) sends={} receives={}",
            account.account_id.as_str(),
            account.relationship.to_string(),
            account.asset_code,
            account.asset_scale,
            account.should_send_routes(),
            account.should_receive_routes(),
        );
    }

    let _ = writeln!(out, "static routes ({}):", config.static_routes.len());
    for route in &config.static_routes {
        let _ = write!(out, "  {} -> {}", route.target_prefix, route.next_hop_account_id);
        if let Some(pattern) = &route.source_prefix_restriction {
            let _ = write!(out, " (sources matching {pattern})");
        }
        let _ = writeln!(out);
    }
    out
}
