//! # Route Subcommand
//!
//! Builds the routing table a node would start with (static routes plus one
//! local route per child account) and resolves a destination from a source
//! account, the same way the packet switch does. Route sync is switched off
//! and no link is ever opened.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use connector_core::{
    AccountId, AccountProvider, AccountSettings, Address, ConnectorConfig,
    InMemoryAccountProvider, Link, LinkError, LinkManager,
};
use connector_routing::{relationship_lookup, Route, RouteBroadcaster, RouteSelector, RoutingTable};

/// Arguments for `connector route`.
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Configuration file (YAML, or JSON with a `.json` extension).
    #[arg(long)]
    pub config: PathBuf,

    /// Account the packet would arrive from.
    #[arg(long)]
    pub source: String,

    /// Destination address to resolve.
    #[arg(long)]
    pub destination: String,
}

/// Link manager for offline resolution; every link is unavailable.
struct OfflineLinks;

impl LinkManager for OfflineLinks {
    fn get_or_create_link(&self, account: &AccountSettings) -> Result<Arc<dyn Link>, LinkError> {
        Err(LinkError::Unavailable(format!(
            "{} (offline route resolution)",
            account.account_id
        )))
    }
}

/// Outcome of resolving one destination.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Every candidate admitted for the source, most specific prefix first.
    pub candidates: Vec<Route>,
    /// The route the switch would pick.
    pub selected: Option<Route>,
}

/// Resolve `destination` for packets from `source` against the startup
/// routing table of `config`.
pub fn resolve(config: &ConnectorConfig, source: &AccountId, destination: &Address) -> Result<Resolution> {
    let accounts = Arc::new(InMemoryAccountProvider::with_accounts(config.accounts.clone()));
    let source_account = accounts
        .lookup(source)?
        .ok_or_else(|| anyhow!("account {source} is not configured"))?;

    let mut offline = config.clone();
    offline.route_broadcast.enabled = false;
    let table = Arc::new(RoutingTable::new());
    let broadcaster = RouteBroadcaster::new(&offline, table.clone(), accounts.clone(), Arc::new(OfflineLinks));
    for route in &offline.static_routes {
        broadcaster
            .add_static_route(route)
            .with_context(|| format!("static route {}", route.target_prefix))?;
    }
    for account in &offline.accounts {
        broadcaster.register_peer(&account.account_id)?;
    }

    let source_prefix = source_account.address_prefix(&config.operator_address);
    let candidates = table.find_next_hop_routes_for_source(destination, &source_prefix);
    let relationship_of = relationship_lookup(accounts.as_ref());
    let selected = RouteSelector::from_policy(config.route_tie_break)
        .select(&candidates, &relationship_of)
        .cloned();
    tracing::debug!(
        source = %source,
        destination = %destination,
        candidates = candidates.len(),
        selected = ?selected.as_ref().map(|r| r.next_hop_account_id.as_str()),
        "destination resolved"
    );
    Ok(Resolution {
        candidates,
        selected,
    })
}

/// Human-readable rendering of a [`Resolution`].
pub fn render(destination: &Address, resolution: &Resolution) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "candidates for {destination}:");
    if resolution.candidates.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for route in &resolution.candidates {
        let _ = writeln!(out, "  {} -> {}", route.target_prefix, route.next_hop_account_id);
    }
    match &resolution.selected {
        Some(route) => {
            let _ = writeln!(
                out,
                "next hop: {} via {}",
                route.next_hop_account_id, route.target_prefix
            );
        }
        None => {
            let _ = writeln!(out, "unreachable");
        }
    }
    out
}

/// Execute the route subcommand. Exit code 1 if the destination is unreachable.
pub fn run_route(args: &RouteArgs) -> Result<u8> {
    let config = crate::load_config(&args.config)?;
    let source = AccountId::new(args.source.clone())
        .with_context(|| format!("invalid source account {:?}", args.source))?;
    let destination = Address::new(args.destination.clone())
        .with_context(|| format!("invalid destination {:?}", args.destination))?;
    if !destination.has_prefix(&config.global_prefix) {
        bail!("{destination} is outside global prefix {}", config.global_prefix);
    }

    let resolution = resolve(&config, &source, &destination)?;
    print!("{}", render(&destination, &resolution));
    Ok(if resolution.selected.is_some() { 0 } else { 1 })
}
