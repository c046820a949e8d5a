//! # Address-Prefix Routing Table
//!
//! Routes are indexed by their exact `target_prefix`. Each prefix holds one
//! candidate per next-hop account, so a peer's advertisement can be replaced or
//! withdrawn without touching other peers' candidates.
//!
//! [`RoutingTable::find_next_hop_routes`] does **not** collapse to a single
//! route: it returns every unexpired candidate whose prefix is a dot-delimited
//! ancestor of (or equal to) the destination, most specific first. Choosing one
//! is the job of [`RouteSelector`](crate::selection::RouteSelector).
//!
//! ## Concurrency
//!
//! One `parking_lot::RwLock` guards the index. Every mutation is applied under a
//! single write guard, so readers never observe a partially applied route.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use connector_core::{AccountId, Address, AddressPrefix};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::pattern::SourcePrefixPattern;

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// A mapping from an address prefix to the account packets should be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destinations under this prefix may use the route.
    pub target_prefix: AddressPrefix,
    /// The account packets are forwarded to.
    pub next_hop_account_id: AccountId,
    /// Nodes the advertisement passed through, nearest first. Empty for local routes.
    #[serde(default)]
    pub path: Vec<Address>,
    /// The route is ignored after this instant. `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque route authentication value.
    pub auth: [u8; 32],
    /// Only packets from matching source prefixes may use the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_prefix_restriction: Option<SourcePrefixPattern>,
}

impl Route {
    /// A local, non-expiring, unrestricted route.
    pub fn new(target_prefix: AddressPrefix, next_hop_account_id: AccountId) -> Self {
        Self {
            target_prefix,
            next_hop_account_id,
            path: Vec::new(),
            expires_at: None,
            auth: [0u8; 32],
            source_prefix_restriction: None,
        }
    }

    /// Set the advertised path.
    pub fn with_path(mut self, path: Vec<Address>) -> Self {
        self.path = path;
        self
    }

    /// Set the expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the auth value.
    pub fn with_auth(mut self, auth: [u8; 32]) -> Self {
        self.auth = auth;
        self
    }

    /// Restrict the route to matching source prefixes.
    pub fn with_source_restriction(mut self, pattern: SourcePrefixPattern) -> Self {
        self.source_prefix_restriction = Some(pattern);
        self
    }

    /// Returns `true` if the route has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns `true` if packets from `source_prefix` may use this route.
    pub fn admits_source(&self, source_prefix: &AddressPrefix) -> bool {
        self.source_prefix_restriction
            .as_ref()
            .map_or(true, |pattern| pattern.matches(source_prefix))
    }
}

// ---------------------------------------------------------------------------
// RoutingTable
// ---------------------------------------------------------------------------

/// Thread-safe longest-prefix-match index of candidate routes.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<AddressPrefix, Vec<Route>>>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, replacing the candidate with the same prefix and next hop.
    ///
    /// Returns the replaced route, if any.
    pub fn add_route(&self, route: Route) -> Option<Route> {
        let mut routes = self.routes.write();
        let candidates = routes.entry(route.target_prefix.clone()).or_default();
        match candidates
            .iter_mut()
            .find(|r| r.next_hop_account_id == route.next_hop_account_id)
        {
            Some(existing) => Some(std::mem::replace(existing, route)),
            None => {
                candidates.push(route);
                None
            }
        }
    }

    /// Remove the candidate with the same prefix and next hop as `route`.
    pub fn remove_route(&self, route: &Route) -> Option<Route> {
        self.remove_route_for_peer(&route.target_prefix, &route.next_hop_account_id)
    }

    /// Remove the candidate for `prefix` learned from (or pointing at) `account_id`.
    pub fn remove_route_for_peer(
        &self,
        prefix: &AddressPrefix,
        account_id: &AccountId,
    ) -> Option<Route> {
        let mut routes = self.routes.write();
        let candidates = routes.get_mut(prefix)?;
        let idx = candidates
            .iter()
            .position(|r| &r.next_hop_account_id == account_id)?;
        let removed = candidates.swap_remove(idx);
        if candidates.is_empty() {
            routes.remove(prefix);
        }
        Some(removed)
    }

    /// Remove every candidate for `prefix`.
    pub fn remove_all_routes_for_prefix(&self, prefix: &AddressPrefix) -> Vec<Route> {
        self.routes.write().remove(prefix).unwrap_or_default()
    }

    /// Remove every candidate whose next hop is `account_id`.
    pub fn remove_all_routes_for_peer(&self, account_id: &AccountId) -> Vec<Route> {
        let mut removed = Vec::new();
        let mut routes = self.routes.write();
        routes.retain(|_, candidates| {
            candidates.retain(|r| {
                if &r.next_hop_account_id == account_id {
                    removed.push(r.clone());
                    false
                } else {
                    true
                }
            });
            !candidates.is_empty()
        });
        removed
    }

    /// Push the expiry of every expiring candidate learned from `account_id` to `expires_at`.
    ///
    /// Returns the number of refreshed routes.
    pub fn refresh_routes_for_peer(&self, account_id: &AccountId, expires_at: DateTime<Utc>) -> usize {
        let mut refreshed = 0;
        let mut routes = self.routes.write();
        for route in routes.values_mut().flatten() {
            if &route.next_hop_account_id == account_id && route.expires_at.is_some() {
                route.expires_at = Some(expires_at);
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Remove every candidate that has expired at `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<Route> {
        let mut removed = Vec::new();
        let mut routes = self.routes.write();
        routes.retain(|_, candidates| {
            candidates.retain(|r| {
                if r.is_expired(now) {
                    removed.push(r.clone());
                    false
                } else {
                    true
                }
            });
            !candidates.is_empty()
        });
        removed
    }

    /// Every candidate stored under exactly `prefix`, including expired ones.
    pub fn get_routes_by_prefix(&self, prefix: &AddressPrefix) -> Vec<Route> {
        self.routes.read().get(prefix).cloned().unwrap_or_default()
    }

    /// Every unexpired candidate whose prefix is an ancestor of (or equal to)
    /// `destination`, most specific prefix first.
    pub fn find_next_hop_routes(&self, destination: &Address) -> Vec<Route> {
        self.find_next_hop_routes_at(destination, Utc::now())
    }

    /// As [`Self::find_next_hop_routes`], keeping only routes whose source
    /// restriction admits `source_prefix`.
    pub fn find_next_hop_routes_for_source(
        &self,
        destination: &Address,
        source_prefix: &AddressPrefix,
    ) -> Vec<Route> {
        let mut candidates = self.find_next_hop_routes(destination);
        candidates.retain(|r| r.admits_source(source_prefix));
        candidates
    }

    /// As [`Self::find_next_hop_routes`], evaluating expiry at `now`.
    pub fn find_next_hop_routes_at(&self, destination: &Address, now: DateTime<Utc>) -> Vec<Route> {
        let routes = self.routes.read();
        let ancestors: Vec<&str> = destination.ancestors().collect();
        ancestors
            .into_iter()
            .rev()
            .filter_map(|ancestor| routes.get(ancestor))
            .flatten()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect()
    }

    /// Visit every stored route. The table is read-locked for the duration.
    pub fn for_each(&self, mut visitor: impl FnMut(&Route)) {
        for route in self.routes.read().values().flatten() {
            visitor(route);
        }
    }

    /// All prefixes with at least one candidate.
    pub fn prefixes(&self) -> Vec<AddressPrefix> {
        self.routes.read().keys().cloned().collect()
    }

    /// Total number of candidate routes.
    pub fn len(&self) -> usize {
        self.routes.read().values().map(Vec::len).sum()
    }

    /// Returns `true` if the table holds no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(raw: &str) -> AddressPrefix {
        AddressPrefix::new(raw).unwrap()
    }

    fn account(raw: &str) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    fn addr(raw: &str) -> Address {
        Address::new(raw).unwrap()
    }

    #[test]
    fn add_route_replaces_same_next_hop() {
        let table = RoutingTable::new();
        let first = Route::new(prefix("g.bank"), account("bob")).with_path(vec![addr("g.a")]);
        let second = Route::new(prefix("g.bank"), account("bob")).with_path(vec![addr("g.b")]);
        assert!(table.add_route(first.clone()).is_none());
        assert_eq!(table.add_route(second.clone()), Some(first));
        assert_eq!(table.get_routes_by_prefix(&prefix("g.bank")), vec![second]);
    }

    #[test]
    fn candidates_from_different_peers_coexist() {
        let table = RoutingTable::new();
        table.add_route(Route::new(prefix("g.bank"), account("bob")));
        table.add_route(Route::new(prefix("g.bank"), account("carol")));
        assert_eq!(table.get_routes_by_prefix(&prefix("g.bank")).len(), 2);

        let removed = table.remove_route_for_peer(&prefix("g.bank"), &account("bob"));
        assert!(removed.is_some());
        let left = table.get_routes_by_prefix(&prefix("g.bank"));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].next_hop_account_id, account("carol"));
    }

    #[test]
    fn find_returns_all_ancestors_most_specific_first() {
        let table = RoutingTable::new();
        table.add_route(Route::new(prefix("g"), account("parent")));
        table.add_route(Route::new(prefix("g.bank"), account("bank")));
        table.add_route(Route::new(prefix("g.bank.bob"), account("bob")));
        table.add_route(Route::new(prefix("g.other"), account("other")));

        let found = table.find_next_hop_routes(&addr("g.bank.bob.sub"));
        let prefixes: Vec<&str> = found.iter().map(|r| r.target_prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["g.bank.bob", "g.bank", "g"]);
    }

    #[test]
    fn find_respects_segment_boundaries() {
        let table = RoutingTable::new();
        table.add_route(Route::new(prefix("g.bank"), account("bank")));
        assert!(table.find_next_hop_routes(&addr("g.banker.x")).is_empty());
    }

    #[test]
    fn source_restriction_filters_candidates() {
        let table = RoutingTable::new();
        let pattern = SourcePrefixPattern::new("g.usd.*").unwrap();
        table.add_route(Route::new(prefix("g.bank"), account("bob")).with_source_restriction(pattern));

        let dest = addr("g.bank.carol");
        assert!(table
            .find_next_hop_routes_for_source(&dest, &prefix("g.cny.foo"))
            .is_empty());
        assert_eq!(
            table
                .find_next_hop_routes_for_source(&dest, &prefix("g.usd.bar"))
                .len(),
            1
        );
    }

    #[test]
    fn expired_routes_are_invisible_and_purgeable() {
        let table = RoutingTable::new();
        let past = Utc::now() - chrono::Duration::seconds(1);
        table.add_route(Route::new(prefix("g.bank"), account("bob")).with_expiry(past));
        table.add_route(Route::new(prefix("g.bank"), account("carol")));

        let found = table.find_next_hop_routes(&addr("g.bank.x"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].next_hop_account_id, account("carol"));

        let purged = table.purge_expired(Utc::now());
        assert_eq!(purged.len(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn refresh_extends_only_expiring_routes_of_peer() {
        let table = RoutingTable::new();
        let soon = Utc::now() + chrono::Duration::seconds(1);
        let later = Utc::now() + chrono::Duration::seconds(60);
        table.add_route(Route::new(prefix("g.a"), account("bob")).with_expiry(soon));
        table.add_route(Route::new(prefix("g.b"), account("bob")));
        table.add_route(Route::new(prefix("g.c"), account("carol")).with_expiry(soon));

        assert_eq!(table.refresh_routes_for_peer(&account("bob"), later), 1);
        assert_eq!(
            table.get_routes_by_prefix(&prefix("g.a"))[0].expires_at,
            Some(later)
        );
        assert_eq!(
            table.get_routes_by_prefix(&prefix("g.c"))[0].expires_at,
            Some(soon)
        );
    }

    #[test]
    fn remove_all_for_peer_and_prefix() {
        let table = RoutingTable::new();
        table.add_route(Route::new(prefix("g.a"), account("bob")));
        table.add_route(Route::new(prefix("g.b"), account("bob")));
        table.add_route(Route::new(prefix("g.b"), account("carol")));

        assert_eq!(table.remove_all_routes_for_peer(&account("bob")).len(), 2);
        assert_eq!(table.prefixes(), vec![prefix("g.b")]);
        assert_eq!(table.remove_all_routes_for_prefix(&prefix("g.b")).len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn for_each_visits_every_route() {
        let table = RoutingTable::new();
        table.add_route(Route::new(prefix("g.a"), account("bob")));
        table.add_route(Route::new(prefix("g.b"), account("carol")));
        let mut seen = 0;
        table.for_each(|_| seen += 1);
        assert_eq!(seen, 2);
    }
}
