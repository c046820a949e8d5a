//! # Route Selection
//!
//! The table returns a candidate set; a [`RouteSelector`] picks one. The
//! comparison policy is pluggable through [`RouteComparator`] because the
//! relationship tie-break is a deployment decision.
//!
//! Both built-in comparators prefer the most specific prefix first and end with
//! shorter path, then lexicographically smaller next-hop account id, so the
//! choice is always deterministic.

use std::cmp::Ordering;
use std::sync::Arc;

use connector_core::{
    AccountId, AccountProvider, AccountRelationship, Address, AddressPrefix, RouteTieBreak,
};

use crate::table::{Route, RoutingTable};

/// A candidate route together with the relationship of its next hop.
#[derive(Debug, Clone, Copy)]
pub struct RouteCandidate<'a> {
    /// The route.
    pub route: &'a Route,
    /// Relationship of the next-hop account, if the account is known.
    pub relationship: Option<AccountRelationship>,
}

impl RouteCandidate<'_> {
    /// Relationship weight; unknown next hops rank last.
    pub fn weight(&self) -> u8 {
        self.relationship.map_or(u8::MAX, |r| r.weight())
    }
}

/// Total order over candidates. `Ordering::Less` means `a` is preferred.
pub trait RouteComparator: Send + Sync + std::fmt::Debug {
    /// Compare two candidates.
    fn compare(&self, a: &RouteCandidate<'_>, b: &RouteCandidate<'_>) -> Ordering;
}

fn by_specificity(a: &RouteCandidate<'_>, b: &RouteCandidate<'_>) -> Ordering {
    b.route
        .target_prefix
        .depth()
        .cmp(&a.route.target_prefix.depth())
}

fn by_path_then_account(a: &RouteCandidate<'_>, b: &RouteCandidate<'_>) -> Ordering {
    a.route
        .path
        .len()
        .cmp(&b.route.path.len())
        .then_with(|| a.route.next_hop_account_id.cmp(&b.route.next_hop_account_id))
}

/// Longest prefix, then lower relationship weight (parent before peer before child).
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationshipWeightComparator;

impl RouteComparator for RelationshipWeightComparator {
    fn compare(&self, a: &RouteCandidate<'_>, b: &RouteCandidate<'_>) -> Ordering {
        by_specificity(a, b)
            .then_with(|| a.weight().cmp(&b.weight()))
            .then_with(|| by_path_then_account(a, b))
    }
}

/// Longest prefix only; relationship is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixLengthComparator;

impl RouteComparator for PrefixLengthComparator {
    fn compare(&self, a: &RouteCandidate<'_>, b: &RouteCandidate<'_>) -> Ordering {
        by_specificity(a, b).then_with(|| by_path_then_account(a, b))
    }
}

/// Chooses one route out of a candidate set.
#[derive(Debug, Clone)]
pub struct RouteSelector {
    comparator: Arc<dyn RouteComparator>,
}

impl Default for RouteSelector {
    fn default() -> Self {
        Self::from_policy(RouteTieBreak::default())
    }
}

impl RouteSelector {
    /// A selector using a custom comparator.
    pub fn new(comparator: Arc<dyn RouteComparator>) -> Self {
        Self { comparator }
    }

    /// A selector for a configured tie-break policy.
    pub fn from_policy(policy: RouteTieBreak) -> Self {
        match policy {
            RouteTieBreak::RelationshipWeight => Self::new(Arc::new(RelationshipWeightComparator)),
            RouteTieBreak::PrefixLengthOnly => Self::new(Arc::new(PrefixLengthComparator)),
        }
    }

    /// The preferred candidate, or `None` if `candidates` is empty.
    pub fn select<'a>(
        &self,
        candidates: &'a [Route],
        relationship_of: &dyn Fn(&AccountId) -> Option<AccountRelationship>,
    ) -> Option<&'a Route> {
        candidates
            .iter()
            .map(|route| RouteCandidate {
                route,
                relationship: relationship_of(&route.next_hop_account_id),
            })
            .min_by(|a, b| self.comparator.compare(a, b))
            .map(|c| c.route)
    }

    /// Look up candidates for `destination` from `source_prefix` and select one.
    pub fn select_next_hop(
        &self,
        table: &RoutingTable,
        destination: &Address,
        source_prefix: &AddressPrefix,
        relationship_of: &dyn Fn(&AccountId) -> Option<AccountRelationship>,
    ) -> Option<Route> {
        let candidates = table.find_next_hop_routes_for_source(destination, source_prefix);
        self.select(&candidates, relationship_of).cloned()
    }
}

/// Relationship lookup backed by an account provider. Lookup failures count as unknown.
pub fn relationship_lookup(
    accounts: &dyn AccountProvider,
) -> impl Fn(&AccountId) -> Option<AccountRelationship> + '_ {
    move |account_id: &AccountId| {
        accounts
            .lookup(account_id)
            .ok()
            .flatten()
            .map(|account| account.relationship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_core::{AccountSettings, InMemoryAccountProvider};
    use proptest::prelude::*;

    fn prefix(raw: &str) -> AddressPrefix {
        AddressPrefix::new(raw).unwrap()
    }

    fn account(raw: &str) -> AccountId {
        AccountId::new(raw).unwrap()
    }

    fn provider() -> InMemoryAccountProvider {
        InMemoryAccountProvider::with_accounts([
            AccountSettings::new(account("up"), AccountRelationship::Parent, "USD", 2),
            AccountSettings::new(account("side"), AccountRelationship::Peer, "USD", 2),
            AccountSettings::new(account("down"), AccountRelationship::Child, "USD", 2),
        ])
    }

    #[test]
    fn longest_prefix_wins_regardless_of_relationship() {
        let accounts = provider();
        let lookup = relationship_lookup(&accounts);
        let table = RoutingTable::new();
        table.add_route(Route::new(prefix("g"), account("up")));
        table.add_route(Route::new(prefix("g.bank"), account("side")));
        table.add_route(Route::new(prefix("g.bank.bob"), account("down")));

        let selected = RouteSelector::default()
            .select_next_hop(
                &table,
                &Address::new("g.bank.bob.sub").unwrap(),
                &prefix("g.connector.alice"),
                &lookup,
            )
            .unwrap();
        assert_eq!(selected.target_prefix.as_str(), "g.bank.bob");
    }

    #[test]
    fn relationship_weight_breaks_ties() {
        let accounts = provider();
        let lookup = relationship_lookup(&accounts);
        let routes = vec![
            Route::new(prefix("g.bank"), account("down")),
            Route::new(prefix("g.bank"), account("side")),
            Route::new(prefix("g.bank"), account("up")),
        ];
        let selected = RouteSelector::default().select(&routes, &lookup).unwrap();
        assert_eq!(selected.next_hop_account_id, account("up"));
    }

    #[test]
    fn prefix_length_policy_ignores_relationship() {
        let accounts = provider();
        let lookup = relationship_lookup(&accounts);
        let hop = Address::new("g.hop").unwrap();
        let routes = vec![
            Route::new(prefix("g.bank"), account("up")).with_path(vec![hop.clone(), hop]),
            Route::new(prefix("g.bank"), account("down")),
        ];
        let selected = RouteSelector::from_policy(RouteTieBreak::PrefixLengthOnly)
            .select(&routes, &lookup)
            .unwrap();
        assert_eq!(selected.next_hop_account_id, account("down"));
    }

    #[test]
    fn unknown_next_hop_ranks_last() {
        let accounts = provider();
        let lookup = relationship_lookup(&accounts);
        let routes = vec![
            Route::new(prefix("g.bank"), account("ghost")),
            Route::new(prefix("g.bank"), account("down")),
        ];
        let selected = RouteSelector::default().select(&routes, &lookup).unwrap();
        assert_eq!(selected.next_hop_account_id, account("down"));
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let accounts = provider();
        let lookup = relationship_lookup(&accounts);
        assert!(RouteSelector::default().select(&[], &lookup).is_none());
    }

    proptest! {
        #[test]
        fn most_specific_ancestor_is_selected(
            segments in proptest::collection::vec("[a-z]{1,6}", 2..6),
            installed in proptest::collection::vec(any::<bool>(), 5)
        ) {
            let accounts = provider();
            let lookup = relationship_lookup(&accounts);
            let destination = Address::new(format!("g.{}", segments.join("."))).unwrap();
            let ancestors: Vec<&str> = destination.ancestors().collect();

            let table = RoutingTable::new();
            let mut deepest = None;
            for (ancestor, keep) in ancestors.iter().zip(installed.iter()) {
                if *keep {
                    table.add_route(Route::new(prefix(ancestor), account("side")));
                    deepest = Some(ancestor.to_string());
                }
            }

            let selected = RouteSelector::default().select_next_hop(
                &table,
                &destination,
                &prefix("g.src"),
                &lookup,
            );
            prop_assert_eq!(
                selected.map(|r| r.target_prefix.as_str().to_string()),
                deepest
            );
        }
    }
}
