//! # Route Synchronization Between Two Nodes
//!
//! Two connectors peer over loopback links and exchange their child routes
//! through route control and route update messages carried as peer-protocol
//! Prepares.

mod common;

use chrono::Utc;
use common::*;
use connector_core::{Address, AddressPrefix, ErrorCode};
use connector_routing::{Mode, RouteUpdateRequest};

#[test]
fn peers_learn_each_others_child_routes() {
    let nodes = TwoNodes::new();
    nodes.sync();

    let at_a = nodes
        .a
        .routing_table()
        .find_next_hop_routes(&Address::new("g.b.receiver.wallet").unwrap());
    assert_eq!(at_a.len(), 1);
    assert_eq!(at_a[0].next_hop_account_id, account_id("b"));
    assert_eq!(at_a[0].path, vec![Address::new("g.b").unwrap()]);

    let at_b = nodes
        .b
        .routing_table()
        .find_next_hop_routes(&Address::new("g.a.sender").unwrap());
    assert_eq!(at_b.len(), 1);
    assert_eq!(at_b[0].next_hop_account_id, account_id("a"));

    assert_eq!(nodes.a.broadcaster().sender_mode(&account_id("b")), Some(Mode::Sync));
    assert_eq!(nodes.b.broadcaster().sender_mode(&account_id("a")), Some(Mode::Sync));
}

#[test]
fn learned_routes_are_re_advertised_with_own_address_prepended() {
    let nodes = TwoNodes::new();
    nodes.sync();

    let prefix = connector_core::AddressPrefix::new("g.b.receiver").unwrap();
    let selected = nodes.a.broadcaster().selected_route(&prefix).unwrap();
    assert_eq!(selected.next_hop_account_id, account_id("b"));
    assert!(nodes.a.broadcaster().log().current_epoch() > 0);
}

#[test]
fn route_sync_does_not_touch_balances() {
    let nodes = TwoNodes::new();
    nodes.sync();
    assert_eq!(nodes.a.ledger().get_balance(&account_id("b")).unwrap(), 0);
    assert_eq!(nodes.b.ledger().get_balance(&account_id("a")).unwrap(), 0);
}

#[test]
fn withdrawn_route_makes_destination_unreachable() {
    let nodes = TwoNodes::new();
    nodes.sync();
    assert!(nodes
        .a
        .switch_packet(&account_id("sender"), prepare("g.b.receiver.wallet", 10))
        .is_fulfill());

    nodes.b.unregister_account(&account_id("receiver"));
    nodes.sync();

    assert!(nodes
        .a
        .routing_table()
        .find_next_hop_routes(&Address::new("g.b.receiver.wallet").unwrap())
        .is_empty());
    let response = nodes
        .a
        .switch_packet(&account_id("sender"), prepare("g.b.receiver.wallet", 10));
    let reject = response.as_reject().unwrap();
    assert_eq!(reject.code, ErrorCode::Unreachable);
    assert_eq!(reject.triggered_by, Some(Address::new("g.a").unwrap()));
}

#[test]
fn out_of_range_hold_down_from_peer_is_refused_without_panicking() {
    let nodes = TwoNodes::new();
    nodes.sync();

    let hostile = RouteUpdateRequest {
        routing_table_id: nodes.a.broadcaster().log().routing_table_id(),
        current_epoch_index: 1,
        from_epoch_index: 0,
        to_epoch_index: 1,
        hold_down_time_ms: 1 << 62,
        speaker: Address::new("g.a").unwrap(),
        new_routes: vec![],
        withdrawn_routes: vec![AddressPrefix::new("g.a.sender").unwrap()],
    };
    let response = nodes.b.switch_packet(
        &account_id("a"),
        hostile
            .to_prepare(Utc::now() + chrono::Duration::seconds(30))
            .unwrap(),
    );
    assert_eq!(response.as_reject().unwrap().code, ErrorCode::BadRequest);

    let at_b = nodes
        .b
        .routing_table()
        .find_next_hop_routes(&Address::new("g.a.sender").unwrap());
    assert_eq!(at_b.len(), 1);

    // The resync it triggered converges again.
    nodes.sync();
    assert!(nodes
        .a
        .switch_packet(&account_id("sender"), prepare("g.b.receiver", 10))
        .is_fulfill());
}
