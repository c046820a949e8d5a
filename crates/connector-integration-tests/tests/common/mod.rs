//! Shared fixtures: connector nodes joined by in-process loopback links.
//!
//! A link endpoint is either another node (the Prepare is switched there as
//! if it arrived from the given account) or a scripted receiver.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use connector_core::{
    AccountId, AccountRelationship, AccountSettings, Address, ConnectorConfig, ErrorCode,
    FulfillPacket, Fulfillment, IlpResponse, Link, LinkError, LinkManager, PreparePacket,
    RejectPacket, SettlementEngineDetails,
};
use connector_ledger::InMemorySettlementTrigger;
use connector_switch::ConnectorNode;
use parking_lot::Mutex;

pub const PREIMAGE: Fulfillment = Fulfillment::new([42u8; 32]);

/// A node that may not exist yet when its peers are built.
pub type NodeSlot = Arc<OnceLock<Arc<ConnectorNode>>>;

/// What sits at the far end of a link.
#[derive(Clone)]
pub enum Endpoint {
    /// Another node, which sees the packet as coming from `as_account`.
    Node { slot: NodeSlot, as_account: AccountId },
    /// A receiver that fulfills with [`PREIMAGE`].
    Fulfill,
    /// A receiver that rejects every packet with `code`.
    Reject(ErrorCode),
    /// A transport that always fails.
    Down,
}

/// Link manager resolving accounts to fixed endpoints and counting sends.
#[derive(Default)]
pub struct LoopbackLinks {
    endpoints: HashMap<AccountId, Endpoint>,
    sends: Arc<Mutex<HashMap<AccountId, usize>>>,
}

impl LoopbackLinks {
    pub fn new(endpoints: impl IntoIterator<Item = (&'static str, Endpoint)>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|(id, endpoint)| (account_id(id), endpoint))
                .collect(),
            sends: Arc::default(),
        }
    }

    /// Prepares handed to the link of `account`, peer-protocol messages included.
    pub fn sends(&self, account: &str) -> usize {
        self.sends.lock().get(&account_id(account)).copied().unwrap_or(0)
    }
}

struct LoopbackLink {
    account_id: AccountId,
    endpoint: Endpoint,
    sends: Arc<Mutex<HashMap<AccountId, usize>>>,
}

impl Link for LoopbackLink {
    fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    fn send_packet(&self, prepare: PreparePacket) -> Result<IlpResponse, LinkError> {
        *self.sends.lock().entry(self.account_id.clone()).or_default() += 1;
        match &self.endpoint {
            Endpoint::Node { slot, as_account } => {
                let node = slot
                    .get()
                    .ok_or_else(|| LinkError::Unavailable(self.account_id.to_string()))?;
                Ok(node.switch_packet(as_account, prepare))
            }
            Endpoint::Fulfill => Ok(FulfillPacket::new(PREIMAGE).into()),
            Endpoint::Reject(code) => Ok(RejectPacket::new(
                *code,
                &prepare.destination,
                "rejected by receiver",
            )
            .into()),
            Endpoint::Down => Err(LinkError::Transport {
                account_id: self.account_id.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

impl LinkManager for LoopbackLinks {
    fn get_or_create_link(&self, account: &AccountSettings) -> Result<Arc<dyn Link>, LinkError> {
        let endpoint = self
            .endpoints
            .get(&account.account_id)
            .cloned()
            .ok_or_else(|| LinkError::Unavailable(account.account_id.to_string()))?;
        Ok(Arc::new(LoopbackLink {
            account_id: account.account_id.clone(),
            endpoint,
            sends: self.sends.clone(),
        }))
    }
}

pub fn account_id(id: &str) -> AccountId {
    AccountId::new(id).unwrap()
}

pub fn account(id: &str, relationship: AccountRelationship) -> AccountSettings {
    AccountSettings::new(account_id(id), relationship, "USD", 2)
}

pub fn config(operator: &str, accounts: Vec<AccountSettings>) -> ConnectorConfig {
    let mut config = ConnectorConfig::new(Address::new(operator).unwrap());
    config.accounts = accounts;
    config
}

pub fn prepare(destination: &str, amount: u64) -> PreparePacket {
    PreparePacket {
        amount,
        expires_at: Utc::now() + chrono::Duration::seconds(30),
        execution_condition: PREIMAGE.condition(),
        destination: Address::new(destination).unwrap(),
        data: b"invoice-17".to_vec(),
    }
}

/// Two peered nodes.
///
/// ```text
/// sender ── g.a ──(b | a)── g.b ── receiver
/// ```
///
/// `receiver` settles once its balance reaches 100 000.
pub struct TwoNodes {
    pub a: Arc<ConnectorNode>,
    pub b: Arc<ConnectorNode>,
    pub links_a: Arc<LoopbackLinks>,
    pub settlement: Arc<InMemorySettlementTrigger>,
}

impl TwoNodes {
    pub fn new() -> Self {
        let slot_a: NodeSlot = Arc::default();
        let slot_b: NodeSlot = Arc::default();

        let a_links = Arc::new(LoopbackLinks::new([
            (
                "b",
                Endpoint::Node {
                    slot: slot_b.clone(),
                    as_account: account_id("a"),
                },
            ),
            ("sender", Endpoint::Down),
        ]));
        let b_links = LoopbackLinks::new([
            (
                "a",
                Endpoint::Node {
                    slot: slot_a.clone(),
                    as_account: account_id("b"),
                },
            ),
            ("receiver", Endpoint::Fulfill),
        ]);

        let mut receiver = account("receiver", AccountRelationship::Child);
        receiver.balance_settings.settle_threshold = Some(100_000);
        receiver.settlement_engine = Some(SettlementEngineDetails {
            engine_url: "http://settlement.local".into(),
            engine_account_id: None,
        });

        let a = ConnectorNode::from_config(
            config(
                "g.a",
                vec![
                    account("b", AccountRelationship::Peer),
                    account("sender", AccountRelationship::Child),
                ],
            ),
            a_links.clone(),
            None,
        )
        .unwrap();
        let settlement = Arc::new(InMemorySettlementTrigger::new());
        let b = ConnectorNode::from_config(
            config(
                "g.b",
                vec![account("a", AccountRelationship::Peer), receiver],
            ),
            Arc::new(b_links),
            Some(settlement.clone()),
        )
        .unwrap();

        let a = Arc::new(a);
        let b = Arc::new(b);
        assert!(slot_a.set(a.clone()).is_ok());
        assert!(slot_b.set(b.clone()).is_ok());
        a.start().unwrap();
        b.start().unwrap();
        Self {
            a,
            b,
            links_a: a_links,
            settlement,
        }
    }

    /// Run broadcast rounds on both nodes until routes have propagated.
    pub fn sync(&self) {
        for _ in 0..3 {
            self.a.broadcaster().broadcast_routes();
            self.b.broadcaster().broadcast_routes();
        }
    }
}
