//! Peer network view: node states gathered by the [scanner::PeerScanner]

pub mod cache;
pub mod consensus;
pub mod geo;
pub mod protocol;
pub mod scanner;

pub use self::{
    cache::PeerCache,
    consensus::{chain_consensus, select_consensus, ChainTip, Consensus},
    geo::{GeoInfo, GeoLocator, IpInfoLocator},
    protocol::{PeerListReply, PeerProtocol},
    scanner::{NetworkConfig, PeerFilter, PeerOrder, PeerScanner},
};
use num::{BigUint, Num, Zero};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeSet, net::Ipv4Addr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Not contacted yet
    #[default]
    Unknown,
    Ok,
    Timeout,
    Error,
    Bad,
}

impl PeerStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Cumulative chain weight, a hex encoded arbitrary precision integer.
/// Compared numerically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainWeight(pub String);

impl ChainWeight {
    /// Numeric value, zero when not valid hex
    pub fn value(&self) -> BigUint {
        let digits = self.0.trim_start_matches("0x").trim_start_matches("0X");
        if digits.is_empty() {
            return BigUint::zero();
        }
        BigUint::from_str_radix(digits, 16).unwrap_or_default()
    }
}

impl From<&str> for ChainWeight {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl PartialEq for ChainWeight {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for ChainWeight {}

impl PartialOrd for ChainWeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChainWeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value().cmp(&other.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub ip: Ipv4Addr,
    pub status: PeerStatus,
    pub chain_height: u64,
    pub chain_hash: String,
    pub chain_weight: ChainWeight,
    pub peers: BTreeSet<Ipv4Addr>,

    /// Last contact, unix millis
    pub timestamp: u64,

    /// Start of the current healthy streak, unix millis, 0 when unhealthy
    pub uptimestamp: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
}

impl PeerNode {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            status: PeerStatus::Unknown,
            chain_height: 0,
            chain_hash: String::new(),
            chain_weight: ChainWeight::default(),
            peers: BTreeSet::new(),
            timestamp: 0,
            uptimestamp: 0,
            geo: None,
        }
    }

    /// Length of the current healthy streak in millis
    pub fn uptime(&self) -> u64 {
        if self.uptimestamp == 0 {
            0
        } else {
            self.timestamp.saturating_sub(self.uptimestamp)
        }
    }

    /// Field-level merge of a peer list reply received at `now`
    pub fn apply_reply(&mut self, reply: PeerListReply, now: u64) {
        self.status = reply.status;
        self.chain_height = reply.chain_height;
        self.chain_hash = reply.chain_hash;
        self.chain_weight = reply.chain_weight;
        self.peers = reply.peers.into_iter().collect();
        self.timestamp = now;

        if self.status.is_ok() {
            if self.uptimestamp == 0 {
                self.uptimestamp = now;
            }
        } else {
            self.uptimestamp = 0;
        }
    }
}

/// Private, loopback, link-local or "this network" address
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    match ip.octets() {
        [0, ..] | [127, ..] | [10, ..] => true,
        [172, b, ..] => (16..=31).contains(&b),
        [192, 168, ..] | [169, 254, ..] => true,
        _ => false,
    }
}
