use super::{ChainWeight, PeerStatus};
use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Answer to a peer list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerListReply {
    pub status: PeerStatus,
    pub chain_height: u64,
    pub chain_hash: String,
    pub chain_weight: ChainWeight,
    pub peers: Vec<Ipv4Addr>,
}

/// Node protocol backend. The wire protocol itself lives outside this crate.
#[async_trait]
pub trait PeerProtocol: Send + Sync {
    /// Asks `ip` for its chain tip and the peers it knows. An `Err` means
    /// no reply was received at all.
    async fn request_peer_list(&self, ip: Ipv4Addr) -> anyhow::Result<PeerListReply>;
}
