use super::PeerNode;
use crate::constants::CONSENSUS_MIN_AGREEMENT;
use serde::Serialize;
use std::{collections::HashMap, future::Future, net::Ipv4Addr};

/// Chain tip reported by the most healthy peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: String,
    pub count: usize,
}

/// Majority tip among healthy `nodes`. Ties go to the greater height.
pub fn chain_consensus(nodes: &[PeerNode]) -> Option<ChainTip> {
    let mut tally: HashMap<(u64, &str), usize> = HashMap::new();
    for node in nodes.iter().filter(|n| n.status.is_ok()) {
        *tally.entry((node.chain_height, &node.chain_hash)).or_default() += 1;
    }

    tally
        .into_iter()
        .max_by(|((h1, hash1), c1), ((h2, hash2), c2)| {
            c1.cmp(c2).then(h1.cmp(h2)).then(hash2.cmp(hash1))
        })
        .map(|((height, hash), count)| ChainTip {
            height,
            hash: hash.to_string(),
            count,
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consensus<T> {
    /// At least [CONSENSUS_MIN_AGREEMENT] peers agree
    Confident { value: T, agreeing: usize },

    /// First answer, without enough agreement
    LowConfidence { value: T },

    Unavailable,
}

/// Queries every peer in `peers` (ranked best first) for the same fact and
/// accepts the first answer at least [CONSENSUS_MIN_AGREEMENT] peers agree on
pub async fn select_consensus<T, F, Fut>(peers: &[Ipv4Addr], query: F) -> Consensus<T>
where
    T: PartialEq,
    F: Fn(Ipv4Addr) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let answers = futures::future::join_all(peers.iter().map(|ip| query(*ip))).await;

    let mut tally: Vec<(T, usize)> = vec![];
    for answer in answers.into_iter().flatten() {
        let index = match tally.iter().position(|(value, _)| *value == answer) {
            Some(index) => {
                tally[index].1 += 1;
                index
            }
            None => {
                tally.push((answer, 1));
                tally.len() - 1
            }
        };

        if tally[index].1 >= CONSENSUS_MIN_AGREEMENT {
            let (value, agreeing) = tally.swap_remove(index);
            return Consensus::Confident { value, agreeing };
        }
    }

    match tally.into_iter().next() {
        Some((value, _)) => Consensus::LowConfidence { value },
        None => Consensus::Unavailable,
    }
}
