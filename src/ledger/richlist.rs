use super::LedgerEntry;
use serde::{Deserialize, Serialize};

/// Ranked, non-zero balance of a (neo)genesis ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichListEntry {
    pub rank: u64,
    pub address: String,
    pub address_hash: String,
    pub tag: Option<String>,
    pub balance: u64,
}

/// Ranks every non-zero entry by descending balance, densely from 1.
/// Equal balances keep their ledger order.
pub fn compute_richlist(entries: &[LedgerEntry]) -> Vec<RichListEntry> {
    let mut funded: Vec<&LedgerEntry> = entries.iter().filter(|e| e.balance > 0).collect();
    funded.sort_by(|a, b| b.balance.cmp(&a.balance));

    funded
        .into_iter()
        .zip(1..)
        .map(|(entry, rank)| RichListEntry {
            rank,
            address: entry.address.short_hex(),
            address_hash: entry.address.address_hash(),
            tag: entry.address.tag().map(|t| t.to_string()),
            balance: entry.balance,
        })
        .collect()
}
