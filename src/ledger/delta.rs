use super::{LedgerEntry, LedgerIdentity};
use std::collections::HashMap;

/// Signed balance change of one account between two ledgers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDelta {
    pub identity: String,
    pub address: String,
    pub address_hash: String,
    pub tag: Option<String>,
    pub balance: u64,
    pub delta: i128,
}

impl LedgerDelta {
    fn new(entry: &LedgerEntry, identity: String, balance: u64, delta: i128) -> Self {
        Self {
            identity,
            address: entry.address.short_hex(),
            address_hash: entry.address.address_hash(),
            tag: entry.address.tag().map(|t| t.to_string()),
            balance,
            delta,
        }
    }

    /// Delta saturated to the `i64` range of the balance table
    pub fn clamped(&self) -> i64 {
        self.delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

/// Diffs `current` against `baseline`, returning only non-zero deltas.
///
/// Without a baseline every entry is new. Accounts missing from `current`
/// are reported with a zero balance and the negation of their prior balance.
pub fn compute_deltas(
    current: &[LedgerEntry],
    baseline: Option<&[LedgerEntry]>,
    mode: LedgerIdentity,
) -> Vec<LedgerDelta> {
    let baseline = baseline.unwrap_or_default();
    let mut previous: HashMap<String, &LedgerEntry> = HashMap::with_capacity(baseline.len());
    let mut order = Vec::with_capacity(baseline.len());
    for entry in baseline {
        let identity = entry.identity(mode);
        if previous.insert(identity.clone(), entry).is_none() {
            order.push(identity);
        }
    }

    let mut deltas = vec![];
    for entry in current {
        let identity = entry.identity(mode);
        let prior = previous.remove(&identity).map_or(0, |e| e.balance);
        let delta = entry.balance as i128 - prior as i128;

        if delta != 0 {
            deltas.push(LedgerDelta::new(entry, identity, entry.balance, delta));
        }
    }

    // withdrawn accounts
    for identity in order {
        if let Some(entry) = previous.remove(&identity) {
            if entry.balance != 0 {
                let delta = -(entry.balance as i128);
                deltas.push(LedgerDelta::new(entry, identity, 0, delta));
            }
        }
    }
    deltas
}
