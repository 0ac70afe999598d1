//! Typed rows of the four indexer tables

use crate::{
    block::{parser::BlockRecord, BlockType},
    ledger::{delta::LedgerDelta, richlist::RichListEntry},
    transaction::TransactionRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Blocks,
    Transactions,
    Richlist,
    Balances,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Blocks,
        Table::Transactions,
        Table::Richlist,
        Table::Balances,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::Transactions => "transactions",
            Self::Richlist => "richlist",
            Self::Balances => "balances",
        }
    }

    /// Queryable columns
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Blocks => &[
                "bnum",
                "bhash",
                "phash",
                "type",
                "size",
                "difficulty",
                "created",
                "started",
                "mroot",
                "nonce",
                "maddr",
                "mreward",
                "mfee",
                "amount",
                "count",
            ],
            Self::Transactions => &[
                "created",
                "confirmed",
                "bnum",
                "bhash",
                "txid",
                "txsig",
                "hash",
                "srcaddr",
                "srctag",
                "dstaddr",
                "dsttag",
                "chgaddr",
                "chgtag",
                "sendtotal",
                "changetotal",
                "txfee",
            ],
            Self::Richlist => &["rank", "address", "addresshash", "tag", "balance"],
            Self::Balances => &[
                "created",
                "bnum",
                "bhash",
                "identity",
                "address",
                "addresshash",
                "tag",
                "balance",
                "delta",
            ],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Column value, as compared by queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i128),
    Text(String),
    Null,
}

impl Value {
    /// SQL-like ordering, `None` when either side is null
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => Some(a.to_string().cmp(&b.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value as i128)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value as i128)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i128)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Int(value.timestamp() as i128)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
    pub bnum: u64,
    pub bhash: String,
    pub phash: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub size: u64,
    pub difficulty: u32,
    pub created: DateTime<Utc>,
    pub started: DateTime<Utc>,
    pub mroot: String,
    pub nonce: String,
    pub maddr: Option<String>,
    pub mreward: u64,
    pub mfee: u64,
    pub amount: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub created: DateTime<Utc>,
    pub confirmed: Option<DateTime<Utc>>,
    pub bnum: Option<u64>,
    pub bhash: Option<String>,
    pub txid: String,
    pub txsig: String,
    pub hash: String,
    pub srcaddr: String,
    pub srctag: Option<String>,
    pub dstaddr: String,
    pub dsttag: Option<String>,
    pub chgaddr: String,
    pub chgtag: Option<String>,
    pub sendtotal: u64,
    pub changetotal: u64,
    pub txfee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub created: DateTime<Utc>,
    pub bnum: u64,
    pub bhash: String,
    pub identity: String,
    pub address: String,
    pub addresshash: String,
    pub tag: Option<String>,
    pub balance: u64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Row {
    Block(BlockRow),
    Transaction(TransactionRow),
    Richlist(RichListEntry),
    Balance(BalanceRow),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::Block(_) => Table::Blocks,
            Row::Transaction(_) => Table::Transactions,
            Row::Richlist(_) => Table::Richlist,
            Row::Balance(_) => Table::Balances,
        }
    }

    /// Primary key bytes
    ///
    /// - blocks: `{bnum BE}{bhash}`
    /// - transactions: `{txid}{txsig}`, shared by the mempool row and the
    ///   confirmed row of the same transaction
    /// - richlist: `{rank BE}`
    /// - balances: `{bnum BE}{bhash}{identity}`
    pub fn key(&self) -> Vec<u8> {
        match self {
            Row::Block(b) => [b.bnum.to_be_bytes().as_slice(), b.bhash.as_bytes()].concat(),
            Row::Transaction(t) => [t.txid.as_bytes(), t.txsig.as_bytes()].concat(),
            Row::Richlist(r) => r.rank.to_be_bytes().to_vec(),
            Row::Balance(b) => [
                BalanceRow::key_prefix(b.bnum, &b.bhash),
                b.identity.as_bytes().to_vec(),
            ]
            .concat(),
        }
    }

    pub fn column(&self, name: &str) -> Option<Value> {
        let value: Value = match self {
            Row::Block(b) => match name {
                "bnum" => b.bnum.into(),
                "bhash" => b.bhash.as_str().into(),
                "phash" => b.phash.as_str().into(),
                "type" => b.block_type.to_string().into(),
                "size" => b.size.into(),
                "difficulty" => b.difficulty.into(),
                "created" => b.created.into(),
                "started" => b.started.into(),
                "mroot" => b.mroot.as_str().into(),
                "nonce" => b.nonce.as_str().into(),
                "maddr" => b.maddr.clone().into(),
                "mreward" => b.mreward.into(),
                "mfee" => b.mfee.into(),
                "amount" => b.amount.into(),
                "count" => b.count.into(),
                _ => return None,
            },
            Row::Transaction(t) => match name {
                "created" => t.created.into(),
                "confirmed" => t.confirmed.into(),
                "bnum" => t.bnum.into(),
                "bhash" => t.bhash.clone().into(),
                "txid" => t.txid.as_str().into(),
                "txsig" => t.txsig.as_str().into(),
                "hash" => t.hash.as_str().into(),
                "srcaddr" => t.srcaddr.as_str().into(),
                "srctag" => t.srctag.clone().into(),
                "dstaddr" => t.dstaddr.as_str().into(),
                "dsttag" => t.dsttag.clone().into(),
                "chgaddr" => t.chgaddr.as_str().into(),
                "chgtag" => t.chgtag.clone().into(),
                "sendtotal" => t.sendtotal.into(),
                "changetotal" => t.changetotal.into(),
                "txfee" => t.txfee.into(),
                _ => return None,
            },
            Row::Richlist(r) => match name {
                "rank" => r.rank.into(),
                "address" => r.address.as_str().into(),
                "addresshash" => r.address_hash.as_str().into(),
                "tag" => r.tag.clone().into(),
                "balance" => r.balance.into(),
                _ => return None,
            },
            Row::Balance(b) => match name {
                "created" => b.created.into(),
                "bnum" => b.bnum.into(),
                "bhash" => b.bhash.as_str().into(),
                "identity" => b.identity.as_str().into(),
                "address" => b.address.as_str().into(),
                "addresshash" => b.addresshash.as_str().into(),
                "tag" => b.tag.clone().into(),
                "balance" => b.balance.into(),
                "delta" => b.delta.into(),
                _ => return None,
            },
        };
        Some(value)
    }

    /// Merges `self` over an existing row with the same key
    pub fn upsert_onto(self, existing: &Row) -> Row {
        match (self, existing) {
            (Row::Transaction(mut new), Row::Transaction(old)) => {
                new.created = old.created;
                Row::Transaction(new)
            }
            (Row::Balance(mut new), Row::Balance(old)) => {
                new.created = old.created;
                Row::Balance(new)
            }
            (new, _) => new,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Row::Block(r) => serde_json::to_vec(r),
            Row::Transaction(r) => serde_json::to_vec(r),
            Row::Richlist(r) => serde_json::to_vec(r),
            Row::Balance(r) => serde_json::to_vec(r),
        }
    }

    pub fn from_bytes(table: Table, bytes: &[u8]) -> serde_json::Result<Row> {
        Ok(match table {
            Table::Blocks => Row::Block(serde_json::from_slice(bytes)?),
            Table::Transactions => Row::Transaction(serde_json::from_slice(bytes)?),
            Table::Richlist => Row::Richlist(serde_json::from_slice(bytes)?),
            Table::Balances => Row::Balance(serde_json::from_slice(bytes)?),
        })
    }
}

impl From<&BlockRecord> for BlockRow {
    fn from(block: &BlockRecord) -> Self {
        Self {
            bnum: block.bnum(),
            bhash: block.bhash().to_hex(),
            phash: block.phash().to_hex(),
            block_type: block.block_type,
            size: block.size as u64,
            difficulty: block.trailer.difficulty,
            created: block.created(),
            started: block.started(),
            mroot: block.trailer.mroot.to_hex(),
            nonce: block.trailer.nonce.to_hex(),
            maddr: block.miner_address.as_ref().map(|a| a.short_hex()),
            mreward: block.miner_reward,
            mfee: block.trailer.mfee,
            amount: block.total_amount(),
            count: block.count(),
        }
    }
}

impl TransactionRow {
    /// Row of a transaction still in the mempool
    pub fn unconfirmed(tx: &TransactionRecord, created: DateTime<Utc>) -> Self {
        Self {
            created,
            confirmed: None,
            bnum: None,
            bhash: None,
            txid: tx.txid.clone(),
            txsig: tx.tx_signature_hash.clone(),
            hash: tx.content_hash.clone(),
            srcaddr: tx.source.short_hex(),
            srctag: tx.source.tag().map(|t| t.to_string()),
            dstaddr: tx.destination.short_hex(),
            dsttag: tx.destination.tag().map(|t| t.to_string()),
            chgaddr: tx.change.short_hex(),
            chgtag: tx.change.tag().map(|t| t.to_string()),
            sendtotal: tx.send_total,
            changetotal: tx.change_total,
            txfee: tx.fee,
        }
    }

    /// Row of a transaction included in `block`
    pub fn confirmed(tx: &TransactionRecord, block: &BlockRecord) -> Self {
        let created = block.created();
        Self {
            confirmed: Some(created),
            bnum: Some(block.bnum()),
            bhash: Some(block.bhash().to_hex()),
            ..Self::unconfirmed(tx, created)
        }
    }
}

impl BalanceRow {
    /// Key prefix of every balance row of block `(bnum, bhash)`
    pub fn key_prefix(bnum: u64, bhash: &str) -> Vec<u8> {
        [bnum.to_be_bytes().as_slice(), bhash.as_bytes()].concat()
    }

    pub fn from_delta(delta: &LedgerDelta, block: &BlockRecord) -> Self {
        Self {
            created: block.created(),
            bnum: block.bnum(),
            bhash: block.bhash().to_hex(),
            identity: delta.identity.clone(),
            address: delta.address.clone(),
            addresshash: delta.address_hash.clone(),
            tag: delta.tag.clone(),
            balance: delta.balance,
            delta: delta.clamped(),
        }
    }
}
