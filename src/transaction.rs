//! Transaction entries, as found in transaction blocks and the mempool
//! (`txclean.dat`)

use crate::{
    constants::*,
    ledger::{Address, LedgerError},
};
use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};

const SRC: usize = 0;
const DST: usize = SRC + TXADDRLEN;
const CHG: usize = DST + TXADDRLEN;
const SEND_TOTAL: usize = CHG + TXADDRLEN;
const CHANGE_TOTAL: usize = SEND_TOTAL + TXAMOUNT;
const TX_FEE: usize = CHANGE_TOTAL + TXAMOUNT;
const TX_SIG: usize = TX_FEE + TXAMOUNT;
const TX_ID: usize = TX_SIG + TXSIGLEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub txid: String,
    pub tx_signature_hash: String,
    pub source: Address,
    pub destination: Address,
    pub change: Address,
    pub send_total: u64,
    pub change_total: u64,
    pub fee: u64,

    /// SHA-256 of the raw entry, used to deduplicate mempool reads
    pub content_hash: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction entry must be {TXENTRY_LEN} bytes, got {0}")]
    Length(usize),

    #[error(transparent)]
    Address(#[from] LedgerError),
}

impl TransactionRecord {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        if bytes.len() != TXENTRY_LEN {
            return Err(TransactionError::Length(bytes.len()));
        }

        Ok(Self {
            txid: hex::encode(&bytes[TX_ID..TX_ID + HASHLEN]),
            tx_signature_hash: hex::encode(Sha256::digest(&bytes[TX_SIG..TX_ID])),
            source: Address::try_from(&bytes[SRC..DST])?,
            destination: Address::try_from(&bytes[DST..CHG])?,
            change: Address::try_from(&bytes[CHG..SEND_TOTAL])?,
            send_total: LittleEndian::read_u64(&bytes[SEND_TOTAL..CHANGE_TOTAL]),
            change_total: LittleEndian::read_u64(&bytes[CHANGE_TOTAL..TX_FEE]),
            fee: LittleEndian::read_u64(&bytes[TX_FEE..TX_SIG]),
            content_hash: hex::encode(Sha256::digest(bytes)),
        })
    }

    /// Splits a buffer of whole entries into records
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<Self>, TransactionError> {
        if bytes.len() % TXENTRY_LEN != 0 {
            return Err(TransactionError::Length(bytes.len()));
        }
        bytes.chunks_exact(TXENTRY_LEN).map(Self::from_bytes).collect()
    }
}
