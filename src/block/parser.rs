use super::{archive_file_name, BlockHash, BlockType};
use crate::{
    constants::*,
    ledger::{Address, LedgerEntry, LedgerError},
    transaction::{TransactionError, TransactionRecord},
};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("invalid block size {0}")]
    Size(usize),

    #[error("block hash mismatch: embedded {embedded}, computed {computed}")]
    HashMismatch {
        embedded: BlockHash,
        computed: BlockHash,
    },

    #[error("invalid block type for block {bnum} ({size} bytes)")]
    InvalidType { bnum: u64, size: usize },

    #[error("block {bnum} declares {declared} transactions, found {found}")]
    TransactionCount {
        bnum: u64,
        declared: u32,
        found: usize,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Fixed 160 byte block trailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTrailer {
    pub phash: BlockHash,
    pub bnum: u64,
    pub mfee: u64,
    pub tcount: u32,
    pub time0: u32,
    pub difficulty: u32,
    pub mroot: BlockHash,
    pub nonce: BlockHash,
    pub stime: u32,
    pub bhash: BlockHash,
}

impl BlockTrailer {
    /// Parses the trailer from the last [BTRAILER_LEN] bytes of `bytes`
    pub fn from_block_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() < BTRAILER_LEN {
            return Err(BlockError::Size(bytes.len()));
        }

        let t = &bytes[bytes.len() - BTRAILER_LEN..];
        let hash = |offset: usize| {
            BlockHash::from_bytes(&t[offset..offset + HASHLEN]).unwrap_or_default()
        };
        Ok(Self {
            phash: hash(0),
            bnum: LittleEndian::read_u64(&t[32..40]),
            mfee: LittleEndian::read_u64(&t[40..48]),
            tcount: LittleEndian::read_u32(&t[48..52]),
            time0: LittleEndian::read_u32(&t[52..56]),
            difficulty: LittleEndian::read_u32(&t[56..60]),
            mroot: hash(60),
            nonce: hash(92),
            stime: LittleEndian::read_u32(&t[124..128]),
            bhash: hash(128),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockBody {
    Transactions(Vec<TransactionRecord>),
    Ledger(Vec<LedgerEntry>),
    Empty,
}

/// Validated Mochimo block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub trailer: BlockTrailer,
    pub block_type: BlockType,
    pub size: usize,
    pub miner_address: Option<Address>,
    pub miner_reward: u64,
    pub body: BlockBody,
}

/// Checks the length against both block layouts
pub fn is_valid_block_size(len: usize) -> bool {
    len >= PSEUDO_BLOCK_LEN
        && (len % LENTRY_LEN == LEDGER_BLOCK_MODULUS_REMAINDER
            || len % TXENTRY_LEN == NORMAL_BLOCK_MODULUS_REMAINDER)
}

/// SHA-256 of everything but the trailing hash field
pub fn compute_hash(bytes: &[u8]) -> BlockHash {
    let end = bytes.len().saturating_sub(HASHLEN);
    let digest = Sha256::digest(&bytes[..end]);

    let mut hash = [0; HASHLEN];
    hash.copy_from_slice(&digest);
    BlockHash(hash)
}

impl BlockRecord {
    pub fn verify_hash(bytes: &[u8]) -> bool {
        bytes.len() >= BTRAILER_LEN && compute_hash(bytes).0 == bytes[bytes.len() - HASHLEN..]
    }

    /// Parses and validates raw block bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        let size = bytes.len();
        if !is_valid_block_size(size) {
            return Err(BlockError::Size(size));
        }

        let trailer = BlockTrailer::from_block_bytes(bytes)?;
        let computed = compute_hash(bytes);
        if computed != trailer.bhash {
            return Err(BlockError::HashMismatch {
                embedded: trailer.bhash,
                computed,
            });
        }

        let hdrlen = LittleEndian::read_u32(&bytes[..4]) as usize;
        let block_type = if trailer.bnum == 0 {
            BlockType::Genesis
        } else if trailer.bnum & 0xff == 0 {
            BlockType::Neogenesis
        } else if hdrlen == BHEADER_LEN {
            BlockType::Normal
        } else if size == PSEUDO_BLOCK_LEN {
            BlockType::Pseudo
        } else {
            BlockType::Invalid
        };

        let body_end = size - BTRAILER_LEN;
        let (miner_address, miner_reward, body) = match block_type {
            BlockType::Genesis | BlockType::Neogenesis => {
                if size % LENTRY_LEN != LEDGER_BLOCK_MODULUS_REMAINDER {
                    return Err(BlockError::Size(size));
                }

                let entries = bytes[LHEADER_LEN..body_end]
                    .chunks_exact(LENTRY_LEN)
                    .map(LedgerEntry::from_bytes)
                    .collect::<Result<Vec<_>, _>>()?;
                (None, 0, BlockBody::Ledger(entries))
            }
            BlockType::Normal => {
                if size % TXENTRY_LEN != NORMAL_BLOCK_MODULUS_REMAINDER {
                    return Err(BlockError::Size(size));
                }

                let maddr = Address::try_from(&bytes[4..4 + TXADDRLEN])?;
                let mreward = LittleEndian::read_u64(&bytes[4 + TXADDRLEN..BHEADER_LEN]);
                let txs = TransactionRecord::parse_all(&bytes[BHEADER_LEN..body_end])?;
                if txs.len() != trailer.tcount as usize {
                    return Err(BlockError::TransactionCount {
                        bnum: trailer.bnum,
                        declared: trailer.tcount,
                        found: txs.len(),
                    });
                }
                (Some(maddr), mreward, BlockBody::Transactions(txs))
            }
            BlockType::Pseudo => (None, 0, BlockBody::Empty),
            BlockType::Invalid => {
                return Err(BlockError::InvalidType {
                    bnum: trailer.bnum,
                    size,
                })
            }
        };

        Ok(Self {
            trailer,
            block_type,
            size,
            miner_address,
            miner_reward,
            body,
        })
    }

    pub fn bnum(&self) -> u64 {
        self.trailer.bnum
    }

    pub fn bhash(&self) -> &BlockHash {
        &self.trailer.bhash
    }

    pub fn phash(&self) -> &BlockHash {
        &self.trailer.phash
    }

    pub fn created(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.trailer.stime as i64, 0).unwrap_or_default()
    }

    pub fn started(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.trailer.time0 as i64, 0).unwrap_or_default()
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        match &self.body {
            BlockBody::Transactions(txs) => txs,
            _ => &[],
        }
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        match &self.body {
            BlockBody::Ledger(entries) => entries,
            _ => &[],
        }
    }

    /// Number of transactions or ledger entries
    pub fn count(&self) -> u64 {
        match &self.body {
            BlockBody::Transactions(txs) => txs.len() as u64,
            BlockBody::Ledger(entries) => entries.len() as u64,
            BlockBody::Empty => 0,
        }
    }

    /// Sum of send totals or ledger balances, saturated at `u64::MAX`
    pub fn total_amount(&self) -> u64 {
        let sum: u128 = match &self.body {
            BlockBody::Transactions(txs) => txs.iter().map(|tx| tx.send_total as u128).sum(),
            BlockBody::Ledger(entries) => entries.iter().map(|e| e.balance as u128).sum(),
            BlockBody::Empty => 0,
        };
        sum.min(u64::MAX as u128) as u64
    }

    pub fn archive_file_name(&self) -> String {
        archive_file_name(self.bnum(), self.bhash())
    }

    pub fn summary(&self) -> String {
        format!("{} block {} ({})", self.block_type, self.bnum(), self.bhash().prefix())
    }
}
