pub mod parser;

use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

/// 32 byte block digest
#[derive(Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct BlockHash(pub [u8; HASHLEN]);

impl BlockHash {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let hash: [u8; HASHLEN] = bytes.try_into().ok()?;
        Some(Self(hash))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        Self::from_bytes(&hex::decode(hex).ok()?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, as used in archive file names
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Genesis,
    Neogenesis,
    Normal,
    Pseudo,
    Invalid,
}

impl BlockType {
    /// Carries a ledger snapshot rather than transactions
    pub fn has_ledger(&self) -> bool {
        matches!(self, Self::Genesis | Self::Neogenesis)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Genesis => "genesis",
            Self::Neogenesis => "neogenesis",
            Self::Normal => "normal",
            Self::Pseudo => "pseudo",
            Self::Invalid => "invalid",
        };
        write!(f, "{name}")
    }
}

/// Canonical archive name `b<16 hex bnum>x<8 hex bhash>.bc`
pub fn archive_file_name(bnum: u64, bhash: &BlockHash) -> String {
    format!("b{bnum:016x}x{}.{BLOCK_FILE_EXT}", bhash.prefix())
}

pub fn is_valid_block_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == BLOCK_FILE_EXT)
}
