//! Mochimo addresses and ledger entries, plus the two projections derived
//! from a (neo)genesis ledger: the [richlist] and the [delta]s against the
//! previous epoch

pub mod delta;
pub mod richlist;

use crate::constants::*;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("address must be {TXADDRLEN} bytes, got {0}")]
    AddressLength(usize),

    #[error("ledger entry must be {LENTRY_LEN} bytes, got {0}")]
    EntryLength(usize),
}

/// Full WOTS+ address
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(Box<[u8]>);

/// Alias carried in the trailing [TXTAGLEN] bytes of an address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag([u8; TXTAGLEN]);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Tag of the address, if it is tagged
    pub fn tag(&self) -> Option<Tag> {
        let mut tag = [0; TXTAGLEN];
        tag.copy_from_slice(&self.0[TXADDRLEN - TXTAGLEN..]);

        if tag[0] == UNTAGGED_MARKER {
            None
        } else {
            Some(Tag(tag))
        }
    }

    /// Hex of the first 32 bytes, the form addresses are displayed in
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..HASHLEN])
    }

    /// SHA-256 of the full address in lowercase hex
    pub fn address_hash(&self) -> String {
        let digest = Sha256::digest(hex::encode(&self.0).as_bytes());
        hex::encode(digest)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = LedgerError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != TXADDRLEN {
            return Err(LedgerError::AddressLength(bytes.len()));
        }
        Ok(Self(bytes.into()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short_hex())
    }
}

impl Tag {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// Which key identifies an account across two ledgers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerIdentity {
    /// tag when the address is tagged, otherwise the address hash
    #[default]
    Tag,

    /// always the address hash
    AddressHash,
}

impl FromStr for LedgerIdentity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tag" => Ok(Self::Tag),
            "address-hash" => Ok(Self::AddressHash),
            _ => anyhow::bail!("invalid ledger identity {s:?}, expected tag or address-hash"),
        }
    }
}

impl fmt::Display for LedgerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag => write!(f, "tag"),
            Self::AddressHash => write!(f, "address-hash"),
        }
    }
}

/// One account of a (neo)genesis ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub address: Address,
    pub balance: u64,
}

impl LedgerEntry {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        if bytes.len() != LENTRY_LEN {
            return Err(LedgerError::EntryLength(bytes.len()));
        }

        Ok(Self {
            address: Address::try_from(&bytes[..TXADDRLEN])?,
            balance: LittleEndian::read_u64(&bytes[TXADDRLEN..]),
        })
    }

    pub fn identity(&self, mode: LedgerIdentity) -> String {
        match (mode, self.address.tag()) {
            (LedgerIdentity::Tag, Some(tag)) => tag.to_string(),
            _ => self.address.address_hash(),
        }
    }
}
