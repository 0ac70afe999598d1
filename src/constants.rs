use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// binary record layout

/// Length of a full (WOTS+) address in bytes
pub const TXADDRLEN: usize = 2208;

/// Length of the tag carried in the trailing bytes of an address
pub const TXTAGLEN: usize = 12;

/// First tag byte of an untagged address
pub const UNTAGGED_MARKER: u8 = 0x42;

/// Length of a transaction signature in bytes
pub const TXSIGLEN: usize = 2144;

/// Length of a 32 byte digest (block hash, txid, merkle root, nonce)
pub const HASHLEN: usize = 32;

/// Length of an amount field
pub const TXAMOUNT: usize = 8;

/// Ledger entry: address + balance
pub const LENTRY_LEN: usize = TXADDRLEN + TXAMOUNT;

/// Transaction entry: 3 addresses, 3 amounts, signature, txid
pub const TXENTRY_LEN: usize = 3 * TXADDRLEN + 3 * TXAMOUNT + TXSIGLEN + HASHLEN;

/// Header of a transaction block: hdrlen, miner address, miner reward
pub const BHEADER_LEN: usize = 4 + TXADDRLEN + TXAMOUNT;

/// Header of a ledger-style block: hdrlen only
pub const LHEADER_LEN: usize = 4;

/// Block trailer: phash, bnum, mfee, tcount, time0, difficulty, mroot, nonce, stime, bhash
pub const BTRAILER_LEN: usize = HASHLEN + 8 + 8 + 4 + 4 + 4 + HASHLEN + HASHLEN + 4 + HASHLEN;

/// `len % LENTRY_LEN` of every valid ledger-style or pseudo block
pub const LEDGER_BLOCK_MODULUS_REMAINDER: usize = LHEADER_LEN + BTRAILER_LEN;

/// `len % TXENTRY_LEN` of every valid transaction block
pub const NORMAL_BLOCK_MODULUS_REMAINDER: usize = BHEADER_LEN + BTRAILER_LEN;

/// Length of a pseudo block (header + trailer, no body)
pub const PSEUDO_BLOCK_LEN: usize = LHEADER_LEN + BTRAILER_LEN;

/// Neogenesis blocks occur every 256 blocks
pub const NEOGENESIS_INTERVAL: u64 = 256;

/// Block file suffix
pub const BLOCK_FILE_EXT: &str = "bc";

// file watching

pub const WATCH_INIT_RETRY: Duration = Duration::from_secs(5);
pub const WATCH_RENAME_REINIT: Duration = Duration::from_secs(1);
pub const SCAN_ONLY_INTERVAL: Duration = Duration::from_secs(5);
pub const WATCH_CHANNEL_CAPACITY: usize = 4096;

// peer network

pub const DEFAULT_NODE_IP: &str = "127.0.0.1";
pub const DEFAULT_MAX_SCAN: usize = 128;
pub const DEFAULT_MAX_NODE_AGE_SECS: u64 = 3 * 24 * 60 * 60;
pub const DEFAULT_MAX_IP_NUM: usize = 5000;
pub const DEFAULT_MAX_IP_AGE_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_MAX_PEER_CACHE: usize = 0x10000;

pub const SCAN_LOOP_INTERVAL: Duration = Duration::from_secs(1);
pub const SCAN_DEFER_DELAY: Duration = Duration::from_secs(1);
pub const NETWORK_IDLE_THRESHOLD: Duration = Duration::from_secs(30);
pub const RESCAN_COOLDOWN_MS: u64 = 30_000;

/// Number of agreeing peers for a confident consensus answer
pub const CONSENSUS_MIN_AGREEMENT: usize = 3;

// query api

pub const QUERY_LIMIT_DEFAULT: usize = 10;
pub const QUERY_LIMIT_MAX: usize = 100;
pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// defaults

pub const DEFAULT_BLOCK_DIR: &str = "/home/mochimo/mochimo/bin/d/bc";
pub const DEFAULT_MEMPOOL_FILE: &str = "/home/mochimo/mochimo/bin/d/txclean.dat";
pub const DEFAULT_ARCHIVE_DIR: &str = "./archive";

/// Seconds subsystems get to finish after a shutdown request, enough for a
/// neogenesis ledger to persist
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_BACKUP_DIR: &str = "./backup";
pub const DEFAULT_DATABASE_DIR: &str = "./mochimap-db";
