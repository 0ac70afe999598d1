//! Command line and environment configuration

use crate::{
    constants::*,
    ingest::block::BlockIngestorConfig,
    ledger::LedgerIdentity,
    network::NetworkConfig,
    server::{GeoConfig, IndexerConfiguration},
    watcher::WatchTimings,
};
use clap::Parser;
use log::LevelFilter;
use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct LogLevelFilter(pub LevelFilter);

impl std::str::FromStr for LogLevelFilter {
    type Err = <LevelFilter as std::str::FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LevelFilter::from_str(s).map(Self)
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self(LevelFilter::Info)
    }
}

impl std::fmt::Display for LogLevelFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block ingestion and storage options shared by every subcommand
#[derive(Parser, Debug, Clone)]
pub struct StoreArgs {
    /// Directory to archive raw block files to
    #[arg(long, env = "ARCHIVEDIR", default_value = DEFAULT_ARCHIVE_DIR)]
    pub archive_dir: PathBuf,

    /// Directory to back up blocks to while the store is failing
    #[arg(long, env = "BACKUPDIR", default_value = DEFAULT_BACKUP_DIR)]
    pub backup_dir: PathBuf,

    /// Path to directory for speedb
    #[arg(long, env = "DBDIR", default_value = DEFAULT_DATABASE_DIR)]
    pub database_dir: PathBuf,

    /// Identity of balance delta rows (`tag` or `address-hash`)
    #[arg(long, env = "LEDGER_IDENTITY", default_value_t = LedgerIdentity::Tag)]
    pub ledger_identity: LedgerIdentity,

    /// Max stderr log level
    #[arg(long, env = "LOG_LEVEL", default_value_t = LogLevelFilter::default())]
    pub log_level: LogLevelFilter,

    /// Seconds to let an in-flight block finish after a shutdown request
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,
}

impl StoreArgs {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn ingestor_config(&self) -> BlockIngestorConfig {
        BlockIngestorConfig {
            archive_dir: self.archive_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            ledger_identity: self.ledger_identity,
            recovery_timings: WatchTimings::default(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Directory the node writes block files to
    #[arg(long, env = "BCDIR", default_value = DEFAULT_BLOCK_DIR)]
    pub block_dir: PathBuf,

    /// The node's mempool file
    #[arg(long, env = "TXCLEAN", default_value = DEFAULT_MEMPOOL_FILE)]
    pub mempool_file: PathBuf,

    /// Web server hostname for REST and the event stream
    #[arg(long, env = "WEB_HOSTNAME", default_value = "localhost")]
    pub web_hostname: String,

    /// Web server port for REST and the event stream
    #[arg(long, env = "WEB_PORT", default_value_t = 8080)]
    pub web_port: u16,

    /// Bootstrap node of the peer scan
    #[arg(long, env = "NODEIP", default_value = DEFAULT_NODE_IP)]
    pub node_ip: Ipv4Addr,

    /// Max concurrent peer scans
    #[arg(long, env = "MAXSCAN", default_value_t = DEFAULT_MAX_SCAN)]
    pub max_scan: usize,

    /// Seconds a peer stays cached without a healthy contact
    #[arg(long, env = "MAXNODEAGE", default_value_t = DEFAULT_MAX_NODE_AGE_SECS)]
    pub max_node_age: u64,

    /// Max cached geolocation lookups
    #[arg(long, env = "MAXIPNUM", default_value_t = DEFAULT_MAX_IP_NUM)]
    pub max_ip_num: usize,

    /// Seconds a geolocation lookup stays cached
    #[arg(long, env = "MAXIPAGE", default_value_t = DEFAULT_MAX_IP_AGE_SECS)]
    pub max_ip_age: u64,

    /// ipinfo.io token, geolocation is disabled without one
    #[arg(long, env = "IPINFOTOKEN")]
    pub ipinfo_token: Option<String>,
}

impl ServerArgs {
    /// Peer network options changed from their defaults. These only take
    /// effect with a peer protocol backend.
    pub fn network_overrides(&self) -> Vec<&'static str> {
        let mut overrides = vec![];
        if self.node_ip.to_string() != DEFAULT_NODE_IP {
            overrides.push("node-ip");
        }
        if self.max_scan != DEFAULT_MAX_SCAN {
            overrides.push("max-scan");
        }
        if self.max_node_age != DEFAULT_MAX_NODE_AGE_SECS {
            overrides.push("max-node-age");
        }
        if self.max_ip_num != DEFAULT_MAX_IP_NUM {
            overrides.push("max-ip-num");
        }
        if self.max_ip_age != DEFAULT_MAX_IP_AGE_SECS {
            overrides.push("max-ip-age");
        }
        if self.ipinfo_token.is_some() {
            overrides.push("ipinfo-token");
        }
        overrides
    }
}

impl From<ServerArgs> for IndexerConfiguration {
    fn from(args: ServerArgs) -> Self {
        let ingest = args.store.ingestor_config();
        Self {
            block_dir: args.block_dir,
            mempool_file: args.mempool_file,
            ingest,
            network: NetworkConfig {
                bootstrap: args.node_ip,
                max_scan: args.max_scan,
                max_node_age: Duration::from_secs(args.max_node_age),
                ..Default::default()
            },
            geo: args.ipinfo_token.map(|token| GeoConfig {
                token,
                max_entries: args.max_ip_num,
                max_age: Duration::from_secs(args.max_ip_age),
            }),
            web_hostname: args.web_hostname,
            web_port: args.web_port,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ImportArgs {
    /// Directory of block files to import
    pub dir: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,
}
