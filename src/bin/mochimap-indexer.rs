use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use mochimap_indexer::{
    cli::{ImportArgs, LogLevelFilter, ServerArgs},
    constants::VERSION,
    server::{import_blocks, start_indexer, IndexerConfiguration},
    store::{Persistence, SpeedbStore},
};
use std::{sync::Arc, time::Duration};
use stderrlog::{ColorChoice, Timestamp};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

#[derive(Parser, Debug)]
#[command(name = "mochimap-indexer", author, version = VERSION, about, long_about = Some("MochiMap Indexer\n\n\
Index the Mochimo blockchain, mempool and network from a node's local state"))]
struct Cli {
    #[command(subcommand)]
    command: IndexerCommand,
}

#[derive(Subcommand, Debug)]
enum IndexerCommand {
    /// Server commands
    Server {
        #[command(subcommand)]
        server_command: ServerCommand,
    },
    /// Import a directory of block files into the store
    Import(ImportArgs),
}

#[derive(Subcommand, Debug)]
enum ServerCommand {
    /// Start the indexer and web server
    Start(ServerArgs),
}

fn init_logging(level: &LogLevelFilter) -> anyhow::Result<()> {
    stderrlog::new()
        .module(module_path!())
        .color(ColorChoice::Never)
        .timestamp(Timestamp::Microsecond)
        .verbosity(level.0)
        .init()?;
    Ok(())
}

impl IndexerCommand {
    fn shutdown_timeout(&self) -> Duration {
        match self {
            Self::Server {
                server_command: ServerCommand::Start(args),
            } => args.store.shutdown_timeout(),
            Self::Import(args) => args.store.shutdown_timeout(),
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let shutdown_timeout = args.command.shutdown_timeout();

    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("Main", |s| async move {
            match args.command {
                IndexerCommand::Server { server_command } => server_command.run(s).await,
                IndexerCommand::Import(args) => import(args).await,
            }
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(shutdown_timeout)
    .await
    .map_err(Into::into)
}

impl ServerCommand {
    async fn run(self, subsys: SubsystemHandle) -> anyhow::Result<()> {
        let ServerCommand::Start(args) = self;
        init_logging(&args.store.log_level)?;

        let ignored = args.network_overrides();
        if !ignored.is_empty() {
            warn!(
                "No peer protocol backend, ignoring --{}",
                ignored.join(", --")
            );
        }

        let database_dir = args.store.database_dir.clone();
        debug!("Opening the store in {}", database_dir.display());
        let store: Arc<dyn Persistence> = Arc::new(SpeedbStore::open(&database_dir)?);

        let config = IndexerConfiguration::from(args);
        subsys.start(SubsystemBuilder::new("Indexer", move |s| {
            start_indexer(s, config, store, None)
        }));
        Ok(())
    }
}

async fn import(args: ImportArgs) -> anyhow::Result<()> {
    init_logging(&args.store.log_level)?;

    let database_dir = args.store.database_dir.clone();
    debug!("Opening the store in {}", database_dir.display());
    let store: Arc<dyn Persistence> = Arc::new(SpeedbStore::open(&database_dir)?);

    let persisted = import_blocks(args.dir.clone(), args.store.ingestor_config(), store).await?;
    info!("Imported {persisted} blocks from {}", args.dir.display());
    Ok(())
}
