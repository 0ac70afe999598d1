pub mod block;
pub mod cli;
pub mod constants;
pub mod event;
pub mod ingest;
pub mod ledger;
pub mod network;
pub mod server;
pub mod store;
pub mod transaction;
pub mod watcher;
pub mod web;
