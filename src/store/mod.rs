//! Persistence collaborator shared by the ingestors and the query API

pub mod query;
pub mod row;
pub mod speedb_impl;

pub use self::{
    query::{Comparison, Query, QueryError},
    row::{BalanceRow, BlockRow, Row, Table, TransactionRow, Value},
    speedb_impl::SpeedbStore,
};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key in {table}")]
    DuplicateKey { table: Table },

    #[error("store is closed")]
    Closed,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Database(#[from] speedb::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl StoreError {
    /// Duplicates are expected under replay and are not failures
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Inserts a new row, failing with [StoreError::DuplicateKey] if its key
    /// is already present
    async fn insert_row(&self, row: Row) -> Result<u64, StoreError>;

    /// Upserts `rows`, returning the number written
    async fn bulk_load(&self, rows: Vec<Row>) -> Result<u64, StoreError>;

    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Transaction with content hash `hash`, if recorded
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRow>, StoreError>;

    /// Opens a dedicated write scope. Nothing staged in it is visible until
    /// [TransactionScope::commit]; dropping the scope discards it.
    async fn scope(&self) -> Result<Box<dyn TransactionScope>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TransactionScope: Send {
    async fn bulk_load(&mut self, rows: Vec<Row>) -> Result<u64, StoreError>;

    /// Stages deletion of every committed row of `table` matching `query`
    async fn delete(&mut self, table: Table, query: &Query) -> Result<u64, StoreError>;

    /// Stages deletion of every committed balance row of block `(bnum, bhash)`
    async fn delete_block_balances(&mut self, bnum: u64, bhash: &str) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
