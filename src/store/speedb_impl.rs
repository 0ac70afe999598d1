use super::{BalanceRow, Persistence, Query, Row, StoreError, Table, TransactionRow, TransactionScope};
use async_trait::async_trait;
use log::{debug, info};
use speedb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode, WriteBatch, DB,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Index of transaction content hash to transaction key
const TX_HASH_CF: &str = "transactions-hash";

/// [Persistence] backed by one speedb column family per [Table]
#[derive(Debug)]
pub struct SpeedbStore {
    pub db_path: PathBuf,
    database: Arc<DB>,
    closed: AtomicBool,

    // serializes read-merge-write sequences
    write_lock: Mutex<()>,
}

fn cf(database: &DB, table: Table) -> &ColumnFamily {
    database
        .cf_handle(table.name())
        .expect("table column family exists")
}

fn tx_hash_cf(database: &DB) -> &ColumnFamily {
    database
        .cf_handle(TX_HASH_CF)
        .expect("transaction hash column family exists")
}

/// Leading key column of `table`, when rows are keyed in its order
fn key_order_column(table: Table) -> Option<&'static str> {
    match table {
        Table::Blocks | Table::Balances => Some("bnum"),
        Table::Richlist => Some("rank"),
        Table::Transactions => None,
    }
}

fn scan(database: &DB, table: Table) -> Result<Vec<(Box<[u8]>, Row)>, StoreError> {
    let mut rows = vec![];
    for item in database.iterator_cf(cf(database, table), IteratorMode::Start) {
        let (key, value) = item?;
        rows.push((key, Row::from_bytes(table, &value)?));
    }
    Ok(rows)
}

/// Matching rows in key order, stopping once `wanted` rows are collected and
/// the leading key column moves past the last of them. Returned in ascending
/// key order.
fn ordered_scan(
    database: &DB,
    table: Table,
    column: &str,
    query: &Query,
    descending: bool,
    wanted: usize,
) -> Result<Vec<Row>, StoreError> {
    let mode = if descending {
        IteratorMode::End
    } else {
        IteratorMode::Start
    };

    let mut rows = vec![];
    let mut boundary = None;
    for item in database.iterator_cf(cf(database, table), mode) {
        let (_, value) = item?;
        let row = Row::from_bytes(table, &value)?;
        let lead = row.column(column);

        if boundary.is_some() && lead != boundary {
            break;
        }
        if query.matches(&row) {
            rows.push(row);
            if boundary.is_none() && rows.len() >= wanted {
                boundary = lead;
            }
        }
    }

    if descending {
        rows.reverse();
    }
    Ok(rows)
}

/// Stages `row` merged over any committed row with its key, along with its
/// index entries
fn stage(database: &DB, batch: &mut WriteBatch, row: Row) -> Result<(), StoreError> {
    let key = row.key();
    let table = row.table();
    let row = match database.get_cf(cf(database, table), &key)? {
        Some(existing) => row.upsert_onto(&Row::from_bytes(table, &existing)?),
        None => row,
    };

    index(database, batch, &row, &key);
    batch.put_cf(cf(database, table), &key, row.to_bytes()?);
    Ok(())
}

fn index(database: &DB, batch: &mut WriteBatch, row: &Row, key: &[u8]) {
    if let Row::Transaction(tx) = row {
        batch.put_cf(tx_hash_cf(database), tx.hash.as_bytes(), key);
    }
}

impl SpeedbStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut cf_opts = speedb::Options::default();
        cf_opts.set_max_write_buffer_number(16);
        cf_opts.set_compression_type(DBCompressionType::Zstd);

        let mut database_opts = speedb::Options::default();
        database_opts.set_compression_type(DBCompressionType::Zstd);
        database_opts.create_missing_column_families(true);
        database_opts.create_if_missing(true);

        let column_families: Vec<ColumnFamilyDescriptor> = Table::ALL
            .iter()
            .map(|table| table.name())
            .chain([TX_HASH_CF])
            .map(|name| ColumnFamilyDescriptor::new(name, cf_opts.clone()))
            .collect();
        let database = DB::open_cf_descriptors(&database_opts, path, column_families)?;

        info!("Opened indexer store at {}", path.display());
        Ok(Self {
            db_path: path.into(),
            database: Arc::new(database),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Persistence for SpeedbStore {
    async fn insert_row(&self, row: Row) -> Result<u64, StoreError> {
        self.check_open()?;
        let table = row.table();
        let key = row.key();

        let _guard = self.lock();
        if self.database.get_pinned_cf(cf(&self.database, table), &key)?.is_some() {
            return Err(StoreError::DuplicateKey { table });
        }

        let mut batch = WriteBatch::default();
        index(&self.database, &mut batch, &row, &key);
        batch.put_cf(cf(&self.database, table), &key, row.to_bytes()?);
        self.database.write(batch)?;
        Ok(1)
    }

    async fn bulk_load(&self, rows: Vec<Row>) -> Result<u64, StoreError> {
        self.check_open()?;
        let _guard = self.lock();

        let mut batch = WriteBatch::default();
        let count = rows.len() as u64;
        for row in rows {
            stage(&self.database, &mut batch, row)?;
        }
        self.database.write(batch)?;
        Ok(count)
    }

    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.check_open()?;

        if let (Some(order), Some(limit)) = (&query.order_by, query.limit) {
            if let Some(column) = key_order_column(table).filter(|c| *c == order.column) {
                let wanted = query.offset.saturating_add(limit);
                let rows = ordered_scan(&self.database, table, column, query, order.descending, wanted)?;
                return Ok(query.apply(rows));
            }
        }

        let rows = scan(&self.database, table)?;
        Ok(query.apply(rows.into_iter().map(|(_, row)| row)))
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionRow>, StoreError> {
        self.check_open()?;
        let Some(key) = self.database.get_cf(tx_hash_cf(&self.database), hash.as_bytes())? else {
            return Ok(None);
        };

        let table = Table::Transactions;
        match self.database.get_cf(cf(&self.database, table), key)? {
            Some(bytes) => match Row::from_bytes(table, &bytes)? {
                Row::Transaction(tx) => Ok(Some(tx)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn scope(&self) -> Result<Box<dyn TransactionScope>, StoreError> {
        self.check_open()?;
        Ok(Box::new(SpeedbScope {
            database: self.database.clone(),
            batch: WriteBatch::default(),
            staged: 0,
        }))
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Flushing indexer store {}", self.db_path.display());
            self.database.flush()?;
            self.database.cancel_all_background_work(true);
        }
        Ok(())
    }
}

/// Staged [WriteBatch], written atomically on commit
pub struct SpeedbScope {
    database: Arc<DB>,
    batch: WriteBatch,
    staged: usize,
}

#[async_trait]
impl TransactionScope for SpeedbScope {
    async fn bulk_load(&mut self, rows: Vec<Row>) -> Result<u64, StoreError> {
        let count = rows.len() as u64;
        for row in rows {
            stage(&self.database, &mut self.batch, row)?;
        }
        self.staged += count as usize;
        Ok(count)
    }

    async fn delete(&mut self, table: Table, query: &Query) -> Result<u64, StoreError> {
        let mut count = 0;
        for (key, row) in scan(&self.database, table)? {
            if query.matches(&row) {
                if let Row::Transaction(tx) = &row {
                    self.batch.delete_cf(tx_hash_cf(&self.database), tx.hash.as_bytes());
                }
                self.batch.delete_cf(cf(&self.database, table), key);
                count += 1;
            }
        }
        self.staged += count as usize;
        Ok(count)
    }

    async fn delete_block_balances(&mut self, bnum: u64, bhash: &str) -> Result<u64, StoreError> {
        let prefix = BalanceRow::key_prefix(bnum, bhash);
        let balances = cf(&self.database, Table::Balances);

        let mut count = 0;
        for item in self
            .database
            .iterator_cf(balances, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            self.batch.delete_cf(balances, key);
            count += 1;
        }
        self.staged += count as usize;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            database,
            batch,
            staged,
        } = *self;
        debug!("Committing {staged} staged writes");
        database.write(batch)?;
        Ok(())
    }
}
