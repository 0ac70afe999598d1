use super::{file_names, Setup};
use crate::helpers::{blocks::*, eventually, mocks::TestStore};
use mochimap_indexer::{
    block::{archive_file_name, BlockHash},
    event::EventType,
    ingest::{block::BlockOutcome, mempool::MempoolIngestor},
    store::{Comparison, Persistence, Query, Row, Table},
    watcher::{FileStats, WatchEvent, WatchEventKind},
};
use pretty_assertions::assert_eq;
use std::{collections::HashMap, path::PathBuf, time::Duration};

fn rename(path: PathBuf) -> WatchEvent {
    WatchEvent {
        kind: WatchEventKind::Rename,
        filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        path,
        stats: None,
    }
}

async fn rows(store: &dyn Persistence, table: Table, query: Query) -> Vec<Row> {
    store.query(table, &query).await.unwrap()
}

#[tokio::test]
async fn duplicate_delivery_archives_once() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let bytes = ledger_block(0, &BlockHash::default(), &[(1, 100), (2, 50)]);
    let path = setup.dirs.write_block(&node_file_name(0), &bytes);
    let bhash = block_hash(&bytes);

    let first = setup.ingestor.process_file(&path).await;
    let second = setup.ingestor.process_file(&path).await;

    assert_eq!(first, BlockOutcome::Persisted { bnum: 0, bhash });
    assert_eq!(second, BlockOutcome::Duplicate { bnum: 0, bhash });
    assert_eq!(
        file_names(setup.dirs.archive.path()),
        vec![archive_file_name(0, &bhash)]
    );
    assert_eq!(
        std::fs::read(setup.dirs.archive.path().join(archive_file_name(0, &bhash)))?,
        bytes
    );

    // a single block row and a single block event
    assert_eq!(rows(setup.store.as_ref(), Table::Blocks, Query::new()).await.len(), 1);
    assert_eq!(setup.sink.count(EventType::Block), 1);
    assert!(!setup.ingestor.db_failure());
    Ok(())
}

#[tokio::test]
async fn corrupted_hash_is_rejected() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let good = pseudo_block(2, &BlockHash::default());
    let mut bad = pseudo_block(1, &BlockHash::default());
    let canonical = archive_file_name(1, &block_hash(&bad));
    let last = bad.len() - 1;
    bad[last] ^= 0x01;

    let bad_path = setup.dirs.write_block(&node_file_name(1), &bad);
    let good_path = setup.dirs.write_block(&node_file_name(2), &good);

    assert_eq!(setup.ingestor.handle(rename(bad_path)).await, Some(BlockOutcome::Rejected));
    assert_eq!(
        setup.ingestor.handle(rename(good_path)).await,
        Some(BlockOutcome::Persisted {
            bnum: 2,
            bhash: block_hash(&good)
        })
    );

    // only the good block was stored, the bad one kept under its own name
    let blocks = rows(setup.store.as_ref(), Table::Blocks, Query::new()).await;
    assert_eq!(blocks.len(), 1);
    assert!(matches!(&blocks[0], Row::Block(row) if row.bnum == 2));

    let archived = file_names(setup.dirs.archive.path());
    assert!(archived.contains(&node_file_name(1)));
    assert!(!archived.contains(&canonical));
    Ok(())
}

#[tokio::test]
async fn ignores_non_block_events() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let bytes = pseudo_block(1, &BlockHash::default());
    let path = setup.dirs.write_block(&node_file_name(1), &bytes);
    let other = setup.dirs.write_block("txclean.dat", &bytes);

    let change = WatchEvent {
        kind: WatchEventKind::Change,
        ..rename(path.clone())
    };
    assert_eq!(setup.ingestor.handle(change).await, None);
    assert_eq!(setup.ingestor.handle(rename(other)).await, None);

    // removed before the worker got to it
    std::fs::remove_file(&path)?;
    assert_eq!(setup.ingestor.handle(rename(path)).await, Some(BlockOutcome::Missing));
    assert!(file_names(setup.dirs.archive.path()).is_empty());
    Ok(())
}

#[tokio::test]
async fn blocks_are_persisted_in_arrival_order() -> anyhow::Result<()> {
    // earlier blocks take longer to store
    let setup = Setup::with_store(|path| {
        Ok(TestStore::open(path)?.with_delay(|bnum| Duration::from_millis(60 - 10 * bnum)))
    })?;
    let Setup {
        dirs,
        store,
        ingestor,
        ..
    } = setup;

    let (tx, rx) = mochimap_indexer::ingest::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let worker = tokio::spawn(ingestor.run(rx, async {
        let _ = stop_rx.await;
    }));

    for bnum in 1..=5 {
        let bytes = pseudo_block(bnum, &BlockHash::default());
        let path = dirs.write_block(&node_file_name(bnum), &bytes);
        tx.send(rename(path)).await?;
    }

    assert!(eventually(Duration::from_secs(10), || store.insert_log().len() == 10).await);
    let _ = stop_tx.send(());
    worker.await?;

    let expected: Vec<(u64, bool)> = (1..=5).flat_map(|bnum| [(bnum, true), (bnum, false)]).collect();
    assert_eq!(store.insert_log(), expected);
    Ok(())
}

#[tokio::test]
async fn transactions_of_normal_blocks() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let txs = vec![tx_entry(0x10, 1_000), tx_entry(0x20, 2_000)];
    let bytes = normal_block(7, &BlockHash::default(), &txs);
    let path = setup.dirs.write_block(&node_file_name(7), &bytes);

    setup.ingestor.process_file(&path).await;

    let stored = rows(
        setup.store.as_ref(),
        Table::Transactions,
        Query::new().order_by("sendtotal", false),
    )
    .await;
    assert_eq!(stored.len(), 2);

    let Row::Transaction(tx) = &stored[0] else {
        panic!("expected a transaction row");
    };
    assert_eq!(tx.txid, hex::encode([0x10; 32]));
    assert_eq!(tx.bnum, Some(7));
    assert_eq!(tx.bhash, Some(block_hash(&bytes).to_hex()));
    assert_eq!(tx.srcaddr, short_address(0x10));
    assert_eq!(tx.dstaddr, short_address(0x11));
    assert_eq!(tx.sendtotal, 1_000);
    assert_eq!(tx.txfee, 500);
    assert!(tx.confirmed.is_some());

    let blocks = rows(setup.store.as_ref(), Table::Blocks, Query::new()).await;
    let Row::Block(block) = &blocks[0] else {
        panic!("expected a block row");
    };
    assert_eq!(block.count, 2);
    assert_eq!(block.amount, 3_000);
    assert_eq!(block.mreward, 5_000);
    assert_eq!(block.maddr, Some(short_address(0xee)));
    Ok(())
}

#[tokio::test]
async fn confirmation_updates_the_mempool_row() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let txs = vec![tx_entry(0x10, 1_000), tx_entry(0x20, 2_000)];

    // first seen in the mempool
    let txclean = setup.dirs.blocks.path().join("txclean.dat");
    std::fs::write(&txclean, txs.concat())?;
    let mut mempool = MempoolIngestor::new(setup.store.clone(), setup.sink.clone());
    let event = WatchEvent {
        kind: WatchEventKind::Change,
        path: txclean.clone(),
        filename: Some("txclean.dat".into()),
        stats: Some(FileStats {
            size: std::fs::metadata(&txclean)?.len(),
            is_file: true,
            is_dir: false,
            modified: None,
        }),
    };
    assert_eq!(mempool.handle(event).await, 2);

    let txid = Query::new().filter("txid", Comparison::Eq, hex::encode([0x10; 32]));
    let pending = rows(setup.store.as_ref(), Table::Transactions, txid.clone()).await;
    let [Row::Transaction(pending)] = pending.as_slice() else {
        panic!("expected one pending row, got {pending:?}");
    };
    assert_eq!(pending.bnum, None);

    // then confirmed by a block
    let bytes = normal_block(7, &BlockHash::default(), &txs);
    let path = setup.dirs.write_block(&node_file_name(7), &bytes);
    assert!(matches!(
        setup.ingestor.process_file(&path).await,
        BlockOutcome::Persisted { bnum: 7, .. }
    ));

    let confirmed = rows(setup.store.as_ref(), Table::Transactions, txid).await;
    let [Row::Transaction(confirmed)] = confirmed.as_slice() else {
        panic!("expected one confirmed row, got {confirmed:?}");
    };
    assert_eq!(confirmed.bnum, Some(7));
    assert_eq!(confirmed.bhash, Some(block_hash(&bytes).to_hex()));
    assert!(confirmed.confirmed.is_some());
    assert_eq!(confirmed.created, pending.created);
    assert_eq!(rows(setup.store.as_ref(), Table::Transactions, Query::new()).await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn genesis_to_neogenesis() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let chain = epoch(&[(1, 100), (2, 50), (3, 0)], &[(1, 80), (2, 50), (3, 20)]);

    for (bnum, bytes) in chain.iter().enumerate() {
        let path = setup.dirs.write_block(&node_file_name(bnum as u64), bytes);
        let outcome = setup.ingestor.process_file(&path).await;
        assert!(matches!(outcome, BlockOutcome::Persisted { .. }), "block {bnum}: {outcome:?}");
    }
    assert_eq!(file_names(setup.dirs.archive.path()).len(), 257);

    // richlist reflects the neogenesis ledger
    let richlist: Vec<(u64, String, u64)> = rows(setup.store.as_ref(), Table::Richlist, Query::new())
        .await
        .into_iter()
        .map(|row| match row {
            Row::Richlist(entry) => (entry.rank, entry.address, entry.balance),
            row => panic!("unexpected row {row:?}"),
        })
        .collect();
    assert_eq!(
        richlist,
        vec![
            (1, short_address(1), 80),
            (2, short_address(2), 50),
            (3, short_address(3), 20),
        ]
    );

    // only non-zero deltas against the genesis ledger
    let deltas: HashMap<String, (u64, i64)> = rows(
        setup.store.as_ref(),
        Table::Balances,
        Query::new().filter("bnum", Comparison::Eq, 256u64),
    )
    .await
    .into_iter()
    .map(|row| match row {
        Row::Balance(balance) => (balance.address, (balance.balance, balance.delta)),
        row => panic!("unexpected row {row:?}"),
    })
    .collect();
    assert_eq!(
        deltas,
        HashMap::from([
            (short_address(1), (80, -20)),
            (short_address(3), (20, 20)),
        ])
    );

    // genesis deltas are its full non-zero balances
    let genesis = rows(
        setup.store.as_ref(),
        Table::Balances,
        Query::new().filter("bnum", Comparison::Eq, 0u64),
    )
    .await;
    assert_eq!(genesis.len(), 2);
    Ok(())
}

#[tokio::test]
async fn neogenesis_without_archived_history() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let bytes = ledger_block(512, &BlockHash::default(), &[(1, 10), (2, 0), (3, 30)]);
    let path = setup.dirs.write_block(&node_file_name(512), &bytes);

    let outcome = setup.ingestor.process_file(&path).await;
    assert!(matches!(outcome, BlockOutcome::Persisted { bnum: 512, .. }));

    let mut deltas: Vec<i64> = rows(setup.store.as_ref(), Table::Balances, Query::new())
        .await
        .into_iter()
        .filter_map(|row| match row {
            Row::Balance(balance) => Some(balance.delta),
            _ => None,
        })
        .collect();
    deltas.sort();
    assert_eq!(deltas, vec![10, 30]);
    Ok(())
}

#[tokio::test]
async fn backup_while_failing_then_recover() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let genesis = ledger_block(0, &BlockHash::default(), &[(1, 100)]);
    let pseudo = pseudo_block(1, &block_hash(&genesis));
    let genesis_name = archive_file_name(0, &block_hash(&genesis));

    setup.store.set_failing(true);
    let path = setup.dirs.write_block(&node_file_name(0), &genesis);
    assert_eq!(
        setup.ingestor.process_file(&path).await,
        BlockOutcome::BackedUp {
            bnum: 0,
            bhash: block_hash(&genesis)
        }
    );
    assert!(setup.ingestor.db_failure());
    assert_eq!(file_names(setup.dirs.backup.path()), vec![genesis_name.clone()]);
    assert_eq!(file_names(setup.dirs.archive.path()), vec![genesis_name.clone()]);

    // the next success starts draining the backups
    setup.store.set_failing(false);
    let path = setup.dirs.write_block(&node_file_name(1), &pseudo);
    assert!(matches!(
        setup.ingestor.process_file(&path).await,
        BlockOutcome::Persisted { bnum: 1, .. }
    ));
    assert!(!setup.ingestor.db_failure());
    assert!(setup.ingestor.is_recovering());

    let event = tokio::time::timeout(Duration::from_secs(5), setup.queue.recv())
        .await?
        .expect("recovery event");
    assert_eq!(event.path, setup.dirs.backup.path().join(&genesis_name));
    assert_eq!(
        setup.ingestor.handle(event).await,
        Some(BlockOutcome::Persisted {
            bnum: 0,
            bhash: block_hash(&genesis)
        })
    );
    assert!(file_names(setup.dirs.backup.path()).is_empty());
    assert_eq!(rows(setup.store.as_ref(), Table::Blocks, Query::new()).await.len(), 2);

    setup.ingestor.cleanup();
    assert!(!setup.ingestor.is_recovering());
    Ok(())
}

#[tokio::test]
async fn renewed_failure_stops_recovery() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let chain = [
        pseudo_block(1, &BlockHash::default()),
        pseudo_block(2, &BlockHash::default()),
        pseudo_block(3, &BlockHash::default()),
    ];
    let paths: Vec<PathBuf> = chain
        .iter()
        .enumerate()
        .map(|(n, bytes)| setup.dirs.write_block(&node_file_name(n as u64 + 1), bytes))
        .collect();

    setup.store.set_failing(true);
    setup.ingestor.process_file(&paths[0]).await;
    setup.store.set_failing(false);
    setup.ingestor.process_file(&paths[1]).await;
    assert!(setup.ingestor.is_recovering());

    // no draining while the store is failing again
    setup.store.set_failing(true);
    assert!(matches!(
        setup.ingestor.process_file(&paths[2]).await,
        BlockOutcome::BackedUp { bnum: 3, .. }
    ));
    assert!(setup.ingestor.db_failure());
    assert!(!setup.ingestor.is_recovering());
    Ok(())
}

#[tokio::test]
async fn import_directory_in_order() -> anyhow::Result<()> {
    let mut setup = Setup::new()?;
    let genesis = ledger_block(0, &BlockHash::default(), &[(1, 100)]);
    let first = pseudo_block(1, &block_hash(&genesis));
    let second = pseudo_block(2, &block_hash(&first));
    for (bnum, bytes) in [&genesis, &first, &second].into_iter().enumerate() {
        setup.dirs.write_block(&node_file_name(bnum as u64), bytes);
    }
    std::fs::write(setup.dirs.blocks.path().join("notes.txt"), b"not a block")?;

    let blocks_dir = setup.dirs.blocks.path().to_path_buf();
    assert_eq!(setup.ingestor.import_dir(&blocks_dir).await?, 3);
    assert_eq!(file_names(setup.dirs.archive.path()).len(), 3);

    // a second import only finds duplicates
    assert_eq!(setup.ingestor.import_dir(&blocks_dir).await?, 0);
    assert_eq!(rows(setup.store.as_ref(), Table::Blocks, Query::new()).await.len(), 3);
    Ok(())
}
