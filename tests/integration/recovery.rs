#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use basalt::tx::LogRecord;
use basalt::{BlockId, Database, DbOptions, Page, Result, Synchronous, TxId};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const BLOCK_SIZE: usize = 400;

fn options() -> DbOptions {
    DbOptions {
        block_size: BLOCK_SIZE,
        buffer_pool_size: 8,
        lock_wait_timeout: Duration::from_millis(500),
        max_pin_time: Duration::from_millis(500),
        synchronous: Synchronous::Off,
        recover_on_open: false,
        last_tx_id: 10,
        ..DbOptions::default()
    }
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("basalt::tx=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn raw_page(path: &Path, block: &BlockId) -> Page {
    let bytes = fs::read(path.join(block.filename())).unwrap();
    let start = block.number() as usize * BLOCK_SIZE;
    Page::from_bytes(bytes[start..start + BLOCK_SIZE].to_vec())
}

fn set_i64(tx: u64, block: &BlockId, offset: usize, old: i64) -> LogRecord {
    LogRecord::SetInt64 {
        tx: TxId(tx),
        block: block.clone(),
        offset,
        old,
    }
}

fn log_records(db: &Database) -> Vec<LogRecord> {
    db.log_manager()
        .iter()
        .unwrap()
        .map(|bytes| LogRecord::decode(&bytes.unwrap()).unwrap())
        .collect()
}

#[test]
fn recover_undoes_only_unfinished_transactions_after_checkpoint() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let db = Database::open_with_options(&path, options())?;
    let fm = db.file_manager();
    let block = fm.append("data.dat")?;

    // on-disk state as left by a crash: the unfinished tx 5 had its page stolen
    let mut page = Page::new(BLOCK_SIZE);
    page.set_i64(80, 500)?;
    page.set_i64(160, 8)?;
    page.set_string(200, "dirty!!!!")?;
    fm.write(&block, &page)?;

    let lm = db.log_manager();
    let records = vec![
        LogRecord::Start(TxId(9)),
        set_i64(9, &block, 160, 7),
        LogRecord::Checkpoint,
        LogRecord::Start(TxId(1)),
        set_i64(1, &block, 80, 0),
        LogRecord::Commit(TxId(1)),
        LogRecord::Start(TxId(2)),
        set_i64(2, &block, 80, 100),
        LogRecord::Commit(TxId(2)),
        LogRecord::Start(TxId(3)),
        set_i64(3, &block, 80, 200),
        LogRecord::Rollback(TxId(3)),
        LogRecord::Start(TxId(4)),
        set_i64(4, &block, 80, 200),
        LogRecord::Commit(TxId(4)),
        LogRecord::Start(TxId(5)),
        set_i64(5, &block, 80, 400),
        LogRecord::SetString {
            tx: TxId(5),
            block: block.clone(),
            offset: 200,
            old: "committed".to_string(),
        },
        set_i64(5, &block, 80, 450),
    ];
    for record in &records {
        record.write_to_log(lm)?;
    }

    let mut tx = db.new_transaction()?;
    assert_eq!(tx.id(), TxId(11));
    assert_eq!(tx.recover()?, 3);

    let after = log_records(&db);
    assert_eq!(after[0], LogRecord::Checkpoint);
    assert_ne!(after[1], LogRecord::Checkpoint);
    assert_eq!(
        after.iter().filter(|r| **r == LogRecord::Checkpoint).count(),
        2
    );

    tx.commit()?;
    let on_disk = raw_page(&path, &block);
    assert_eq!(on_disk.get_i64(80)?, 400);
    assert_eq!(on_disk.get_string(200)?, "committed");
    assert_eq!(on_disk.get_i64(160)?, 8);
    Ok(())
}

#[test]
fn reopen_after_crash_undoes_stolen_pages() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let block = {
        let db = Database::open_with_options(&path, options())?;
        let mut setup = db.new_transaction()?;
        let block = setup.append("data.dat")?;
        setup.pin(&block)?;
        setup.set_i64(&block, 8, 42, false)?;
        setup.commit()?;

        let mut crashed = db.new_transaction()?;
        crashed.pin(&block)?;
        crashed.set_i64(&block, 8, 43, true)?;
        crashed.set_i64(&block, 8, 44, true)?;
        // steal: the uncommitted page reaches disk, then the process dies
        db.buffer_manager().flush_all(crashed.id())?;
        assert_eq!(raw_page(&path, &block).get_i64(8)?, 44);
        std::mem::forget(crashed);
        block
    };

    let opts = DbOptions {
        recover_on_open: true,
        last_tx_id: 20,
        ..options()
    };
    let db = Database::open_with_options(&path, opts)?;
    assert_eq!(raw_page(&path, &block).get_i64(8)?, 42);
    let mut tx = db.new_transaction()?;
    tx.pin(&block)?;
    assert_eq!(tx.get_i64(&block, 8)?, 42);
    tx.commit()?;
    Ok(())
}

#[test]
fn crash_recovery_restores_bytes_past_a_short_string() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let block = {
        let db = Database::open_with_options(&path, options())?;
        let mut setup = db.new_transaction()?;
        let block = setup.append("data.dat")?;
        setup.pin(&block)?;
        setup.set_string(&block, 0, "ab", false)?;
        setup.set_i64(&block, 8, 42, false)?;
        setup.commit()?;

        let mut crashed = db.new_transaction()?;
        crashed.pin(&block)?;
        crashed.set_string(&block, 0, "a much longer value", true)?;
        db.buffer_manager().flush_all(crashed.id())?;
        assert_ne!(raw_page(&path, &block).get_i64(8)?, 42);
        std::mem::forget(crashed);
        block
    };

    let opts = DbOptions {
        recover_on_open: true,
        last_tx_id: 20,
        ..options()
    };
    drop(Database::open_with_options(&path, opts)?);
    let page = raw_page(&path, &block);
    assert_eq!(page.get_string(0)?, "ab");
    assert_eq!(page.get_i64(8)?, 42);
    Ok(())
}

#[test]
fn recover_on_clean_log_only_checkpoints() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with_options(dir.path().join("db"), options())?;
    let mut tx = db.new_transaction()?;
    assert_eq!(tx.recover()?, 0);
    tx.commit()?;
    let kinds: Vec<&str> = log_records(&db).iter().map(LogRecord::kind).collect();
    assert_eq!(kinds, vec!["COMMIT", "CHECKPOINT", "START"]);
    Ok(())
}
