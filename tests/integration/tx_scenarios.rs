#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use basalt::{BlockId, Database, DbError, DbOptions, Result, Synchronous, TxState};
use tempfile::tempdir;

fn options() -> DbOptions {
    DbOptions {
        block_size: 400,
        buffer_pool_size: 8,
        lock_wait_timeout: Duration::from_millis(500),
        max_pin_time: Duration::from_millis(500),
        synchronous: Synchronous::Off,
        ..DbOptions::default()
    }
}

fn read_raw_i64(path: &Path, block: &BlockId, block_size: usize, offset: usize) -> i64 {
    let bytes = fs::read(path.join(block.filename())).unwrap();
    let start = block.number() as usize * block_size + offset;
    i64::from_le_bytes(bytes[start..start + 8].try_into().unwrap())
}

#[test]
fn committed_value_survives_rolled_back_overwrite() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with_options(dir.path().join("db"), options())?;

    let mut tx1 = db.new_transaction()?;
    let block = tx1.append("data.dat")?;
    tx1.pin(&block)?;
    tx1.set_i64(&block, 80, 80, false)?;
    tx1.commit()?;

    let mut tx2 = db.new_transaction()?;
    tx2.pin(&block)?;
    let seen = tx2.get_i64(&block, 80)?;
    assert_eq!(seen, 80);
    tx2.set_i64(&block, 80, seen + 1, true)?;
    tx2.commit()?;

    let mut tx3 = db.new_transaction()?;
    tx3.pin(&block)?;
    let seen = tx3.get_i64(&block, 80)?;
    assert_eq!(seen, 81);
    tx3.set_i64(&block, 80, seen + 1, true)?;
    assert_eq!(tx3.get_i64(&block, 80)?, 82);
    tx3.rollback()?;
    assert_eq!(tx3.state(), TxState::RolledBack);

    let mut tx4 = db.new_transaction()?;
    tx4.pin(&block)?;
    assert_eq!(tx4.get_i64(&block, 80)?, 81);
    tx4.commit()?;
    assert_eq!(tx4.available_buffers(), 8);
    Ok(())
}

#[test]
fn commit_is_visible_on_disk_without_the_pool() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let db = Database::open_with_options(&path, options())?;

    let mut tx = db.new_transaction()?;
    tx.append("data.dat")?;
    let block = tx.append("data.dat")?;
    tx.pin(&block)?;
    tx.set_i64(&block, 40, 12_345, true)?;
    tx.set_string(&block, 100, "durable", true)?;
    tx.commit()?;

    assert_eq!(read_raw_i64(&path, &block, 400, 40), 12_345);
    let bytes = fs::read(path.join("data.dat"))?;
    let start = 400 + 100;
    assert_eq!(&bytes[start..start + 4], &7i32.to_le_bytes());
    assert_eq!(&bytes[start + 4..start + 11], b"durable");
    Ok(())
}

#[test]
fn rollback_restores_pre_images_beside_concurrent_writers() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open_with_options(dir.path().join("db"), options())?;

    let (ours, theirs) = {
        let mut setup = db.new_transaction()?;
        let ours = setup.append("data.dat")?;
        let theirs = setup.append("data.dat")?;
        for block in [&ours, &theirs] {
            setup.pin(block)?;
            for slot in 0..10 {
                setup.set_i64(block, slot * 8, slot as i64, false)?;
            }
        }
        setup.set_string(&ours, 200, "original", false)?;
        setup.commit()?;
        (ours, theirs)
    };

    thread::scope(|scope| {
        let rolled_back = scope.spawn(|| -> Result<()> {
            let mut tx = db.new_transaction()?;
            tx.pin(&ours)?;
            for round in 0..5 {
                for slot in 0..10 {
                    tx.set_i64(&ours, slot * 8, 1_000 * (round + 1) + slot as i64, true)?;
                }
            }
            tx.set_string(&ours, 200, "scribble", true)?;
            tx.rollback()
        });
        let committed = scope.spawn(|| -> Result<()> {
            let mut tx = db.new_transaction()?;
            tx.pin(&theirs)?;
            for slot in 0..10 {
                tx.set_i64(&theirs, slot * 8, -(slot as i64), true)?;
            }
            tx.commit()
        });
        rolled_back.join().unwrap()?;
        committed.join().unwrap()
    })?;

    let mut check = db.new_transaction()?;
    check.pin(&ours)?;
    check.pin(&theirs)?;
    for slot in 0..10 {
        assert_eq!(check.get_i64(&ours, slot * 8)?, slot as i64);
        assert_eq!(check.get_i64(&theirs, slot * 8)?, -(slot as i64));
    }
    assert_eq!(check.get_string(&ours, 200)?, "original");
    check.commit()?;
    Ok(())
}

#[test]
fn exhausted_pool_aborts_the_transaction() -> Result<()> {
    let dir = tempdir()?;
    let opts = DbOptions {
        buffer_pool_size: 2,
        max_pin_time: Duration::from_millis(30),
        ..options()
    };
    let db = Database::open_with_options(dir.path().join("db"), opts)?;
    let mut tx = db.new_transaction()?;
    for n in 0..2 {
        tx.pin(&BlockId::new("data.dat", n))?;
    }
    let err = tx.pin(&BlockId::new("data.dat", 2)).unwrap_err();
    assert!(matches!(err, DbError::NoAvailableBuffers));
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(db.buffer_manager().available(), 2);
    assert!(matches!(tx.commit(), Err(DbError::TransactionClosed(_))));
    Ok(())
}
