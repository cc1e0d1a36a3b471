#![allow(missing_docs)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use basalt::{BlockId, Database, DbError, DbOptions, Synchronous};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

const THREADS: usize = 8;
const ROUNDS: usize = 40;
const BLOCKS: u32 = 3;
const SEED: u64 = 0x10c4_5eed;

/// Holders currently inside their critical window, per block.
#[derive(Default)]
struct Occupancy {
    readers: AtomicI64,
    writers: AtomicI64,
}

#[test]
fn shared_and_exclusive_never_coexist() {
    let dir = tempdir().unwrap();
    let opts = DbOptions {
        block_size: 128,
        buffer_pool_size: 2 * THREADS,
        lock_wait_timeout: Duration::from_millis(200),
        max_pin_time: Duration::from_secs(2),
        synchronous: Synchronous::Off,
        ..DbOptions::default()
    };
    let db = Database::open_with_options(dir.path().join("db"), opts).unwrap();
    {
        let mut setup = db.new_transaction().unwrap();
        for _ in 0..BLOCKS {
            setup.append("stress.tbl").unwrap();
        }
        setup.commit().unwrap();
    }

    let occupancy: Vec<Occupancy> = (0..BLOCKS).map(|_| Occupancy::default()).collect();
    let violations = AtomicUsize::new(0);
    let aborts = AtomicUsize::new(0);
    let commits = AtomicUsize::new(0);

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let db = &db;
            let occupancy = &occupancy;
            let violations = &violations;
            let aborts = &aborts;
            let commits = &commits;
            scope.spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(SEED + worker as u64);
                for _ in 0..ROUNDS {
                    let n = rng.gen_range(0..BLOCKS);
                    let block = BlockId::new("stress.tbl", n);
                    let slot = &occupancy[n as usize];
                    let exclusive = rng.gen_bool(0.3);
                    let mut tx = db.new_transaction().unwrap();
                    tx.pin(&block).unwrap();
                    let acquired = if exclusive {
                        tx.set_i64(&block, 0, worker as i64, true)
                    } else {
                        tx.get_i64(&block, 0).map(|_| ())
                    };
                    match acquired {
                        Ok(()) => {}
                        Err(DbError::LockAbort { .. }) => {
                            aborts.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                    if exclusive {
                        let writers = slot.writers.fetch_add(1, Ordering::SeqCst);
                        if writers != 0 || slot.readers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                    } else {
                        slot.readers.fetch_add(1, Ordering::SeqCst);
                        if slot.writers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    thread::sleep(Duration::from_micros(rng.gen_range(50..500)));
                    if exclusive {
                        slot.writers.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        slot.readers.fetch_sub(1, Ordering::SeqCst);
                    }
                    tx.commit().unwrap();
                    commits.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(
        commits.load(Ordering::Relaxed) + aborts.load(Ordering::Relaxed),
        THREADS * ROUNDS
    );
    assert!(commits.load(Ordering::Relaxed) > 0);
    assert_eq!(db.buffer_manager().available(), 2 * THREADS);
}
