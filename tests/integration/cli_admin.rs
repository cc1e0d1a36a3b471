#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use basalt::tx::LogRecord;
use basalt::{Database, DbOptions, Result, Synchronous, TxId};
use serde_json::Value;
use tempfile::TempDir;

fn options() -> DbOptions {
    DbOptions {
        block_size: 400,
        buffer_pool_size: 4,
        synchronous: Synchronous::Off,
        ..DbOptions::default()
    }
}

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("demo");
    seed_demo(&path).expect("seed demo data");
    (dir, path)
}

fn seed_demo(path: &Path) -> Result<()> {
    let db = Database::open_with_options(path, options())?;
    let mut tx = db.new_transaction()?;
    let block = tx.append("people.tbl")?;
    tx.pin(&block)?;
    tx.set_string(&block, 0, "alice", true)?;
    tx.set_i64(&block, 64, 42, true)?;
    tx.commit()?;
    Ok(())
}

fn json(args: &[&str], path: &Path) -> Value {
    let output = cargo_bin_cmd!("basalt")
        .args(["--block-size", "400", "--format", "json"])
        .args(args)
        .arg(path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn log_command_lists_records_newest_first() {
    let (_tmp, path) = setup_db();
    let report = json(&["log"], &path);
    let records = report["records"].as_array().expect("records");
    assert_eq!(records[0]["kind"], "COMMIT");
    assert_eq!(records.last().unwrap()["kind"], "START");
    assert_eq!(report["counts"]["SETINT64"], 1);
    assert_eq!(report["counts"]["SETSTRING"], 1);
    // "alice" reaches five bytes past the empty string it replaced
    assert_eq!(report["counts"]["SETINT8"], 5);
    assert_eq!(records[1]["text"], "<SETINT64 1 [people.tbl:0] 64 0>");
}

#[test]
fn recover_command_undoes_unfinished_work() {
    let (_tmp, path) = setup_db();
    {
        let opts = DbOptions {
            recover_on_open: false,
            ..options()
        };
        let db = Database::open_with_options(&path, opts).unwrap();
        LogRecord::Start(TxId(7))
            .write_to_log(db.log_manager())
            .unwrap();
        LogRecord::SetInt64 {
            tx: TxId(7),
            block: basalt::BlockId::new("people.tbl", 0),
            offset: 64,
            old: 42,
        }
        .write_to_log(db.log_manager())
        .unwrap();
        db.log_manager().flush(db.log_manager().latest_lsn(), true).unwrap();
    }
    let report = json(&["recover"], &path);
    assert_eq!(report["undone"], 1);
    assert!(report["duration_ms"].as_f64().is_some());
}

#[test]
fn stats_command_reports_files_and_pool() {
    let (_tmp, path) = setup_db();
    let report = json(&["stats"], &path);
    assert_eq!(report["block_size"], 400);
    let files = report["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "people.tbl");
    assert_eq!(files[0]["blocks"], 1);
    assert_eq!(report["wal"]["file"], "basalt.log");
    assert_eq!(report["buffers"]["pool_size"], 64);

    cargo_bin_cmd!("basalt")
        .args(["--block-size", "400", "--buffers", "8", "stats"])
        .arg(&path)
        .assert()
        .success();
}

fn snapshot(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(path)
        .expect("read dir")
        .map(|entry| {
            let entry = entry.expect("dir entry");
            let name = entry.file_name().to_string_lossy().into_owned();
            (name, fs::read(entry.path()).expect("read file"))
        })
        .collect();
    files.sort();
    files
}

#[test]
fn inspection_commands_leave_directory_untouched() {
    let (_tmp, path) = setup_db();
    fs::write(path.join("temp_sort1.tbl"), b"scratch").expect("temp file");
    let before = snapshot(&path);
    json(&["log"], &path);
    json(&["stats"], &path);
    cargo_bin_cmd!("basalt")
        .args(["--block-size", "400", "log"])
        .arg(&path)
        .assert()
        .success();
    assert_eq!(snapshot(&path), before);
}

#[test]
fn inspecting_directory_without_log_creates_nothing() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("bare");
    fs::create_dir(&path).expect("create dir");
    fs::write(path.join("people.tbl"), vec![0u8; 800]).expect("data file");

    let report = json(&["log"], &path);
    assert!(report["records"].as_array().expect("records").is_empty());
    assert_eq!(report["blocks"], 0);
    let report = json(&["stats"], &path);
    assert_eq!(report["wal"]["records"], 0);
    assert_eq!(report["wal"]["size_bytes"], 0);
    assert_eq!(report["files"][0]["blocks"], 2);
    assert!(!path.join("basalt.log").exists());
}

#[test]
fn stats_fails_on_unreadable_log_record() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("broken");
    fs::create_dir(&path).expect("create dir");
    let mut block = vec![0u8; 400];
    block[0..4].copy_from_slice(&396i32.to_le_bytes());
    block[396..400].copy_from_slice(&1_000i32.to_le_bytes());
    fs::write(path.join("basalt.log"), &block).expect("log file");

    let output = cargo_bin_cmd!("basalt")
        .args(["--block-size", "400", "stats"])
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("bad log record"), "{stderr}");
}

#[test]
fn missing_directory_fails_with_error_prefix() {
    let tmp = TempDir::new().expect("tempdir");
    let output = cargo_bin_cmd!("basalt")
        .args(["log"])
        .arg(tmp.path().join("nope"))
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.starts_with("error: database directory not found"));
}
