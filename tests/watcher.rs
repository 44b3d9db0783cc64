use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use report_harvest::error::HarvestError;
use report_harvest::logging::LogContext;
use report_harvest::watcher::{DownloadWatcher, WatchSettings};

fn watcher(timeout: Duration) -> DownloadWatcher {
    DownloadWatcher::new(
        WatchSettings {
            suffix: "zip".to_string(),
            interval: Duration::from_millis(5),
            timeout,
        },
        LogContext::detached(),
    )
}

fn write(dir: &Path, name: &str, body: &[u8]) {
    fs::write(dir.join(name), body).unwrap();
}

#[test]
fn ignores_partial_and_empty_downloads() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "reports.zip.crdownload", b"partial");
    write(temp.path(), "notes.txt", b"text");
    write(temp.path(), "empty.zip", b"");

    assert!(watcher(Duration::ZERO).ready_archive(temp.path()).is_none());
}

#[test]
fn picks_the_newest_finished_archive() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "older.zip", b"old");
    thread::sleep(Duration::from_millis(20));
    write(temp.path(), "newer.zip", b"new");

    let archive = watcher(Duration::from_secs(1))
        .await_archive(temp.path())
        .unwrap();
    assert!(archive.path.ends_with("newer.zip"));
    assert_eq!(archive.size, 3);
}

#[test]
fn archive_appearing_during_the_wait_is_found() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().to_path_buf();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        fs::write(dir.join("reports.zip.part"), b"zipbytes").unwrap();
        fs::rename(dir.join("reports.zip.part"), dir.join("reports.zip")).unwrap();
    });

    let archive = watcher(Duration::from_secs(5))
        .await_archive(temp.path())
        .unwrap();
    writer.join().unwrap();
    assert!(archive.path.ends_with("reports.zip"));
}

#[test]
fn times_out_without_touching_the_directory() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "reports.zip.crdownload", b"partial");

    let err = watcher(Duration::from_millis(30))
        .await_archive(temp.path())
        .unwrap_err();
    assert_matches!(err, HarvestError::DownloadTimeout { .. });
    assert!(temp.path().join("reports.zip.crdownload").exists());
}
