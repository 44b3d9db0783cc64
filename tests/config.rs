use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use report_harvest::config::{Config, ConfigLoader, RenameMode, default_user_agent};
use report_harvest::error::HarvestError;

#[test]
fn full_config_file_resolves() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("report-harvest.json");
    fs::write(
        &path,
        r#"{
            "download_dir": "/data/reports",
            "download_timeout_secs": 60,
            "poll_interval_ms": 250,
            "retry": { "attempts": 4, "base_delay_secs": 1, "jitter_secs": 0 },
            "portal": {
                "page_url": "https://portal.example/reports",
                "archive_url": "https://portal.example/archive",
                "reports": ["CM_BHAV.csv", "FO_BHAV.csv"]
            },
            "notify": { "webhook_url": "https://hooks.example/run" },
            "rename": "interactive",
            "schedule_ledger": "/data/schedules.txt"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.download_dir, Utf8PathBuf::from("/data/reports"));
    assert_eq!(resolved.watch.timeout, Duration::from_secs(60));
    assert_eq!(resolved.watch.interval, Duration::from_millis(250));
    assert_eq!(resolved.retry.attempts, 4);
    assert_eq!(resolved.retry.jitter, Duration::ZERO);
    assert_eq!(resolved.rename, RenameMode::Interactive);
    assert_eq!(resolved.webhook_url.as_deref(), Some("https://hooks.example/run"));
    assert_eq!(resolved.schedule_ledger, Utf8PathBuf::from("/data/schedules.txt"));

    let portal = resolved.portal_settings().unwrap();
    assert_eq!(portal.reports, vec!["CM_BHAV.csv", "FO_BHAV.csv"]);
    assert_eq!(portal.user_agent, default_user_agent());
    assert_eq!(portal.download_dir, std::path::PathBuf::from("/data/reports"));
}

#[test]
fn missing_explicit_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nope.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigRead(_));
}

#[test]
fn invalid_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigParse(_));
}

#[test]
fn runs_require_a_portal_section() {
    let resolved = ConfigLoader::resolve_config(Config {
        download_dir: Some(Utf8PathBuf::from("/data/reports")),
        schedule_ledger: Some(Utf8PathBuf::from("/data/schedules.txt")),
        ..Config::default()
    })
    .unwrap();

    assert_eq!(resolved.watch.suffix, "zip");
    assert_eq!(resolved.retry.attempts, 3);
    assert_matches!(resolved.portal_settings(), Err(HarvestError::MissingConfig));
}
