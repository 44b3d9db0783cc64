use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;
use crate::portal::PortalSettings;
use crate::retry::RetryPolicy;
use crate::watcher::WatchSettings;

pub const DEFAULT_CONFIG_FILE: &str = "report-harvest.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub download_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub archive_suffix: Option<String>,
    #[serde(default)]
    pub tabular_extension: Option<String>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub portal: Option<PortalEntry>,
    #[serde(default)]
    pub notify: Option<NotifyEntry>,
    #[serde(default)]
    pub rename: Option<RenameMode>,
    #[serde(default)]
    pub schedule_ledger: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_secs: Option<u64>,
    #[serde(default)]
    pub jitter_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PortalEntry {
    pub page_url: String,
    pub archive_url: String,
    #[serde(default)]
    pub reports: Vec<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NotifyEntry {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameMode {
    #[default]
    Auto,
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub page_url: String,
    pub archive_url: String,
    pub reports: Vec<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub download_dir: Utf8PathBuf,
    pub tabular_extension: String,
    pub watch: WatchSettings,
    pub retry: RetryPolicy,
    pub portal: Option<PortalConfig>,
    pub webhook_url: Option<String>,
    pub rename: RenameMode,
    pub schedule_ledger: Utf8PathBuf,
}

impl ResolvedConfig {
    pub fn portal_settings(&self) -> Result<PortalSettings, HarvestError> {
        let portal = self.portal.as_ref().ok_or(HarvestError::MissingConfig)?;
        Ok(PortalSettings {
            page_url: portal.page_url.clone(),
            archive_url: portal.archive_url.clone(),
            reports: portal.reports.clone(),
            user_agent: portal.user_agent.clone(),
            download_dir: self.download_dir.clone().into_std_path_buf(),
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            tracing::debug!("no config file found, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let home = || {
            BaseDirs::new()
                .and_then(|dirs| {
                    Utf8PathBuf::from_path_buf(dirs.home_dir().join("report-harvest")).ok()
                })
                .ok_or_else(|| {
                    HarvestError::Filesystem("unable to resolve home directory".to_string())
                })
        };

        let download_dir = match config.download_dir {
            Some(dir) => dir,
            None => home()?.join("downloads"),
        };
        let schedule_ledger = match config.schedule_ledger {
            Some(path) => path,
            None => home()?.join("schedules.txt"),
        };

        let suffix = config
            .archive_suffix
            .map(|suffix| suffix.trim_start_matches('.').to_string())
            .filter(|suffix| !suffix.is_empty())
            .unwrap_or_else(|| "zip".to_string());
        let tabular_extension = config
            .tabular_extension
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "csv".to_string());

        let watch = WatchSettings {
            suffix,
            interval: Duration::from_millis(config.poll_interval_ms.unwrap_or(1000).max(1)),
            timeout: Duration::from_secs(config.download_timeout_secs.unwrap_or(120)),
        };

        let retry = config.retry.unwrap_or_default();
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            attempts: retry.attempts.unwrap_or(defaults.attempts),
            base_delay: retry
                .base_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.base_delay),
            jitter: retry
                .jitter_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.jitter),
        };

        let portal = config.portal.map(|entry| PortalConfig {
            page_url: entry.page_url,
            archive_url: entry.archive_url,
            reports: entry.reports,
            user_agent: entry.user_agent.unwrap_or_else(default_user_agent),
        });

        Ok(ResolvedConfig {
            download_dir,
            tabular_extension,
            watch,
            retry,
            portal,
            webhook_url: config
                .notify
                .and_then(|notify| notify.webhook_url)
                .filter(|url| !url.trim().is_empty()),
            rename: config.rename.unwrap_or_default(),
            schedule_ledger,
        })
    }
}

pub fn default_user_agent() -> String {
    format!("report-harvest/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config {
            download_dir: Some(Utf8PathBuf::from("/tmp/reports")),
            archive_suffix: Some(".ZIP".to_string()),
            poll_interval_ms: Some(10),
            retry: Some(RetryEntry {
                attempts: Some(5),
                ..RetryEntry::default()
            }),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.download_dir, Utf8PathBuf::from("/tmp/reports"));
        assert_eq!(resolved.watch.suffix, "ZIP");
        assert_eq!(resolved.watch.interval, Duration::from_millis(10));
        assert_eq!(resolved.watch.timeout, Duration::from_secs(120));
        assert_eq!(resolved.retry.attempts, 5);
        assert_eq!(resolved.retry.base_delay, Duration::from_secs(5));
        assert_eq!(resolved.tabular_extension, "csv");
        assert_eq!(resolved.rename, RenameMode::Auto);
    }
}
