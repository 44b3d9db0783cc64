use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::HarvestError;
use crate::retry::Release;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub any_selected: bool,
    pub expected_names: Vec<String>,
}

pub trait PageInteraction: Release {
    fn load_reports_page(&mut self) -> Result<(), HarvestError>;
    fn select_reports(&mut self) -> Result<Selection, HarvestError>;
    fn trigger_download(&mut self) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub page_url: String,
    pub archive_url: String,
    pub reports: Vec<String>,
    pub user_agent: String,
    pub download_dir: PathBuf,
}

pub struct HttpPortal {
    client: Option<Client>,
    settings: PortalSettings,
    page: Option<String>,
    selected: Vec<String>,
}

impl HttpPortal {
    pub fn new(settings: PortalSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| HarvestError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self {
            client: Some(client),
            settings,
            page: None,
            selected: Vec::new(),
        })
    }

    fn client(&self) -> Result<&Client, HarvestError> {
        self.client
            .as_ref()
            .ok_or_else(|| HarvestError::Interaction("portal session already released".to_string()))
    }

    fn archive_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.settings.download_dir.join(format!("reports_{stamp}.zip"))
    }
}

impl PageInteraction for HttpPortal {
    fn load_reports_page(&mut self) -> Result<(), HarvestError> {
        tracing::info!(url = %self.settings.page_url, "navigating to reports page");
        let response = self
            .client()?
            .get(&self.settings.page_url)
            .send()
            .map_err(|err| HarvestError::Navigation(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(HarvestError::Navigation(format!(
                "{} returned status {status}",
                self.settings.page_url
            )));
        }
        let body = response
            .text()
            .map_err(|err| HarvestError::Navigation(err.to_string()))?;
        self.page = Some(body);
        tracing::info!("reports page loaded");
        Ok(())
    }

    fn select_reports(&mut self) -> Result<Selection, HarvestError> {
        let page = self
            .page
            .as_deref()
            .ok_or_else(|| HarvestError::Interaction("reports page not loaded".to_string()))?;
        let (found, absent): (Vec<&String>, Vec<&String>) = self
            .settings
            .reports
            .iter()
            .partition(|name| page.contains(name.as_str()));
        for name in &absent {
            tracing::warn!(report = %name, "report not listed on page");
        }
        self.selected = found.into_iter().cloned().collect();
        for name in &self.selected {
            tracing::info!(report = %name, "selected report");
        }
        Ok(Selection {
            any_selected: !self.selected.is_empty(),
            expected_names: self.selected.clone(),
        })
    }

    fn trigger_download(&mut self) -> Result<(), HarvestError> {
        if self.selected.is_empty() {
            return Err(HarvestError::Interaction("no reports selected".to_string()));
        }
        let target = self.archive_path();
        let partial = target.with_extension("zip.part");
        let mut response = self
            .client()?
            .get(&self.settings.archive_url)
            .query(&[("reports", self.selected.join(","))])
            .send()
            .map_err(|err| HarvestError::Interaction(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "archive request failed".to_string());
            return Err(HarvestError::HttpStatus { status, message });
        }

        write_partial(&mut response, &partial, &target)?;
        tracing::info!(path = %target.display(), "archive download finished");
        Ok(())
    }
}

impl Release for HttpPortal {
    fn release(&mut self) -> Result<(), HarvestError> {
        if self.client.take().is_some() {
            tracing::info!("portal session released");
        }
        self.page = None;
        self.selected.clear();
        Ok(())
    }
}

fn write_partial(
    response: &mut reqwest::blocking::Response,
    partial: &Path,
    target: &Path,
) -> Result<(), HarvestError> {
    if let Some(parent) = partial.parent() {
        fs::create_dir_all(parent).map_err(|err| HarvestError::fs(parent.display(), err))?;
    }
    let mut file = File::create(partial).map_err(|err| HarvestError::fs(partial.display(), err))?;
    std::io::copy(response, &mut file).map_err(|err| {
        let _ = fs::remove_file(partial);
        HarvestError::Interaction(format!("archive transfer interrupted: {err}"))
    })?;
    drop(file);
    fs::rename(partial, target).map_err(|err| HarvestError::fs(target.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(reports: &[&str]) -> HttpPortal {
        HttpPortal::new(PortalSettings {
            page_url: "http://127.0.0.1:9/reports".to_string(),
            archive_url: "http://127.0.0.1:9/archive".to_string(),
            reports: reports.iter().map(|name| name.to_string()).collect(),
            user_agent: "report-harvest/test".to_string(),
            download_dir: PathBuf::from("downloads"),
        })
        .unwrap()
    }

    #[test]
    fn selects_reports_listed_on_page() {
        let mut portal = portal(&["CM_BHAV.csv", "MISSING.csv", "FO_BHAV.csv"]);
        portal.page = Some("<li>FO_BHAV.csv</li><li>CM_BHAV.csv</li>".to_string());

        let selection = portal.select_reports().unwrap();
        assert!(selection.any_selected);
        assert_eq!(selection.expected_names, vec!["CM_BHAV.csv", "FO_BHAV.csv"]);
    }

    #[test]
    fn select_requires_loaded_page() {
        let mut portal = portal(&["CM_BHAV.csv"]);
        assert!(portal.select_reports().is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let mut portal = portal(&["CM_BHAV.csv"]);
        portal.release().unwrap();
        portal.release().unwrap();
        assert!(portal.load_reports_page().is_err());
    }
}
