use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::domain::RunSummary;
use crate::error::HarvestError;

pub trait NotificationSender {
    fn send(&self, summary: &RunSummary) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationSender for LogNotifier {
    fn send(&self, summary: &RunSummary) -> Result<(), HarvestError> {
        tracing::info!(status = %summary.status, "{}", summary.render_text());
        Ok(())
    }
}

const LOG_TAIL_LINES: usize = 200;

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    log_file: Option<PathBuf>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HarvestError::Notification(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            log_file: None,
        })
    }

    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    fn log_tail(&self) -> Option<String> {
        let path = self.log_file.as_ref()?;
        match fs::read_to_string(path) {
            Ok(content) => Some(tail_lines(&content, LOG_TAIL_LINES)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "log file not attached");
                None
            }
        }
    }
}

impl NotificationSender for WebhookNotifier {
    fn send(&self, summary: &RunSummary) -> Result<(), HarvestError> {
        tracing::info!(url = %self.url, "sending run summary");
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                text: summary.render_text(),
                summary,
                log: self.log_tail(),
            })
            .send()
            .map_err(|err| HarvestError::Notification(err.to_string()))?;
        if !response.status().is_success() {
            return Err(HarvestError::Notification(format!(
                "webhook returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

impl<T: NotificationSender + ?Sized> NotificationSender for Box<T> {
    fn send(&self, summary: &RunSummary) -> Result<(), HarvestError> {
        (**self).send(summary)
    }
}

#[derive(serde::Serialize)]
struct WebhookPayload<'a> {
    text: String,
    summary: &'a RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<String>,
}

fn tail_lines(content: &str, count: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
