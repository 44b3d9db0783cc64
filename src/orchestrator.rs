use std::fs;
use std::path::PathBuf;

use chrono::{Local, NaiveDate};

use crate::archive::ArchiveVerifier;
use crate::config::ResolvedConfig;
use crate::dedupe::{DuplicateResolver, RenamePolicy};
use crate::domain::{
    DirectoryListing, DownloadManifest, RunStage, RunStatus, RunSummary, ValidationVerdict,
    dated_dir_name,
};
use crate::error::HarvestError;
use crate::lock::DateLock;
use crate::logging::LogContext;
use crate::notify::NotificationSender;
use crate::portal::PageInteraction;
use crate::retry::{Release, RetryExecutor, RetryPolicy};
use crate::segregate::Segregator;
use crate::validate::ValidationGate;
use crate::watcher::{DownloadWatcher, WatchSettings};

pub const SUMMARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub download_dir: PathBuf,
    pub tabular_extension: String,
    pub watch: WatchSettings,
    pub retry: RetryPolicy,
}

impl From<&ResolvedConfig> for RunSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            download_dir: config.download_dir.clone().into_std_path_buf(),
            tabular_extension: config.tabular_extension.clone(),
            watch: config.watch.clone(),
            retry: config.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub summary: RunSummary,
    pub missing_names: Vec<String>,
    pub verdicts: Vec<ValidationVerdict>,
}

#[derive(Debug, Default)]
struct Progress {
    stage: Option<RunStage>,
    downloaded: usize,
    validated: usize,
    renamed: usize,
    missing_names: Vec<String>,
    verdicts: Vec<ValidationVerdict>,
}

impl Progress {
    fn enter(&mut self, stage: RunStage) {
        tracing::info!(%stage, "stage started");
        self.stage = Some(stage);
    }
}

pub struct RunOrchestrator<P: PageInteraction, N: NotificationSender, R: RenamePolicy> {
    settings: RunSettings,
    portal: P,
    notifier: N,
    rename: R,
}

impl<P: PageInteraction, N: NotificationSender, R: RenamePolicy> RunOrchestrator<P, N, R> {
    pub fn new(settings: RunSettings, portal: P, notifier: N, rename: R) -> Self {
        Self {
            settings,
            portal,
            notifier,
            rename,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn run(&mut self, date: NaiveDate) -> RunSummary {
        self.run_report(date).summary
    }

    /// Runs every stage for `date`. A failing stage skips straight to the summary, which
    /// is always sent; the portal session is released afterwards no matter what.
    pub fn run_report(&mut self, date: NaiveDate) -> RunReport {
        let run_id = Local::now().format("%Y%m%d%H%M%S").to_string();
        let log = LogContext::for_run(&run_id, date);
        let mut progress = Progress::default();

        let outcome = {
            let _guard = log.enter();
            self.execute(date, &log, &mut progress)
        };

        let (status, failed_stage, error) = match outcome {
            Ok(()) => (RunStatus::Success, None, None),
            Err(err) => {
                let _guard = log.enter();
                let stage = progress.stage.unwrap_or(RunStage::Init);
                tracing::error!(%stage, error = %err, "run failed");
                (RunStatus::Failure, Some(stage), Some(err.to_string()))
            }
        };

        let _guard = log.enter();
        tracing::info!(stage = %RunStage::Summarize, "stage started");
        let summary = RunSummary {
            status,
            downloaded: progress.downloaded,
            validated: progress.validated,
            renamed: progress.renamed,
            timestamp: Local::now().format(SUMMARY_TIME_FORMAT).to_string(),
            failed_stage,
            error,
        };
        tracing::info!(
            %status,
            downloaded = summary.downloaded,
            validated = summary.validated,
            renamed = summary.renamed,
            "run finished"
        );

        if let Err(err) = self.notifier.send(&summary) {
            tracing::warn!(error = %err, "failed to send run summary");
        }
        if let Err(err) = self.portal.release() {
            tracing::warn!(error = %err, "failed to release portal session");
        }

        RunReport {
            summary,
            missing_names: progress.missing_names,
            verdicts: progress.verdicts,
        }
    }

    fn execute(
        &mut self,
        date: NaiveDate,
        log: &LogContext,
        progress: &mut Progress,
    ) -> Result<(), HarvestError> {
        progress.enter(RunStage::Init);
        let download_dir = self.settings.download_dir.clone();
        fs::create_dir_all(&download_dir)
            .map_err(|err| HarvestError::fs(download_dir.display(), err))?;
        let retry = RetryExecutor::new(self.settings.retry.clone(), log.child("retry"));

        progress.enter(RunStage::Select);
        let selection = retry.run_with("select reports", &mut self.portal, |portal| {
            portal.load_reports_page()?;
            portal.select_reports()
        })?;
        if !selection.any_selected {
            return Err(HarvestError::NothingSelected);
        }
        let manifest: DownloadManifest = selection.expected_names.into_iter().collect();

        progress.enter(RunStage::Trigger);
        retry.run_with("trigger download", &mut self.portal, |portal| {
            portal.trigger_download()
        })?;

        progress.enter(RunStage::AwaitDownload);
        let watcher = DownloadWatcher::new(self.settings.watch.clone(), log.child("watcher"));
        let archive = watcher.await_archive(&download_dir)?;

        let _lock = DateLock::acquire(&download_dir, date)?;
        let dated_dir = download_dir.join(dated_dir_name(date));

        progress.enter(RunStage::Verify);
        let extraction =
            ArchiveVerifier::new(log.child("archive")).verify(&archive.path, &manifest, &dated_dir)?;
        progress.missing_names = extraction.missing_names;

        progress.enter(RunStage::Deduplicate);
        let listing = DirectoryListing::scan(&dated_dir)?;
        let report =
            DuplicateResolver::new(&mut self.rename, log.child("dedupe")).resolve(&listing)?;
        progress.downloaded = listing.len();
        progress.renamed = report.renames.len();

        progress.enter(RunStage::Segregate);
        let segregation = Segregator::new(&self.settings.tabular_extension, log.child("segregate"))
            .segregate(&dated_dir)?;

        progress.enter(RunStage::Validate);
        let gate = ValidationGate::new(&self.settings.tabular_extension, log.child("validate"));
        let verdicts = gate.validate_dir(&segregation.tabular_dir());
        progress.validated = verdicts.iter().filter(|verdict| verdict.pass).count();
        let rejected = verdicts.len() - progress.validated;
        if rejected > 0 {
            tracing::warn!(rejected, "some files failed validation");
        }
        progress.verdicts = verdicts;
        Ok(())
    }
}
