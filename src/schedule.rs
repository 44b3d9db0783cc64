use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::error::HarvestError;
use crate::wait::wait_until;

pub const SCHEDULE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(String);

impl JobId {
    pub fn for_time(run_at: NaiveDateTime) -> Self {
        Self(run_at.format(SCHEDULE_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
}

pub fn parse_schedule_time(value: &str) -> Result<NaiveDateTime, HarvestError> {
    NaiveDateTime::parse_from_str(value.trim(), SCHEDULE_FORMAT)
        .map_err(|err| HarvestError::InvalidSchedule(format!("{value}: {err}")))
}

pub trait ScheduleStore {
    fn list(&self) -> Result<Vec<String>, HarvestError>;
    fn append(&self, entry: &str) -> Result<(), HarvestError>;
    fn remove(&self, entry: &str) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone)]
pub struct FileScheduleStore {
    path: PathBuf,
}

impl FileScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<PathBuf, HarvestError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|err| HarvestError::fs(parent.display(), err))?;
        Ok(parent)
    }
}

impl ScheduleStore for FileScheduleStore {
    fn list(&self) -> Result<Vec<String>, HarvestError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|err| HarvestError::fs(self.path.display(), err))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn append(&self, entry: &str) -> Result<(), HarvestError> {
        self.ensure_parent()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| HarvestError::fs(self.path.display(), err))?;
        writeln!(file, "{entry}").map_err(|err| HarvestError::fs(self.path.display(), err))
    }

    fn remove(&self, entry: &str) -> Result<(), HarvestError> {
        let remaining: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|line| line != entry)
            .collect();
        let parent = self.ensure_parent()?;
        let mut temp = tempfile::Builder::new()
            .prefix("report-harvest-schedule")
            .tempfile_in(&parent)
            .map_err(|err| HarvestError::fs(parent.display(), err))?;
        for line in &remaining {
            writeln!(temp, "{line}").map_err(|err| HarvestError::fs(temp.path().display(), err))?;
        }
        temp.persist(&self.path)
            .map_err(|err| HarvestError::fs(self.path.display(), err))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    entries: Mutex<Vec<String>>,
}

impl MemoryScheduleStore {
    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn list(&self) -> Result<Vec<String>, HarvestError> {
        Ok(self.entries().clone())
    }

    fn append(&self, entry: &str) -> Result<(), HarvestError> {
        self.entries().push(entry.to_string());
        Ok(())
    }

    fn remove(&self, entry: &str) -> Result<(), HarvestError> {
        self.entries().retain(|line| line != entry);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Job {
    run_at: Option<NaiveDateTime>,
    status: JobStatus,
}

#[derive(Debug)]
pub struct Scheduler<S: ScheduleStore> {
    store: S,
    jobs: BTreeMap<JobId, Job>,
}

impl<S: ScheduleStore> Scheduler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            jobs: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn restore(&mut self) -> Result<usize, HarvestError> {
        let entries = self.store.list()?;
        for entry in &entries {
            match parse_schedule_time(entry) {
                Ok(run_at) => {
                    self.jobs.insert(
                        JobId::for_time(run_at),
                        Job {
                            run_at: Some(run_at),
                            status: JobStatus::Scheduled,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(entry = %entry, error = %err, "failed to restore schedule");
                    self.jobs.insert(
                        JobId(entry.clone()),
                        Job {
                            run_at: None,
                            status: JobStatus::Failed,
                        },
                    );
                }
            }
        }
        tracing::info!(jobs = entries.len(), "existing schedules loaded");
        Ok(entries.len())
    }

    pub fn schedule(&mut self, run_at: NaiveDateTime) -> Result<JobId, HarvestError> {
        let id = JobId::for_time(run_at);
        if self
            .jobs
            .get(&id)
            .is_some_and(|job| job.status == JobStatus::Scheduled)
        {
            return Ok(id);
        }
        self.store.append(id.as_str())?;
        self.jobs.insert(
            id.clone(),
            Job {
                run_at: Some(run_at),
                status: JobStatus::Scheduled,
            },
        );
        tracing::info!(job = %id, "scheduled new run");
        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Result<JobStatus, HarvestError> {
        self.jobs
            .get(id)
            .map(|job| job.status)
            .ok_or_else(|| HarvestError::ScheduleNotFound(id.to_string()))
    }

    pub fn jobs(&self) -> Vec<(JobId, JobStatus)> {
        self.jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.status))
            .collect()
    }

    pub fn due(&self, now: NaiveDateTime) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|(_, job)| {
                job.status == JobStatus::Scheduled && job.run_at.is_some_and(|at| at <= now)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.jobs
            .values()
            .filter(|job| job.status == JobStatus::Scheduled)
            .filter_map(|job| job.run_at)
            .min()
    }

    /// Runs every due job in time order. `task` reports whether the run succeeded.
    /// Completed jobs leave the ledger; failed ones stay so a restart retries them.
    pub fn run_due<F>(
        &mut self,
        now: NaiveDateTime,
        mut task: F,
    ) -> Result<Vec<(JobId, JobStatus)>, HarvestError>
    where
        F: FnMut(&JobId) -> bool,
    {
        let mut finished = Vec::new();
        for id in self.due(now) {
            self.set_status(&id, JobStatus::InProgress);
            tracing::info!(job = %id, "scheduled run started");
            let status = if task(&id) {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            self.set_status(&id, status);
            if status == JobStatus::Completed {
                self.store.remove(id.as_str())?;
            }
            tracing::info!(job = %id, ?status, "scheduled run finished");
            finished.push((id, status));
        }
        Ok(finished)
    }

    pub fn serve<F>(&mut self, poll: Duration, mut task: F) -> Result<usize, HarvestError>
    where
        F: FnMut(&JobId) -> bool,
    {
        let mut executed = 0;
        while let Some(next) = self.next_run() {
            let wait = (next - Local::now().naive_local())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tracing::info!(next = %next, "waiting for next scheduled run");
            wait_until(poll, wait + poll, || {
                let now = Local::now().naive_local();
                (!self.due(now).is_empty()).then_some(())
            });
            let finished = self.run_due(Local::now().naive_local(), &mut task)?;
            executed += finished.len();
        }
        Ok(executed)
    }

    fn set_status(&mut self, id: &JobId, status: JobStatus) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> NaiveDateTime {
        parse_schedule_time(value).unwrap()
    }

    #[test]
    fn schedule_is_idempotent_per_time() {
        let mut scheduler = Scheduler::new(MemoryScheduleStore::default());
        let first = scheduler.schedule(at("2024-03-07 18:30:00")).unwrap();
        let second = scheduler.schedule(at("2024-03-07 18:30:00")).unwrap();
        assert_eq!(first, second);
        assert_eq!(scheduler.store().list().unwrap().len(), 1);
    }

    #[test]
    fn unknown_job_is_an_error() {
        let scheduler = Scheduler::new(MemoryScheduleStore::default());
        assert!(scheduler.status(&JobId::for_time(at("2024-03-07 18:30:00"))).is_err());
    }

    #[test]
    fn rejects_bad_time() {
        assert!(parse_schedule_time("tomorrow at six").is_err());
    }
}
