use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{RunSummary, ValidationVerdict};
use crate::schedule::{JobId, JobStatus};

pub struct JsonOutput;

#[derive(Debug, Serialize)]
struct ScheduledJob<'a> {
    job: &'a JobId,
    status: JobStatus,
}

#[derive(Debug, Serialize)]
struct VerdictReport<'a> {
    passed: usize,
    failed: usize,
    verdicts: &'a [ValidationVerdict],
}

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_verdicts(verdicts: &[ValidationVerdict]) -> io::Result<()> {
        let passed = verdicts.iter().filter(|verdict| verdict.pass).count();
        Self::print_json(&VerdictReport {
            passed,
            failed: verdicts.len() - passed,
            verdicts,
        })
    }

    pub fn print_jobs(jobs: &[(JobId, JobStatus)]) -> io::Result<()> {
        let jobs: Vec<ScheduledJob<'_>> = jobs
            .iter()
            .map(|(job, status)| ScheduledJob {
                job,
                status: *status,
            })
            .collect();
        Self::print_json(&jobs)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
