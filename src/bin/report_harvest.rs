use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use report_harvest::config::{ConfigLoader, RenameMode, ResolvedConfig};
use report_harvest::dedupe::{AutoRename, InteractiveRename, RenamePolicy, stdin_prompt};
use report_harvest::domain::{RunStatus, RunSummary};
use report_harvest::error::HarvestError;
use report_harvest::logging::LogContext;
use report_harvest::notify::{LogNotifier, NotificationSender, WebhookNotifier};
use report_harvest::orchestrator::{RunOrchestrator, RunSettings};
use report_harvest::output::JsonOutput;
use report_harvest::portal::HttpPortal;
use report_harvest::schedule::{FileScheduleStore, Scheduler, parse_schedule_time};
use report_harvest::validate::ValidationGate;

#[derive(Parser)]
#[command(name = "report-harvest")]
#[command(about = "Download, verify, de-duplicate, segregate and validate daily report archives")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./report-harvest.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Also write the log to this file; it is attached to webhook notifications
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the download pipeline once")]
    Run(RunArgs),
    #[command(about = "Validate tabular files without downloading")]
    Validate(ValidateArgs),
    #[command(about = "Manage scheduled runs")]
    Schedule(ScheduleArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Run date used for the extraction directory (YYYY-MM-DD, default today)
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct ScheduleArgs {
    #[command(subcommand)]
    command: ScheduleCommand,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    #[command(about = "Schedule a run at \"YYYY-MM-DD HH:MM:SS\"")]
    Add { time: String },
    #[command(about = "List scheduled runs")]
    List,
    #[command(about = "Wait for scheduled runs and execute them")]
    Serve,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(harvest) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(harvest));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::MissingConfig
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidSchedule(_)
        | HarvestError::ScheduleNotFound(_) => 2,
        HarvestError::Http(_)
        | HarvestError::HttpStatus { .. }
        | HarvestError::Navigation(_)
        | HarvestError::Notification(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            let date = args.date.unwrap_or_else(|| Local::now().date_naive());
            let summary = run_once(&config, date, cli.log_file.clone())?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
            ensure_success(&summary)
        }
        Commands::Validate(args) => {
            let gate = ValidationGate::new(&config.tabular_extension, LogContext::detached());
            let verdicts: Vec<_> = args.files.iter().map(|file| gate.validate(file)).collect();
            JsonOutput::print_verdicts(&verdicts).into_diagnostic()?;
            let failed = verdicts.iter().filter(|verdict| !verdict.pass).count();
            if failed > 0 {
                return Err(miette::miette!("{failed} file(s) failed validation"));
            }
            Ok(())
        }
        Commands::Schedule(args) => run_schedule(args.command, &config, cli.log_file),
    }
}

fn init_tracing(log_file: Option<&Path>) -> miette::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    Ok(())
}

fn run_once(
    config: &ResolvedConfig,
    date: NaiveDate,
    log_file: Option<PathBuf>,
) -> Result<RunSummary, HarvestError> {
    let portal = HttpPortal::new(config.portal_settings()?)?;

    let notifier: Box<dyn NotificationSender> = match &config.webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url.clone())?.with_log_file(log_file)),
        None => Box::new(LogNotifier),
    };

    let rename: Box<dyn RenamePolicy> = match config.rename {
        RenameMode::Auto => Box::new(AutoRename),
        RenameMode::Interactive => Box::new(InteractiveRename::new(stdin_prompt)),
    };

    let mut orchestrator = RunOrchestrator::new(RunSettings::from(config), portal, notifier, rename);
    Ok(orchestrator.run(date))
}

fn ensure_success(summary: &RunSummary) -> miette::Result<()> {
    match summary.status {
        RunStatus::Success => Ok(()),
        RunStatus::Failure => Err(miette::miette!(
            "run failed{}: {}",
            summary
                .failed_stage
                .map(|stage| format!(" at stage {stage}"))
                .unwrap_or_default(),
            summary.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

fn run_schedule(
    command: ScheduleCommand,
    config: &ResolvedConfig,
    log_file: Option<PathBuf>,
) -> miette::Result<()> {
    let store = FileScheduleStore::new(config.schedule_ledger.as_std_path());
    let mut scheduler = Scheduler::new(store);
    scheduler.restore()?;

    match command {
        ScheduleCommand::Add { time } => {
            let run_at = parse_schedule_time(&time)?;
            if run_at <= Local::now().naive_local() {
                return Err(HarvestError::InvalidSchedule(format!("{time} is in the past")).into());
            }
            let job = scheduler.schedule(run_at)?;
            JsonOutput::print_jobs(&[(job.clone(), scheduler.status(&job)?)]).into_diagnostic()
        }
        ScheduleCommand::List => JsonOutput::print_jobs(&scheduler.jobs()).into_diagnostic(),
        ScheduleCommand::Serve => {
            let executed = scheduler.serve(config.watch.interval, |job| {
                let date = Local::now().date_naive();
                match run_once(config, date, log_file.clone()) {
                    Ok(summary) => summary.status == RunStatus::Success,
                    Err(err) => {
                        tracing::error!(%job, error = %err, "scheduled run could not start");
                        false
                    }
                }
            })?;
            tracing::info!(executed, "no scheduled runs left");
            Ok(())
        }
    }
}
