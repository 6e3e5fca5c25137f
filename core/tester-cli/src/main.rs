//! Battery tester entrypoint.
//!
//! Thin shell over `tester-core`: argument parsing, logging setup, signal
//! handling, and exit codes. All session logic lives in the library.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tester_core::{
    hardware, resume, validation, Durability, LoadOutcome, PlatformSensor, RootDocument,
    RunStatus, Sensor, SessionDriver, SessionStore, StartupState, StorageConfig, TesterConfig,
    TesterError,
};

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

#[derive(Debug, Parser)]
#[command(
    name = "battery-tester",
    version,
    about = "Monitor a laptop's battery discharge and record it durably"
)]
struct Args {
    /// Resume an interrupted test without prompting
    #[arg(long)]
    resume: bool,

    /// Finalize an interrupted test and start a fresh run
    #[arg(long)]
    start_new: bool,

    /// Run pre-test validation checks only
    #[arg(long)]
    validate: bool,

    /// Skip pre-test validation (use with caution)
    #[arg(long)]
    skip_validation: bool,

    /// Notes recorded with the test run
    #[arg(long, value_name = "TEXT")]
    notes: Option<String>,

    /// Low battery warning threshold percent
    #[arg(long, value_name = "PERCENT", default_value_t = 10)]
    low_battery: u8,

    /// Backup interval in minutes
    #[arg(long, value_name = "MINUTES", default_value_t = 5)]
    backup_interval: u64,

    /// Show recorded runs for this laptop
    #[arg(long)]
    history: bool,

    /// Override the storage root directory
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,
}

fn main() {
    init_logging();
    let args = Args::parse();
    std::process::exit(run(args));
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: Args) -> i32 {
    let storage = match &args.data_dir {
        Some(root) => StorageConfig::with_root(root.clone()),
        None => StorageConfig::default(),
    };
    let config = TesterConfig {
        low_battery_threshold: args.low_battery,
        backup_interval: Duration::from_secs(args.backup_interval * 60),
        skip_validation: args.skip_validation,
        ..TesterConfig::default()
    };
    let mut durability = Durability::new(storage, config.backup_interval, config.keep_backups);

    let doc = match durability.load() {
        Ok(LoadOutcome::Absent) => {
            info!("no existing data file; starting a new one");
            RootDocument::new()
        }
        Ok(LoadOutcome::Loaded(doc)) => doc,
        Ok(LoadOutcome::Recovered { doc, backup }) => {
            warn!(backup = %backup.display(), "data file recovered from backup");
            doc
        }
        Err(err @ TesterError::UnsupportedVersion { .. }) => {
            error!(error = %err, "data file requires a newer battery-tester");
            eprintln!("error: {err}");
            return 1;
        }
        Err(TesterError::Unrecoverable { quarantined }) => {
            if args.history {
                eprintln!(
                    "error: data file unrecoverable; unreadable file preserved at {}",
                    quarantined.display()
                );
                return 1;
            }
            warn!(
                quarantined = %quarantined.display(),
                "data file unrecoverable; starting fresh"
            );
            RootDocument::new()
        }
        Err(err) => {
            error!(error = %err, "could not load data file");
            eprintln!("error: {err}");
            return 1;
        }
    };

    let laptop_id = hardware::generate_laptop_id();
    let mut store = SessionStore::new(doc);
    store.register_laptop(&laptop_id, hardware::hardware_snapshot());
    info!(laptop_id = %laptop_id, "laptop identified");

    if args.history {
        print_history(&store, &laptop_id);
        return 0;
    }

    let health = hardware::battery_health_snapshot(Path::new(POWER_SUPPLY_ROOT));

    if args.validate {
        let mut sensor = PlatformSensor::default();
        let reading = sensor.read().ok();
        let report = validation::validate_pretest(reading.as_ref(), health.as_ref(), true);
        for warning in &report.warnings {
            println!("warning: {warning}");
        }
        if report.is_valid() {
            println!("all validation checks passed");
            return 0;
        }
        for check in &report.errors {
            eprintln!("error: {check}");
        }
        return 1;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            warn!(signal, error = %err, "could not register shutdown signal");
        }
    }

    // Resolve an incomplete run before anything may start a new one.
    let resume_point = match resume::classify(&store, &laptop_id) {
        StartupState::NoHistory => None,
        StartupState::CleanHistory { last_status } => {
            info!(last_status = last_status.as_str(), "previous run complete");
            None
        }
        StartupState::Incomplete {
            run_id,
            resume_point,
        } => {
            if args.resume {
                match resume::resume_run(&mut store, &laptop_id) {
                    Ok(point) => Some(point),
                    Err(err) => {
                        error!(error = %err, "could not resume run");
                        eprintln!("error: {err}");
                        return 1;
                    }
                }
            } else if args.start_new {
                match resume::abandon_run(
                    &mut store,
                    &laptop_id,
                    config.low_battery_threshold,
                    None,
                    chrono::Utc::now(),
                ) {
                    Ok(status) => {
                        info!(run_id = %run_id, status = status.as_str(), "previous run finalized");
                        if let Err(err) = durability.persist(store.document()) {
                            warn!(error = %err, "could not persist finalized run");
                        } else if let Err(err) = durability.backup(Instant::now()) {
                            warn!(error = %err, "could not back up finalized run");
                        }
                        None
                    }
                    Err(err) => {
                        error!(error = %err, "could not finalize previous run");
                        eprintln!("error: {err}");
                        return 1;
                    }
                }
            } else {
                eprintln!(
                    "error: incomplete test run {run_id} found (last elapsed {}s); \
                     pass --resume to continue it or --start-new to finalize it",
                    resume_point.elapsed_seconds
                );
                return 1;
            }
        }
    };

    let mut driver = SessionDriver::new(
        PlatformSensor::default(),
        store,
        durability,
        config,
        &laptop_id,
    );

    let begun = match resume_point {
        Some(point) => driver.begin_resumed(point),
        None => driver.begin_fresh(hardware::collect_metadata(args.notes.as_deref()), health),
    };
    if let Err(err) = begun {
        match err {
            TesterError::ValidationFailed { errors } => {
                for check in &errors {
                    eprintln!("error: {check}");
                }
                eprintln!("validation failed; fix the errors above or pass --skip-validation");
            }
            other => {
                error!(error = %other, "could not start test run");
                eprintln!("error: {other}");
            }
        }
        return 1;
    }

    println!("waiting for AC power to be disconnected; unplug the charger to begin");
    match driver.run(&shutdown) {
        Ok(status) => {
            print_outcome(&driver, &laptop_id, status);
            0
        }
        Err(err) => {
            error!(error = %err, "test run failed");
            eprintln!("error: {err}");
            1
        }
    }
}

fn print_history(store: &SessionStore, laptop_id: &str) {
    let Some(record) = store.laptop(laptop_id) else {
        println!("no recorded runs for {laptop_id}");
        return;
    };
    if record.test_runs.is_empty() {
        println!("no recorded runs for {laptop_id}");
        return;
    }

    println!("test runs for {laptop_id}:");
    for run in &record.test_runs {
        let runtime = format_runtime(run.total_elapsed_seconds);
        println!(
            "  {}  {:<22} runtime {}  entries {}{}",
            run.run_id,
            run.status.as_str(),
            runtime,
            run.entries.len(),
            if run.resumed { "  (resumed)" } else { "" },
        );
    }
}

fn print_outcome<S: Sensor>(driver: &SessionDriver<S>, laptop_id: &str, status: RunStatus) {
    println!("test finished: {}", status.as_str());
    if let Some(run) = driver
        .store()
        .laptop(laptop_id)
        .and_then(|record| record.test_runs.last())
    {
        println!(
            "  runtime {}  entries {}  final battery {}%",
            format_runtime(run.total_elapsed_seconds),
            run.entries.len(),
            run.last_entry()
                .map(|entry| entry.battery_percent)
                .unwrap_or(0),
        );
    }
}

fn format_runtime(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
