//! dumpcycle CLI: runs and inspects a continuous backup cycle.
//!
//! Subcommands:
//! - `init`: write a default `dumpcycle.toml`
//! - `check`: create directories and ping the database
//! - `run-once`: one capture, then exit
//! - `serve`: run the producer and the nightly rotation until stopped
//! - `rotate`: retire the current artifact now
//! - `split`: split any dump file into statement-aligned parts
//! - `status`: show the cycle state from disk

mod commands;
mod format;
mod inspect;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::ArgMatches;
use dumpcycle_durability::{gb_to_bytes, split, verify_parts};
use dumpcycle_engine::{BackupService, MysqlDumpEngine, ServiceConfig, TracingAlerts};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use commands::build_cli;
use format::{format_capture, format_report, format_split, format_view};
use inspect::CycleView;

fn main() {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_one::<String>("log-level").map(String::as_str));

    let code = match run(&matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(code);
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    let config_path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(dumpcycle_engine::CONFIG_FILE_NAME),
    );

    match matches.subcommand() {
        Some(("init", sub)) => run_init(&config_path, sub.get_flag("force")),
        Some(("split", sub)) => run_split(sub),
        Some(("status", _)) => {
            let config = load_config(&config_path)?;
            let view = CycleView::read(&config, chrono::Local::now().naive_local());
            println!("{}", format_view(&view));
            Ok(0)
        }
        Some((name, _)) => {
            let service = open_service(&config_path)?;
            match name {
                "check" => {
                    service.check().context("database check failed")?;
                    println!(
                        "OK: '{}' reachable, backups in {}",
                        service.config().database.name,
                        service.layout().temp_dir().display()
                    );
                    Ok(0)
                }
                "run-once" => {
                    service.lock_instance()?;
                    let outcome = service.run_once();
                    service.stop();
                    println!("{}", format_capture(&outcome?));
                    Ok(0)
                }
                "rotate" => {
                    service.lock_instance()?;
                    let report = service.force_rotation();
                    service.stop();
                    println!("{}", format_report(&report));
                    Ok(if report.is_completed() { 0 } else { 1 })
                }
                "serve" => run_serve(&service),
                other => bail!("unknown command '{}'", other),
            }
        }
        None => bail!("no command given; see --help"),
    }
}

fn load_config(path: &Path) -> anyhow::Result<ServiceConfig> {
    ServiceConfig::from_file(path)
        .with_context(|| format!("cannot load configuration from '{}'", path.display()))
}

fn open_service(config_path: &Path) -> anyhow::Result<BackupService> {
    let config = load_config(config_path)?;
    let engine = MysqlDumpEngine::locate(config.dump.bin_dir.as_deref())?;
    Ok(BackupService::new(
        config,
        Arc::new(engine),
        Arc::new(TracingAlerts),
    )?)
}

fn run_init(path: &Path, force: bool) -> anyhow::Result<i32> {
    if force {
        fs::write(path, ServiceConfig::default_toml())
            .with_context(|| format!("cannot write '{}'", path.display()))?;
        println!("Wrote {}", path.display());
    } else if ServiceConfig::write_default_if_missing(path)? {
        println!("Wrote {}; set database.name and storage.backup_dir before running", path.display());
    } else {
        println!("{} already exists; use --force to overwrite", path.display());
    }
    Ok(0)
}

fn run_split(sub: &ArgMatches) -> anyhow::Result<i32> {
    let (Some(source), Some(target)) = (
        sub.get_one::<String>("source"),
        sub.get_one::<String>("target"),
    ) else {
        bail!("split needs a source file and a target folder");
    };
    let max_gb = sub.get_one::<f64>("max-gb").copied().unwrap_or(1.0);
    if max_gb.is_nan() || max_gb <= 0.0 {
        bail!("--max-gb must be greater than zero");
    }

    let source = Path::new(source);
    let target = Path::new(target);
    let source_size = fs::metadata(source)
        .with_context(|| format!("cannot read '{}'", source.display()))?
        .len();
    fs::create_dir_all(target)
        .with_context(|| format!("cannot create '{}'", target.display()))?;

    let parts = split(source, target, gb_to_bytes(max_gb))?;
    let summary = verify_parts(source_size, &parts)?;
    println!("{}", format_split(&parts, &summary));
    Ok(0)
}

/// Run until the producer aborts under the `abort` error policy.
///
/// Interrupting the process is the normal way to stop; the instance lock is
/// released by the OS and every on-disk write is atomic.
fn run_serve(service: &BackupService) -> anyhow::Result<i32> {
    service.start()?;
    info!(
        target: "dumpcycle::cli",
        database = %service.config().database.name,
        backup_dir = %service.layout().temp_dir().display(),
        "Serving; interrupt to stop"
    );

    service.abort_signal().wait();
    error!(
        target: "dumpcycle::cli",
        failure = ?service.producer().last_failure(),
        "Producer aborted, shutting down"
    );
    service.stop();
    Ok(1)
}
