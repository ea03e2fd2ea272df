use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use vdr_artifacts::{
    discover_transmittals, find_manifest, read_manifest_csv, scan_transmittal,
    write_print_report_csv, write_print_report_json, write_status_csv, DirectoryCatalog,
    JsonRegisterFile, LocalArtifacts, MediaBoxScanner,
};
use vdr_config::{UnusedKeyPolicy, VdrConfig};
use vdr_reconcile::{
    BatchReport, Direction, GateDecision, PrintBudgetGate, ReconciliationEngine, StatusComputer,
    Transmittal,
};
use vdr_register::{parse_text_date, KeyNormalizer, Register};

const ENV_CONFIG: &str = "VDR_CONFIG";

#[derive(Parser)]
#[command(name = "vdr")]
#[command(about = "Vendor document register reconciliation", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (falls back to $VDR_CONFIG, comma separated)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    /// Fail instead of warn on config keys the tool does not read
    #[arg(long, global = true, default_value_t = false)]
    strict_config: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> project -> phase ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Post outgoing transmittals into their phase registers
    Send {
        /// Transmittal folder(s)
        #[arg(long = "transmittal", required = true)]
        transmittals: Vec<PathBuf>,

        /// Directory holding the phase registers
        #[arg(long)]
        registers: PathBuf,

        /// Send date (dd.mm.yyyy); defaults to today
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Take in returned transmittals and fill returned fields
    Receive {
        /// Transmittal folder(s)
        #[arg(long = "transmittal", required = true)]
        transmittals: Vec<PathBuf>,

        /// Directory holding the phase registers
        #[arg(long)]
        registers: PathBuf,

        /// Manifest CSV for a single transmittal; defaults to the first CSV
        /// in each transmittal folder
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Print the status of every document in a register
    Status {
        /// Register file
        #[arg(long)]
        register: PathBuf,

        /// Also write the status map as CSV
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Size accepted documents against free space and copy them
    Print {
        /// Register file
        #[arg(long)]
        register: PathBuf,

        /// Folder containing sent and received transmittal folders
        #[arg(long)]
        transmittals: PathBuf,

        /// Copy target; reports are written here too
        #[arg(long)]
        target: PathBuf,

        /// Write reports only, copy nothing
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    // Silent when the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let policy = if cli.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = vdr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Send {
            transmittals,
            registers,
            date,
        } => {
            let cfg = load_config(&cli.config_paths, policy)?;
            let catalog = DirectoryCatalog::new(&registers, &cfg.masks);
            let engine = ReconciliationEngine::new(cfg);
            let mut failed = 0;
            for dir in &transmittals {
                match send_one(&engine, &catalog, dir, date) {
                    Ok(report) => print_batch(&report),
                    Err(e) => {
                        failed += 1;
                        report_failure(dir, &e);
                    }
                }
            }
            finish_batch(failed, transmittals.len())?;
        }

        Commands::Receive {
            transmittals,
            registers,
            manifest,
        } => {
            if manifest.is_some() && transmittals.len() > 1 {
                bail!("--manifest applies to a single --transmittal");
            }
            let cfg = load_config(&cli.config_paths, policy)?;
            let catalog = DirectoryCatalog::new(&registers, &cfg.masks);
            let engine = ReconciliationEngine::new(cfg);
            let mut failed = 0;
            for dir in &transmittals {
                match receive_one(&engine, &catalog, dir, manifest.as_deref()) {
                    Ok(report) => print_batch(&report),
                    Err(e) => {
                        failed += 1;
                        report_failure(dir, &e);
                    }
                }
            }
            finish_batch(failed, transmittals.len())?;
        }

        Commands::Status { register, out } => {
            let cfg = load_config(&cli.config_paths, policy)?;
            let reg = load_register(&register, &cfg)?;
            let statuses = StatusComputer.scan(&reg)?;
            for s in statuses.values() {
                let (label, reference) = s
                    .frontier
                    .as_ref()
                    .map(|f| (f.label.as_str(), f.reference.as_str()))
                    .unwrap_or(("", ""));
                println!(
                    "document={} status={} frontier={} transmittal={}",
                    s.key, s.status, label, reference
                );
            }
            println!("documents={}", statuses.len());
            if let Some(out) = out {
                write_status_csv(&out, &statuses)?;
                println!("status_csv={}", out.display());
            }
        }

        Commands::Print {
            register,
            transmittals,
            target,
            dry_run,
        } => {
            let cfg = load_config(&cli.config_paths, policy)?;
            let reg = load_register(&register, &cfg)?;
            let statuses = StatusComputer.scan(&reg)?;
            let engine = ReconciliationEngine::new(cfg.clone());
            let known = load_transmittals(&transmittals, &engine)?;

            let gate = PrintBudgetGate::new(cfg.print.clone(), KeyNormalizer::new(&cfg.keys));
            let report = gate.evaluate(
                &statuses,
                &known,
                &LocalArtifacts,
                Some(&MediaBoxScanner),
                &target,
            )?;
            let json = write_print_report_json(&target, &report)?;
            let csv = write_print_report_csv(&target, &report)?;

            println!("batch_id={}", report.batch_id);
            println!("printable={}", report.printable().count());
            println!("missing={}", report.missing.len());
            println!("required_bytes={}", report.required_bytes);
            println!("usable_bytes={}", report.usable_bytes());
            for (format, pages) in &report.format_totals {
                println!("pages_{format}={pages}");
            }
            println!("report_json={}", json.display());
            println!("report_csv={}", csv.display());

            match &report.decision {
                GateDecision::Proceed => println!("decision=proceed"),
                GateDecision::InsufficientStorage { shortfall } => {
                    println!("decision=insufficient_storage shortfall_bytes={shortfall}")
                }
                GateDecision::SpaceUnknown { reason } => {
                    println!("decision=space_unknown reason={reason}")
                }
            }
            if dry_run {
                println!("copied=0 dry_run=true");
                return Ok(());
            }
            let copied = gate.copy_accepted(&report, &LocalArtifacts, &target)?;
            println!("copied={}", copied.len());
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    parse_text_date(s).ok_or_else(|| format!("not a date: '{s}' (expected dd.mm.yyyy)"))
}

fn send_one(
    engine: &ReconciliationEngine,
    catalog: &DirectoryCatalog,
    dir: &Path,
    date: Option<NaiveDate>,
) -> Result<BatchReport> {
    let mut t = scan_transmittal(dir, Direction::Outgoing, &engine.config().masks)?;
    if t.phase.is_empty() {
        bail!("no phase derivable from documents in {}", dir.display());
    }
    engine
        .send_transmittal(catalog, &mut t, date)
        .with_context(|| format!("send {}", t.name))
}

fn receive_one(
    engine: &ReconciliationEngine,
    catalog: &DirectoryCatalog,
    dir: &Path,
    manifest: Option<&Path>,
) -> Result<BatchReport> {
    let mut t = scan_transmittal(dir, Direction::Incoming, &engine.config().masks)?;
    let manifest_path = match manifest {
        Some(p) => p.to_path_buf(),
        None => find_manifest(dir)?
            .with_context(|| format!("no manifest csv in {}", dir.display()))?,
    };
    let sheet = read_manifest_csv(&manifest_path)?;
    engine
        .receive_transmittal(catalog, &mut t, &sheet)
        .with_context(|| format!("receive {}", t.name))
}

fn report_failure(dir: &Path, e: &anyhow::Error) {
    error!(transmittal = %dir.display(), error = %format!("{e:#}"), "transmittal failed");
    println!("failed transmittal={} reason={e:#}", dir.display());
}

/// Non-zero exit once every transmittal had its turn.
fn finish_batch(failed: usize, total: usize) -> Result<()> {
    println!("transmittals={total} failed={failed}");
    if failed > 0 {
        bail!("{failed} of {total} transmittal(s) failed");
    }
    Ok(())
}

/// Merge the given config layers; none given means `$VDR_CONFIG`, and
/// neither means the built-in defaults.
fn load_config(paths: &[String], policy: UnusedKeyPolicy) -> Result<VdrConfig> {
    let mut paths = paths.to_vec();
    if paths.is_empty() {
        if let Ok(v) = std::env::var(ENV_CONFIG) {
            paths = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
    if paths.is_empty() {
        info!("no config layers given, using defaults");
        return Ok(VdrConfig::default());
    }

    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = vdr_config::load_layered_yaml(&path_refs)?;
    let unused = vdr_config::report_unused_keys(&loaded.config_json, policy)?;
    for pointer in &unused.unused_leaf_pointers {
        warn!(%pointer, "config key is not read by any setting");
    }
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    loaded.settings()
}

fn load_register(path: &Path, cfg: &VdrConfig) -> Result<Register> {
    let file = JsonRegisterFile::new(path);
    Register::snapshot(&file, cfg).with_context(|| format!("load register {}", path.display()))
}

/// Every sent and received transmittal folder under `root`. Received ones
/// with a manifest get it applied so document numbers resolve. A folder
/// that cannot be read is logged and left out.
fn load_transmittals(root: &Path, engine: &ReconciliationEngine) -> Result<Vec<Transmittal>> {
    let masks = &engine.config().masks;
    let mut out = Vec::new();
    let mut failed = 0;
    for (mask, direction) in [
        (&masks.sent_transmittal, Direction::Outgoing),
        (&masks.received_transmittal, Direction::Incoming),
    ] {
        for dir in discover_transmittals(root, mask)? {
            match load_one(&dir, direction, engine) {
                Ok(t) => out.push(t),
                Err(e) => {
                    failed += 1;
                    report_failure(&dir, &e);
                }
            }
        }
    }
    info!(transmittals = out.len(), failed, root = %root.display(), "transmittals loaded");
    println!("transmittals_failed={failed}");
    Ok(out)
}

fn load_one(dir: &Path, direction: Direction, engine: &ReconciliationEngine) -> Result<Transmittal> {
    let mut t = scan_transmittal(dir, direction, &engine.config().masks)?;
    if direction == Direction::Incoming {
        if let Some(path) = find_manifest(dir)? {
            let sheet = read_manifest_csv(&path)?;
            if let Err(e) = engine.post_incoming(&mut t, &sheet) {
                warn!(transmittal = %t.name, error = %e, "manifest ignored");
            }
        }
    }
    Ok(t)
}

fn print_batch(report: &BatchReport) {
    println!("batch_id={}", report.batch_id);
    println!("transmittal={}", report.transmittal);
    println!("direction={}", report.direction);
    println!("written={}", report.written.len());
    println!("unchanged={}", report.unchanged.len());
    println!("skipped={}", report.skipped.len());
    for s in &report.skipped {
        println!("skip document={} reason={}", s.document, s.reason);
    }
    println!("warnings={}", report.warnings.len());
    println!("saved={}", report.saved);
}
