//! SCADA telemetry server.
//!
//! Loads the settings XML and the channel/control-channel/user/formula base
//! files, compiles every configured formula, recovers the current snapshot if
//! one exists on disk, then spawns the scheduler thread (component G) and
//! runs the TCP server (component H) until a shutdown signal arrives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use scada_common::{CnlNum, InCnl};
use scada_config::Settings;
use scada_engine::ChannelEvaluator;
use scada_formula::Calculator;
use scada_modules::{ModuleHost, ModuleRegistry};
use scada_net::{APP_VERSION, DirectoryRoots, RunState, SchedulerConfig, SchedulerHandle, Server, ServerState};
use scada_store::cache::{SnapshotCache, TableKind};

#[derive(Parser, Debug)]
#[command(name = "scada-server")]
#[command(about = "Telemetry acquisition and archival server")]
struct Args {
    /// Path to the server settings XML (spec §6.2)
    #[arg(short, long, default_value = "./settings.xml")]
    settings: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Address to bind the TCP listener to; the port comes from the settings
    /// file unless overridden here
    #[arg(long, default_value = "0.0.0.0")]
    bind_host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(args.log_level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing subscriber")?;

    info!(settings = %args.settings.display(), "loading server settings");
    let settings = scada_config::load_settings(&args.settings).context("failed to load settings.xml")?;

    let state = Arc::new(build_state(&settings)?);
    state.modules.on_server_start();

    let addr: SocketAddr = format!("{}:{}", args.bind_host, settings.network.tcp_port)
        .parse()
        .context("invalid bind address")?;

    let scheduler_config = SchedulerConfig {
        write_cur_period_secs: settings.periods.write_cur_period,
        write_min_period_secs: settings.periods.write_min_period,
        write_hr_period_secs: settings.periods.write_hr_period,
        store_min_period_days: settings.retention.store_min_period as i64,
        store_hr_period_days: settings.retention.store_hr_period as i64,
        store_ev_period_days: settings.retention.store_ev_period as i64,
        inactive_unreliable_minutes: settings.flags.inactive_unreliable_minutes,
        status_path: state.dirs.current.join("status.txt"),
    };
    let scheduler = SchedulerHandle::spawn(state.clone(), scheduler_config)
        .context("failed to start scheduler thread")?;

    let server = Server::new(state.clone(), APP_VERSION);
    let server_task = tokio::spawn(async move {
        if let Err(err) = server.run(addr).await {
            eprintln!("server error: {err}");
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(%err, "unable to listen for shutdown signal"),
    }

    state.set_run_state(RunState::Stopped);
    state.modules.on_server_stop();
    scheduler.shutdown();
    server_task.abort();
    info!("scada-server shutdown complete");

    Ok(())
}

/// Assembles every piece of shared server state from the settings file:
/// loads the base tables, compiles formulas (aborting with a named-channel
/// diagnostic on the first failure, per spec §4.3), recovers the current
/// snapshot, and wires up the evaluator, module host, and archive caches.
fn build_state(settings: &Settings) -> Result<ServerState> {
    let base_dir = PathBuf::from(&settings.paths.base_dat_dir);
    let archive_dir = PathBuf::from(&settings.paths.archive_dir);
    let interface_dir = settings
        .paths
        .interface_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| base_dir.join("interface"));
    let copy_root = settings.paths.archive_copy_dir.as_ref().map(PathBuf::from);

    let incnl = scada_config::load_incnl(&base_dir.join("incnl.dat")).context("loading incnl.dat")?;
    let ctrlcnl =
        scada_config::load_ctrlcnl(&base_dir.join("ctrlcnl.dat")).context("loading ctrlcnl.dat")?;
    let users = scada_config::load_users(&base_dir.join("user.dat")).context("loading user.dat")?;
    let formulas =
        scada_config::load_formulas(&base_dir.join("formula.dat")).context("loading formula.dat")?;

    let calculator = compile_formulas(&incnl, &ctrlcnl, &formulas)?;

    let current_file = scada_store::cache::current_snapshot_path(&archive_dir);
    let initial = scada_store::codec::load_current(&current_file)
        .context("loading current snapshot")?
        .unwrap_or_else(|| scada_store::Snapshot::empty(now_serial()));

    let configs: HashMap<CnlNum, InCnl> = incnl.into_iter().map(|c| (c.cnl_num, c)).collect();
    let evaluator = ChannelEvaluator::new(configs, calculator, initial);

    let registry = ModuleRegistry::new();
    let module_names: Vec<String> = settings.modules.module.iter().map(|m| m.file.clone()).collect();
    let (modules, module_errors) = registry.build(&module_names);
    for err in module_errors {
        warn!(%err, "module listed in settings could not be resolved, skipping");
    }
    let module_host = ModuleHost::new(modules);

    let minute_cache = SnapshotCache::new(TableKind::Minute, archive_dir.join("min"));
    let hour_cache = SnapshotCache::new(TableKind::Hour, archive_dir.join("hour"));

    let ctrl_cnls: HashMap<CnlNum, scada_common::CtrlCnl> =
        ctrlcnl.into_iter().map(|c| (c.ctrl_cnl_num, c)).collect();

    let dirs = DirectoryRoots {
        current: archive_dir.clone(),
        hour: archive_dir.join("hour"),
        min: archive_dir.join("min"),
        events: archive_dir.join("events"),
        base: base_dir.clone(),
        interface: interface_dir,
        copy_root,
    };
    let events_dir = archive_dir.join("events");

    Ok(ServerState::new(
        evaluator,
        module_host,
        minute_cache,
        hour_cache,
        ctrl_cnls,
        users,
        dirs,
        events_dir,
        settings.flags.detailed_log,
        settings.flags.inactive_unreliable_minutes,
        settings.flags.write_to_copy,
    ))
}

/// Compiles every auxiliary constant, channel formula, and control-channel
/// formula in turn. A compile failure is fatal: the diagnostic names the
/// offending channel so the operator can fix the base file before restarting
/// (spec §4.3).
fn compile_formulas(
    incnl: &[InCnl],
    ctrlcnl: &[scada_common::CtrlCnl],
    formulas: &[scada_config::AuxFormula],
) -> Result<Calculator> {
    let mut calc = Calculator::new();

    for aux in formulas {
        calc.compile_aux(&aux.name, &aux.body).with_context(|| {
            format!("auxiliary formula '{}' (id {}) failed to compile", aux.name, aux.formula_id)
        })?;
    }

    for cnl in incnl {
        if !cnl.formula_used || cnl.formula.trim().is_empty() {
            continue;
        }
        calc.compile_channel_formula(cnl.cnl_num, &cnl.formula)
            .with_context(|| format!("channel {} formula failed to compile: {}", cnl.cnl_num, cnl.formula))?;
    }

    for cnl in ctrlcnl {
        if !cnl.formula_used || cnl.formula.trim().is_empty() {
            continue;
        }
        calc.compile_ctrl_formula(cnl.ctrl_cnl_num, &cnl.formula).with_context(|| {
            format!("control channel {} formula failed to compile: {}", cnl.ctrl_cnl_num, cnl.formula)
        })?;
    }

    Ok(calc)
}

fn now_serial() -> f64 {
    scada_common::SerialTime::from_datetime(chrono::Utc::now().naive_utc()).raw()
}
