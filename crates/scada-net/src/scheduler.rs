//! Server scheduler (spec §4.6, component G): a single named background
//! thread driving the 8-step tick. Grounded on
//! `ouroboros-kv/src/persistence/handle.rs`'s `PersistenceHandle` shape
//! (bounded crossbeam channel, `recv_timeout` tick loop, forced shutdown
//! on `Drop`).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use scada_common::channel::DerivedCadence;

use crate::context::{RunState, ServerState};
use crate::status;

pub const TICK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceKind {
    PerCycle,
    PerMinute,
    PerHour,
    Daily,
}

enum SchedulerCommand {
    Shutdown,
    RunNow(CadenceKind),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub write_cur_period_secs: u64,
    pub write_min_period_secs: u64,
    pub write_hr_period_secs: u64,
    pub store_min_period_days: i64,
    pub store_hr_period_days: i64,
    pub store_ev_period_days: i64,
    pub inactive_unreliable_minutes: u64,
    pub status_path: std::path::PathBuf,
}

/// Handle to the scheduler thread. `shutdown()` joins it with a bounded
/// budget (spec §5's 10s scheduler-join allowance on shutdown); `Drop`
/// forces a best-effort shutdown if the caller never calls it explicitly.
pub struct SchedulerHandle {
    sender: Sender<SchedulerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn spawn(state: Arc<ServerState>, config: SchedulerConfig) -> std::io::Result<Self> {
        let (sender, receiver) = bounded(16);
        let thread = thread::Builder::new()
            .name("scada-scheduler".to_string())
            .spawn(move || run(state, config, receiver))?;
        Ok(Self { sender, thread: Some(thread) })
    }

    pub fn run_now(&self, kind: CadenceKind) {
        let _ = self.sender.try_send(SchedulerCommand::RunNow(kind));
    }

    fn shutdown_internal(&mut self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let budget = Duration::from_secs(10);
            let started = Instant::now();
            while !handle.is_finished() && started.elapsed() < budget {
                thread::sleep(Duration::from_millis(20));
            }
            if let Err(err) = handle.join() {
                tracing::error!(?err, "scheduler thread panicked on shutdown");
            }
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown_internal();
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            tracing::warn!("SchedulerHandle dropped without explicit shutdown, forcing shutdown");
            self.shutdown_internal();
        }
    }
}

/// Mutable bookkeeping the tick loop carries between iterations — not shared
/// with client-handling tasks, so it lives entirely on the scheduler thread.
struct TickState {
    last_date: NaiveDate,
    last_wall_unix: f64,
    next_cur_write: f64,
    next_min_write: f64,
    next_hr_write: f64,
    last_minute_bucket: i64,
    last_hour_bucket: i64,
    last_cache_sweep: Instant,
}

fn next_boundary(now_unix: f64, period_secs: f64) -> f64 {
    (now_unix / period_secs).floor() * period_secs + period_secs
}

impl TickState {
    fn new(config: &SchedulerConfig) -> Self {
        let now = Utc::now();
        let now_unix = now.timestamp() as f64;
        Self {
            last_date: now.date_naive(),
            last_wall_unix: now_unix,
            next_cur_write: next_boundary(now_unix, config.write_cur_period_secs.max(1) as f64),
            next_min_write: next_boundary(now_unix, config.write_min_period_secs.max(1) as f64),
            next_hr_write: next_boundary(now_unix, config.write_hr_period_secs.max(1) as f64),
            last_minute_bucket: (now_unix / 60.0).floor() as i64,
            last_hour_bucket: (now_unix / 3600.0).floor() as i64,
            last_cache_sweep: Instant::now(),
        }
    }
}

fn run(state: Arc<ServerState>, config: SchedulerConfig, receiver: Receiver<SchedulerCommand>) {
    let mut tick_state = TickState::new(&config);
    tracing::info!("scheduler thread started");

    loop {
        match receiver.recv_timeout(TICK_PERIOD) {
            Ok(SchedulerCommand::Shutdown) => break,
            Ok(SchedulerCommand::RunNow(kind)) => run_cadence(&state, &config, kind),
            Err(RecvTimeoutError::Timeout) => tick(&state, &config, &mut tick_state),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("scheduler thread stopped");
}

fn run_cadence(state: &Arc<ServerState>, config: &SchedulerConfig, kind: CadenceKind) {
    match kind {
        CadenceKind::PerCycle => run_derived(state, DerivedCadence::PerCycle),
        CadenceKind::PerMinute => run_derived(state, DerivedCadence::PerMinute),
        CadenceKind::PerHour => run_derived(state, DerivedCadence::PerHour),
        CadenceKind::Daily => daily_rollover(state, config, Utc::now().date_naive()),
    }
}

fn run_derived(state: &ServerState, cadence: DerivedCadence) {
    let events = state.evaluator.run_derived_on_current(cadence);
    write_events(state, events);
}

fn write_events(state: &ServerState, events: Vec<scada_store::Event>) {
    for ev in events {
        let Some(date) = scada_common::SerialTime::new(ev.timestamp).ok().and_then(|t| t.date()) else {
            continue;
        };
        state.modules.on_event_creating(&ev);
        let path = state.event_file_path(date);
        let primary_ok = scada_store::event::append_event(&path, &ev)
            .inspect_err(|err| {
                tracing::error!(%err, path = %path.display(), "failed to append scheduler-generated event");
            })
            .is_ok();
        let copy_ok = match state.copy_event_file_path(date) {
            Some(copy_path) => scada_store::event::append_event(&copy_path, &ev)
                .inspect_err(|err| {
                    tracing::error!(%err, path = %copy_path.display(), "failed to append scheduler-generated copy event");
                })
                .is_ok(),
            None => true,
        };
        if primary_ok || copy_ok {
            state.modules.on_event_created(&ev);
        }
    }
}

fn tick(state: &Arc<ServerState>, config: &SchedulerConfig, tick_state: &mut TickState) {
    let now = Utc::now();
    let now_unix = now.timestamp() as f64;

    // Step 1: wall-clock regression.
    if now_unix < tick_state.last_wall_unix {
        tracing::warn!(
            previous = tick_state.last_wall_unix,
            current = now_unix,
            "wall clock moved backward, recomputing write boundaries"
        );
        tick_state.next_cur_write = next_boundary(now_unix, config.write_cur_period_secs.max(1) as f64);
        tick_state.next_min_write = next_boundary(now_unix, config.write_min_period_secs.max(1) as f64);
        tick_state.next_hr_write = next_boundary(now_unix, config.write_hr_period_secs.max(1) as f64);
    }
    tick_state.last_wall_unix = now_unix;

    // Step 2: daily rollover + retention sweep.
    let today = now.date_naive();
    if today != tick_state.last_date {
        daily_rollover(state, config, today);
        tick_state.last_date = today;
    }

    // Step 3: inactivity sweep.
    let events = state.evaluator.inactivity_sweep(state.inactive_unreliable_minutes);
    write_events(state, events);

    // Step 4: derived passes whose cadence elapsed.
    run_derived(state, DerivedCadence::PerCycle);

    let minute_bucket = (now_unix / 60.0).floor() as i64;
    if minute_bucket != tick_state.last_minute_bucket {
        tick_state.last_minute_bucket = minute_bucket;
        run_derived(state, DerivedCadence::PerMinute);
    }

    let hour_bucket = (now_unix / 3600.0).floor() as i64;
    if hour_bucket != tick_state.last_hour_bucket {
        tick_state.last_hour_bucket = hour_bucket;
        run_derived(state, DerivedCadence::PerHour);
    }

    // Step 6: flush snapshots.
    if now_unix >= tick_state.next_cur_write || state.evaluator.is_dirty() {
        flush_current(state);
        tick_state.next_cur_write = next_boundary(now_unix, config.write_cur_period_secs.max(1) as f64);
    }
    if now_unix >= tick_state.next_min_write {
        flush_archive_table(state, &state.minute_cache, scada_store::cache::TableKind::Minute, today, &state.evaluator.flush_minute_buckets());
        tick_state.next_min_write = next_boundary(now_unix, config.write_min_period_secs.max(1) as f64);
    }
    if now_unix >= tick_state.next_hr_write {
        flush_archive_table(state, &state.hour_cache, scada_store::cache::TableKind::Hour, today, &state.evaluator.flush_hour_buckets());
        tick_state.next_hr_write = next_boundary(now_unix, config.write_hr_period_secs.max(1) as f64);
    }

    // Step 7: cache eviction sweep, at most once per minute.
    if tick_state.last_cache_sweep.elapsed() >= Duration::from_secs(60) {
        state.minute_cache.sweep(today);
        state.hour_cache.sweep(today);
        tick_state.last_cache_sweep = Instant::now();
    }

    // Step 8: status file write, unconditionally, as the terminal step.
    if let Err(err) = status::write_status(&config.status_path, state) {
        tracing::error!(%err, "failed to write status file");
    }
}

fn flush_current(state: &ServerState) {
    let snapshot = state.evaluator.current_snapshot();
    if let Err(err) = scada_store::codec::save_current(&scada_store::cache::current_snapshot_path(&state.dirs.current), &snapshot) {
        tracing::error!(%err, "failed to persist current snapshot");
        return;
    }
    if let Some(copy_path) = state.copy_current_snapshot_path() {
        if let Err(err) = scada_store::codec::save_current(&copy_path, &snapshot) {
            tracing::error!(%err, path = %copy_path.display(), "failed to persist copy current snapshot");
        }
    }
    state.evaluator.clear_dirty();
}

/// Materializes averaging-bucket results into the current snapshot before
/// folding it into the minute/hour table (spec §4.6 step 6): the averaged
/// value becomes `defined`, then the bucket is implicitly reset by `flush`.
fn flush_archive_table(
    state: &ServerState,
    cache: &scada_store::cache::SnapshotCache,
    kind: scada_store::cache::TableKind,
    today: NaiveDate,
    averaged: &[(scada_common::CnlNum, f64)],
) {
    let mut snapshot = state.evaluator.current_snapshot();
    for &(cnl_num, value) in averaged {
        snapshot.set(cnl_num, scada_common::ChanData::new(value, scada_common::ChanStat::DEFINED));
    }
    let entry = cache.get_or_load(today);
    let mut guard = entry.lock();
    if scada_store::cache::fill(&mut guard).is_err() {
        tracing::warn!(?kind, "failed to prime cache entry before archive flush");
    }
    guard.table.upsert(snapshot);
    let table = guard.table.clone();
    let path = guard.path.clone();
    drop(guard);
    if let Err(err) = scada_store::codec::save_table(&path, &table) {
        tracing::error!(%err, ?kind, "failed to persist archive table");
    }
    if let Some(copy_path) = state.copy_table_path(kind, today) {
        if let Err(err) = scada_store::codec::save_table(&copy_path, &table) {
            tracing::error!(%err, ?kind, path = %copy_path.display(), "failed to persist copy archive table");
        }
    }
}

fn daily_rollover(state: &ServerState, config: &SchedulerConfig, today: NaiveDate) {
    tracing::info!(%today, "daily rollover, sweeping retention directories");
    sweep_retention(&state.dirs.min, "m", config.store_min_period_days, today);
    sweep_retention(&state.dirs.hour, "h", config.store_hr_period_days, today);
    sweep_retention(&state.dirs.events, "e", config.store_ev_period_days, today);
}

/// Deletes `{prefix}yymmdd.dat` files older than `retention_days` under `dir`.
fn sweep_retention(dir: &std::path::Path, prefix: &str, retention_days: i64, today: NaiveDate) {
    let Ok(read_dir) = std::fs::read_dir(dir) else { return };
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date) = parse_archive_date(name, prefix) else { continue };
        if (today - date).num_days() > retention_days {
            if let Err(err) = std::fs::remove_file(entry.path()) {
                tracing::warn!(path = %entry.path().display(), %err, "failed to remove expired archive file");
            }
        }
    }
}

fn parse_archive_date(name: &str, prefix: &str) -> Option<NaiveDate> {
    let rest = name.strip_prefix(prefix)?.strip_suffix(".dat")?;
    if rest.len() != 6 {
        return None;
    }
    let yy: i32 = rest[0..2].parse().ok()?;
    let mm: u32 = rest[2..4].parse().ok()?;
    let dd: u32 = rest[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_boundary_rounds_up_to_next_period() {
        assert_eq!(next_boundary(95.0, 60.0), 120.0);
        assert_eq!(next_boundary(120.0, 60.0), 180.0);
    }

    #[test]
    fn parse_archive_date_round_trips() {
        let date = parse_archive_date("m240315.dat", "m").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    }

    #[test]
    fn parse_archive_date_rejects_wrong_prefix() {
        assert!(parse_archive_date("h240315.dat", "m").is_none());
    }
}
