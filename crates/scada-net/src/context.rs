//! Shared server state (spec §5): everything a client-handling task or the
//! scheduler thread needs, wrapped in the locks the locking discipline
//! prescribes (`current_snapshot -> calculator -> cache_entry -> event_file
//! -> clients`). `ChannelEvaluator` already owns the first two; this struct
//! adds the cache, event directory, TU command queues, and status tracking.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use scada_common::{CnlNum, CtrlCnl, Role};
use scada_config::User;
use scada_engine::ChannelEvaluator;
use scada_modules::ModuleHost;
use scada_store::cache::{SnapshotCache, TableKind};

use crate::files::DirectoryRoots;
use crate::protocol::PendingCommand;

pub struct ServerState {
    pub evaluator: ChannelEvaluator,
    pub modules: ModuleHost,
    pub minute_cache: SnapshotCache,
    pub hour_cache: SnapshotCache,
    pub ctrl_cnls: HashMap<CnlNum, CtrlCnl>,
    pub users: Vec<User>,
    pub dirs: DirectoryRoots,
    pub events_dir: PathBuf,
    /// TU commands queued per target device (`kp_num`), FIFO, with the
    /// instant they were queued so stale entries can be garbage-collected
    /// after 60s unclaimed (spec §4.8).
    pending_commands: Mutex<HashMap<u16, Vec<(Instant, PendingCommand)>>>,
    pub connected_clients: RwLock<Vec<String>>,
    pub start_time: Instant,
    state_flag: AtomicU64,
    pub detailed_log: bool,
    pub inactive_unreliable_minutes: u64,
    /// Mirror event/snapshot writes to `dirs.copy_root` in addition to the
    /// primary path (spec §4.5/§6.2's `write_to_copy` flag).
    pub write_to_copy: bool,
}

/// Packed into an `AtomicU64` so the status writer can read it lock-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RunState {
    Normal = 0,
    Stopped = 1,
    Error = 2,
}

impl RunState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    fn from_u64(v: u64) -> Self {
        match v {
            1 => Self::Stopped,
            2 => Self::Error,
            _ => Self::Normal,
        }
    }
}

impl ServerState {
    pub fn new(
        evaluator: ChannelEvaluator,
        modules: ModuleHost,
        minute_cache: SnapshotCache,
        hour_cache: SnapshotCache,
        ctrl_cnls: HashMap<CnlNum, CtrlCnl>,
        users: Vec<User>,
        dirs: DirectoryRoots,
        events_dir: PathBuf,
        detailed_log: bool,
        inactive_unreliable_minutes: u64,
        write_to_copy: bool,
    ) -> Self {
        Self {
            evaluator,
            modules,
            minute_cache,
            hour_cache,
            ctrl_cnls,
            users,
            dirs,
            events_dir,
            pending_commands: Mutex::new(HashMap::new()),
            connected_clients: RwLock::new(Vec::new()),
            start_time: Instant::now(),
            state_flag: AtomicU64::new(RunState::Normal as u64),
            detailed_log,
            inactive_unreliable_minutes,
            write_to_copy,
        }
    }

    pub fn run_state(&self) -> RunState {
        RunState::from_u64(self.state_flag.load(Ordering::Acquire))
    }

    pub fn set_run_state(&self, state: RunState) {
        self.state_flag.store(state as u64, Ordering::Release);
    }

    pub fn event_file_path(&self, date: chrono::NaiveDate) -> PathBuf {
        self.events_dir.join(format!(
            "e{:02}{:02}{:02}.dat",
            date.format("%y"),
            date.format("%m"),
            date.format("%d")
        ))
    }

    /// Mirrored event file path under `dirs.copy_root/events`, when copy
    /// writes are enabled (spec §4.5, DESIGN OQ#8's four-subpath layout).
    pub fn copy_event_file_path(&self, date: chrono::NaiveDate) -> Option<PathBuf> {
        if !self.write_to_copy {
            return None;
        }
        let root = self.dirs.copy_root.as_ref()?;
        Some(root.join("events").join(format!(
            "e{:02}{:02}{:02}.dat",
            date.format("%y"),
            date.format("%m"),
            date.format("%d")
        )))
    }

    /// Mirrored current-snapshot file path under `dirs.copy_root`.
    pub fn copy_current_snapshot_path(&self) -> Option<PathBuf> {
        if !self.write_to_copy {
            return None;
        }
        let root = self.dirs.copy_root.as_ref()?;
        Some(scada_store::cache::current_snapshot_path(root))
    }

    /// Mirrored archive table path under `dirs.copy_root/min` or `.../hour`.
    pub fn copy_table_path(&self, kind: TableKind, date: chrono::NaiveDate) -> Option<PathBuf> {
        if !self.write_to_copy {
            return None;
        }
        let root = self.dirs.copy_root.as_ref()?;
        let sub = match kind {
            TableKind::Minute => "min",
            TableKind::Hour => "hour",
        };
        Some(root.join(sub).join(scada_store::cache::archive_file_name(kind, date)))
    }

    /// Authenticate against module hooks first (spec §4.7), falling back to
    /// the base `user.dat` lookup. Empty password is accepted only as a
    /// "role lookup" re-query by a session that is already authenticated
    /// (spec §6) — an unauthenticated client must still supply the real
    /// password.
    pub fn authenticate(&self, name: &str, password: &str, already_authenticated: bool) -> (Role, u16) {
        if let Some((role, _handled)) = self.modules.validate_user(name, password) {
            let user_id = self
                .users
                .iter()
                .find(|u| u.name == name)
                .map(|u| u.user_id)
                .unwrap_or(0);
            return (role, user_id);
        }
        match self.users.iter().find(|u| u.name == name) {
            Some(user) if (already_authenticated && password.is_empty()) || user.check_password(password) => {
                (user.role_id, user.user_id)
            }
            Some(_) => (Role::Disabled, 0),
            None => (Role::Disabled, 0),
        }
    }

    pub fn enqueue_command(&self, kp_num: u16, cmd: PendingCommand) {
        self.pending_commands
            .lock()
            .entry(kp_num)
            .or_default()
            .push((Instant::now(), cmd));
    }

    /// Pop the oldest queued command for `kp_num`, discarding anything
    /// unclaimed past 60s first (spec §4.8).
    pub fn poll_command(&self, kp_num: u16) -> Option<PendingCommand> {
        let mut queues = self.pending_commands.lock();
        let queue = queues.get_mut(&kp_num)?;
        queue.retain(|(queued_at, _)| queued_at.elapsed() < crate::session::IDLE_DISCONNECT);
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0).1)
        }
    }

    pub fn now_serial(&self) -> f64 {
        scada_common::SerialTime::from_datetime(Utc::now().naive_utc()).raw()
    }
}
