//! Command dispatch (spec §4.8): one function per wire command, enforcing
//! the role gate on data-write commands and driving the shared engine state.

use chrono::NaiveDate;
use scada_common::{ChanData, ChanStat, CnlNum, Role, SerialTime};
use scada_store::Snapshot;

use crate::context::ServerState;
use crate::files::OpenFile;
use crate::protocol::{self, Command, Directory, PendingCommand};
use crate::session::Session;

fn batch_to_snapshot(timestamp: f64, batch: &[(u32, f64, u16)]) -> Snapshot {
    let mut snap = Snapshot::empty(timestamp);
    for &(cnl, val, stat) in batch {
        snap.set(cnl as CnlNum, ChanData::new(val, ChanStat(stat)));
    }
    snap
}

fn project(snapshot: &Snapshot, cnl_nums: &[u32]) -> (f64, Vec<(f64, u16)>) {
    let values = cnl_nums
        .iter()
        .map(|&cnl| {
            snapshot
                .get(cnl as CnlNum)
                .map(|d| (d.val, d.stat.0))
                .unwrap_or((0.0, ChanStat::UNDEFINED.0))
        })
        .collect();
    (snapshot.timestamp, values)
}

/// Appends each event to the primary daily event file and, when configured,
/// mirrors it to the copy directory (spec §4.5): failure to write one
/// destination is logged but never aborts the other.
fn append_and_notify(state: &ServerState, date: NaiveDate, events: Vec<scada_store::Event>) {
    let path = state.event_file_path(date);
    let copy_path = state.copy_event_file_path(date);
    for ev in events {
        state.modules.on_event_creating(&ev);
        let primary_ok = scada_store::event::append_event(&path, &ev)
            .inspect_err(|err| {
                tracing::error!(%err, path = %path.display(), "failed to append event, will retry next cadence");
            })
            .is_ok();
        let copy_ok = match &copy_path {
            Some(copy_path) => scada_store::event::append_event(copy_path, &ev)
                .inspect_err(|err| {
                    tracing::error!(%err, path = %copy_path.display(), "failed to append copy event");
                })
                .is_ok(),
            None => true,
        };
        if primary_ok || copy_ok {
            state.modules.on_event_created(&ev);
        }
    }
}

pub fn dispatch(cmd: Command, payload: &[u8], session: &mut Session, state: &ServerState) -> Result<Vec<u8>, crate::error::ProtocolError> {
    match cmd {
        Command::Authenticate => {
            let req = protocol::parse_authenticate(payload)?;
            let (role, user_id) = state.authenticate(&req.name, &req.password, session.authenticated);
            session.authenticate(user_id, req.name, role);
            Ok(protocol::encode_authenticate_response(role as u8))
        }

        Command::Ping => Ok(vec![1u8]),

        Command::WriteCurrent => {
            if !session.role.can_write_data() {
                return Ok(vec![0u8]);
            }
            let batch = protocol::parse_write_current(payload)?;
            let received = batch_to_snapshot(state.now_serial(), &batch);
            let events = state.evaluator.process_current(&received);
            if !events.is_empty() {
                if let Some(date) = SerialTime::new(received.timestamp).ok().and_then(|t| t.date()) {
                    append_and_notify(state, date, events);
                }
            }
            let cnl_nums: Vec<CnlNum> = received.cnl_nums.clone();
            let current = state.evaluator.current_snapshot();
            state.modules.on_current_data_processed(&cnl_nums, &current);
            state.modules.on_current_data_calculated(&cnl_nums, &current);
            Ok(vec![1u8])
        }

        Command::WriteArchive => {
            if !session.role.can_write_data() {
                return Ok(vec![0u8]);
            }
            let (ts, batch) = protocol::parse_write_archive(payload)?;
            let received = batch_to_snapshot(ts, &batch);
            let Some(date) = SerialTime::new(ts).ok().and_then(|t| t.date()) else {
                return Ok(vec![0u8]);
            };
            let minute_period_days = 60.0 / 86_400.0;
            let hour_period_days = 3_600.0 / 86_400.0;

            let minute_entry = state.minute_cache.get_or_load(date);
            let hour_entry = state.hour_cache.get_or_load(date);
            let (events, minute_table, hour_table) = {
                let mut minute_guard = minute_entry.lock();
                scada_store::cache::fill(&mut minute_guard).ok();
                let mut hour_guard = hour_entry.lock();
                scada_store::cache::fill(&mut hour_guard).ok();
                let events = state.evaluator.process_archive(
                    &received,
                    &mut minute_guard.table,
                    minute_period_days,
                    Some(&mut hour_guard.table),
                    hour_period_days,
                );
                (events, minute_guard.table.clone(), hour_guard.table.clone())
            };
            if let Err(err) = scada_store::codec::save_table(&minute_entry.lock().path, &minute_table) {
                tracing::error!(%err, "failed to persist minute archive, retrying next cadence");
            }
            if let Err(err) = scada_store::codec::save_table(&hour_entry.lock().path, &hour_table) {
                tracing::error!(%err, "failed to persist hour archive, retrying next cadence");
            }
            if let Some(copy_path) = state.copy_table_path(scada_store::cache::TableKind::Minute, date) {
                if let Err(err) = scada_store::codec::save_table(&copy_path, &minute_table) {
                    tracing::error!(%err, path = %copy_path.display(), "failed to persist copy minute archive");
                }
            }
            if let Some(copy_path) = state.copy_table_path(scada_store::cache::TableKind::Hour, date) {
                if let Err(err) = scada_store::codec::save_table(&copy_path, &hour_table) {
                    tracing::error!(%err, path = %copy_path.display(), "failed to persist copy hour archive");
                }
            }
            let cnl_nums: Vec<CnlNum> = received.cnl_nums.clone();
            if let Some(idx) = minute_table.nearest(ts, minute_period_days) {
                if let Some(archived) = minute_table.at(idx) {
                    state.modules.on_archive_data_processed(&cnl_nums, archived);
                }
            }
            if !events.is_empty() {
                append_and_notify(state, date, events);
            }
            Ok(vec![1u8])
        }

        Command::WriteEvent => {
            if !session.role.can_write_data() {
                return Ok(vec![0u8]);
            }
            let req = protocol::parse_event_record(payload)?;
            let Some(date) = SerialTime::new(req.timestamp).ok().and_then(|t| t.date()) else {
                return Ok(vec![0u8]);
            };
            let ev = scada_store::Event {
                timestamp: req.timestamp,
                obj_num: req.obj_num,
                kp_num: req.kp_num,
                param_id: req.param_id,
                cnl_num: req.cnl_num,
                old_val: req.old_val,
                old_stat: ChanStat(req.old_stat),
                new_val: req.new_val,
                new_stat: ChanStat(req.new_stat),
                checked: false,
                user_id: session.user_id as u32,
                descr: req.descr,
                data: req.data,
            };
            append_and_notify(state, date, vec![ev]);
            Ok(vec![1u8])
        }

        Command::CommandTu => {
            if !session.role.can_dispatch_command() {
                return Ok(vec![0u8]);
            }
            let req = protocol::parse_command_tu(payload)?;
            let Some(cfg) = state.ctrl_cnls.get(&req.ctrl_cnl) else {
                return Ok(vec![0u8]);
            };
            let pending = PendingCommand {
                cmd_type: req.cmd_type,
                kp_num: cfg.kp_num,
                cmd_num: cfg.cmd_num,
                data: req.data.clone(),
            };
            let pass_to_clients = state
                .modules
                .on_command_received(req.ctrl_cnl, &req.data, req.user_id as u32);
            if pass_to_clients {
                state.enqueue_command(cfg.kp_num, pending);
            }
            Ok(vec![1u8])
        }

        Command::PollCommand => {
            if session.role != Role::Application {
                return Ok(protocol::encode_poll_response(None));
            }
            let cmd = state.poll_command(session.kp_num);
            Ok(protocol::encode_poll_response(cmd.as_ref()))
        }

        Command::OpenReadFile => {
            let req = protocol::parse_open_read_file(payload)?;
            let Some(dir) = Directory::from_u8(req.dir) else {
                return Ok(protocol::encode_open_read_response(false, &[]));
            };
            let Some(root) = state.dirs.resolve(&dir) else {
                return Ok(protocol::encode_open_read_response(false, &[]));
            };
            match OpenFile::open(&root, &req.name) {
                Ok(mut file) => {
                    let data = file.read(req.count).unwrap_or_default();
                    session.open_file = Some(file);
                    Ok(protocol::encode_open_read_response(true, &data))
                }
                Err(_) => Ok(protocol::encode_open_read_response(false, &[])),
            }
        }

        Command::FileSeek => {
            let (origin, offset) = protocol::parse_file_seek(payload)?;
            match session.open_file.as_mut() {
                Some(f) => match f.seek(origin, offset) {
                    Ok(pos) => Ok(protocol::encode_file_seek_response(true, pos)),
                    Err(_) => Ok(protocol::encode_file_seek_response(false, 0)),
                },
                None => Ok(protocol::encode_file_seek_response(false, 0)),
            }
        }

        Command::ReadFile => {
            let count = protocol::parse_read_file(payload)?;
            match session.open_file.as_mut() {
                Some(f) => {
                    let data = f.read(count).unwrap_or_default();
                    Ok(protocol::encode_read_file_response(&data))
                }
                None => Ok(protocol::encode_read_file_response(&[])),
            }
        }

        Command::CloseFile => {
            session.open_file = None;
            Ok(vec![1u8])
        }

        Command::FileMtimes => {
            let entries = protocol::parse_file_mtimes(payload)?;
            let mtimes = entries
                .iter()
                .filter_map(|e| {
                    let dir = Directory::from_u8(e.dir)?;
                    let root = state.dirs.resolve(&dir)?;
                    let meta = std::fs::metadata(root.join(&e.name)).ok()?;
                    let modified = meta.modified().ok()?;
                    let dt: chrono::DateTime<chrono::Utc> = modified.into();
                    Some(SerialTime::from_datetime(dt.naive_utc()).raw())
                })
                .collect::<Vec<_>>();
            Ok(protocol::encode_file_mtimes_response(&mtimes))
        }

        Command::SnapshotQuery => {
            let req = protocol::parse_snapshot_query(payload)?;
            let snapshots: Vec<(f64, Vec<(f64, u16)>)> = match req.kind {
                protocol::SnapshotQueryKind::Current => {
                    vec![project(&state.evaluator.current_snapshot(), &req.cnl_nums)]
                }
                protocol::SnapshotQueryKind::Minute | protocol::SnapshotQueryKind::Hour => {
                    let Some(date) = req.date else {
                        return Ok(protocol::encode_snapshot_query_response(&[]));
                    };
                    let cache = if req.kind == protocol::SnapshotQueryKind::Minute {
                        &state.minute_cache
                    } else {
                        &state.hour_cache
                    };
                    let entry = cache.get_or_load(date);
                    let mut guard = entry.lock();
                    scada_store::cache::fill(&mut guard).ok();
                    guard.table.iter().map(|s| project(s, &req.cnl_nums)).collect()
                }
            };
            Ok(protocol::encode_snapshot_query_response(&snapshots))
        }

        Command::CheckEvent => {
            let (user_id, date, ev_num) = protocol::parse_check_event(payload)?;
            let path = state.event_file_path(date);
            match scada_store::event::check_event(&path, ev_num as usize, user_id as u32) {
                Ok(true) => {
                    state.modules.on_event_checked(date, ev_num as u32, user_id as u32);
                    Ok(vec![1u8])
                }
                _ => Ok(vec![0u8]),
            }
        }
    }
}
