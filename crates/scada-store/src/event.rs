//! Event record type and the daily event file's append/check operations
//! (spec §3, §4.1, field widths §4.1.1).

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::atomic_write;
use crate::error::{Result, StoreError};
use scada_common::ChanStat;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: f64,
    pub obj_num: u32,
    pub kp_num: u32,
    pub param_id: u32,
    pub cnl_num: u32,
    pub old_val: f64,
    pub old_stat: ChanStat,
    pub new_val: f64,
    pub new_stat: ChanStat,
    pub checked: bool,
    pub user_id: u32,
    pub descr: String,
    pub data: Vec<u8>,
}

fn encode_event(ev: &Event) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_f64::<LittleEndian>(ev.timestamp).unwrap();
    buf.write_u32::<LittleEndian>(ev.obj_num).unwrap();
    buf.write_u32::<LittleEndian>(ev.kp_num).unwrap();
    buf.write_u32::<LittleEndian>(ev.param_id).unwrap();
    buf.write_u32::<LittleEndian>(ev.cnl_num).unwrap();
    buf.write_f64::<LittleEndian>(ev.old_val).unwrap();
    buf.write_u16::<LittleEndian>(ev.old_stat.0).unwrap();
    buf.write_f64::<LittleEndian>(ev.new_val).unwrap();
    buf.write_u16::<LittleEndian>(ev.new_stat.0).unwrap();
    buf.write_u8(ev.checked as u8).unwrap();
    buf.write_u32::<LittleEndian>(ev.user_id).unwrap();
    let descr_bytes = ev.descr.as_bytes();
    buf.write_u16::<LittleEndian>(descr_bytes.len() as u16).unwrap();
    buf.extend_from_slice(descr_bytes);
    buf.write_u16::<LittleEndian>(ev.data.len() as u16).unwrap();
    buf.extend_from_slice(&ev.data);
    let crc = crc32fast::hash(&buf);
    buf.write_u32::<LittleEndian>(crc).unwrap();
    buf
}

/// Byte offset (from record start) of the `checked` flag — used by `check_event`
/// to patch a single record in place without rewriting the file.
const CHECKED_FIELD_OFFSET: u64 = 8 + 4 + 4 + 4 + 4 + 8 + 2 + 8 + 2;

struct DecodedRecord {
    event: Event,
    len: usize,
}

fn decode_event(bytes: &[u8]) -> Option<DecodedRecord> {
    if bytes.len() < CHECKED_FIELD_OFFSET as usize + 1 + 4 + 2 + 2 {
        return None;
    }
    let mut cur = std::io::Cursor::new(bytes);
    let timestamp = cur.read_f64::<LittleEndian>().ok()?;
    let obj_num = cur.read_u32::<LittleEndian>().ok()?;
    let kp_num = cur.read_u32::<LittleEndian>().ok()?;
    let param_id = cur.read_u32::<LittleEndian>().ok()?;
    let cnl_num = cur.read_u32::<LittleEndian>().ok()?;
    let old_val = cur.read_f64::<LittleEndian>().ok()?;
    let old_stat = ChanStat(cur.read_u16::<LittleEndian>().ok()?);
    let new_val = cur.read_f64::<LittleEndian>().ok()?;
    let new_stat = ChanStat(cur.read_u16::<LittleEndian>().ok()?);
    let checked = cur.read_u8().ok()? != 0;
    let user_id = cur.read_u32::<LittleEndian>().ok()?;
    let descr_len = cur.read_u16::<LittleEndian>().ok()? as usize;
    let mut descr_buf = vec![0u8; descr_len];
    cur.read_exact(&mut descr_buf).ok()?;
    let descr = String::from_utf8_lossy(&descr_buf).into_owned();
    let data_len = cur.read_u16::<LittleEndian>().ok()? as usize;
    let mut data = vec![0u8; data_len];
    cur.read_exact(&mut data).ok()?;
    let body_len = cur.position() as usize;
    let crc_expected = cur.read_u32::<LittleEndian>().ok()?;
    let crc_actual = crc32fast::hash(&bytes[..body_len]);
    if crc_expected != crc_actual {
        return None;
    }
    Some(DecodedRecord {
        event: Event {
            timestamp,
            obj_num,
            kp_num,
            param_id,
            cnl_num,
            old_val,
            old_stat,
            new_val,
            new_stat,
            checked,
            user_id,
            descr,
            data,
        },
        len: body_len + 4,
    })
}

/// O(1) append with flush (spec §4.1). Crash-safety for a partially written
/// trailing record is the *reader's* job (`load_events` discards it); the
/// writer itself just appends and fsyncs.
pub fn append_event(path: &Path, ev: &Event) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let bytes = encode_event(ev);
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    f.write_all(&bytes).map_err(|e| StoreError::io(path, e))?;
    f.sync_data().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Load every event in a day's event file, discarding a truncated/corrupt
/// trailing record and treating the file as ending there (spec §4.1, §7).
pub fn load_events(path: &Path) -> Result<Vec<Event>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match decode_event(&bytes[offset..]) {
            Some(rec) => {
                offset += rec.len;
                out.push(rec.event);
            }
            None => {
                tracing::warn!(path = %path.display(), offset, "truncated trailing event record, discarding");
                break;
            }
        }
    }
    Ok(out)
}

/// Seek to the `ev_num`-th record (0-indexed) and flip its `checked` flag
/// plus `user_id` in place (spec §4.1's `check_event`).
pub fn check_event(path: &Path, ev_num: usize, user_id: u32) -> Result<bool> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let mut offset = 0usize;
    let mut record_start = None;
    let mut idx = 0usize;
    while offset < bytes.len() {
        let Some(rec) = decode_event(&bytes[offset..]) else { break };
        if idx == ev_num {
            record_start = Some(offset);
            break;
        }
        offset += rec.len;
        idx += 1;
    }
    let Some(start) = record_start else {
        return Ok(false);
    };
    let mut f = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    f.seek(SeekFrom::Start((start as u64) + CHECKED_FIELD_OFFSET))
        .map_err(|e| StoreError::io(path, e))?;
    let mut patch = Vec::new();
    patch.write_u8(1).unwrap();
    patch.write_u32::<LittleEndian>(user_id).unwrap();
    f.write_all(&patch).map_err(|e| StoreError::io(path, e))?;
    f.sync_data().map_err(|e| StoreError::io(path, e))?;
    Ok(true)
}

/// Rewrite the whole file (used rarely — e.g. compaction tools outside this
/// spec's scope). Kept for symmetry with `atomic_write`'s use elsewhere.
#[allow(dead_code)]
fn rewrite_all(path: &Path, events: &[Event]) -> Result<()> {
    let mut buf = Vec::new();
    for ev in events {
        buf.extend_from_slice(&encode_event(ev));
    }
    atomic_write(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_event(cnl_num: u32) -> Event {
        Event {
            timestamp: 45000.25,
            obj_num: 1,
            kp_num: 2,
            param_id: 3,
            cnl_num,
            old_val: 10.0,
            old_stat: ChanStat::DEFINED,
            new_val: 60.0,
            new_stat: ChanStat::HIGH,
            checked: false,
            user_id: 0,
            descr: "excursion".into(),
            data: vec![],
        }
    }

    #[test]
    fn append_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e240101.dat");
        append_event(&path, &sample_event(100)).unwrap();
        append_event(&path, &sample_event(200)).unwrap();
        let loaded = load_events(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].cnl_num, 100);
        assert_eq!(loaded[1].cnl_num, 200);
    }

    #[test]
    fn check_event_flips_exactly_one_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e240102.dat");
        append_event(&path, &sample_event(1)).unwrap();
        append_event(&path, &sample_event(2)).unwrap();
        append_event(&path, &sample_event(3)).unwrap();
        assert!(check_event(&path, 1, 42).unwrap());
        let loaded = load_events(&path).unwrap();
        assert!(!loaded[0].checked);
        assert!(loaded[1].checked);
        assert_eq!(loaded[1].user_id, 42);
        assert!(!loaded[2].checked);
    }

    #[test]
    fn truncated_trailing_event_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e240103.dat");
        append_event(&path, &sample_event(1)).unwrap();
        append_event(&path, &sample_event(2)).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, &bytes).unwrap();
        let loaded = load_events(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.dat");
        assert!(load_events(&path).unwrap().is_empty());
    }
}
