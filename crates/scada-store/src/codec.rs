//! Binary encode/decode for the current snapshot file and the daily
//! minute/hour archival snapshot tables (spec §4.1, field widths in §4.1.1).
//!
//! All multi-byte integers are little-endian (spec §9). Format errors never
//! abort a load: a truncated or CRC-failed trailing record is treated as the
//! end of the file, per §7's `FormatError` policy, and logged.

use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, StoreError};
use crate::snapshot::{crc_of_cnl_nums, Descriptor, Snapshot, SnapshotTable};
use scada_common::{ChanData, ChanStat, CnlNum, SerialTime};

const TAG_FULL: u8 = 0;
const TAG_SAME_DESCRIPTOR: u8 = 1;

/// Read the whole current-snapshot file (a single `Snapshot`). Returns
/// `Ok(None)` if the file does not exist.
pub fn load_current(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if bytes.len() < 8 + 1 + 2 {
        tracing::warn!(path = %path.display(), "current snapshot file too short, treating as absent");
        return Ok(None);
    }
    let mut cur = Cursor::new(&bytes[..]);
    let ts = cur.read_f64::<LittleEndian>().map_err(|e| StoreError::io(path, e))?;
    if SerialTime::new(ts).is_err() {
        tracing::warn!(path = %path.display(), ts, "current snapshot timestamp out of range, treating as absent");
        return Ok(None);
    }
    let has_descriptor = cur.read_u8().map_err(|e| StoreError::io(path, e))?;
    if has_descriptor == 0 {
        return Ok(Some(Snapshot::empty(ts)));
    }
    let cnl_cnt = cur.read_u16::<LittleEndian>().map_err(|e| StoreError::io(path, e))? as usize;
    let mut cnl_nums = Vec::with_capacity(cnl_cnt);
    let mut cnl_data = Vec::with_capacity(cnl_cnt);
    for _ in 0..cnl_cnt {
        match (|| -> std::io::Result<(u32, f64, u16)> {
            let cnl = cur.read_u32::<LittleEndian>()?;
            let val = cur.read_f64::<LittleEndian>()?;
            let stat = cur.read_u16::<LittleEndian>()?;
            Ok((cnl, val, stat))
        })() {
            Ok((cnl, val, stat)) => {
                cnl_nums.push(cnl as CnlNum);
                cnl_data.push(ChanData::new(val, ChanStat(stat)));
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "truncated current snapshot record, stopping");
                break;
            }
        }
    }
    Ok(Some(Snapshot::new(ts, cnl_nums, cnl_data)))
}

/// Atomically write the current-snapshot file (write-to-temp + rename, spec §4.1).
pub fn save_current(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let mut buf = Vec::new();
    buf.write_f64::<LittleEndian>(snapshot.timestamp).unwrap();
    buf.write_u8(1).unwrap();
    buf.write_u16::<LittleEndian>(snapshot.cnl_nums.len() as u16).unwrap();
    for (cnl, data) in snapshot.cnl_nums.iter().zip(snapshot.cnl_data.iter()) {
        buf.write_u32::<LittleEndian>(*cnl as u32).unwrap();
        buf.write_f64::<LittleEndian>(data.val).unwrap();
        buf.write_u16::<LittleEndian>(data.stat.0).unwrap();
    }
    atomic_write(path, &buf)
}

/// Load a whole daily archival table (minute or hour). Missing file -> empty table.
pub fn load_table(path: &Path) -> Result<SnapshotTable> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SnapshotTable::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let mut table = SnapshotTable::new();
    let mut cur = Cursor::new(&bytes[..]);
    let mut last_descriptor: Option<Descriptor> = None;

    loop {
        let tag = match cur.read_u8() {
            Ok(t) => t,
            Err(_) => break,
        };
        match tag {
            TAG_FULL => match read_descriptor(&mut cur) {
                Ok(desc) => {
                    if !desc.verify() {
                        tracing::warn!(path = %path.display(), "descriptor CRC mismatch, truncating table");
                        break;
                    }
                    match read_values(&mut cur, desc.cnl_nums.len()) {
                        Ok((ts, data)) => {
                            table.push(Snapshot::new(ts, desc.cnl_nums.clone(), data));
                            last_descriptor = Some(desc);
                        }
                        Err(_) => {
                            tracing::warn!(path = %path.display(), "truncated value record after descriptor, stopping");
                            break;
                        }
                    }
                }
                Err(_) => {
                    tracing::warn!(path = %path.display(), "truncated descriptor record, stopping");
                    break;
                }
            },
            TAG_SAME_DESCRIPTOR => {
                let Some(desc) = last_descriptor.clone() else {
                    tracing::warn!(path = %path.display(), "same-descriptor record with no prior descriptor, stopping");
                    break;
                };
                match read_values(&mut cur, desc.cnl_nums.len()) {
                    Ok((ts, data)) => table.push(Snapshot::new(ts, desc.cnl_nums.clone(), data)),
                    Err(_) => {
                        tracing::warn!(path = %path.display(), "truncated value record, stopping");
                        break;
                    }
                }
            }
            other => {
                tracing::warn!(path = %path.display(), tag = other, "unknown record tag, stopping");
                break;
            }
        }
    }

    if !table.is_strictly_ascending() {
        return Err(StoreError::format(path, "timestamps not strictly ascending"));
    }
    Ok(table)
}

fn read_descriptor(cur: &mut Cursor<&[u8]>) -> std::io::Result<Descriptor> {
    let crc = cur.read_u32::<LittleEndian>()?;
    let cnt = cur.read_u16::<LittleEndian>()? as usize;
    let mut cnl_nums = Vec::with_capacity(cnt);
    for _ in 0..cnt {
        cnl_nums.push(cur.read_u32::<LittleEndian>()? as CnlNum);
    }
    Ok(Descriptor { cnl_nums, crc })
}

fn read_values(cur: &mut Cursor<&[u8]>, cnt: usize) -> std::io::Result<(f64, Vec<ChanData>)> {
    let ts = cur.read_f64::<LittleEndian>()?;
    if SerialTime::new(ts).is_err() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "serial timestamp out of range"));
    }
    let mut data = Vec::with_capacity(cnt);
    for _ in 0..cnt {
        let val = cur.read_f64::<LittleEndian>()?;
        let stat = cur.read_u16::<LittleEndian>()?;
        data.push(ChanData::new(val, ChanStat(stat)));
    }
    Ok((ts, data))
}

/// Save a whole daily archival table, writing a full record only when the
/// channel set differs from the previous snapshot (spec §4.1's shared-descriptor
/// optimization).
pub fn save_table(path: &Path, table: &SnapshotTable) -> Result<()> {
    let mut buf = Vec::new();
    let mut last: Option<&[CnlNum]> = None;
    for snap in table.iter() {
        if last == Some(snap.cnl_nums.as_slice()) {
            buf.write_u8(TAG_SAME_DESCRIPTOR).unwrap();
            write_values(&mut buf, snap);
        } else {
            buf.write_u8(TAG_FULL).unwrap();
            let crc = crc_of_cnl_nums(&snap.cnl_nums);
            buf.write_u32::<LittleEndian>(crc).unwrap();
            buf.write_u16::<LittleEndian>(snap.cnl_nums.len() as u16).unwrap();
            for &cnl in &snap.cnl_nums {
                buf.write_u32::<LittleEndian>(cnl as u32).unwrap();
            }
            write_values(&mut buf, snap);
            last = Some(snap.cnl_nums.as_slice());
        }
    }
    atomic_write(path, &buf)
}

fn write_values(buf: &mut Vec<u8>, snap: &Snapshot) {
    buf.write_f64::<LittleEndian>(snap.timestamp).unwrap();
    for data in &snap.cnl_data {
        buf.write_f64::<LittleEndian>(data.val).unwrap();
        buf.write_u16::<LittleEndian>(data.stat.0).unwrap();
    }
}

/// Write-to-temp-then-rename, matching the atomic-write pattern used
/// throughout the codebase's persistence layer.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        f.write_all(bytes).map_err(|e| StoreError::io(&tmp_path, e))?;
        f.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scada_common::ChanStat;
    use tempfile::TempDir;

    fn sample_snapshot(ts: f64) -> Snapshot {
        let mut s = Snapshot::empty(ts);
        s.set(1, ChanData::new(10.0, ChanStat::DEFINED));
        s.set(2, ChanData::new(20.0, ChanStat::NORMAL));
        s
    }

    #[test]
    fn current_snapshot_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cur.dat");
        let snap = sample_snapshot(45000.5);
        save_current(&path, &snap).unwrap();
        let loaded = load_current(&path).unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn current_snapshot_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.dat");
        assert!(load_current(&path).unwrap().is_none());
    }

    #[test]
    fn table_round_trips_with_shared_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m240101.dat");
        let mut table = SnapshotTable::new();
        table.push(sample_snapshot(45000.0));
        table.push(sample_snapshot(45000.001));
        save_table(&path, &table).unwrap();
        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.is_strictly_ascending());
    }

    #[test]
    fn table_handles_changing_descriptor_mid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m240102.dat");
        let mut table = SnapshotTable::new();
        table.push(sample_snapshot(1.0));
        let mut second = Snapshot::empty(2.0);
        second.set(1, ChanData::new(1.0, ChanStat::DEFINED));
        second.set(5, ChanData::new(2.0, ChanStat::DEFINED));
        table.push(second);
        save_table(&path, &table).unwrap();
        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn truncated_table_file_loads_valid_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m240103.dat");
        let mut table = SnapshotTable::new();
        table.push(sample_snapshot(1.0));
        table.push(sample_snapshot(2.0));
        save_table(&path, &table).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, &bytes).unwrap();
        let loaded = load_table(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
