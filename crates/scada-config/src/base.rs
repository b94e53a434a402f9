//! Configuration-base loader (component J): reads the read-only tabular
//! files in the base directory (spec §6, field widths in §6.1).
//!
//! Every record is split into a fixed-width prefix (whose declared length
//! comes from the file header for `incnl.dat`/`ctrlcnl.dat`) and, where the
//! spec calls for one, a variable-length tail. The loader reads only the
//! leading fields it knows about within the fixed prefix and skips any
//! extra trailing bytes the header declares — this is what makes it
//! tolerant of a newer writer that appended fixed columns (spec §6:
//! "the loader MUST tolerate extra trailing columns").

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use scada_common::{ChanType, CtrlCmdType, CtrlCnl, InCnl, Role};

use crate::error::{ConfigError, Result};

const INCNL_FIXED_WIDTH: u64 = 2 + 1 + 4 + 2 + 2 + 1 + 1 + 1 + 1 + 1 + 8 + 8 + 8 + 8;
const CTRLCNL_FIXED_WIDTH: u64 = 2 + 1 + 4 + 2 + 2 + 1 + 1;

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(b) => Ok(b),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ConfigError::MissingFile(path.to_path_buf()))
        }
        Err(e) => Err(ConfigError::io(path, e)),
    }
}

/// Load `incnl.dat`: every configured input channel.
pub fn load_incnl(path: &Path) -> Result<Vec<InCnl>> {
    let bytes = read_bytes(path)?;
    let mut cur = Cursor::new(&bytes[..]);
    let record_len = cur
        .read_u16::<LittleEndian>()
        .map_err(|e| ConfigError::io(path, e))? as u64;
    let record_cnt = cur
        .read_u32::<LittleEndian>()
        .map_err(|e| ConfigError::io(path, e))?;
    if record_len < INCNL_FIXED_WIDTH {
        return Err(ConfigError::format(
            path,
            format!("declared record_len {record_len} shorter than known incnl fields"),
        ));
    }

    let mut out = Vec::with_capacity(record_cnt as usize);
    for i in 0..record_cnt {
        let record_start = cur.position();
        let cnl_num = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let cnl_type_byte = cur.read_u8().map_err(|e| eof(path, i, e))?;
        let cnl_type = ChanType::from_u8(cnl_type_byte)
            .ok_or_else(|| ConfigError::format(path, format!("record {i}: unknown cnl_type {cnl_type_byte}")))?;
        let obj_num = cur.read_u32::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let kp_num = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let param_id = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let formula_used = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;
        let averaging = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;
        let ev_enabled = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;
        let ev_on_change = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;
        let ev_on_undef = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;
        let lim_low_crash = cur.read_f64::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let lim_low = cur.read_f64::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let lim_high = cur.read_f64::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let lim_high_crash = cur.read_f64::<LittleEndian>().map_err(|e| eof(path, i, e))?;

        // Skip any vendor-extension bytes within the declared fixed width.
        let consumed = cur.position() - record_start;
        if consumed < record_len {
            cur.set_position(record_start + record_len);
        }

        let formula_len = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))? as usize;
        let mut formula_bytes = vec![0u8; formula_len];
        cur.read_exact(&mut formula_bytes).map_err(|e| eof(path, i, e))?;
        let formula = String::from_utf8_lossy(&formula_bytes).into_owned();

        out.push(InCnl {
            cnl_num,
            cnl_type,
            obj_num,
            kp_num,
            param_id,
            formula_used,
            formula,
            averaging,
            ev_enabled,
            ev_on_change,
            ev_on_undef,
            lim_low_crash,
            lim_low,
            lim_high,
            lim_high_crash,
        });
    }
    Ok(out)
}

/// Load `ctrlcnl.dat`: every configured control channel.
pub fn load_ctrlcnl(path: &Path) -> Result<Vec<CtrlCnl>> {
    let bytes = read_bytes(path)?;
    let mut cur = Cursor::new(&bytes[..]);
    let record_len = cur
        .read_u16::<LittleEndian>()
        .map_err(|e| ConfigError::io(path, e))? as u64;
    let record_cnt = cur
        .read_u32::<LittleEndian>()
        .map_err(|e| ConfigError::io(path, e))?;
    if record_len < CTRLCNL_FIXED_WIDTH {
        return Err(ConfigError::format(
            path,
            format!("declared record_len {record_len} shorter than known ctrlcnl fields"),
        ));
    }

    let mut out = Vec::with_capacity(record_cnt as usize);
    for i in 0..record_cnt {
        let record_start = cur.position();
        let ctrl_cnl_num = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let cmd_type_byte = cur.read_u8().map_err(|e| eof(path, i, e))?;
        let cmd_type = CtrlCmdType::from_u8(cmd_type_byte).ok_or_else(|| {
            ConfigError::format(path, format!("record {i}: unknown cmd_type {cmd_type_byte}"))
        })?;
        let obj_num = cur.read_u32::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let kp_num = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let cmd_num = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))?;
        let formula_used = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;
        let ev_enabled = cur.read_u8().map_err(|e| eof(path, i, e))? != 0;

        let consumed = cur.position() - record_start;
        if consumed < record_len {
            cur.set_position(record_start + record_len);
        }

        let formula_len = cur.read_u16::<LittleEndian>().map_err(|e| eof(path, i, e))? as usize;
        let mut formula_bytes = vec![0u8; formula_len];
        cur.read_exact(&mut formula_bytes).map_err(|e| eof(path, i, e))?;
        let formula = String::from_utf8_lossy(&formula_bytes).into_owned();

        out.push(CtrlCnl {
            ctrl_cnl_num,
            cmd_type,
            obj_num,
            kp_num,
            cmd_num,
            formula_used,
            formula,
            ev_enabled,
        });
    }
    Ok(out)
}

/// A configured operator/application account (spec §6: `user.dat`).
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: u16,
    pub role_id: Role,
    pub name: String,
    pub pw_hash: [u8; 32],
}

impl User {
    /// SHA-256 the way the codec stores it — the loader never sees plaintext.
    pub fn hash_password(password: &str) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }

    pub fn check_password(&self, password: &str) -> bool {
        Self::hash_password(password) == self.pw_hash
    }
}

/// `user.dat` has no record-count header (spec §6.1) — records are read
/// sequentially until the file is exhausted; a truncated trailing record is
/// discarded like the snapshot/event codec's tolerance policy (spec §7).
pub fn load_users(path: &Path) -> Result<Vec<User>> {
    let bytes = read_bytes(path)?;
    let mut out = Vec::new();
    let mut cur = Cursor::new(&bytes[..]);
    loop {
        let record_start = cur.position();
        if record_start as usize >= bytes.len() {
            break;
        }
        let parsed = (|| -> std::io::Result<User> {
            let user_id = cur.read_u16::<LittleEndian>()?;
            let role_byte = cur.read_u8()?;
            let name_len = cur.read_u8()? as usize;
            let mut name_buf = vec![0u8; name_len];
            cur.read_exact(&mut name_buf)?;
            let mut pw_hash = [0u8; 32];
            cur.read_exact(&mut pw_hash)?;
            let role_id = Role::from_u8(role_byte).unwrap_or(Role::Disabled);
            Ok(User { user_id, role_id, name: String::from_utf8_lossy(&name_buf).into_owned(), pw_hash })
        })();
        match parsed {
            Ok(user) => out.push(user),
            Err(_) => {
                tracing::warn!(path = %path.display(), "truncated trailing user.dat record, stopping");
                break;
            }
        }
    }
    Ok(out)
}

/// Loose "auxiliary" formula definition, concatenated as scope-level
/// constants by the calculator (spec §4.3 point 3).
#[derive(Debug, Clone)]
pub struct AuxFormula {
    pub formula_id: u16,
    pub name: String,
    pub body: String,
}

/// `formula.dat` also has no record-count header.
pub fn load_formulas(path: &Path) -> Result<Vec<AuxFormula>> {
    let bytes = read_bytes(path)?;
    let mut out = Vec::new();
    let mut cur = Cursor::new(&bytes[..]);
    loop {
        let record_start = cur.position();
        if record_start as usize >= bytes.len() {
            break;
        }
        let parsed = (|| -> std::io::Result<AuxFormula> {
            let formula_id = cur.read_u16::<LittleEndian>()?;
            let name_len = cur.read_u8()? as usize;
            let mut name_buf = vec![0u8; name_len];
            cur.read_exact(&mut name_buf)?;
            let body_len = cur.read_u16::<LittleEndian>()? as usize;
            let mut body_buf = vec![0u8; body_len];
            cur.read_exact(&mut body_buf)?;
            Ok(AuxFormula {
                formula_id,
                name: String::from_utf8_lossy(&name_buf).into_owned(),
                body: String::from_utf8_lossy(&body_buf).into_owned(),
            })
        })();
        match parsed {
            Ok(f) => out.push(f),
            Err(_) => {
                tracing::warn!(path = %path.display(), "truncated trailing formula.dat record, stopping");
                break;
            }
        }
    }
    Ok(out)
}

fn eof(path: &Path, record_idx: u32, source: std::io::Error) -> ConfigError {
    ConfigError::format(path, format!("record {record_idx}: {source}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use tempfile::TempDir;

    fn write_incnl_fixture(path: &Path, formula: &str) {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(INCNL_FIXED_WIDTH as u16).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(100).unwrap();
        buf.write_u8(ChanType::Ts as u8).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(2).unwrap();
        buf.write_u16::<LittleEndian>(3).unwrap();
        buf.write_u8(0).unwrap(); // formula_used
        buf.write_u8(0).unwrap(); // averaging
        buf.write_u8(1).unwrap(); // ev_enabled
        buf.write_u8(1).unwrap(); // ev_on_change
        buf.write_u8(0).unwrap(); // ev_on_undef
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.write_f64::<LittleEndian>(50.0).unwrap();
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.write_u16::<LittleEndian>(formula.len() as u16).unwrap();
        buf.extend_from_slice(formula.as_bytes());
        std::fs::write(path, buf).unwrap();
    }

    #[test]
    fn incnl_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incnl.dat");
        write_incnl_fixture(&path, "");
        let cnls = load_incnl(&path).unwrap();
        assert_eq!(cnls.len(), 1);
        assert_eq!(cnls[0].cnl_num, 100);
        assert_eq!(cnls[0].lim_high, 50.0);
    }

    #[test]
    fn incnl_tolerates_wider_declared_record_len() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incnl.dat");
        // Build a record with 4 extra vendor bytes before the formula tail.
        let mut buf = Vec::new();
        let wider = INCNL_FIXED_WIDTH as u16 + 4;
        buf.write_u16::<LittleEndian>(wider).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(5).unwrap();
        buf.write_u8(ChanType::Ti as u8).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(1).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.write_f64::<LittleEndian>(f64::NAN).unwrap();
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]); // unknown vendor bytes
        buf.write_u16::<LittleEndian>(0).unwrap();
        std::fs::write(&path, buf).unwrap();

        let cnls = load_incnl(&path).unwrap();
        assert_eq!(cnls.len(), 1);
        assert_eq!(cnls[0].cnl_num, 5);
    }

    #[test]
    fn user_password_hash_round_trips() {
        let hash = User::hash_password("hunter2");
        let user = User { user_id: 1, role_id: Role::Admin, name: "alice".into(), pw_hash: hash };
        assert!(user.check_password("hunter2"));
        assert!(!user.check_password("wrong"));
    }

    #[test]
    fn users_sequential_load_without_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user.dat");
        let mut buf = Vec::new();
        for (id, name) in [(1u16, "alice"), (2u16, "bob")] {
            buf.write_u16::<LittleEndian>(id).unwrap();
            buf.write_u8(Role::Admin as u8).unwrap();
            buf.write_u8(name.len() as u8).unwrap();
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&User::hash_password("pw"));
        }
        std::fs::write(&path, buf).unwrap();
        let users = load_users(&path).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name, "bob");
    }

    #[test]
    fn missing_base_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incnl.dat");
        assert!(matches!(load_incnl(&path), Err(ConfigError::MissingFile(_))));
    }
}
