//! Directory-ID resolution and the per-session open-file handle (spec §6's
//! file-serving commands `0x08`-`0x0C`).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::protocol::Directory;

/// Root paths for every directory ID, resolved once at startup from the
/// settings file (spec §6.2's `Paths` element).
#[derive(Debug, Clone)]
pub struct DirectoryRoots {
    pub current: PathBuf,
    pub hour: PathBuf,
    pub min: PathBuf,
    pub events: PathBuf,
    pub base: PathBuf,
    pub interface: PathBuf,
    pub copy_root: Option<PathBuf>,
}

impl DirectoryRoots {
    pub fn resolve(&self, dir: &Directory) -> Option<PathBuf> {
        match dir {
            Directory::Current => Some(self.current.clone()),
            Directory::Hour => Some(self.hour.clone()),
            Directory::Min => Some(self.min.clone()),
            Directory::Events => Some(self.events.clone()),
            Directory::Base => Some(self.base.clone()),
            Directory::Interface => Some(self.interface.clone()),
            Directory::Copy(inner) => {
                let root = self.copy_root.as_ref()?;
                let suffix = self.resolve(inner)?;
                let leaf = suffix.file_name()?;
                Some(root.join(leaf))
            }
        }
    }
}

pub struct OpenFile {
    file: File,
    pos: u64,
}

impl OpenFile {
    pub fn open(root: &Path, name: &str) -> std::io::Result<Self> {
        let path = root.join(name);
        let file = File::open(path)?;
        Ok(Self { file, pos: 0 })
    }

    pub fn seek(&mut self, origin: u8, offset: u32) -> std::io::Result<u32> {
        let from = match origin {
            0 => SeekFrom::Start(offset as u64),
            1 => SeekFrom::Current(offset as i64),
            _ => SeekFrom::End(offset as i64),
        };
        self.pos = self.file.seek(from)?;
        Ok(self.pos as u32)
    }

    pub fn read(&mut self, count: u16) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; count as usize];
        let n = self.file.read(&mut buf)?;
        buf.truncate(n);
        self.pos += n as u64;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_directory_redirects_to_copy_root() {
        let roots = DirectoryRoots {
            current: PathBuf::from("/a/cur.dat"),
            hour: PathBuf::from("/a/hour"),
            min: PathBuf::from("/a/min"),
            events: PathBuf::from("/a/events"),
            base: PathBuf::from("/a/base"),
            interface: PathBuf::from("/a/iface"),
            copy_root: Some(PathBuf::from("/b")),
        };
        let resolved = roots.resolve(&Directory::Copy(Box::new(Directory::Current))).unwrap();
        assert_eq!(resolved, PathBuf::from("/b/cur.dat"));
    }

    #[test]
    fn open_seek_read_round_trips() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.dat"), b"hello world").unwrap();
        let mut f = OpenFile::open(dir.path(), "f.dat").unwrap();
        f.seek(0, 6).unwrap();
        let data = f.read(5).unwrap();
        assert_eq!(data, b"world");
    }
}
