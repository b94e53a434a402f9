//! Snapshot (Srez) and snapshot-table types (spec §3).

use scada_common::{ChanData, CnlNum};

/// A single channel-set descriptor. Two snapshots that list the same
/// `cnl_nums` in the same order share a descriptor in the archival file
/// format (spec §4.1); `crc` lets readers detect a stale/corrupted
/// "same-as-previous" record independent of recomputing it from the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub cnl_nums: Vec<CnlNum>,
    pub crc: u32,
}

impl Descriptor {
    pub fn new(cnl_nums: Vec<CnlNum>) -> Self {
        let crc = crc_of_cnl_nums(&cnl_nums);
        Self { cnl_nums, crc }
    }

    pub fn verify(&self) -> bool {
        crc_of_cnl_nums(&self.cnl_nums) == self.crc
    }
}

pub fn crc_of_cnl_nums(cnl_nums: &[CnlNum]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for &n in cnl_nums {
        hasher.update(&n.to_le_bytes());
    }
    hasher.finalize()
}

/// A timestamped vector of channel readings — parallel `cnl_nums`/`cnl_data`
/// arrays, `cnl_nums` strictly ascending (spec §3, invariant 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: f64,
    pub cnl_nums: Vec<CnlNum>,
    pub cnl_data: Vec<ChanData>,
}

impl Snapshot {
    pub fn new(timestamp: f64, cnl_nums: Vec<CnlNum>, cnl_data: Vec<ChanData>) -> Self {
        debug_assert_eq!(cnl_nums.len(), cnl_data.len());
        Self { timestamp, cnl_nums, cnl_data }
    }

    pub fn empty(timestamp: f64) -> Self {
        Self { timestamp, cnl_nums: Vec::new(), cnl_data: Vec::new() }
    }

    pub fn is_ascending(&self) -> bool {
        self.cnl_nums.windows(2).all(|w| w[0] < w[1])
    }

    pub fn get(&self, cnl_num: CnlNum) -> Option<ChanData> {
        self.cnl_nums
            .binary_search(&cnl_num)
            .ok()
            .map(|i| self.cnl_data[i])
    }

    /// Insert or overwrite a single channel's data, keeping `cnl_nums` ascending.
    pub fn set(&mut self, cnl_num: CnlNum, data: ChanData) {
        match self.cnl_nums.binary_search(&cnl_num) {
            Ok(i) => self.cnl_data[i] = data,
            Err(i) => {
                self.cnl_nums.insert(i, cnl_num);
                self.cnl_data.insert(i, data);
            }
        }
    }

    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.cnl_nums.clone())
    }
}

/// An ordered sequence of snapshots for one day, strictly ascending by
/// timestamp (spec §3, invariant 2).
#[derive(Debug, Clone, Default)]
pub struct SnapshotTable {
    snapshots: Vec<Snapshot>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        Self { snapshots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn is_strictly_ascending(&self) -> bool {
        self.snapshots.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
    }

    /// Insert keeping ascending order; if a snapshot with the exact same
    /// timestamp already exists, it is replaced (used by `process_archive`'s
    /// "locate or allocate" slot semantics, spec §4.4).
    pub fn upsert(&mut self, snapshot: Snapshot) {
        match self
            .snapshots
            .binary_search_by(|s| s.timestamp.partial_cmp(&snapshot.timestamp).unwrap())
        {
            Ok(i) => self.snapshots[i] = snapshot,
            Err(i) => self.snapshots.insert(i, snapshot),
        }
    }

    pub fn nearest(&self, ts: f64, period_days: f64) -> Option<usize> {
        if self.snapshots.is_empty() {
            return None;
        }
        let idx = self
            .snapshots
            .partition_point(|s| s.timestamp < ts);
        let mut best: Option<(usize, f64)> = None;
        for cand in [idx.checked_sub(1), Some(idx)] {
            if let Some(i) = cand {
                if let Some(s) = self.snapshots.get(i) {
                    let d = (s.timestamp - ts).abs();
                    if d <= period_days / 2.0 + f64::EPSILON {
                        if best.map_or(true, |(_, bd)| d < bd) {
                            best = Some((i, d));
                        }
                    }
                }
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn at(&self, idx: usize) -> Option<&Snapshot> {
        self.snapshots.get(idx)
    }

    pub fn into_vec(self) -> Vec<Snapshot> {
        self.snapshots
    }

    pub fn from_vec(snapshots: Vec<Snapshot>) -> Self {
        Self { snapshots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scada_common::ChanStat;

    #[test]
    fn snapshot_set_keeps_ascending() {
        let mut s = Snapshot::empty(1.0);
        s.set(30, ChanData::new(1.0, ChanStat::DEFINED));
        s.set(10, ChanData::new(2.0, ChanStat::DEFINED));
        s.set(20, ChanData::new(3.0, ChanStat::DEFINED));
        assert!(s.is_ascending());
        assert_eq!(s.cnl_nums, vec![10, 20, 30]);
    }

    #[test]
    fn descriptor_crc_detects_tamper() {
        let d = Descriptor::new(vec![1, 2, 3]);
        assert!(d.verify());
        let mut bad = d.clone();
        bad.cnl_nums.push(4);
        assert!(!bad.verify());
    }

    #[test]
    fn table_upsert_preserves_order() {
        let mut t = SnapshotTable::new();
        t.upsert(Snapshot::empty(3.0));
        t.upsert(Snapshot::empty(1.0));
        t.upsert(Snapshot::empty(2.0));
        assert!(t.is_strictly_ascending());
    }
}
