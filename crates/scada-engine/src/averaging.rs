//! Averaging buckets (spec §3, §4.4.d, §4.6 step 6, invariant 4).

use std::collections::HashMap;
use scada_common::CnlNum;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bucket {
    pub sum: f64,
    pub cnt: u32,
}

impl Bucket {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.cnt += 1;
    }

    /// The value materialized into the archival table at flush; `None` if
    /// nothing was accumulated (channel stays untouched, not zeroed-to-zero).
    pub fn average(&self) -> Option<f64> {
        if self.cnt == 0 {
            None
        } else {
            Some(self.sum / self.cnt as f64)
        }
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.cnt = 0;
    }
}

/// Per-channel running buckets for one cadence (minute or hour).
#[derive(Debug, Default)]
pub struct AveragingBuckets {
    buckets: HashMap<CnlNum, Bucket>,
}

impl AveragingBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cnl_num: CnlNum, value: f64) {
        self.buckets.entry(cnl_num).or_default().add(value);
    }

    /// Drain every bucket's average, then zero it, returning `(cnl_num, avg)`
    /// pairs for channels that received at least one contribution.
    pub fn flush(&mut self) -> Vec<(CnlNum, f64)> {
        let mut out = Vec::new();
        for (cnl, bucket) in self.buckets.iter_mut() {
            if let Some(avg) = bucket.average() {
                out.push((*cnl, avg));
            }
            bucket.reset();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_three_contributions_average_to_twenty() {
        let mut buckets = AveragingBuckets::new();
        buckets.add(200, 10.0);
        buckets.add(200, 20.0);
        buckets.add(200, 30.0);
        let flushed = buckets.flush();
        assert_eq!(flushed, vec![(200, 20.0)]);
        // bucket is zero after flush
        assert_eq!(buckets.flush(), Vec::new());
    }

    #[test]
    fn untouched_channel_is_absent_from_flush() {
        let mut buckets = AveragingBuckets::new();
        buckets.add(1, 5.0);
        let flushed = buckets.flush();
        assert_eq!(flushed, vec![(1, 5.0)]);
    }
}
