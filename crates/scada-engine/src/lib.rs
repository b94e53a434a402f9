//! Current snapshot state (F) and channel evaluator (D) — spec §4.4, §3.
//!
//! Owns the current-snapshot lock and the calculator lock, acquired in that
//! order per the locking discipline in spec §5. Nothing here touches the
//! network or the scheduler's wall-clock cadence logic; those live in
//! `scada-net`, which drives this crate's entry points from its tick loop.

pub mod averaging;
pub mod events;
pub mod evaluator;
pub mod limits;
pub mod switch_counter;

pub use averaging::{AveragingBuckets, Bucket};
pub use events::{determine, EventReason};
pub use evaluator::ChannelEvaluator;
