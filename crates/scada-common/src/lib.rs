//! Shared types used across every `scada-*` crate: channel identifiers, status
//! codes, channel/role enums, and the spreadsheet-style serial timestamp.
//!
//! Nothing in this crate touches I/O, locking, or formula evaluation — it only
//! defines the vocabulary the rest of the workspace shares.

pub mod channel;
pub mod role;
pub mod timestamp;

pub use channel::{ChanData, ChanStat, ChanType, CnlNum, CtrlCnl, CtrlCmdType, InCnl};
pub use role::Role;
pub use timestamp::SerialTime;
