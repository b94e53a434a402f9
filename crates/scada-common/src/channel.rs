//! Channel and channel-data vocabulary (spec §3).

/// 16-bit channel identifier.
pub type CnlNum = u16;

/// Channel status code. Modeled as a thin `u16` newtype rather than a plain
/// enum because the spec repeatedly compares statuses numerically
/// (`stat > undefined`, `old_stat != new_stat`) — keeping the representation
/// numeric lets the evaluator express those comparisons directly instead of
/// re-deriving an ordinal every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChanStat(pub u16);

impl ChanStat {
    pub const UNDEFINED: ChanStat = ChanStat(0);
    pub const DEFINED: ChanStat = ChanStat(1);
    pub const ARCHIVAL: ChanStat = ChanStat(2);
    pub const FORMULA_ERROR: ChanStat = ChanStat(3);
    pub const UNRELIABLE: ChanStat = ChanStat(4);
    pub const CHANGED: ChanStat = ChanStat(5);
    pub const NORMAL: ChanStat = ChanStat(6);
    pub const LOW: ChanStat = ChanStat(7);
    pub const HIGH: ChanStat = ChanStat(8);
    pub const LOW_CRASH: ChanStat = ChanStat(9);
    pub const HIGH_CRASH: ChanStat = ChanStat(10);

    pub fn is_defined(&self) -> bool {
        *self > Self::UNDEFINED
    }

    /// Is this one of the values `process_current` may assign after limit
    /// clamping or averaging eligibility checks (§4.4.d)?
    pub fn is_limit_derived(&self) -> bool {
        matches!(
            *self,
            Self::NORMAL | Self::LOW | Self::HIGH | Self::LOW_CRASH | Self::HIGH_CRASH
        )
    }

    pub fn is_excursion(&self) -> bool {
        matches!(*self, Self::LOW | Self::HIGH | Self::LOW_CRASH | Self::HIGH_CRASH)
    }
}

impl Default for ChanStat {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl From<u16> for ChanStat {
    fn from(v: u16) -> Self {
        ChanStat(v)
    }
}

/// A single `(val, stat)` pair — the unit the snapshot arrays are built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChanData {
    pub val: f64,
    pub stat: ChanStat,
}

impl ChanData {
    pub fn new(val: f64, stat: ChanStat) -> Self {
        Self { val, stat }
    }

    pub fn undefined() -> Self {
        Self { val: 0.0, stat: ChanStat::UNDEFINED }
    }
}

impl Default for ChanData {
    fn default() -> Self {
        Self::undefined()
    }
}

/// Input channel type (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChanType {
    Ts = 0,
    Ti = 1,
    DerivedTs = 2,
    DerivedTi = 3,
    DerivedTsMinute = 4,
    DerivedTiMinute = 5,
    DerivedTsHour = 6,
    DerivedTiHour = 7,
    SwitchCounter = 8,
}

impl ChanType {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Ts,
            1 => Self::Ti,
            2 => Self::DerivedTs,
            3 => Self::DerivedTi,
            4 => Self::DerivedTsMinute,
            5 => Self::DerivedTiMinute,
            6 => Self::DerivedTsHour,
            7 => Self::DerivedTiHour,
            8 => Self::SwitchCounter,
            _ => return None,
        })
    }

    /// Is this a raw TS/TI channel that goes through formula + limit + event
    /// logic in `process_current`, as opposed to a derived type stored
    /// verbatim (spec §4.4.3)?
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Ts | Self::Ti | Self::SwitchCounter)
    }

    pub fn is_derived(&self) -> bool {
        !self.is_raw()
    }

    /// Which scheduler cadence (if any) recomputes this derived type.
    pub fn derived_cadence(&self) -> Option<DerivedCadence> {
        match self {
            Self::DerivedTs | Self::DerivedTi => Some(DerivedCadence::PerCycle),
            Self::DerivedTsMinute | Self::DerivedTiMinute => Some(DerivedCadence::PerMinute),
            Self::DerivedTsHour | Self::DerivedTiHour => Some(DerivedCadence::PerHour),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedCadence {
    PerCycle,
    PerMinute,
    PerHour,
}

/// Configured input channel (spec §3).
#[derive(Debug, Clone)]
pub struct InCnl {
    pub cnl_num: CnlNum,
    pub cnl_type: ChanType,
    pub obj_num: u32,
    pub kp_num: u16,
    pub param_id: u16,
    pub formula_used: bool,
    pub formula: String,
    pub averaging: bool,
    pub ev_enabled: bool,
    pub ev_on_change: bool,
    pub ev_on_undef: bool,
    pub lim_low_crash: f64,
    pub lim_low: f64,
    pub lim_high: f64,
    pub lim_high_crash: f64,
}

impl InCnl {
    pub fn has_limits(&self) -> bool {
        !self.lim_low.is_nan() || !self.lim_high.is_nan()
            || !self.lim_low_crash.is_nan() || !self.lim_high_crash.is_nan()
    }
}

/// Control channel command type (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtrlCmdType {
    StandardNumeric = 0,
    Binary = 1,
    Request = 2,
}

impl CtrlCmdType {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::StandardNumeric,
            1 => Self::Binary,
            2 => Self::Request,
            _ => return None,
        })
    }
}

/// Configured control channel (spec §3).
#[derive(Debug, Clone)]
pub struct CtrlCnl {
    pub ctrl_cnl_num: CnlNum,
    pub cmd_type: CtrlCmdType,
    pub obj_num: u32,
    pub kp_num: u16,
    pub cmd_num: u16,
    pub formula_used: bool,
    pub formula: String,
    pub ev_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_ordering_matches_spec_numeric_comparisons() {
        assert!(ChanStat::DEFINED > ChanStat::UNDEFINED);
        assert!(ChanStat::UNRELIABLE > ChanStat::UNDEFINED);
        assert!(ChanStat::UNDEFINED.is_defined() == false);
        assert!(ChanStat::DEFINED.is_defined());
    }

    #[test]
    fn limit_derived_classification() {
        assert!(ChanStat::NORMAL.is_limit_derived());
        assert!(ChanStat::LOW.is_limit_derived());
        assert!(!ChanStat::FORMULA_ERROR.is_limit_derived());
    }

    #[test]
    fn chan_type_round_trips_through_u8() {
        for t in [
            ChanType::Ts,
            ChanType::Ti,
            ChanType::DerivedTs,
            ChanType::DerivedTi,
            ChanType::DerivedTsMinute,
            ChanType::DerivedTiMinute,
            ChanType::DerivedTsHour,
            ChanType::DerivedTiHour,
            ChanType::SwitchCounter,
        ] {
            let b = t as u8;
            assert_eq!(ChanType::from_u8(b).map(|t2| t2 as u8), Some(b));
        }
    }

    #[test]
    fn derived_cadence_assignment() {
        assert_eq!(ChanType::DerivedTs.derived_cadence(), Some(DerivedCadence::PerCycle));
        assert_eq!(ChanType::DerivedTiMinute.derived_cadence(), Some(DerivedCadence::PerMinute));
        assert_eq!(ChanType::DerivedTsHour.derived_cadence(), Some(DerivedCadence::PerHour));
        assert_eq!(ChanType::Ts.derived_cadence(), None);
    }
}
