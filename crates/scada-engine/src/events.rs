//! Event generation rules (spec §4.5, component E).

use scada_common::{ChanData, ChanStat, InCnl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
    EnterUndefined,
    ExitUndefined,
    Excursion,
    Normalization,
    DataChanged,
}

/// Decide whether `(old, new)` produces an event for this channel, and what
/// `new_stat` the event record should carry. Checked in priority order:
/// enter/exit-undefined (mutually exclusive with the rest by construction),
/// then excursion (preferred over a same-transition data-changed event per
/// spec §4.5), then normalization, then plain data-changed.
pub fn determine(cnl: &InCnl, old: ChanData, new: ChanData) -> Option<(EventReason, ChanStat)> {
    if !cnl.ev_enabled {
        return None;
    }

    if cnl.ev_on_undef && old.stat > ChanStat::UNDEFINED && new.stat == ChanStat::UNDEFINED {
        return Some((EventReason::EnterUndefined, new.stat));
    }
    if cnl.ev_on_undef && old.stat == ChanStat::UNDEFINED && new.stat > ChanStat::UNDEFINED {
        return Some((EventReason::ExitUndefined, new.stat));
    }
    if new.stat.is_excursion() && old.stat != new.stat {
        return Some((EventReason::Excursion, new.stat));
    }
    if new.stat == ChanStat::NORMAL && old.stat != ChanStat::NORMAL && old.stat != ChanStat::UNDEFINED {
        return Some((EventReason::Normalization, new.stat));
    }
    if cnl.ev_on_change
        && old.stat > ChanStat::UNDEFINED
        && new.stat > ChanStat::UNDEFINED
        && (old.val != new.val || old.stat != new.stat)
    {
        // Pure defined -> defined transitions record `changed`, not the raw new_stat.
        return Some((EventReason::DataChanged, ChanStat::CHANGED));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_channel() -> InCnl {
        InCnl {
            cnl_num: 1,
            cnl_type: scada_common::ChanType::Ts,
            obj_num: 0,
            kp_num: 0,
            param_id: 0,
            formula_used: false,
            formula: String::new(),
            averaging: false,
            ev_enabled: true,
            ev_on_change: true,
            ev_on_undef: true,
            lim_low_crash: f64::NAN,
            lim_low: f64::NAN,
            lim_high: 50.0,
            lim_high_crash: f64::NAN,
        }
    }

    #[test]
    fn s1_threshold_excursion_event() {
        let cnl = base_channel();
        let old = ChanData::new(10.0, ChanStat::NORMAL);
        let new = ChanData::new(60.0, ChanStat::HIGH);
        let (reason, stat) = determine(&cnl, old, new).unwrap();
        assert_eq!(reason, EventReason::Excursion);
        assert_eq!(stat, ChanStat::HIGH);
    }

    #[test]
    fn excursion_preferred_over_data_changed() {
        let cnl = base_channel();
        let old = ChanData::new(10.0, ChanStat::NORMAL);
        let new = ChanData::new(60.0, ChanStat::HIGH);
        // Values differ (data changed would also fire) but excursion wins.
        assert_eq!(determine(&cnl, old, new).unwrap().0, EventReason::Excursion);
    }

    #[test]
    fn defined_to_defined_change_records_changed_stat() {
        let mut cnl = base_channel();
        cnl.lim_high = f64::NAN;
        let old = ChanData::new(1.0, ChanStat::DEFINED);
        let new = ChanData::new(2.0, ChanStat::DEFINED);
        let (reason, stat) = determine(&cnl, old, new).unwrap();
        assert_eq!(reason, EventReason::DataChanged);
        assert_eq!(stat, ChanStat::CHANGED);
    }

    #[test]
    fn exit_undefined_only_from_undefined_old_stat() {
        let cnl = base_channel();
        let old = ChanData::new(0.0, ChanStat::UNDEFINED);
        let new = ChanData::new(5.0, ChanStat::DEFINED);
        assert_eq!(determine(&cnl, old, new).unwrap().0, EventReason::ExitUndefined);

        // unreliable -> defined must NOT be treated as exit-undefined (invariant 7).
        let old2 = ChanData::new(5.0, ChanStat::UNRELIABLE);
        let new2 = ChanData::new(5.0, ChanStat::DEFINED);
        assert_ne!(
            determine(&cnl, old2, new2).map(|(r, _)| r),
            Some(EventReason::ExitUndefined)
        );
    }

    #[test]
    fn disabled_events_never_fire() {
        let mut cnl = base_channel();
        cnl.ev_enabled = false;
        let old = ChanData::new(10.0, ChanStat::NORMAL);
        let new = ChanData::new(60.0, ChanStat::HIGH);
        assert!(determine(&cnl, old, new).is_none());
    }
}
