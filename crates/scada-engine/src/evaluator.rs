//! Channel evaluator (spec §4.4, component D) and current snapshot state
//! (component F). Owns the current-snapshot lock and the calculator lock,
//! acquired in that order (spec §5's locking discipline).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use scada_common::{ChanData, ChanStat, ChanType, CnlNum, InCnl};
use scada_formula::{Calculator, Env};
use scada_store::{Event, Snapshot, SnapshotTable};

use crate::averaging::AveragingBuckets;
use crate::events::{self, EventReason};
use crate::limits;
use crate::switch_counter;

/// Scope an in-progress formula runs against: `Val()`/`Stat()` resolve to the
/// channel currently being computed, `Val(n)`/`Stat(n)` read through the
/// snapshot being built (spec §4.3's "processing snapshot" pointer).
struct EvalEnv<'a> {
    snapshot: &'a mut Snapshot,
    current: CnlNum,
    calculator: &'a Calculator,
}

impl Env for EvalEnv<'_> {
    fn val(&self, n: Option<CnlNum>) -> f64 {
        self.snapshot.get(n.unwrap_or(self.current)).map(|d| d.val).unwrap_or(0.0)
    }

    fn stat(&self, n: Option<CnlNum>) -> f64 {
        self.snapshot
            .get(n.unwrap_or(self.current))
            .map(|d| d.stat.0 as f64)
            .unwrap_or(0.0)
    }

    fn set_val(&mut self, n: CnlNum, v: f64) {
        let stat = self.snapshot.get(n).map(|d| d.stat).unwrap_or(ChanStat::DEFINED);
        self.snapshot.set(n, ChanData::new(v, stat));
    }

    fn set_stat(&mut self, n: CnlNum, s: f64) {
        let val = self.snapshot.get(n).map(|d| d.val).unwrap_or(0.0);
        self.snapshot.set(n, ChanData::new(val, stat_from_f64(s)));
    }

    fn set_data(&mut self, n: CnlNum, v: f64, s: f64) {
        self.snapshot.set(n, ChanData::new(v, stat_from_f64(s)));
    }

    fn aux(&self, name: &str) -> Option<f64> {
        self.calculator.aux_value(name)
    }
}

fn stat_from_f64(s: f64) -> ChanStat {
    ChanStat(s.round().clamp(0.0, u16::MAX as f64) as u16)
}

/// A `(channel, value|status)` formula evaluation applied against an
/// in-progress snapshot, matching `calc`'s contract in spec §4.3: runtime
/// errors are caught and turned into `stat = formula_error`, preserving the
/// raw value that was already written into the snapshot.
fn eval_formula_into(
    calc: &Calculator,
    snapshot: &mut Snapshot,
    cnl_num: CnlNum,
    raw_val: f64,
) -> ChanData {
    let Some(formula) = calc.channel_formula(cnl_num) else {
        return ChanData::new(raw_val, ChanStat::DEFINED);
    };
    let value_result = {
        let mut env = EvalEnv { snapshot, current: cnl_num, calculator: calc };
        scada_formula::eval::eval(&formula.value, &mut env)
    };
    let new_val = match value_result {
        Ok(v) => v,
        Err(_) => return ChanData::new(raw_val, ChanStat::FORMULA_ERROR),
    };

    let stat = if let Some(status_expr) = &formula.status {
        let mut env = EvalEnv { snapshot, current: cnl_num, calculator: calc };
        match scada_formula::eval::eval(status_expr, &mut env) {
            Ok(s) => stat_from_f64(s),
            Err(_) => return ChanData::new(new_val, ChanStat::FORMULA_ERROR),
        }
    } else {
        ChanStat::DEFINED
    };
    ChanData::new(new_val, stat)
}

pub struct ChannelEvaluator {
    calculator: Mutex<Calculator>,
    current: RwLock<Snapshot>,
    configs: HashMap<CnlNum, InCnl>,
    minute_buckets: Mutex<AveragingBuckets>,
    hour_buckets: Mutex<AveragingBuckets>,
    last_active: Mutex<HashMap<CnlNum, Instant>>,
    dirty: AtomicBool,
}

impl ChannelEvaluator {
    pub fn new(configs: HashMap<CnlNum, InCnl>, calculator: Calculator, initial: Snapshot) -> Self {
        Self {
            calculator: Mutex::new(calculator),
            current: RwLock::new(initial),
            configs,
            minute_buckets: Mutex::new(AveragingBuckets::new()),
            hour_buckets: Mutex::new(AveragingBuckets::new()),
            last_active: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn config(&self, cnl_num: CnlNum) -> Option<&InCnl> {
        self.configs.get(&cnl_num)
    }

    pub fn current_snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn flush_minute_buckets(&self) -> Vec<(CnlNum, f64)> {
        self.minute_buckets.lock().flush()
    }

    pub fn flush_hour_buckets(&self) -> Vec<(CnlNum, f64)> {
        self.hour_buckets.lock().flush()
    }

    /// `process_current` (spec §4.4): apply a client-uploaded batch of
    /// current readings. Lock order: current snapshot, then calculator.
    pub fn process_current(&self, received: &Snapshot) -> Vec<Event> {
        let mut current = self.current.write();
        let calc = self.calculator.lock();
        let mut out_events = Vec::new();
        let now = Instant::now();
        let mut last_active = self.last_active.lock();

        for (&cnl_num, &recv_data) in received.cnl_nums.iter().zip(received.cnl_data.iter()) {
            let Some(cfg) = self.configs.get(&cnl_num) else {
                tracing::warn!(cnl_num, "write-current referenced unconfigured channel, ignoring");
                continue;
            };

            let old = current.get(cnl_num).unwrap_or_default();

            if cfg.cnl_type.is_derived() {
                // Derived types stored verbatim, no formula/limit/event logic (spec §4.4.3).
                current.set(cnl_num, recv_data);
                continue;
            }

            current.set(cnl_num, recv_data);
            let mut new_data = if cfg.formula_used {
                eval_formula_into(&calc, &mut current, cnl_num, recv_data.val)
            } else {
                recv_data
            };

            if new_data.stat == ChanStat::DEFINED && limits::has_any_limit(cfg.lim_low_crash, cfg.lim_low, cfg.lim_high, cfg.lim_high_crash) {
                new_data.stat = limits::clamp(new_data.val, cfg.lim_low_crash, cfg.lim_low, cfg.lim_high, cfg.lim_high_crash);
            }

            if cfg.cnl_type == ChanType::SwitchCounter && new_data.stat > ChanStat::UNDEFINED {
                new_data.val = switch_counter::apply(old.val, recv_data.val);
            }

            if cfg.averaging && new_data.stat.is_defined() && (new_data.stat == ChanStat::DEFINED || new_data.stat.is_limit_derived()) {
                self.minute_buckets.lock().add(cnl_num, new_data.val);
                self.hour_buckets.lock().add(cnl_num, new_data.val);
            }

            current.set(cnl_num, new_data);
            last_active.insert(cnl_num, now);

            if let Some((reason, event_stat)) = events::determine(cfg, old, new_data) {
                out_events.push(build_event(cfg, current.timestamp, old, new_data, event_stat, reason));
            }
        }

        self.dirty.store(true, Ordering::Release);
        out_events
    }

    /// `derived_pass` (spec §4.4): recompute channels of one derived cadence
    /// against the given snapshot.
    pub fn derived_pass(&self, cadence: scada_common::channel::DerivedCadence, snapshot: &mut Snapshot) -> Vec<Event> {
        let calc = self.calculator.lock();
        let mut out = Vec::new();
        let mut cnls: Vec<CnlNum> = self
            .configs
            .values()
            .filter(|c| c.cnl_type.derived_cadence() == Some(cadence))
            .map(|c| c.cnl_num)
            .collect();
        cnls.sort_unstable();

        for cnl_num in cnls {
            let cfg = &self.configs[&cnl_num];
            let old = snapshot.get(cnl_num).unwrap_or_default();
            let raw = old.val;
            let new_data = if cfg.formula_used {
                eval_formula_into(&calc, snapshot, cnl_num, raw)
            } else {
                old
            };
            snapshot.set(cnl_num, new_data);
            if let Some((reason, event_stat)) = events::determine(cfg, old, new_data) {
                out.push(build_event(cfg, snapshot.timestamp, old, new_data, event_stat, reason));
            }
        }
        out
    }

    /// `process_archive` (spec §4.4): upload targeting a historical timestamp.
    /// Locates or allocates the nearest minute (and, if aligned, hour) slot,
    /// applies formulas with the archival status overlay (a freshly `defined`
    /// reading becomes `archival`), and recomputes derived channels for that
    /// snapshot.
    pub fn process_archive(
        &self,
        received: &Snapshot,
        minute_table: &mut SnapshotTable,
        minute_period_days: f64,
        hour_table: Option<&mut SnapshotTable>,
        hour_period_days: f64,
    ) -> Vec<Event> {
        let calc = self.calculator.lock();
        let mut events_out = Vec::new();

        let mut slot = match minute_table.nearest(received.timestamp, minute_period_days) {
            Some(idx) => minute_table.at(idx).cloned().unwrap_or_else(|| Snapshot::empty(received.timestamp)),
            None => Snapshot::empty(received.timestamp),
        };

        for (&cnl_num, &recv_data) in received.cnl_nums.iter().zip(received.cnl_data.iter()) {
            let Some(cfg) = self.configs.get(&cnl_num) else { continue };
            let old = slot.get(cnl_num).unwrap_or_default();
            slot.set(cnl_num, recv_data);

            let mut new_data = if cfg.formula_used {
                eval_formula_into(&calc, &mut slot, cnl_num, recv_data.val)
            } else {
                recv_data
            };
            if new_data.stat == ChanStat::DEFINED {
                // Archival overlay: a freshly defined reading becomes archival (spec §4.4).
                new_data.stat = ChanStat::ARCHIVAL;
            }
            slot.set(cnl_num, new_data);
            if let Some((reason, event_stat)) = events::determine(cfg, old, new_data) {
                events_out.push(build_event(cfg, slot.timestamp, old, new_data, event_stat, reason));
            }
        }

        for cadence in [
            scada_common::channel::DerivedCadence::PerCycle,
            scada_common::channel::DerivedCadence::PerMinute,
            scada_common::channel::DerivedCadence::PerHour,
        ] {
            events_out.extend(self.derived_pass_with_calc(&calc, cadence, &mut slot));
        }

        minute_table.upsert(slot.clone());

        if let Some(hour_table) = hour_table {
            let mut hour_slot = match hour_table.nearest(received.timestamp, hour_period_days) {
                Some(idx) => hour_table.at(idx).cloned().unwrap_or_else(|| Snapshot::empty(received.timestamp)),
                None => Snapshot::empty(received.timestamp),
            };
            for (&cnl_num, &data) in slot.cnl_nums.iter().zip(slot.cnl_data.iter()) {
                hour_slot.set(cnl_num, data);
            }
            hour_table.upsert(hour_slot);
        }

        events_out
    }

    fn derived_pass_with_calc(
        &self,
        calc: &Calculator,
        cadence: scada_common::channel::DerivedCadence,
        snapshot: &mut Snapshot,
    ) -> Vec<Event> {
        let mut out = Vec::new();
        let mut cnls: Vec<CnlNum> = self
            .configs
            .values()
            .filter(|c| c.cnl_type.derived_cadence() == Some(cadence))
            .map(|c| c.cnl_num)
            .collect();
        cnls.sort_unstable();
        for cnl_num in cnls {
            let cfg = &self.configs[&cnl_num];
            let old = snapshot.get(cnl_num).unwrap_or_default();
            let new_data = if cfg.formula_used {
                eval_formula_into(calc, snapshot, cnl_num, old.val)
            } else {
                old
            };
            snapshot.set(cnl_num, new_data);
            if let Some((reason, event_stat)) = events::determine(cfg, old, new_data) {
                out.push(build_event(cfg, snapshot.timestamp, old, new_data, event_stat, reason));
            }
        }
        out
    }

    /// Runs `derived_pass` against the live current snapshot, for the
    /// scheduler's per-cycle/per-minute/per-hour cadence steps (spec §4.6).
    pub fn run_derived_on_current(&self, cadence: scada_common::channel::DerivedCadence) -> Vec<Event> {
        let mut current = self.current.write();
        let events = self.derived_pass(cadence, &mut current);
        if !events.is_empty() {
            self.dirty.store(true, Ordering::Release);
        }
        events
    }

    /// Inactivity sweep (spec §4.4): any TS/TI channel whose `last_active_time`
    /// is older than `inactive_minutes` and whose stat is `> undefined` becomes
    /// `unreliable`. Runs once per scheduler cycle.
    pub fn inactivity_sweep(&self, inactive_minutes: u64) -> Vec<Event> {
        if inactive_minutes == 0 {
            return Vec::new();
        }
        let threshold = std::time::Duration::from_secs(inactive_minutes * 60);
        let now = Instant::now();
        let mut current = self.current.write();
        let last_active = self.last_active.lock();
        let mut out = Vec::new();

        let mut stale: Vec<CnlNum> = Vec::new();
        for (&cnl_num, &data) in current.cnl_nums.iter().zip(current.cnl_data.iter()) {
            if data.stat <= ChanStat::UNDEFINED {
                continue;
            }
            let is_stale = match last_active.get(&cnl_num) {
                Some(&t) => now.duration_since(t) >= threshold,
                None => true,
            };
            if is_stale {
                stale.push(cnl_num);
            }
        }

        for cnl_num in stale {
            let Some(cfg) = self.configs.get(&cnl_num) else { continue };
            if !matches!(cfg.cnl_type, ChanType::Ts | ChanType::Ti) {
                continue;
            }
            let old = current.get(cnl_num).unwrap();
            let new_data = ChanData::new(old.val, ChanStat::UNRELIABLE);
            current.set(cnl_num, new_data);
            if let Some((reason, event_stat)) = events::determine(cfg, old, new_data) {
                out.push(build_event(cfg, current.timestamp, old, new_data, event_stat, reason));
            }
        }
        if !out.is_empty() {
            self.dirty.store(true, Ordering::Release);
        }
        out
    }
}

fn build_event(
    cfg: &InCnl,
    timestamp: f64,
    old: ChanData,
    new: ChanData,
    event_stat: ChanStat,
    reason: EventReason,
) -> Event {
    Event {
        timestamp,
        obj_num: cfg.obj_num,
        kp_num: cfg.kp_num as u32,
        param_id: cfg.param_id as u32,
        cnl_num: cfg.cnl_num as u32,
        old_val: old.val,
        old_stat: old.stat,
        new_val: new.val,
        new_stat: event_stat,
        checked: false,
        user_id: 0,
        descr: format!("{reason:?}"),
        data: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scada_common::{ChanType, InCnl};

    fn channel(cnl_num: CnlNum, cnl_type: ChanType) -> InCnl {
        InCnl {
            cnl_num,
            cnl_type,
            obj_num: 1,
            kp_num: 1,
            param_id: 1,
            formula_used: false,
            formula: String::new(),
            averaging: false,
            ev_enabled: true,
            ev_on_change: true,
            ev_on_undef: true,
            lim_low_crash: f64::NAN,
            lim_low: f64::NAN,
            lim_high: f64::NAN,
            lim_high_crash: f64::NAN,
        }
    }

    fn evaluator(configs: Vec<InCnl>) -> ChannelEvaluator {
        let map = configs.into_iter().map(|c| (c.cnl_num, c)).collect();
        ChannelEvaluator::new(map, Calculator::new(), Snapshot::empty(1.0))
    }

    #[test]
    fn s1_write_threshold_event() {
        let mut cfg = channel(100, ChanType::Ts);
        cfg.lim_high = 50.0;
        let eval = evaluator(vec![cfg]);

        let r1 = Snapshot::new(1.0, vec![100], vec![ChanData::new(10.0, ChanStat::DEFINED)]);
        eval.process_current(&r1);
        let r2 = Snapshot::new(1.0001, vec![100], vec![ChanData::new(60.0, ChanStat::DEFINED)]);
        let events = eval.process_current(&r2);

        let snap = eval.current_snapshot();
        let data = snap.get(100).unwrap();
        assert_eq!(data.val, 60.0);
        assert_eq!(data.stat, ChanStat::HIGH);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new_stat, ChanStat::HIGH);
    }

    #[test]
    fn invariant3_no_formula_no_events_echoes_directly() {
        let mut cfg = channel(10, ChanType::Ts);
        cfg.ev_enabled = false;
        let eval = evaluator(vec![cfg]);
        let r = Snapshot::new(1.0, vec![10], vec![ChanData::new(42.0, ChanStat::DEFINED)]);
        let events = eval.process_current(&r);
        assert!(events.is_empty());
        let data = eval.current_snapshot().get(10).unwrap();
        assert_eq!(data.val, 42.0);
        assert_eq!(data.stat, ChanStat::DEFINED);
    }

    #[test]
    fn s5_formula_error_does_not_crash() {
        let mut cfg = channel(500, ChanType::Ts);
        cfg.formula_used = true;
        cfg.formula = "1/0".to_string();
        let mut configs = HashMap::new();
        configs.insert(cfg.cnl_num, cfg);
        let mut calc = Calculator::new();
        calc.compile_channel_formula(500, "1/0").unwrap();
        let eval = ChannelEvaluator::new(configs, calc, Snapshot::empty(1.0));

        let r = Snapshot::new(1.0, vec![500], vec![ChanData::new(7.0, ChanStat::DEFINED)]);
        eval.process_current(&r);
        let data = eval.current_snapshot().get(500).unwrap();
        assert_eq!(data.stat, ChanStat::FORMULA_ERROR);
        assert_eq!(data.val, 7.0, "raw value preserved on formula error");
    }

    #[test]
    fn inactivity_sweep_marks_unreliable_after_threshold() {
        let cfg = channel(400, ChanType::Ts);
        let eval = evaluator(vec![cfg]);
        let r = Snapshot::new(1.0, vec![400], vec![ChanData::new(5.0, ChanStat::DEFINED)]);
        eval.process_current(&r);
        // Force staleness by clearing last_active.
        eval.last_active.lock().clear();
        let events = eval.inactivity_sweep(1);
        let data = eval.current_snapshot().get(400).unwrap();
        assert_eq!(data.stat, ChanStat::UNRELIABLE);
        assert_eq!(events.len(), 1);
    }
}
