//! The `Module` trait (spec §4.7): lifecycle hooks a plug-in exposes. Every
//! hook has a no-op default so a module only overrides what it cares about.
//!
//! Spec §4.7.1 records why this is an in-process trait-object registry
//! rather than a `dlopen`'d shared library: no dynamic-loading crate
//! (`libloading` or similar) appears anywhere in the retrieved pack.

use chrono::NaiveDate;
use scada_common::{CnlNum, Role};
use scada_store::{Event, Snapshot};

/// An external component hooked into the server's lifecycle. `Send` because
/// hooks may run from either the TCP dispatch tasks or the scheduler thread
/// (spec §5: "module hook calls execute on whichever thread invoked them").
pub trait Module: Send {
    fn name(&self) -> &str;

    fn on_server_start(&self) {}
    fn on_server_stop(&self) {}

    fn on_current_data_processed(&self, _cnl_nums: &[CnlNum], _current_snapshot: &Snapshot) {}
    fn on_current_data_calculated(&self, _cnl_nums: &[CnlNum], _current_snapshot: &Snapshot) {}
    fn on_archive_data_processed(&self, _cnl_nums: &[CnlNum], _archived_snapshot: &Snapshot) {}

    fn on_event_creating(&self, _event: &Event) {}
    fn on_event_created(&self, _event: &Event) {}
    fn on_event_checked(&self, _date: NaiveDate, _ev_num: u32, _user_id: u32) {}

    /// `pass_to_clients` lets a module suppress broadcast of a command it
    /// has already handled itself (spec §4.7).
    fn on_command_received(
        &self,
        _ctrl_cnl_num: CnlNum,
        _cmd: &[u8],
        _user_id: u32,
        _pass_to_clients: &mut bool,
    ) {
    }

    /// `Some((role, handled))` to short-circuit authentication; `None` to
    /// defer to the base `user.dat` lookup (spec §4.7).
    fn validate_user(&self, _name: &str, _pw: &str) -> Option<(Role, bool)> {
        None
    }
}
