//! `ModuleHost`: the live set of modules resolved for this server run, and
//! the panic-isolated dispatch of every lifecycle hook across them (spec
//! §4.7: "an exception raised by one module MUST be logged and swallowed,
//! never allowed to affect the engine or other modules").

use std::panic::{self, AssertUnwindSafe};

use chrono::NaiveDate;
use scada_common::{CnlNum, Role};
use scada_store::{Event, Snapshot};

use crate::error::ModuleError;
use crate::module::Module;

pub struct ModuleHost {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleHost {
    pub fn new(modules: Vec<Box<dyn Module>>) -> Self {
        Self { modules }
    }

    fn dispatch(&self, hook: &'static str, call: impl Fn(&dyn Module)) {
        for module in &self.modules {
            let name = module.name().to_string();
            let result = panic::catch_unwind(AssertUnwindSafe(|| call(module.as_ref())));
            if result.is_err() {
                let err = ModuleError::HookPanicked { module: name, hook };
                tracing::error!(%err, "module hook panicked");
            }
        }
    }

    pub fn on_server_start(&self) {
        self.dispatch("on_server_start", |m| m.on_server_start());
    }

    pub fn on_server_stop(&self) {
        self.dispatch("on_server_stop", |m| m.on_server_stop());
    }

    pub fn on_current_data_processed(&self, cnl_nums: &[CnlNum], current_snapshot: &Snapshot) {
        self.dispatch("on_current_data_processed", |m| {
            m.on_current_data_processed(cnl_nums, current_snapshot)
        });
    }

    pub fn on_current_data_calculated(&self, cnl_nums: &[CnlNum], current_snapshot: &Snapshot) {
        self.dispatch("on_current_data_calculated", |m| {
            m.on_current_data_calculated(cnl_nums, current_snapshot)
        });
    }

    pub fn on_archive_data_processed(&self, cnl_nums: &[CnlNum], archived_snapshot: &Snapshot) {
        self.dispatch("on_archive_data_processed", |m| {
            m.on_archive_data_processed(cnl_nums, archived_snapshot)
        });
    }

    pub fn on_event_creating(&self, event: &Event) {
        self.dispatch("on_event_creating", |m| m.on_event_creating(event));
    }

    pub fn on_event_created(&self, event: &Event) {
        self.dispatch("on_event_created", |m| m.on_event_created(event));
    }

    pub fn on_event_checked(&self, date: NaiveDate, ev_num: u32, user_id: u32) {
        self.dispatch("on_event_checked", |m| {
            m.on_event_checked(date, ev_num, user_id)
        });
    }

    /// Runs every module's `on_command_received` in registration order;
    /// `pass_to_clients` starts `true` and stays `true` unless some module
    /// clears it. A panicking module is treated as if it left the flag
    /// untouched.
    pub fn on_command_received(&self, ctrl_cnl_num: CnlNum, cmd: &[u8], user_id: u32) -> bool {
        let mut pass_to_clients = true;
        for module in &self.modules {
            let name = module.name().to_string();
            let mut local_pass = pass_to_clients;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                module.on_command_received(ctrl_cnl_num, cmd, user_id, &mut local_pass);
                local_pass
            }));
            match result {
                Ok(updated) => pass_to_clients = updated,
                Err(_) => {
                    let err = ModuleError::HookPanicked {
                        module: name,
                        hook: "on_command_received",
                    };
                    tracing::error!(%err, "module hook panicked");
                }
            }
        }
        pass_to_clients
    }

    /// Offers credentials to every module in order; the first to answer
    /// with `Some` wins. Falls through to `None` (defer to base `user.dat`)
    /// if no module claims the name, or all panic.
    pub fn validate_user(&self, name: &str, pw: &str) -> Option<(Role, bool)> {
        for module in &self.modules {
            let module_name = module.name().to_string();
            let result = panic::catch_unwind(AssertUnwindSafe(|| module.validate_user(name, pw)));
            match result {
                Ok(Some(answer)) => return Some(answer),
                Ok(None) => continue,
                Err(_) => {
                    let err = ModuleError::HookPanicked {
                        module: module_name,
                        hook: "validate_user",
                    };
                    tracing::error!(%err, "module hook panicked");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);
    impl Module for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn on_server_start(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;
    impl Module for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn on_server_start(&self) {
            panic!("boom");
        }
    }

    #[test]
    fn panicking_module_does_not_stop_later_modules() {
        let counter = Arc::new(AtomicUsize::new(0));
        let host = ModuleHost::new(vec![
            Box::new(Panicking),
            Box::new(Counting(counter.clone())),
        ]);
        host.on_server_start();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn command_flag_defaults_true_with_no_modules() {
        let host = ModuleHost::new(vec![]);
        assert!(host.on_command_received(1, &[], 0));
    }

    #[test]
    fn validate_user_falls_through_when_unclaimed() {
        let host = ModuleHost::new(vec![Box::new(Counting(Arc::new(AtomicUsize::new(0))))]);
        assert_eq!(host.validate_user("nobody", "pw"), None);
    }
}
