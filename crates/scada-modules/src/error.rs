//! Module host errors (spec §7: `ModuleError` — logged and swallowed, never
//! propagated to the scheduler or to other modules).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("module '{module}' is not registered (listed in settings but never linked in)")]
    NotRegistered { module: String },

    #[error("module '{module}' panicked in hook '{hook}'")]
    HookPanicked { module: String, hook: &'static str },
}
