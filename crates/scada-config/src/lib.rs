//! Configuration loader (component J): reads the channel/user/formula base
//! and the settings XML at startup (spec §4, §6). Read-only, reread only on
//! restart — there is no hot-reload path (spec §1's non-goals).

pub mod base;
pub mod error;
pub mod settings;

pub use base::{load_ctrlcnl, load_formulas, load_incnl, load_users, AuxFormula, User};
pub use error::{ConfigError, Result};
pub use settings::{load_settings, Flags, Modules, Network, Paths, Periods, Retention, Settings};
