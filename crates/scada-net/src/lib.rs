//! TCP protocol framing/dispatch (component H) and the scheduler (component
//! G) that drives the engine from wall-clock cadence (spec §4.6, §4.8). The
//! binary entry point lives in `main.rs`.

pub mod commands;
pub mod context;
pub mod error;
pub mod files;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod status;

pub use context::{RunState, ServerState};
pub use error::{ProtocolError, ServerError};
pub use files::DirectoryRoots;
pub use scheduler::{CadenceKind, SchedulerConfig, SchedulerHandle};
pub use server::Server;
pub use session::Session;
pub use status::APP_VERSION;
