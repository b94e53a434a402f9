//! Human-readable status file, written every scheduler tick (spec §6 "State/
//! log files"): start time, uptime, state label, version, connected clients.

use std::path::Path;

use crate::context::ServerState;

pub const APP_VERSION: u16 = 0x0100;

pub fn write_status(path: &Path, state: &ServerState) -> std::io::Result<()> {
    let uptime = state.start_time.elapsed();
    let clients = state.connected_clients.read();
    let body = format!(
        "state: {}\nversion: {}.{}\nuptime_secs: {}\nconnected_clients: {}\n{}",
        state.run_state().label(),
        APP_VERSION >> 8,
        APP_VERSION & 0xFF,
        uptime.as_secs(),
        clients.len(),
        clients.iter().map(|c| format!("  - {c}\n")).collect::<String>(),
    );
    scada_store::codec::atomic_write(path, body.as_bytes()).map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}
