//! TCP server (spec §4.8, §4.8.1): accept loop plus a per-connection task.
//! Grounded on `data-bridge-kv-server/src/server.rs`'s accept/dispatch shape.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::context::ServerState;
use crate::protocol::{self, Command};
use crate::session::{Session, IDLE_DISCONNECT};

pub struct Server {
    state: Arc<ServerState>,
    app_version: u16,
}

impl Server {
    pub fn new(state: Arc<ServerState>, app_version: u16) -> Self {
        Self { state, app_version }
    }

    pub async fn run(&self, addr: SocketAddr) -> Result<(), crate::error::ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| crate::error::ServerError::Bind { addr, source })?;
        info!(%addr, "scada-net listening");

        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };
            let state = self.state.clone();
            let app_version = self.app_version;
            tokio::spawn(async move {
                debug!(%peer_addr, "client connected");
                if let Err(err) = handle_connection(socket, state, app_version).await {
                    debug!(%peer_addr, %err, "connection closed");
                }
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    state: Arc<ServerState>,
    app_version: u16,
) -> std::io::Result<()> {
    socket.set_nodelay(true)?;
    socket.write_all(&protocol::banner(app_version)).await?;

    let mut session = Session::new();

    loop {
        let cmd_byte = match tokio::time::timeout(IDLE_DISCONNECT, socket.read_u8()).await {
            Ok(Ok(b)) => b,
            Ok(Err(_)) => return Ok(()),
            Err(_) => {
                debug!("client idle past timeout, disconnecting");
                return Ok(());
            }
        };
        session.touch();

        let width = protocol::length_field_width(cmd_byte);
        let payload_len = if width == 4 {
            socket.read_u32_le().await? as usize
        } else {
            socket.read_u16_le().await? as usize
        };
        if payload_len as u32 > protocol::MAX_PAYLOAD_SIZE {
            warn!(payload_len, "oversized frame, dropping connection");
            return Ok(());
        }
        let mut payload = vec![0u8; payload_len];
        socket.read_exact(&mut payload).await?;

        let response = match Command::try_from(cmd_byte) {
            Ok(cmd) => match crate::commands::dispatch(cmd, &payload, &mut session, &state) {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(%err, "malformed frame payload, keeping connection");
                    vec![0u8]
                }
            },
            Err(err) => {
                warn!(%err, "unknown command byte, keeping connection");
                continue;
            }
        };

        socket.write_all(&protocol::encode_frame(cmd_byte, &response)).await?;
    }
}
