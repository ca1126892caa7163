use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::protocol::{Frame, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::bridge::{BridgeClient, BridgeHandle, FrameReader};
use crate::core::DaemonEvent;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const DAEMON_NAME: &str = "jukeboxd";

pub fn start_server(
    bind_address: String,
    port: u16,
    bridge: Arc<BridgeClient>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind bridge socket {}: {}", addr, e);
                return;
            }
        };

        info!("Bridge socket listening at {}", addr);

        let mut conn_id = 0u64;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    conn_id += 1;
                    info!("Bridge {} connected from {}", conn_id, peer);
                    let (read_half, write_half) = stream.into_split();
                    tokio::spawn(handle_bridge(
                        conn_id,
                        read_half,
                        write_half,
                        bridge.clone(),
                        event_tx.clone(),
                    ));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

/// Exchange hellos, then serve the connection until either side drops it.
pub async fn handle_bridge<R, W>(
    conn_id: u64,
    read_half: R,
    mut write_half: W,
    bridge: Arc<BridgeClient>,
    event_tx: mpsc::Sender<DaemonEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = FrameReader::new(read_half);

    let name = match tokio::time::timeout(HELLO_TIMEOUT, reader.next()).await {
        Ok(Ok(Some(Frame::Hello {
            protocol_version,
            name,
        }))) => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    "Bridge {} ({}) speaks protocol {}, expected {}",
                    conn_id, name, protocol_version, PROTOCOL_VERSION
                );
                return;
            }
            name
        }
        Ok(Ok(Some(other))) => {
            warn!("Bridge {} sent {:?} before hello", conn_id, other);
            return;
        }
        Ok(Ok(None)) => {
            info!("Bridge {} closed before hello", conn_id);
            return;
        }
        Ok(Err(e)) => {
            warn!("Bridge {} read error during hello: {}", conn_id, e);
            return;
        }
        Err(_) => {
            warn!("Bridge {} sent no hello within {:?}", conn_id, HELLO_TIMEOUT);
            return;
        }
    };

    let hello = Frame::Hello {
        protocol_version: PROTOCOL_VERSION,
        name: DAEMON_NAME.to_string(),
    };
    match hello.encode() {
        Ok(encoded) => {
            if write_half.write_all(&encoded).await.is_err() {
                return;
            }
        }
        Err(e) => {
            error!("Failed to encode hello: {}", e);
            return;
        }
    }

    let (handle, reader_task) = BridgeHandle::start(conn_id, reader, write_half, event_tx.clone());
    bridge.attach(handle).await;
    let _ = event_tx
        .send(DaemonEvent::BridgeConnected {
            conn_id,
            name: name.clone(),
        })
        .await;

    let _ = reader_task.await;

    if bridge.detach(conn_id).await {
        info!("Bridge {} ({}) disconnected", conn_id, name);
        let _ = event_tx
            .send(DaemonEvent::BridgeDisconnected { conn_id })
            .await;
    }
}
