/// DaemonCore: the event loop every bridge connection feeds.
///
/// Inbound bridge events each run on their own task so a slow backend call
/// for one guild never holds up another.  Ordering within a guild is the
/// engine's job (panel render lock, registry lock), not this loop's.
use std::sync::Arc;

use jukebox_core::Jukebox;
use jukebox_proto::protocol::InboundEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// An event pushed by the bridge.
    Inbound(InboundEvent),
    BridgeConnected { conn_id: u64, name: String },
    /// The current bridge connection went away.
    BridgeDisconnected { conn_id: u64 },
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    jukebox: Arc<Jukebox>,
    reaper_cancel: CancellationToken,
    reaper_handle: Option<JoinHandle<()>>,
}

impl DaemonCore {
    pub fn new(jukebox: Arc<Jukebox>) -> Self {
        Self {
            jukebox,
            reaper_cancel: CancellationToken::new(),
            reaper_handle: None,
        }
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let reaper = Arc::new(self.jukebox.reaper());
        self.reaper_handle = Some(reaper.spawn(self.reaper_cancel.clone()));

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::Inbound(event)) => {
                    debug!("DaemonCore: inbound {:?}", event);
                    let jukebox = self.jukebox.clone();
                    tokio::spawn(async move {
                        jukebox.handle_event(event).await;
                    });
                }

                Some(DaemonEvent::BridgeConnected { conn_id, name }) => {
                    info!("DaemonCore: bridge {} ({}) is now current", conn_id, name);
                }

                Some(DaemonEvent::BridgeDisconnected { conn_id }) => {
                    warn!(
                        "DaemonCore: bridge {} gone, stopping panels until it returns",
                        conn_id
                    );
                    self.jukebox.stop_all().await;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.reaper_cancel.cancel();
        if let Some(handle) = self.reaper_handle.take() {
            let _ = handle.await;
        }
        self.jukebox.stop_all().await;
        info!("DaemonCore: stopped");
    }
}
