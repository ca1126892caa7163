//! Idle reaper: disconnects sessions that have sat idle with nothing playing.

use std::sync::Arc;

use jukebox_proto::config::ReaperConfig;
use jukebox_proto::model::GuildId;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::PlaybackBackend;
use crate::error::{BackendError, TransportError};
use crate::panel::PanelSlots;
use crate::registry::SharedRegistry;
use crate::transport::Transport;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub reaped: Vec<GuildId>,
    pub failed: Vec<GuildId>,
}

pub struct IdleReaper {
    backend: Arc<dyn PlaybackBackend>,
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    slots: Arc<PanelSlots>,
    config: ReaperConfig,
}

impl IdleReaper {
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        transport: Arc<dyn Transport>,
        registry: SharedRegistry,
        slots: Arc<PanelSlots>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            backend,
            transport,
            registry,
            slots,
            config,
        }
    }

    /// One pass over a snapshot of the registry.  A failure on one session
    /// never stops the pass.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let ids = self.registry.read().await.session_ids();
        let mut report = SweepReport {
            examined: ids.len(),
            ..Default::default()
        };

        for guild in ids {
            match self.reap_if_idle(guild, now).await {
                Ok(true) => report.reaped.push(guild),
                Ok(false) => {}
                Err(e) => {
                    warn!("guild {}: idle check failed: {}", guild, e);
                    report.failed.push(guild);
                }
            }
        }
        report
    }

    async fn reap_if_idle(&self, guild: GuildId, now: Instant) -> Result<bool, BackendError> {
        // Evicted since the snapshot was taken.
        let Some(since) = self.registry.read().await.get(guild).map(|e| e.last_activity) else {
            return Ok(false);
        };
        let idle = now.saturating_duration_since(since);
        if idle <= self.config.idle_threshold() {
            return Ok(false);
        }

        let player = match self.backend.player(guild).await {
            Ok(snapshot) => Some(snapshot),
            Err(BackendError::NoPlayer(_)) => None,
            Err(e) => return Err(e),
        };
        if player.as_ref().is_some_and(|p| p.is_playing()) {
            return Ok(false);
        }

        {
            // Held across the disconnect so no touch lands between check and teardown.
            let registry = self.registry.write().await;
            if !registry.idle_since(guild, since) {
                debug!("guild {}: activity during idle check, keeping session", guild);
                return Ok(false);
            }

            info!(
                "guild {}: idle for {}s with nothing playing, disconnecting",
                guild,
                idle.as_secs()
            );

            if player.is_some() {
                if let Err(e) = self.backend.disconnect(guild).await {
                    warn!("guild {}: backend disconnect failed: {}", guild, e);
                }
            }
        }

        match self.transport.voice_connected(guild).await {
            Ok(true) => {
                if let Err(e) = self.transport.force_disconnect(guild).await {
                    warn!("guild {}: forced voice disconnect failed: {}", guild, e);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("guild {}: voice state unknown: {}", guild, e),
        }

        let panel = {
            let registry = self.registry.read().await;
            if !registry.idle_since(guild, since) {
                debug!("guild {}: activity after disconnect, keeping panel", guild);
                return Ok(false);
            }
            registry.panel(guild)
        };

        if let Some(controller) = self.slots.remove(guild).await {
            controller.stop().await;
        }

        if let Some(message) = panel {
            match self.transport.delete(message).await {
                Ok(()) | Err(TransportError::NotFound) => {}
                Err(e) => warn!("guild {}: panel {} not deleted: {}", guild, message, e),
            }
        }

        if self
            .registry
            .write()
            .await
            .evict_if_idle_since(guild, since)
            .is_none()
        {
            debug!("guild {}: activity during cleanup, session kept", guild);
            return Ok(false);
        }
        Ok(true)
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.sweep_interval();
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "idle reaper running every {}s, threshold {}s",
                period.as_secs(),
                self.config.idle_threshold_secs
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep(Instant::now()).await;
                        if !report.reaped.is_empty() {
                            info!("idle reaper cleaned up {} session(s)", report.reaped.len());
                        }
                    }
                }
            }
            debug!("idle reaper stopped");
        })
    }
}
