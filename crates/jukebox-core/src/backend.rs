//! Playback backend seam.  The engine only ever reads player state and asks
//! for mutations through this trait; it never decodes, resolves or reorders
//! anything itself.

use async_trait::async_trait;
use jukebox_proto::model::{ChannelId, GuildId, GuildSettings, PlayerSnapshot, UserId};

use crate::error::BackendResult;

#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Current player state.  `Err(NoPlayer)` once the session is gone.
    async fn player(&self, guild: GuildId) -> BackendResult<PlayerSnapshot>;

    async fn settings(&self, guild: GuildId) -> BackendResult<GuildSettings>;

    /// Resolve `query` and play it or append it to the queue.
    async fn play(
        &self,
        guild: GuildId,
        channel: ChannelId,
        requester: UserId,
        query: &str,
    ) -> BackendResult<()>;

    async fn set_paused(&self, guild: GuildId, paused: bool) -> BackendResult<()>;

    async fn stop(&self, guild: GuildId) -> BackendResult<()>;

    async fn seek(&self, guild: GuildId, position_ms: u64) -> BackendResult<()>;

    async fn skip(&self, guild: GuildId) -> BackendResult<()>;

    async fn toggle_shuffle(&self, guild: GuildId) -> BackendResult<()>;

    async fn toggle_repeat(&self, guild: GuildId) -> BackendResult<()>;

    /// Reorder the pending queue once.
    async fn shuffle_queue(&self, guild: GuildId) -> BackendResult<()>;

    async fn set_volume(&self, guild: GuildId, volume: u32) -> BackendResult<()>;

    async fn disconnect(&self, guild: GuildId) -> BackendResult<()>;

    /// The "can bypass queue permissions" capability.
    async fn can_bypass(&self, guild: GuildId, user: UserId) -> BackendResult<bool>;
}
