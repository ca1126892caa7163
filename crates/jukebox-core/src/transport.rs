//! Chat transport seam: displaying, editing and deleting messages, private
//! replies, and voice-level connection state.

use async_trait::async_trait;
use jukebox_proto::display::PanelView;
use jukebox_proto::model::{ChannelId, GuildId, MessageRef};
use jukebox_proto::protocol::Notice;

use crate::error::TransportResult;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, channel: ChannelId, view: &PanelView) -> TransportResult<MessageRef>;

    async fn edit(&self, message: MessageRef, view: &PanelView) -> TransportResult<()>;

    async fn delete(&self, message: MessageRef) -> TransportResult<()>;

    /// Fetch-by-id existence probe.
    async fn exists(&self, message: MessageRef) -> TransportResult<bool>;

    async fn notify(&self, notice: &Notice) -> TransportResult<()>;

    /// Whether the transport still holds a voice connection for the guild.
    async fn voice_connected(&self, guild: GuildId) -> TransportResult<bool>;

    async fn force_disconnect(&self, guild: GuildId) -> TransportResult<()>;
}
