use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::display::{ControlId, Document, PanelView};
use crate::model::{ChannelId, GuildId, MessageRef, UserId};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Both ends exchange it in `Hello` and the daemon refuses
/// bridges that speak a different version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Operations the daemon asks the bridge to perform.  The first group is the
/// playback backend, the second the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    PlayerState { guild_id: GuildId },
    Settings { guild_id: GuildId },
    Play {
        guild_id: GuildId,
        channel_id: ChannelId,
        requester: UserId,
        query: String,
    },
    SetPaused { guild_id: GuildId, paused: bool },
    Stop { guild_id: GuildId },
    Seek { guild_id: GuildId, position_ms: u64 },
    Skip { guild_id: GuildId },
    ToggleShuffle { guild_id: GuildId },
    ToggleRepeat { guild_id: GuildId },
    ShuffleQueue { guild_id: GuildId },
    SetVolume { guild_id: GuildId, volume: u32 },
    Disconnect { guild_id: GuildId },
    /// Delegated "can bypass queue permissions" capability check.
    CanBypass { guild_id: GuildId, user_id: UserId },

    SendMessage { channel_id: ChannelId, view: PanelView },
    EditMessage { message: MessageRef, view: PanelView },
    DeleteMessage { message: MessageRef },
    MessageExists { message: MessageRef },
    Notify { notice: Notice },
    VoiceConnected { guild_id: GuildId },
    ForceDisconnect { guild_id: GuildId },
}

/// Error classes the bridge can report.  The daemon maps these onto its
/// terminal / transient taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Unauthorized,
    Forbidden,
    NoPlayer,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResult {
    Ok {
        #[serde(default)]
        data: Value,
    },
    Err {
        code: ErrorCode,
        #[serde(default)]
        message: String,
    },
}

/// A reply addressed to the user who triggered something.  Ephemeral notices
/// are only visible to that user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub ephemeral: bool,
    pub body: NoticeBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NoticeBody {
    Text(String),
    Document(Document),
}

/// Who invoked something and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    /// Slash-style invocations are answered ephemerally.
    #[serde(default)]
    pub slash: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ChatCommand {
    Play { query: String },
    NowPlaying,
    Queue,
    Skip,
    /// Toggles between paused and playing.
    Pause,
    Stop,
    Shuffle,
    Repeat,
    Volume { value: u32 },
}

/// Structured kind of a backend-originated notification, when the bridge
/// can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TrackStarted,
    TrackEnqueued,
    TrackAdded,
    Paused,
    Resumed,
    Skipped,
    VolumeChanged,
}

/// A plain notification message the backend posted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackendNotice {
    #[serde(default)]
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// User who caused the notification, if known.
    #[serde(default)]
    pub requester: Option<UserId>,
}

/// Events the bridge pushes to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    Command {
        invocation: Invocation,
        command: ChatCommand,
    },
    Control {
        invocation: Invocation,
        message: MessageRef,
        control: ControlId,
    },
    Notification {
        guild_id: GuildId,
        channel_id: ChannelId,
        message: MessageRef,
        notice: BackendNotice,
    },
    /// The transport dropped the controls of a message on its own (view timeout).
    ControlsDetached { message: MessageRef },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Hello { protocol_version: u32, name: String },
    Request { id: u64, call: Call },
    Response { id: u64, result: CallResult },
    Event { event: InboundEvent },
}

impl Frame {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for frame");
        }
        let frame: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((frame, 4 + len))
    }
}
