//! Shared data model: identifiers, tracks, player snapshots and per-guild settings.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake_id!(
    /// One voice-playback context (a room / guild).  Doubles as the session id.
    GuildId
);
snowflake_id!(UserId);
snowflake_id!(ChannelId);
snowflake_id!(MessageId);

/// Address of a message the transport has displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Track {
    /// Stable backend identifier, used for change detection.
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub uri: Option<String>,
    /// Length in milliseconds.  Meaningless for streams.
    #[serde(default)]
    pub length_ms: u64,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Display string for whoever enqueued the track.  Resolved by the bridge at
    /// enqueue time and never re-resolved here.
    #[serde(default)]
    pub requester: Option<String>,
}

impl Track {
    /// "Author - Title" when the author is known, otherwise the bare title.
    pub fn description(&self) -> String {
        let title = self.title.trim();
        let author = self.author.trim();
        match (author.is_empty(), title.is_empty()) {
            (_, true) => "Unknown".to_string(),
            (true, false) => title.to_string(),
            (false, false) => format!("{} - {}", author, title),
        }
    }
}

/// Point-in-time view of a guild's player as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub current: Option<Track>,
    #[serde(default)]
    pub position_ms: u64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub queue: Vec<Track>,
    /// Whether the backend player is attached to a voice channel.
    #[serde(default)]
    pub connected: bool,
}

impl PlayerSnapshot {
    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }
}

/// Per-guild settings read through the bridge's config accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub auto_play: bool,
    #[serde(default = "default_volume")]
    pub volume: u32,
    #[serde(default = "default_thumbnail")]
    pub thumbnail: bool,
}

fn default_volume() -> u32 {
    100
}

fn default_thumbnail() -> bool {
    true
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            repeat: false,
            shuffle: false,
            auto_play: false,
            volume: default_volume(),
            thumbnail: default_thumbnail(),
        }
    }
}
