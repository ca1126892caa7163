//! Playback actions shared by panel controls and chat commands.
//!
//! Every action checks that something is playing, delegates the mutation to
//! the backend and describes the result.  Nothing here touches the transport.

use jukebox_proto::config::PanelConfig;
use jukebox_proto::display::{ControlId, Document};
use jukebox_proto::model::{GuildId, PlayerSnapshot};
use tracing::debug;

use crate::backend::PlaybackBackend;
use crate::error::{ActionError, BackendError};
use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ToggleRepeat,
    ToggleShuffle,
    RestartTrack,
    Stop,
    TogglePause,
    Skip,
    VolumeUp,
    VolumeDown,
    SetVolume(u32),
}

impl ActionKind {
    /// The action behind a now-playing control.  Queue controls have none.
    pub fn from_control(control: ControlId) -> Option<Self> {
        match control {
            ControlId::Restart => Some(ActionKind::RestartTrack),
            ControlId::Stop => Some(ActionKind::Stop),
            ControlId::PlayPause => Some(ActionKind::TogglePause),
            ControlId::Skip => Some(ActionKind::Skip),
            ControlId::Repeat => Some(ActionKind::ToggleRepeat),
            ControlId::Shuffle => Some(ActionKind::ToggleShuffle),
            ControlId::VolumeUp => Some(ActionKind::VolumeUp),
            ControlId::VolumeDown => Some(ActionKind::VolumeDown),
            ControlId::PrevPage
            | ControlId::NextPage
            | ControlId::ShuffleQueue
            | ControlId::CloseQueue => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// Short confirmation for the actor.
    pub confirmation: String,
    /// Richer summary document, when the action has one (skip).
    pub summary: Option<Document>,
    /// Playback was stopped outright; the panel has nothing left to show.
    pub ends_playback: bool,
}

impl ActionOutcome {
    fn confirm(text: impl Into<String>) -> Self {
        Self {
            confirmation: text.into(),
            summary: None,
            ends_playback: false,
        }
    }
}

/// Snapshot of a session that must currently be playing something.
async fn playing_snapshot(
    backend: &dyn PlaybackBackend,
    guild: GuildId,
) -> Result<PlayerSnapshot, ActionError> {
    let snapshot = match backend.player(guild).await {
        Ok(snapshot) => snapshot,
        Err(BackendError::NoPlayer(_)) => return Err(ActionError::NothingPlaying),
        Err(e) => return Err(e.into()),
    };
    if !snapshot.is_playing() {
        return Err(ActionError::NothingPlaying);
    }
    Ok(snapshot)
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}

pub async fn perform(
    backend: &dyn PlaybackBackend,
    guild: GuildId,
    kind: ActionKind,
    config: &PanelConfig,
) -> Result<ActionOutcome, ActionError> {
    if let ActionKind::SetVolume(value) = kind {
        if value == 0 || value > config.max_volume {
            return Err(ActionError::VolumeOutOfRange {
                max: config.max_volume,
            });
        }
    }

    let snapshot = playing_snapshot(backend, guild).await?;
    debug!("guild {}: performing {:?}", guild, kind);

    let outcome = match kind {
        ActionKind::ToggleRepeat => {
            backend.toggle_repeat(guild).await?;
            let settings = backend.settings(guild).await?;
            ActionOutcome::confirm(format!("🔄 Repeat mode {}", enabled(settings.repeat)))
        }
        ActionKind::ToggleShuffle => {
            backend.toggle_shuffle(guild).await?;
            let settings = backend.settings(guild).await?;
            ActionOutcome::confirm(format!("🔀 Shuffle mode {}", enabled(settings.shuffle)))
        }
        ActionKind::RestartTrack => {
            backend.seek(guild, 0).await?;
            ActionOutcome::confirm("⏮️ Restarted the current track")
        }
        ActionKind::Stop => {
            backend.stop(guild).await?;
            ActionOutcome {
                confirmation: "⏹️ Playback stopped".to_string(),
                summary: None,
                ends_playback: true,
            }
        }
        ActionKind::TogglePause => {
            let pause = !snapshot.paused;
            backend.set_paused(guild, pause).await?;
            ActionOutcome::confirm(if pause {
                "⏸️ Playback paused!"
            } else {
                "▶️ Playback resumed!"
            })
        }
        ActionKind::Skip => {
            backend.skip(guild).await?;
            let next = match backend.player(guild).await {
                Ok(after) => after.current,
                Err(BackendError::NoPlayer(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let skipped = snapshot.current.as_ref().map(|t| t.description()).unwrap_or_default();
            let summary = snapshot
                .current
                .as_ref()
                .map(|current| render::skipped(current, next.as_ref()));
            ActionOutcome {
                confirmation: format!("⏭️ Skipped **{}**", skipped),
                summary,
                ends_playback: false,
            }
        }
        ActionKind::VolumeUp => {
            let settings = backend.settings(guild).await?;
            let volume = settings
                .volume
                .saturating_add(config.volume_step)
                .min(config.max_volume);
            backend.set_volume(guild, volume).await?;
            ActionOutcome::confirm(format!("🔊 Volume increased to {}%", volume))
        }
        ActionKind::VolumeDown => {
            let settings = backend.settings(guild).await?;
            let volume = settings
                .volume
                .saturating_sub(config.volume_step)
                .min(config.max_volume);
            backend.set_volume(guild, volume).await?;
            ActionOutcome::confirm(format!("🔉 Volume decreased to {}%", volume))
        }
        ActionKind::SetVolume(value) => {
            backend.set_volume(guild, value).await?;
            ActionOutcome::confirm(format!("🔊 Volume set to {}%", value))
        }
    };

    Ok(outcome)
}
