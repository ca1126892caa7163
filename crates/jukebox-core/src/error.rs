use jukebox_proto::model::GuildId;
use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no player exists for guild {0}")]
    NoPlayer(GuildId),
    #[error("playback backend unavailable: {0}")]
    Unavailable(String),
    #[error("playback backend call failed: {0}")]
    Failed(String),
}

impl BackendError {
    /// The session or the whole backend is gone; retrying is pointless.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendError::NoPlayer(_) | BackendError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("message no longer exists")]
    NotFound,
    #[error("transport authorization expired")]
    Unauthorized,
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("transport call failed: {0}")]
    Failed(String),
}

impl TransportError {
    /// Target gone, token expired or no transport at all.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::NotFound | TransportError::Unauthorized | TransportError::Unavailable(_)
        )
    }
}

/// Why a user-triggered operation was refused or failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("actor may not use these controls")]
    PermissionDenied,
    #[error("nothing is currently playing")]
    NothingPlaying,
    #[error("panel or browser is no longer active")]
    Closed,
    #[error("volume must be between 1 and {max}")]
    VolumeOutOfRange { max: u32 },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub const GENERIC_FAILURE: &str = "❌ Something went wrong. Please try again.";

impl ActionError {
    /// Text shown privately to the actor.  Internal failures never leak their
    /// description.
    pub fn notice(&self) -> String {
        match self {
            ActionError::PermissionDenied => {
                "You do not have permission to use these controls.".to_string()
            }
            ActionError::NothingPlaying => "Nothing is currently playing.".to_string(),
            ActionError::Closed => "This menu is no longer active.".to_string(),
            ActionError::VolumeOutOfRange { max } => {
                format!("Volume must be between 1 and {}.", max)
            }
            ActionError::Backend(_) | ActionError::Transport(_) => GENERIC_FAILURE.to_string(),
        }
    }

    /// True when the owning controller must stop.
    pub fn is_terminal(&self) -> bool {
        match self {
            ActionError::Backend(e) => e.is_terminal(),
            ActionError::Transport(e) => e.is_terminal(),
            ActionError::Closed => true,
            ActionError::PermissionDenied
            | ActionError::NothingPlaying
            | ActionError::VolumeOutOfRange { .. } => false,
        }
    }
}
