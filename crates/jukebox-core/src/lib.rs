pub mod actions;
pub mod backend;
pub mod dispatch;
pub mod error;
pub mod notice;
pub mod panel;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod render;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::PlaybackBackend;
pub use dispatch::{Jukebox, SessionSummary};
pub use error::{ActionError, BackendError, TransportError};
pub use reaper::IdleReaper;
pub use transport::Transport;
