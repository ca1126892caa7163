use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jukebox_proto::model::{GuildId, MessageRef};
use tokio::sync::RwLock;
use tokio::time::Instant;

pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Monotonic time of the last user-triggered control action.
    pub last_activity: Instant,
    /// Wall-clock twin of `last_activity`, for status reporting only.
    pub last_activity_at: DateTime<Utc>,
    /// The one panel message this session currently displays.
    pub panel: Option<MessageRef>,
}

impl SessionEntry {
    fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            last_activity_at: Utc::now(),
            panel: None,
        }
    }
}

/// Per-guild activity and panel bookkeeping.  Owned by the top-level engine and
/// handed out as `SharedRegistry`; nothing in here performs I/O.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<GuildId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record activity, creating the session on first sight.  Returns true when
    /// the session was created.
    pub fn touch(&mut self, guild: GuildId, now: Instant) -> bool {
        match self.sessions.entry(guild) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.last_activity = now;
                entry.last_activity_at = Utc::now();
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry::new(now));
                true
            }
        }
    }

    /// Point the session at a new panel message.  Returns the superseded
    /// reference when it differs, so the caller can clean it up.
    pub fn attach_panel(
        &mut self,
        guild: GuildId,
        message: MessageRef,
        now: Instant,
    ) -> Option<MessageRef> {
        let entry = self
            .sessions
            .entry(guild)
            .or_insert_with(|| SessionEntry::new(now));
        let previous = entry.panel.replace(message);
        previous.filter(|old| *old != message)
    }

    /// Forget the panel reference, but only if it still points at `message`.
    pub fn detach_panel(&mut self, guild: GuildId, message: MessageRef) -> bool {
        let Some(entry) = self.sessions.get_mut(&guild) else {
            return false;
        };
        if entry.panel == Some(message) {
            entry.panel = None;
            true
        } else {
            false
        }
    }

    pub fn panel(&self, guild: GuildId) -> Option<MessageRef> {
        self.sessions.get(&guild).and_then(|entry| entry.panel)
    }

    pub fn get(&self, guild: GuildId) -> Option<&SessionEntry> {
        self.sessions.get(&guild)
    }

    pub fn idle_for(&self, guild: GuildId, now: Instant) -> Option<Duration> {
        self.sessions
            .get(&guild)
            .map(|entry| now.saturating_duration_since(entry.last_activity))
    }

    pub fn evict(&mut self, guild: GuildId) -> Option<SessionEntry> {
        self.sessions.remove(&guild)
    }

    /// True while the session exists and has seen no activity after `since`.
    pub fn idle_since(&self, guild: GuildId, since: Instant) -> bool {
        self.sessions
            .get(&guild)
            .is_some_and(|entry| entry.last_activity <= since)
    }

    /// Evict only if nothing touched the session after `since`.
    pub fn evict_if_idle_since(&mut self, guild: GuildId, since: Instant) -> Option<SessionEntry> {
        if !self.idle_since(guild, since) {
            return None;
        }
        self.sessions.remove(&guild)
    }

    /// Snapshot of the key set.  Callers iterate this instead of the map so
    /// concurrent inserts/evictions never invalidate the traversal.
    pub fn session_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn entries(&self) -> Vec<(GuildId, SessionEntry)> {
        let mut entries: Vec<(GuildId, SessionEntry)> = self
            .sessions
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
