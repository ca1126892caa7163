//! In-memory collaborators for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jukebox_proto::display::PanelView;
use jukebox_proto::model::{
    ChannelId, GuildId, GuildSettings, MessageId, MessageRef, PlayerSnapshot, Track, UserId,
};
use jukebox_proto::protocol::Notice;

use crate::backend::PlaybackBackend;
use crate::error::{BackendError, BackendResult, TransportError, TransportResult};
use crate::transport::Transport;

pub fn track(title: &str) -> Track {
    Track {
        identifier: format!("id:{}", title),
        title: title.to_string(),
        length_ms: 180_000,
        ..Default::default()
    }
}

pub fn tracks(count: usize) -> Vec<Track> {
    (1..=count).map(|i| track(&format!("Track {}", i))).collect()
}

#[derive(Default)]
struct BackendState {
    players: HashMap<GuildId, PlayerSnapshot>,
    settings: HashMap<GuildId, GuildSettings>,
    bypass: HashSet<UserId>,
    calls: Vec<String>,
    fail_next: Option<BackendError>,
    player_delays: VecDeque<Duration>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        let mut state = self.state.lock().expect("backend state");
        f(&mut state)
    }

    pub fn set_player(&self, guild: GuildId, snapshot: PlayerSnapshot) {
        self.with(|s| {
            s.players.insert(guild, snapshot);
        });
    }

    pub fn play_now(&self, guild: GuildId, track: Track) {
        self.with(|s| {
            let player = s.players.entry(guild).or_default();
            player.current = Some(track);
            player.connected = true;
        });
    }

    pub fn enqueue(&self, guild: GuildId, track: Track) {
        self.with(|s| s.players.entry(guild).or_default().queue.push(track));
    }

    pub fn set_paused_directly(&self, guild: GuildId, paused: bool) {
        self.with(|s| {
            if let Some(player) = s.players.get_mut(&guild) {
                player.paused = paused;
            }
        });
    }

    pub fn remove_player(&self, guild: GuildId) {
        self.with(|s| {
            s.players.remove(&guild);
        });
    }

    pub fn snapshot_of(&self, guild: GuildId) -> Option<PlayerSnapshot> {
        self.with(|s| s.players.get(&guild).cloned())
    }

    pub fn settings_of(&self, guild: GuildId) -> GuildSettings {
        self.with(|s| s.settings.get(&guild).cloned().unwrap_or_default())
    }

    pub fn grant_bypass(&self, user: UserId) {
        self.with(|s| {
            s.bypass.insert(user);
        });
    }

    pub fn fail_next(&self, error: BackendError) {
        self.with(|s| s.fail_next = Some(error));
    }

    /// The next `player` read answers only after `delay`, with the state
    /// as it was when the call was made.
    pub fn delay_next_player(&self, delay: Duration) {
        self.with(|s| s.player_delays.push_back(delay));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Calls that change backend state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c.as_str(), "player" | "settings" | "can_bypass"))
            .collect()
    }

    fn read(&self, guild: GuildId, call: &str) -> BackendResult<PlayerSnapshot> {
        self.with(|s| {
            s.calls.push(call.to_string());
            s.players.get(&guild).cloned().ok_or(BackendError::NoPlayer(guild))
        })
    }

    fn mutate<R>(
        &self,
        guild: GuildId,
        call: String,
        f: impl FnOnce(&mut PlayerSnapshot, &mut GuildSettings) -> R,
    ) -> BackendResult<R> {
        self.with(|s| {
            if let Some(err) = s.fail_next.take() {
                return Err(err);
            }
            s.calls.push(call);
            let settings = s.settings.entry(guild).or_default();
            let player = s.players.get_mut(&guild).ok_or(BackendError::NoPlayer(guild))?;
            Ok(f(player, settings))
        })
    }
}

#[async_trait]
impl PlaybackBackend for FakeBackend {
    async fn player(&self, guild: GuildId) -> BackendResult<PlayerSnapshot> {
        let delay = self.with(|s| s.player_delays.pop_front());
        let snapshot = self.read(guild, "player");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        snapshot
    }

    async fn settings(&self, guild: GuildId) -> BackendResult<GuildSettings> {
        Ok(self.with(|s| {
            s.calls.push("settings".to_string());
            s.settings.get(&guild).cloned().unwrap_or_default()
        }))
    }

    async fn play(
        &self,
        guild: GuildId,
        _channel: ChannelId,
        _requester: UserId,
        query: &str,
    ) -> BackendResult<()> {
        self.with(|s| {
            if let Some(err) = s.fail_next.take() {
                return Err(err);
            }
            s.calls.push(format!("play:{}", query));
            let player = s.players.entry(guild).or_default();
            player.connected = true;
            if player.current.is_none() {
                player.current = Some(track(query));
            } else {
                player.queue.push(track(query));
            }
            Ok(())
        })
    }

    async fn set_paused(&self, guild: GuildId, paused: bool) -> BackendResult<()> {
        self.mutate(guild, format!("set_paused:{}", paused), |p, _| p.paused = paused)
    }

    async fn stop(&self, guild: GuildId) -> BackendResult<()> {
        self.mutate(guild, "stop".into(), |p, _| {
            p.current = None;
            p.queue.clear();
        })
    }

    async fn seek(&self, guild: GuildId, position_ms: u64) -> BackendResult<()> {
        self.mutate(guild, format!("seek:{}", position_ms), |p, _| {
            p.position_ms = position_ms
        })
    }

    async fn skip(&self, guild: GuildId) -> BackendResult<()> {
        self.mutate(guild, "skip".into(), |p, _| {
            p.current = if p.queue.is_empty() {
                None
            } else {
                Some(p.queue.remove(0))
            };
        })
    }

    async fn toggle_shuffle(&self, guild: GuildId) -> BackendResult<()> {
        self.mutate(guild, "toggle_shuffle".into(), |_, s| s.shuffle = !s.shuffle)
    }

    async fn toggle_repeat(&self, guild: GuildId) -> BackendResult<()> {
        self.mutate(guild, "toggle_repeat".into(), |_, s| s.repeat = !s.repeat)
    }

    async fn shuffle_queue(&self, guild: GuildId) -> BackendResult<()> {
        self.mutate(guild, "shuffle_queue".into(), |p, _| p.queue.reverse())
    }

    async fn set_volume(&self, guild: GuildId, volume: u32) -> BackendResult<()> {
        self.mutate(guild, format!("set_volume:{}", volume), |_, s| s.volume = volume)
    }

    async fn disconnect(&self, guild: GuildId) -> BackendResult<()> {
        self.with(|s| {
            if let Some(err) = s.fail_next.take() {
                return Err(err);
            }
            s.calls.push("disconnect".to_string());
            s.players.remove(&guild);
            Ok(())
        })
    }

    async fn can_bypass(&self, _guild: GuildId, user: UserId) -> BackendResult<bool> {
        Ok(self.with(|s| {
            s.calls.push("can_bypass".to_string());
            s.bypass.contains(&user)
        }))
    }
}

struct TransportState {
    next_id: u64,
    messages: HashMap<MessageRef, PanelView>,
    edits: Vec<(MessageRef, PanelView)>,
    sent: Vec<MessageRef>,
    deleted: Vec<MessageRef>,
    notices: Vec<Notice>,
    voice: HashSet<GuildId>,
    force_disconnected: Vec<GuildId>,
    edit_error: Option<TransportError>,
    edit_delays: VecDeque<Duration>,
    send_delays: VecDeque<Duration>,
    fail_force_disconnect: bool,
}

pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TransportState {
                next_id: 1000,
                messages: HashMap::new(),
                edits: Vec::new(),
                sent: Vec::new(),
                deleted: Vec::new(),
                notices: Vec::new(),
                voice: HashSet::new(),
                force_disconnected: Vec::new(),
                edit_error: None,
                edit_delays: VecDeque::new(),
                send_delays: VecDeque::new(),
                fail_force_disconnect: false,
            }),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut TransportState) -> R) -> R {
        let mut state = self.state.lock().expect("transport state");
        f(&mut state)
    }

    /// Pretend a message already exists, e.g. a backend notification.
    pub fn seed_message(&self, channel: ChannelId) -> MessageRef {
        self.with(|s| {
            s.next_id += 1;
            let message = MessageRef {
                channel_id: channel,
                message_id: MessageId(s.next_id),
            };
            s.messages.insert(
                message,
                PanelView::detached(jukebox_proto::display::Document::new("notice")),
            );
            message
        })
    }

    pub fn view(&self, message: MessageRef) -> Option<PanelView> {
        self.with(|s| s.messages.get(&message).cloned())
    }

    pub fn exists_now(&self, message: MessageRef) -> bool {
        self.with(|s| s.messages.contains_key(&message))
    }

    /// Drop a message behind the engine's back.
    pub fn vanish(&self, message: MessageRef) {
        self.with(|s| {
            s.messages.remove(&message);
        });
    }

    pub fn edits(&self) -> Vec<(MessageRef, PanelView)> {
        self.with(|s| s.edits.clone())
    }

    pub fn edit_count(&self) -> usize {
        self.with(|s| s.edits.len())
    }

    pub fn sent(&self) -> Vec<MessageRef> {
        self.with(|s| s.sent.clone())
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.with(|s| s.deleted.clone())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.with(|s| s.notices.clone())
    }

    pub fn set_voice(&self, guild: GuildId, connected: bool) {
        self.with(|s| {
            if connected {
                s.voice.insert(guild);
            } else {
                s.voice.remove(&guild);
            }
        });
    }

    pub fn force_disconnected(&self) -> Vec<GuildId> {
        self.with(|s| s.force_disconnected.clone())
    }

    pub fn fail_edits(&self, error: Option<TransportError>) {
        self.with(|s| s.edit_error = error);
    }

    pub fn fail_force_disconnect(&self) {
        self.with(|s| s.fail_force_disconnect = true);
    }

    /// The next edit sleeps this long before it lands.
    pub fn delay_next_edit(&self, delay: Duration) {
        self.with(|s| s.edit_delays.push_back(delay));
    }

    pub fn delay_next_send(&self, delay: Duration) {
        self.with(|s| s.send_delays.push_back(delay));
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, channel: ChannelId, view: &PanelView) -> TransportResult<MessageRef> {
        let delay = self.with(|s| s.send_delays.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.with(|s| {
            s.next_id += 1;
            let message = MessageRef {
                channel_id: channel,
                message_id: MessageId(s.next_id),
            };
            s.messages.insert(message, view.clone());
            s.sent.push(message);
            message
        }))
    }

    async fn edit(&self, message: MessageRef, view: &PanelView) -> TransportResult<()> {
        let delay = self.with(|s| s.edit_delays.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            if let Some(err) = s.edit_error.clone() {
                return Err(err);
            }
            let Some(slot) = s.messages.get_mut(&message) else {
                return Err(TransportError::NotFound);
            };
            *slot = view.clone();
            s.edits.push((message, view.clone()));
            Ok(())
        })
    }

    async fn delete(&self, message: MessageRef) -> TransportResult<()> {
        self.with(|s| match s.messages.remove(&message) {
            Some(_) => {
                s.deleted.push(message);
                Ok(())
            }
            None => Err(TransportError::NotFound),
        })
    }

    async fn exists(&self, message: MessageRef) -> TransportResult<bool> {
        Ok(self.exists_now(message))
    }

    async fn notify(&self, notice: &Notice) -> TransportResult<()> {
        self.with(|s| s.notices.push(notice.clone()));
        Ok(())
    }

    async fn voice_connected(&self, guild: GuildId) -> TransportResult<bool> {
        Ok(self.with(|s| s.voice.contains(&guild)))
    }

    async fn force_disconnect(&self, guild: GuildId) -> TransportResult<()> {
        self.with(|s| {
            if s.fail_force_disconnect {
                return Err(TransportError::Failed("gateway refused".into()));
            }
            s.voice.remove(&guild);
            s.force_disconnected.push(guild);
            Ok(())
        })
    }
}
