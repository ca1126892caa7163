//! Command/event adapter.
//!
//! Turns inbound bridge events into panel controller and queue browser calls.
//! Nothing in here mutates playback directly: commands go through the panel's
//! action layer, notifications only decide whether a duplicate plain notice
//! is removed and whether a panel gets attached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use jukebox_proto::config::{Config, PanelConfig, QueueConfig, ReaperConfig};
use jukebox_proto::display::ControlId;
use jukebox_proto::model::{ChannelId, GuildId, MessageRef, UserId};
use jukebox_proto::protocol::{
    BackendNotice, ChatCommand, InboundEvent, Invocation, Notice, NoticeBody, NotificationKind,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actions::{self, ActionKind, ActionOutcome};
use crate::backend::PlaybackBackend;
use crate::error::{ActionError, BackendError, TransportError};
use crate::notice;
use crate::panel::{PanelContext, PanelController, PanelSlots};
use crate::queue::QueueBrowser;
use crate::reaper::IdleReaper;
use crate::registry::{SessionRegistry, SharedRegistry};
use crate::transport::Transport;

type SharedBrowser = Arc<Mutex<QueueBrowser>>;

/// Read-only view of one session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub guild: GuildId,
    pub idle: Duration,
    pub last_activity_at: DateTime<Utc>,
    pub panel: Option<MessageRef>,
    pub panel_live: bool,
}

/// The top-level engine: owns the session registry, every live panel and
/// every open queue browser.
pub struct Jukebox {
    backend: Arc<dyn PlaybackBackend>,
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    slots: Arc<PanelSlots>,
    browsers: Mutex<HashMap<MessageRef, SharedBrowser>>,
    /// Serialises panel creation per guild.
    panel_locks: Mutex<HashMap<GuildId, Arc<Mutex<()>>>>,
    panel_config: PanelConfig,
    queue_config: QueueConfig,
    reaper_config: ReaperConfig,
}

impl Jukebox {
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        transport: Arc<dyn Transport>,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            transport,
            registry: SessionRegistry::shared(),
            slots: Arc::new(PanelSlots::new()),
            browsers: Mutex::new(HashMap::new()),
            panel_locks: Mutex::new(HashMap::new()),
            panel_config: config.panel.clone(),
            queue_config: config.queue.clone(),
            reaper_config: config.reaper.clone(),
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn slots(&self) -> Arc<PanelSlots> {
        self.slots.clone()
    }

    pub fn reaper(&self) -> IdleReaper {
        IdleReaper::new(
            self.backend.clone(),
            self.transport.clone(),
            self.registry.clone(),
            self.slots.clone(),
            self.reaper_config.clone(),
        )
    }

    async fn panel_lock(&self, guild: GuildId) -> Arc<Mutex<()>> {
        self.panel_locks
            .lock()
            .await
            .entry(guild)
            .or_default()
            .clone()
    }

    fn panel_context(&self) -> PanelContext {
        PanelContext {
            backend: self.backend.clone(),
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            config: self.panel_config.clone(),
        }
    }

    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Command {
                invocation,
                command,
            } => self.handle_command(invocation, command).await,
            InboundEvent::Control {
                invocation,
                message,
                control,
            } => self.handle_control(invocation, message, control).await,
            InboundEvent::Notification {
                guild_id,
                channel_id,
                message,
                notice,
            } => {
                self.handle_notification(guild_id, channel_id, message, notice)
                    .await
            }
            InboundEvent::ControlsDetached { message } => self.controls_detached(message).await,
        }
    }

    pub async fn handle_command(&self, invocation: Invocation, command: ChatCommand) {
        debug!(
            "guild {}: command {:?} from {}",
            invocation.guild_id, command, invocation.user_id
        );
        self.registry
            .write()
            .await
            .touch(invocation.guild_id, Instant::now());

        let result = match command {
            ChatCommand::Play { query } => self.play(invocation, &query).await,
            ChatCommand::NowPlaying => self.show_now_playing(invocation).await,
            ChatCommand::Queue => self.show_queue(invocation).await,
            ChatCommand::Skip => self.command_action(invocation, ActionKind::Skip).await,
            ChatCommand::Pause => self.command_action(invocation, ActionKind::TogglePause).await,
            ChatCommand::Stop => self.command_action(invocation, ActionKind::Stop).await,
            ChatCommand::Shuffle => {
                self.command_action(invocation, ActionKind::ToggleShuffle)
                    .await
            }
            ChatCommand::Repeat => {
                self.command_action(invocation, ActionKind::ToggleRepeat)
                    .await
            }
            ChatCommand::Volume { value } => {
                self.command_action(invocation, ActionKind::SetVolume(value))
                    .await
            }
        };

        match result {
            Ok(Some(body)) => self.reply(&invocation, body, invocation.slash).await,
            Ok(None) => {}
            Err(e) => self.reply_error(&invocation, &e).await,
        }
    }

    async fn play(&self, inv: Invocation, query: &str) -> Result<Option<NoticeBody>, ActionError> {
        self.backend
            .play(inv.guild_id, inv.channel_id, inv.user_id, query)
            .await?;
        self.attach_panel(inv.guild_id, inv.channel_id, Some(inv.user_id))
            .await?;
        Ok(None)
    }

    /// Make sure the session shows a live panel: refresh the running one,
    /// re-attach to a still-existing panel message, or post a new one.
    async fn attach_panel(
        &self,
        guild: GuildId,
        channel: ChannelId,
        owner: Option<UserId>,
    ) -> Result<(), ActionError> {
        let lock = self.panel_lock(guild).await;
        let _attaching = lock.lock().await;

        if let Some(controller) = self.slots.get_active(guild).await {
            controller.refresh_now().await;
            return Ok(());
        }

        let known = self.registry.read().await.panel(guild);
        let reusable = match known {
            Some(message) => match self.transport.exists(message).await {
                Ok(true) => Some(message),
                Ok(false) => {
                    self.registry.write().await.detach_panel(guild, message);
                    None
                }
                Err(e) => {
                    debug!("guild {}: could not probe panel {}: {}", guild, message, e);
                    None
                }
            },
            None => None,
        };

        let channel = reusable.map(|m| m.channel_id).unwrap_or(channel);
        let controller = PanelController::new(guild, channel, owner, self.panel_context());
        controller.start(reusable).await?;
        if let Some(previous) = self.slots.install(controller).await {
            previous.stop().await;
        }
        Ok(())
    }

    async fn show_now_playing(&self, inv: Invocation) -> Result<Option<NoticeBody>, ActionError> {
        let snapshot = match self.backend.player(inv.guild_id).await {
            Ok(snapshot) => snapshot,
            Err(BackendError::NoPlayer(_)) => return Err(ActionError::NothingPlaying),
            Err(e) => return Err(e.into()),
        };
        if !snapshot.is_playing() {
            return Err(ActionError::NothingPlaying);
        }

        let lock = self.panel_lock(inv.guild_id).await;
        let _attaching = lock.lock().await;

        // The old panel message is deleted by `start` once the new one is attached.
        if let Some(previous) = self.slots.remove(inv.guild_id).await {
            previous.stop().await;
        }

        let controller = PanelController::new(
            inv.guild_id,
            inv.channel_id,
            Some(inv.user_id),
            self.panel_context(),
        );
        controller.start(None).await?;
        if let Some(previous) = self.slots.install(controller).await {
            previous.stop().await;
        }
        Ok(None)
    }

    async fn show_queue(&self, inv: Invocation) -> Result<Option<NoticeBody>, ActionError> {
        let browser = QueueBrowser::open(
            inv.guild_id,
            inv.channel_id,
            inv.user_id,
            self.backend.clone(),
            self.transport.clone(),
            &self.queue_config,
        )
        .await?;

        let now = Instant::now();
        let mut browsers = self.browsers.lock().await;
        browsers.retain(|_, shared| match shared.try_lock() {
            Ok(b) => !b.is_closed() && !b.is_expired(now),
            Err(_) => true,
        });
        browsers.insert(browser.message(), Arc::new(Mutex::new(browser)));
        Ok(None)
    }

    /// Playback commands go through the live panel when there is one, so the
    /// panel re-renders right away; otherwise straight through the action layer.
    async fn command_action(
        &self,
        inv: Invocation,
        kind: ActionKind,
    ) -> Result<Option<NoticeBody>, ActionError> {
        let routed = match self.slots.get_active(inv.guild_id).await {
            Some(controller) => match controller.run_command(kind).await {
                Err(ActionError::Closed) => None,
                other => Some(other),
            },
            None => None,
        };
        let outcome = match routed {
            Some(result) => result?,
            None => {
                let outcome =
                    actions::perform(self.backend.as_ref(), inv.guild_id, kind, &self.panel_config)
                        .await?;
                self.registry
                    .write()
                    .await
                    .touch(inv.guild_id, Instant::now());
                outcome
            }
        };
        Ok(Some(outcome_body(outcome)))
    }

    pub async fn handle_control(&self, inv: Invocation, message: MessageRef, control: ControlId) {
        let result = if control.is_queue_control() {
            self.queue_control(inv, message, control).await
        } else {
            self.panel_control(inv, message, control).await
        };

        match result {
            Ok(Some(body)) => self.reply(&inv, body, true).await,
            Ok(None) => {}
            Err(e) => self.reply_error(&inv, &e).await,
        }
    }

    async fn panel_control(
        &self,
        inv: Invocation,
        message: MessageRef,
        control: ControlId,
    ) -> Result<Option<NoticeBody>, ActionError> {
        let kind = ActionKind::from_control(control).ok_or(ActionError::Closed)?;
        let controller = self
            .slots
            .find_by_message(message)
            .await
            .ok_or(ActionError::Closed)?;
        let outcome = controller.handle_action(kind, inv.user_id).await?;
        Ok(Some(outcome_body(outcome)))
    }

    async fn queue_control(
        &self,
        inv: Invocation,
        message: MessageRef,
        control: ControlId,
    ) -> Result<Option<NoticeBody>, ActionError> {
        let browser = self
            .browsers
            .lock()
            .await
            .get(&message)
            .cloned()
            .ok_or(ActionError::Closed)?;

        let mut browser = browser.lock().await;
        let result = browser.handle_control(inv.user_id, control).await;
        if browser.is_closed() {
            self.browsers.lock().await.remove(&message);
        }
        if result.is_ok() {
            self.registry
                .write()
                .await
                .touch(inv.guild_id, Instant::now());
        }
        result.map(|notice| notice.map(NoticeBody::Text))
    }

    pub async fn handle_notification(
        &self,
        guild: GuildId,
        channel: ChannelId,
        message: MessageRef,
        notice: BackendNotice,
    ) {
        let Some(kind) = notice::classify(&notice) else {
            debug!("guild {}: unclassified notice {} left alone", guild, message);
            return;
        };

        let live = self.slots.get_active(guild).await;
        match (kind, live) {
            (NotificationKind::TrackStarted, Some(controller)) => {
                self.suppress(guild, message).await;
                controller.refresh_now().await;
            }
            (NotificationKind::TrackStarted, None) => {
                self.suppress(guild, message).await;
                if let Err(e) = self.attach_panel(guild, channel, notice.requester).await {
                    warn!("guild {}: could not attach panel for new track: {}", guild, e);
                }
            }
            (_, Some(_)) => self.suppress(guild, message).await,
            (_, None) => debug!("guild {}: no panel, keeping {:?} notice", guild, kind),
        }
    }

    /// Remove a backend notice the panel already shows.
    async fn suppress(&self, guild: GuildId, message: MessageRef) {
        match self.transport.delete(message).await {
            Ok(()) => debug!("guild {}: suppressed duplicate notice {}", guild, message),
            Err(TransportError::NotFound) => {}
            Err(e) => debug!("guild {}: could not suppress notice {}: {}", guild, message, e),
        }
    }

    pub async fn controls_detached(&self, message: MessageRef) {
        if let Some(controller) = self.slots.find_by_message(message).await {
            controller.controls_detached().await;
        }
        let browser = self.browsers.lock().await.remove(&message);
        if let Some(browser) = browser {
            browser.lock().await.mark_closed();
            debug!("queue browser {} closed by transport", message);
        }
    }

    /// Stop every panel and forget every browser.  Used when the bridge goes
    /// away and on shutdown.
    pub async fn stop_all(&self) {
        let controllers = self.slots.drain().await;
        let count = controllers.len();
        join_all(controllers.iter().map(|c| c.stop())).await;
        self.browsers.lock().await.clear();
        if count > 0 {
            info!("stopped {} panel(s)", count);
        }
    }

    pub async fn sessions(&self) -> Vec<SessionSummary> {
        let now = Instant::now();
        let entries = self.registry.read().await.entries();
        let mut out = Vec::with_capacity(entries.len());
        for (guild, entry) in entries {
            let panel_live = self.slots.get_active(guild).await.is_some();
            out.push(SessionSummary {
                guild,
                idle: now.saturating_duration_since(entry.last_activity),
                last_activity_at: entry.last_activity_at,
                panel: entry.panel,
                panel_live,
            });
        }
        out
    }

    async fn reply(&self, inv: &Invocation, body: NoticeBody, ephemeral: bool) {
        let notice = Notice {
            channel_id: inv.channel_id,
            user_id: inv.user_id,
            ephemeral,
            body,
        };
        if let Err(e) = self.transport.notify(&notice).await {
            warn!("guild {}: reply to {} failed: {}", inv.guild_id, inv.user_id, e);
        }
    }

    /// Errors always go privately to the actor.
    async fn reply_error(&self, inv: &Invocation, err: &ActionError) {
        match err {
            ActionError::Backend(_) | ActionError::Transport(_) => {
                error!("guild {}: request from {} failed: {}", inv.guild_id, inv.user_id, err)
            }
            _ => debug!("guild {}: rejected {}: {}", inv.guild_id, inv.user_id, err),
        }
        self.reply(inv, NoticeBody::Text(err.notice()), true).await;
    }
}

fn outcome_body(outcome: ActionOutcome) -> NoticeBody {
    match outcome.summary {
        Some(document) => NoticeBody::Document(document),
        None => NoticeBody::Text(outcome.confirmation),
    }
}
