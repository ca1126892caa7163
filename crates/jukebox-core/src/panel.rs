//! The now-playing panel controller.
//!
//! One controller owns one panel message and at most one refresh loop.  Every
//! write to the message goes through `render`, which holds the controller's
//! render lock from the backend read to the transport write, so a slow timer
//! edit can never land on top of a newer action edit.
//!
//! Lifecycle: `Idle -> Starting -> Active -> Stopping -> Stopped`.  A stopped
//! controller is never restarted; a new panel needs a new controller.

use std::collections::HashMap;
use std::sync::Arc;

use jukebox_proto::config::PanelConfig;
use jukebox_proto::display::{ControlSet, Document, PanelView};
use jukebox_proto::model::{
    ChannelId, GuildId, GuildSettings, MessageRef, PlayerSnapshot, UserId,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{self, ActionKind, ActionOutcome};
use crate::backend::PlaybackBackend;
use crate::error::{ActionError, TransportError};
use crate::registry::SharedRegistry;
use crate::render;
use crate::transport::Transport;

/// Everything a controller needs from the outside world.
#[derive(Clone)]
pub struct PanelContext {
    pub backend: Arc<dyn PlaybackBackend>,
    pub transport: Arc<dyn Transport>,
    pub registry: SharedRegistry,
    pub config: PanelConfig,
}

/// Change-detection tuple.  The panel is only rewritten when this differs
/// from the last rendered one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelState {
    pub track_identity: Option<String>,
    pub paused: bool,
    pub volume: u32,
    pub queue_length: usize,
    pub repeat: bool,
    pub shuffle: bool,
    pub auto_play: bool,
}

impl PanelState {
    pub fn capture(snapshot: &PlayerSnapshot, settings: &GuildSettings) -> Self {
        Self {
            track_identity: snapshot.current.as_ref().map(|t| t.identifier.clone()),
            paused: snapshot.paused,
            volume: settings.volume,
            queue_length: snapshot.queue.len(),
            repeat: settings.repeat,
            shuffle: settings.shuffle,
            auto_play: settings.auto_play,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Idle,
    Starting,
    Active,
    Stopping,
    Stopped,
}

impl PanelPhase {
    fn is_live(self) -> bool {
        matches!(self, PanelPhase::Starting | PanelPhase::Active)
    }
}

struct RenderCache {
    last_state: Option<PanelState>,
    last_view: Option<PanelView>,
    controls: ControlSet,
}

struct Lifecycle {
    phase: PanelPhase,
    message: Option<MessageRef>,
    task: Option<JoinHandle<()>>,
    /// Controls detach when this passes without a successful render.
    deadline: Option<Instant>,
}

/// What `halt` hands back to whoever won the race to stop.
struct Halted {
    message: Option<MessageRef>,
}

pub struct PanelController {
    guild: GuildId,
    channel: ChannelId,
    owner: Option<UserId>,
    backend: Arc<dyn PlaybackBackend>,
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    config: PanelConfig,
    render: Mutex<RenderCache>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
}

impl PanelController {
    pub fn new(
        guild: GuildId,
        channel: ChannelId,
        owner: Option<UserId>,
        ctx: PanelContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild,
            channel,
            owner,
            backend: ctx.backend,
            transport: ctx.transport,
            registry: ctx.registry,
            config: ctx.config,
            render: Mutex::new(RenderCache {
                last_state: None,
                last_view: None,
                controls: render::panel_controls(),
            }),
            lifecycle: Mutex::new(Lifecycle {
                phase: PanelPhase::Idle,
                message: None,
                task: None,
                deadline: None,
            }),
            cancel: CancellationToken::new(),
        })
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub async fn phase(&self) -> PanelPhase {
        self.lifecycle.lock().await.phase
    }

    pub async fn is_live(&self) -> bool {
        self.lifecycle.lock().await.phase.is_live()
    }

    pub async fn message(&self) -> Option<MessageRef> {
        self.lifecycle.lock().await.message
    }

    /// Whether a refresh loop is currently owned and running.
    pub async fn has_task(&self) -> bool {
        self.lifecycle
            .lock()
            .await
            .task
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.config.view_timeout();
        (!timeout.is_zero()).then(|| Instant::now() + timeout)
    }

    /// Attach to `existing`, or post a fresh loading panel, render once and
    /// spawn the refresh loop.
    pub async fn start(self: &Arc<Self>, existing: Option<MessageRef>) -> Result<MessageRef, ActionError> {
        {
            let mut life = self.lifecycle.lock().await;
            if life.phase != PanelPhase::Idle {
                return Err(ActionError::Closed);
            }
            life.phase = PanelPhase::Starting;
        }

        let message = match existing {
            Some(message) => message,
            None => {
                let view = PanelView::new(render::loading(), render::panel_controls());
                match self.transport.send(self.channel, &view).await {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("guild {}: could not post panel: {}", self.guild, e);
                        self.stop().await;
                        return Err(e.into());
                    }
                }
            }
        };
        self.lifecycle.lock().await.message = Some(message);

        let superseded = self
            .registry
            .write()
            .await
            .attach_panel(self.guild, message, Instant::now());
        if let Some(old) = superseded {
            debug!("guild {}: panel {} supersedes {}", self.guild, message, old);
            if let Err(e) = self.transport.delete(old).await {
                debug!("guild {}: superseded panel {} not deleted: {}", self.guild, old, e);
            }
        }

        if let Err(e) = self.render(true).await {
            if e.is_terminal() {
                info!("guild {}: panel {} not started: {}", self.guild, message, e);
                self.stop().await;
                return Err(e);
            }
            warn!("guild {}: initial panel render failed: {}", self.guild, e);
        }

        let mut life = self.lifecycle.lock().await;
        if life.phase != PanelPhase::Starting {
            return Err(ActionError::Closed);
        }
        life.phase = PanelPhase::Active;
        if life.deadline.is_none() {
            life.deadline = self.next_deadline();
        }
        let this = Arc::clone(self);
        life.task = Some(tokio::spawn(async move { this.run().await }));
        info!("guild {}: panel {} active", self.guild, message);
        Ok(message)
    }

    async fn run(self: Arc<Self>) {
        let period = self.config.refresh_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.lifecycle.lock().await.deadline;
            let expiry = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => match self.refresh_tick().await {
                    Ok(_) => {}
                    Err(e) if e.is_terminal() => {
                        info!("guild {}: panel ending: {}", self.guild, e);
                        if self.halt(true).await.is_some() {
                            self.release().await;
                        }
                        break;
                    }
                    Err(e) => warn!("guild {}: panel refresh failed: {}", self.guild, e),
                },
                _ = expiry => {
                    // A render may have renewed the deadline meanwhile.
                    let renewed = self
                        .lifecycle
                        .lock()
                        .await
                        .deadline
                        .is_some_and(|at| at > Instant::now());
                    if renewed {
                        continue;
                    }
                    info!("guild {}: panel view timed out", self.guild);
                    if let Some(halted) = self.halt(true).await {
                        self.show_final(halted.message, None).await;
                        self.release().await;
                    }
                    break;
                }
            }
        }
        debug!("guild {}: refresh loop exited", self.guild);
    }

    /// One timer tick: re-render only if the change-detection tuple moved.
    /// Returns whether the transport was written.
    pub async fn refresh_tick(&self) -> Result<bool, ActionError> {
        self.render(false).await
    }

    /// Out-of-band render, independent of the timer.  Stops the controller on
    /// terminal failures.
    pub async fn refresh_now(&self) {
        match self.render(true).await {
            Ok(_) => {}
            Err(e) if e.is_terminal() => {
                info!("guild {}: panel ending: {}", self.guild, e);
                self.stop().await;
            }
            Err(e) => warn!("guild {}: panel render failed: {}", self.guild, e),
        }
    }

    async fn render(&self, force: bool) -> Result<bool, ActionError> {
        let mut cache = self.render.lock().await;
        let message = {
            let life = self.lifecycle.lock().await;
            if !life.phase.is_live() {
                return Err(ActionError::Closed);
            }
            life.message.ok_or(ActionError::Closed)?
        };

        let snapshot = self.backend.player(self.guild).await?;
        let settings = self.backend.settings(self.guild).await?;
        let state = PanelState::capture(&snapshot, &settings);
        if !force && cache.last_state.as_ref() == Some(&state) {
            debug!("guild {}: panel unchanged", self.guild);
            return Ok(false);
        }

        render::sync_controls(&mut cache.controls, &snapshot, &settings);
        let view = PanelView::new(render::now_playing(&snapshot, &settings), cache.controls.clone());
        if let Err(e) = self.transport.edit(message, &view).await {
            if e == TransportError::NotFound {
                self.registry.write().await.detach_panel(self.guild, message);
            }
            return Err(e.into());
        }

        cache.last_state = Some(state);
        cache.last_view = Some(view);
        let deadline = self.next_deadline();
        self.lifecycle.lock().await.deadline = deadline;
        Ok(true)
    }

    /// A user pressed one of the panel's controls.
    pub async fn handle_action(
        &self,
        kind: ActionKind,
        actor: UserId,
    ) -> Result<ActionOutcome, ActionError> {
        if !self.is_live().await {
            return Err(ActionError::Closed);
        }
        self.authorize(actor).await?;
        self.execute(kind).await
    }

    /// A chat command routed to this panel.  Command permissions are enforced
    /// by the platform's command layer, not by panel ownership.
    pub async fn run_command(&self, kind: ActionKind) -> Result<ActionOutcome, ActionError> {
        if !self.is_live().await {
            return Err(ActionError::Closed);
        }
        self.execute(kind).await
    }

    async fn authorize(&self, actor: UserId) -> Result<(), ActionError> {
        if self.owner == Some(actor) {
            return Ok(());
        }
        if self.backend.can_bypass(self.guild, actor).await? {
            return Ok(());
        }
        debug!("guild {}: user {} denied panel controls", self.guild, actor);
        Err(ActionError::PermissionDenied)
    }

    async fn execute(&self, kind: ActionKind) -> Result<ActionOutcome, ActionError> {
        let outcome = actions::perform(self.backend.as_ref(), self.guild, kind, &self.config).await?;
        self.registry.write().await.touch(self.guild, Instant::now());

        if outcome.ends_playback {
            self.finish_with(render::stopped()).await;
        } else {
            self.refresh_now().await;
        }
        Ok(outcome)
    }

    /// Cancel the refresh loop.  Returns `None` if someone else already did.
    /// The loop itself passes `from_loop` so it never waits on its own handle.
    async fn halt(&self, from_loop: bool) -> Option<Halted> {
        let (handle, message) = {
            let mut life = self.lifecycle.lock().await;
            if matches!(life.phase, PanelPhase::Stopping | PanelPhase::Stopped) {
                return None;
            }
            life.phase = PanelPhase::Stopping;
            (life.task.take(), life.message)
        };

        self.cancel.cancel();
        if let Some(handle) = handle {
            if !from_loop {
                handle.abort();
                let _ = handle.await;
            }
        }
        Some(Halted { message })
    }

    async fn release(&self) {
        let mut life = self.lifecycle.lock().await;
        life.message = None;
        life.deadline = None;
        life.phase = PanelPhase::Stopped;
    }

    /// Leave `message` showing `document` (or the last rendered document)
    /// without any controls.
    async fn show_final(&self, message: Option<MessageRef>, document: Option<Document>) {
        let Some(message) = message else {
            return;
        };
        // Waits out any render still in flight.
        let cache = self.render.lock().await;
        let Some(document) = document.or_else(|| cache.last_view.as_ref().map(|v| v.document.clone()))
        else {
            return;
        };
        match self.transport.edit(message, &PanelView::detached(document)).await {
            Ok(()) => {}
            Err(TransportError::NotFound) => {
                self.registry.write().await.detach_panel(self.guild, message);
            }
            Err(e) => debug!("guild {}: could not detach panel {}: {}", self.guild, message, e),
        }
    }

    /// Cancel the refresh loop and release the message.  Idempotent.
    pub async fn stop(&self) {
        if self.halt(false).await.is_some() {
            self.release().await;
            info!("guild {}: panel stopped", self.guild);
        }
    }

    /// Stop, leaving the message with `document` and no controls.
    pub async fn finish_with(&self, document: Document) {
        if let Some(halted) = self.halt(false).await {
            self.show_final(halted.message, Some(document)).await;
            self.release().await;
            info!("guild {}: panel finished", self.guild);
        }
    }

    /// The transport dropped our controls on its own.
    pub async fn controls_detached(&self) {
        info!("guild {}: panel controls detached by transport", self.guild);
        self.stop().await;
    }
}

/// The live controller, if any, for each session.
#[derive(Default)]
pub struct PanelSlots {
    panels: Mutex<HashMap<GuildId, Arc<PanelController>>>,
}

impl PanelSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whatever occupied the slot before.
    pub async fn install(&self, controller: Arc<PanelController>) -> Option<Arc<PanelController>> {
        self.panels
            .lock()
            .await
            .insert(controller.guild(), controller)
    }

    pub async fn get(&self, guild: GuildId) -> Option<Arc<PanelController>> {
        self.panels.lock().await.get(&guild).cloned()
    }

    /// The slot's controller if it is still live.
    pub async fn get_active(&self, guild: GuildId) -> Option<Arc<PanelController>> {
        let controller = self.get(guild).await?;
        if controller.is_live().await {
            Some(controller)
        } else {
            None
        }
    }

    pub async fn find_by_message(&self, message: MessageRef) -> Option<Arc<PanelController>> {
        let all: Vec<Arc<PanelController>> = self.panels.lock().await.values().cloned().collect();
        for controller in all {
            if controller.message().await == Some(message) {
                return Some(controller);
            }
        }
        None
    }

    pub async fn remove(&self, guild: GuildId) -> Option<Arc<PanelController>> {
        self.panels.lock().await.remove(&guild)
    }

    pub async fn drain(&self) -> Vec<Arc<PanelController>> {
        self.panels.lock().await.drain().map(|(_, c)| c).collect()
    }

    pub async fn len(&self) -> usize {
        self.panels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.panels.lock().await.is_empty()
    }
}
