//! Paginated queue browser.

use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::config::QueueConfig;
use jukebox_proto::display::{ControlId, Document, PanelView};
use jukebox_proto::model::{ChannelId, GuildId, MessageRef, Track, UserId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::PlaybackBackend;
use crate::error::{ActionError, BackendError, TransportError};
use crate::render::{self, FIELD_NOW_PLAYING, TITLE_QUEUE};
use crate::transport::Transport;

pub const EMPTY_QUEUE: &str = "The queue is empty. Add songs with the `play` command.";
pub const EMPTY_AFTER_SHUFFLE: &str = "Queue is empty after shuffling.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePage {
    pub tracks: Vec<Track>,
    pub document: Document,
}

/// Split `tracks` into pages of `page_size`.  Always yields at least one page;
/// page 0 also carries the current track when there is one.
pub fn paginate(tracks: &[Track], current: Option<&Track>, page_size: usize) -> Vec<QueuePage> {
    let page_size = page_size.max(1);
    let total = tracks.len();
    let page_count = total.div_ceil(page_size).max(1);

    let mut chunks: Vec<&[Track]> = tracks.chunks(page_size).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let description = if chunk.is_empty() {
                EMPTY_QUEUE.to_string()
            } else {
                chunk
                    .iter()
                    .enumerate()
                    .map(|(i, t)| format!("**{}.** {}", index * page_size + i + 1, t.description()))
                    .collect::<Vec<_>>()
                    .join("\n")
            };

            let mut document = Document::new(TITLE_QUEUE).description(description).footer(format!(
                "Page {}/{} • Total: {} tracks",
                index + 1,
                page_count,
                total
            ));
            if index == 0 {
                if let Some(track) = current {
                    document = document.field(
                        FIELD_NOW_PLAYING,
                        format!("**{}**", track.description()),
                        false,
                    );
                }
            }

            QueuePage {
                tracks: chunk.to_vec(),
                document,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reshuffled {
    Shuffled,
    Empty,
}

/// One queue display.  Only the user who opened it may operate it; once
/// closed or expired every operation is rejected with `ActionError::Closed`.
pub struct QueueBrowser {
    guild: GuildId,
    owner: UserId,
    message: MessageRef,
    pages: Vec<QueuePage>,
    current: usize,
    page_size: usize,
    closed: bool,
    timeout: Duration,
    expires_at: Instant,
    backend: Arc<dyn PlaybackBackend>,
    transport: Arc<dyn Transport>,
}

impl QueueBrowser {
    pub async fn open(
        guild: GuildId,
        channel: ChannelId,
        owner: UserId,
        backend: Arc<dyn PlaybackBackend>,
        transport: Arc<dyn Transport>,
        config: &QueueConfig,
    ) -> Result<Self, ActionError> {
        let snapshot = match backend.player(guild).await {
            Ok(snapshot) => snapshot,
            Err(BackendError::NoPlayer(_)) => return Err(ActionError::NothingPlaying),
            Err(e) => return Err(e.into()),
        };
        if !snapshot.is_playing() && snapshot.queue.is_empty() {
            return Err(ActionError::NothingPlaying);
        }
        let pages = paginate(&snapshot.queue, snapshot.current.as_ref(), config.page_size);
        let view = PanelView::new(pages[0].document.clone(), render::queue_controls());
        let message = transport.send(channel, &view).await?;
        info!(
            "guild {}: queue browser {} opened with {} pages",
            guild,
            message,
            pages.len()
        );

        let timeout = config.view_timeout();
        Ok(Self {
            guild,
            owner,
            message,
            pages,
            current: 0,
            page_size: config.page_size,
            closed: false,
            timeout,
            expires_at: Instant::now() + timeout,
            backend,
            transport,
        })
    }

    pub fn message(&self) -> MessageRef {
        self.message
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn current_page(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&QueuePage> {
        self.pages.get(index)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        !self.timeout.is_zero() && now >= self.expires_at
    }

    /// The page one step away, wrapping at both ends.
    pub fn target(&self, direction: PageDirection) -> usize {
        let count = self.pages.len().max(1);
        match direction {
            PageDirection::Prev => (self.current + count - 1) % count,
            PageDirection::Next => (self.current + 1) % count,
        }
    }

    fn check(&mut self, actor: UserId) -> Result<(), ActionError> {
        if !self.closed && self.is_expired(Instant::now()) {
            debug!("guild {}: queue browser {} expired", self.guild, self.message);
            self.closed = true;
        }
        if self.closed {
            return Err(ActionError::Closed);
        }
        if actor != self.owner {
            return Err(ActionError::PermissionDenied);
        }
        Ok(())
    }

    /// The index only moves once the message shows the page.
    async fn show_page(&mut self, index: usize) -> Result<(), ActionError> {
        let view = PanelView::new(self.pages[index].document.clone(), render::queue_controls());
        if let Err(e) = self.transport.edit(self.message, &view).await {
            if e.is_terminal() {
                self.closed = true;
            }
            return Err(e.into());
        }
        self.current = index;
        self.expires_at = Instant::now() + self.timeout;
        Ok(())
    }

    pub async fn navigate(&mut self, actor: UserId, direction: PageDirection) -> Result<(), ActionError> {
        self.check(actor)?;
        let target = self.target(direction);
        self.show_page(target).await
    }

    /// Shuffle through the backend, rebuild every page and go back to page 0.
    pub async fn reshuffle(&mut self, actor: UserId) -> Result<Reshuffled, ActionError> {
        self.check(actor)?;
        self.backend.shuffle_queue(self.guild).await?;
        let snapshot = self.backend.player(self.guild).await?;

        self.pages = paginate(&snapshot.queue, snapshot.current.as_ref(), self.page_size);
        self.current = 0;
        self.show_page(0).await?;

        if snapshot.queue.is_empty() {
            Ok(Reshuffled::Empty)
        } else {
            Ok(Reshuffled::Shuffled)
        }
    }

    pub async fn close(&mut self, actor: UserId) -> Result<(), ActionError> {
        self.check(actor)?;
        self.closed = true;
        match self.transport.delete(self.message).await {
            Ok(()) | Err(TransportError::NotFound) => Ok(()),
            Err(e) => {
                warn!("guild {}: queue browser {} not deleted: {}", self.guild, self.message, e);
                Err(e.into())
            }
        }
    }

    /// The transport dropped the browser's controls.
    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Route one of the browser's controls.  Returns a notice for the actor,
    /// if any.
    pub async fn handle_control(
        &mut self,
        actor: UserId,
        control: ControlId,
    ) -> Result<Option<String>, ActionError> {
        match control {
            ControlId::PrevPage => self.navigate(actor, PageDirection::Prev).await.map(|_| None),
            ControlId::NextPage => self.navigate(actor, PageDirection::Next).await.map(|_| None),
            ControlId::ShuffleQueue => match self.reshuffle(actor).await? {
                Reshuffled::Shuffled => Ok(Some("🔀 Queue shuffled!".to_string())),
                Reshuffled::Empty => Ok(Some(EMPTY_AFTER_SHUFFLE.to_string())),
            },
            ControlId::CloseQueue => self.close(actor).await.map(|_| None),
            _ => Err(ActionError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{track, tracks, FakeBackend, FakeTransport};

    const GUILD: GuildId = GuildId(1);
    const CHANNEL: ChannelId = ChannelId(10);
    const OWNER: UserId = UserId(100);

    #[test]
    fn test_paginate_page_counts() {
        for (len, size, expected) in [(0, 10, 1), (1, 10, 1), (10, 10, 1), (11, 10, 2), (25, 10, 3), (7, 1, 7)] {
            let pages = paginate(&tracks(len), None, size);
            assert_eq!(pages.len(), expected, "len {} size {}", len, size);

            let flattened: Vec<Track> = pages.iter().flat_map(|p| p.tracks.clone()).collect();
            assert_eq!(flattened, tracks(len));
        }
    }

    #[test]
    fn test_paginate_footer_and_numbering() {
        let pages = paginate(&tracks(25), Some(&track("Now")), 10);
        assert_eq!(pages[0].document.footer.as_deref(), Some("Page 1/3 • Total: 25 tracks"));
        assert_eq!(pages[2].document.footer.as_deref(), Some("Page 3/3 • Total: 25 tracks"));
        assert_eq!(pages[2].tracks.len(), 5);

        let last = pages[2].document.description.as_deref().unwrap();
        assert!(last.starts_with("**21.** Track 21"));
        assert!(pages[0].document.find_field(FIELD_NOW_PLAYING).is_some());
        assert!(pages[1].document.find_field(FIELD_NOW_PLAYING).is_none());
    }

    #[test]
    fn test_empty_queue_page_keeps_current_track() {
        let pages = paginate(&[], Some(&track("Now")), 10);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].document.description.as_deref(), Some(EMPTY_QUEUE));
        assert_eq!(
            pages[0].document.find_field(FIELD_NOW_PLAYING).unwrap().value,
            "**Now**"
        );
    }

    async fn open_with(queue_len: usize) -> (QueueBrowser, Arc<FakeBackend>, Arc<FakeTransport>) {
        let backend = FakeBackend::new();
        backend.play_now(GUILD, track("Now"));
        for t in tracks(queue_len) {
            backend.enqueue(GUILD, t);
        }
        let transport = FakeTransport::new();
        let browser = QueueBrowser::open(
            GUILD,
            CHANNEL,
            OWNER,
            backend.clone(),
            transport.clone(),
            &QueueConfig::default(),
        )
        .await
        .unwrap();
        (browser, backend, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_wraps_both_ways() {
        let (mut browser, _, transport) = open_with(25).await;
        assert_eq!(browser.page_count(), 3);

        browser.navigate(OWNER, PageDirection::Prev).await.unwrap();
        assert_eq!(browser.current_page(), 2);
        browser.navigate(OWNER, PageDirection::Next).await.unwrap();
        assert_eq!(browser.current_page(), 0);
        browser.navigate(OWNER, PageDirection::Next).await.unwrap();
        assert_eq!(browser.current_page(), 1);

        let shown = transport.view(browser.message()).unwrap();
        assert_eq!(shown.document.footer.as_deref(), Some("Page 2/3 • Total: 25 tracks"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_stays_in_range() {
        let (single, _, _) = open_with(0).await;
        assert_eq!(single.target(PageDirection::Prev), 0);
        assert_eq!(single.target(PageDirection::Next), 0);

        let (mut browser, _, _) = open_with(21).await;
        let count = browser.page_count();
        for _ in 0..(2 * count + 1) {
            browser.navigate(OWNER, PageDirection::Next).await.unwrap();
            assert!(browser.current_page() < count);
        }
        for _ in 0..(2 * count + 1) {
            assert!(browser.target(PageDirection::Prev) < count);
            browser.navigate(OWNER, PageDirection::Prev).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_edit_keeps_page_index() {
        let (mut browser, _, transport) = open_with(25).await;
        transport.fail_edits(Some(TransportError::Failed("rate limited".into())));

        let err = browser
            .navigate(OWNER, PageDirection::Next)
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Transport(TransportError::Failed("rate limited".into())));
        assert_eq!(browser.current_page(), 0);
        assert!(!browser.is_closed());

        transport.fail_edits(None);
        browser.navigate(OWNER, PageDirection::Next).await.unwrap();
        assert_eq!(browser.current_page(), 1);
        let shown = transport.view(browser.message()).unwrap();
        assert_eq!(shown.document.footer.as_deref(), Some("Page 2/3 • Total: 25 tracks"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_owner_may_browse() {
        let (mut browser, _, _) = open_with(25).await;
        let err = browser
            .navigate(UserId(999), PageDirection::Next)
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::PermissionDenied);
        assert_eq!(browser.current_page(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reshuffle_regenerates_and_resets() {
        let (mut browser, backend, transport) = open_with(25).await;
        browser.navigate(OWNER, PageDirection::Next).await.unwrap();

        let result = browser.reshuffle(OWNER).await.unwrap();
        assert_eq!(result, Reshuffled::Shuffled);
        assert_eq!(browser.current_page(), 0);
        assert_eq!(backend.mutations(), vec!["shuffle_queue".to_string()]);

        // The fake shuffles by reversing.
        let first = &browser.page(0).unwrap().tracks[0];
        assert_eq!(first.title, "Track 25");
        let shown = transport.view(browser.message()).unwrap();
        assert!(shown
            .document
            .description
            .unwrap()
            .starts_with("**1.** Track 25"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reshuffle_empty_queue_is_not_an_error() {
        let (mut browser, _, _) = open_with(0).await;
        let notice = browser
            .handle_control(OWNER, ControlId::ShuffleQueue)
            .await
            .unwrap();
        assert_eq!(notice.as_deref(), Some(EMPTY_AFTER_SHUFFLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_browser_rejects_everything() {
        let (mut browser, _, transport) = open_with(25).await;
        let message = browser.message();
        browser.close(OWNER).await.unwrap();
        assert!(!transport.exists_now(message));

        for control in [
            ControlId::PrevPage,
            ControlId::NextPage,
            ControlId::ShuffleQueue,
            ControlId::CloseQueue,
        ] {
            let err = browser.handle_control(OWNER, control).await.unwrap_err();
            assert_eq!(err, ActionError::Closed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_expires_without_interaction() {
        let (mut browser, _, _) = open_with(25).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        browser.navigate(OWNER, PageDirection::Next).await.unwrap();

        // Renewed by the last edit.
        tokio::time::advance(Duration::from_secs(200)).await;
        browser.navigate(OWNER, PageDirection::Next).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        let err = browser
            .navigate(OWNER, PageDirection::Next)
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Closed);
        assert!(browser.is_closed());
    }

    #[tokio::test]
    async fn test_open_without_player_is_precondition_error() {
        let result = QueueBrowser::open(
            GUILD,
            CHANNEL,
            OWNER,
            FakeBackend::new(),
            FakeTransport::new(),
            &QueueConfig::default(),
        )
        .await;
        assert_eq!(result.err(), Some(ActionError::NothingPlaying));
    }
}
