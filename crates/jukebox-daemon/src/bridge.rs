/// Bridge RPC client with separated reader/writer tasks.
///
/// ```text
///   socket::handle_bridge()
///         │
///         ├── writer_task   ← receives PendingCall via mpsc, frames → socket
///         └── reader_task   ← decodes frames from socket
///                                ├── Response { id } → matched oneshot::Sender
///                                └── Event           → DaemonEvent::Inbound
/// ```
///
/// `BridgeClient` holds the handle of whichever bridge connection is current
/// and implements both engine seams on top of it.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jukebox_core::error::{BackendResult, TransportResult};
use jukebox_core::{BackendError, PlaybackBackend, Transport, TransportError};
use jukebox_proto::display::PanelView;
use jukebox_proto::model::{ChannelId, GuildId, GuildSettings, MessageRef, PlayerSnapshot, UserId};
use jukebox_proto::protocol::{Call, CallResult, ErrorCode, Frame, Notice};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::DaemonEvent;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<CallResult, CallFailure>>>>>;

struct PendingCall {
    id: u64,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<CallResult, CallFailure>>,
}

/// Why a call never produced a bridge-side result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("bridge not connected")]
    Offline,
    #[error("bridge call {0} timed out")]
    Timeout(u64),
    #[error("bridge connection closed")]
    Closed,
    #[error("bridge error {code:?}: {message}")]
    Remote { code: ErrorCode, message: String },
    #[error("malformed bridge reply: {0}")]
    Malformed(String),
}

impl CallFailure {
    fn into_backend(self, guild: GuildId) -> BackendError {
        match self {
            CallFailure::Offline | CallFailure::Closed => BackendError::Unavailable(self.to_string()),
            CallFailure::Remote {
                code: ErrorCode::NoPlayer,
                ..
            } => BackendError::NoPlayer(guild),
            other => BackendError::Failed(other.to_string()),
        }
    }

    fn into_transport(self) -> TransportError {
        match self {
            CallFailure::Offline | CallFailure::Closed => {
                TransportError::Unavailable(self.to_string())
            }
            CallFailure::Remote { code, message } => match code {
                ErrorCode::NotFound => TransportError::NotFound,
                ErrorCode::Unauthorized => TransportError::Unauthorized,
                ErrorCode::Forbidden => TransportError::Forbidden(message),
                ErrorCode::NoPlayer | ErrorCode::Failed => TransportError::Failed(message),
            },
            other => TransportError::Failed(other.to_string()),
        }
    }
}

// ── framing ───────────────────────────────────────────────────────────────────

/// Buffers a byte stream and yields whole frames.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Next decodable frame, `None` on a clean close.  Frames that fail to
    /// parse are logged and skipped.
    pub async fn next(&mut self) -> anyhow::Result<Option<Frame>> {
        let mut tmp = [0u8; 4096];
        loop {
            if self.buf.len() >= 4 {
                let len =
                    u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
                if len > MAX_FRAME_LEN {
                    anyhow::bail!("frame of {} bytes exceeds limit", len);
                }
                if self.buf.len() >= 4 + len {
                    match Frame::decode(&self.buf) {
                        Ok((frame, consumed)) => {
                            self.buf.drain(..consumed);
                            return Ok(Some(frame));
                        }
                        Err(e) => {
                            warn!("bridge: dropping undecodable frame: {}", e);
                            self.buf.drain(..4 + len);
                            continue;
                        }
                    }
                }
            }

            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to one connection's writer task.
#[derive(Clone)]
pub struct BridgeHandle {
    conn_id: u64,
    tx: mpsc::Sender<PendingCall>,
    pending: PendingMap,
    closed: CancellationToken,
}

impl BridgeHandle {
    /// Spawn the reader and writer tasks for a connection whose hello has
    /// already been exchanged.  The returned task ends when the connection
    /// does.
    pub fn start<R, W>(
        conn_id: u64,
        reader: FrameReader<R>,
        writer: W,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel::<PendingCall>(64);
        let closed = CancellationToken::new();

        tokio::spawn(writer_task(writer, rx, pending.clone(), closed.clone()));
        let reader = tokio::spawn(reader_task(
            conn_id,
            reader,
            pending.clone(),
            event_tx,
            closed.clone(),
        ));

        (
            Self {
                conn_id,
                tx,
                pending,
                closed,
            },
            reader,
        )
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Drop the connection.  Pending calls fail with `Closed`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub async fn call(&self, call: Call) -> Result<CallResult, CallFailure> {
        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let payload = Frame::Request { id, call }
            .encode()
            .map_err(|e| CallFailure::Malformed(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingCall {
                id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallFailure::Closed)?;

        match tokio::time::timeout(CALL_TIMEOUT, reply_rx).await {
            Ok(reply) => reply.map_err(|_| CallFailure::Closed)?,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!("bridge {}: call {} timed out", self.conn_id, id);
                Err(CallFailure::Timeout(id))
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(CallFailure::Closed));
    }
}

async fn reader_task<R>(
    conn_id: u64,
    mut reader: FrameReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<DaemonEvent>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => {
                debug!("bridge {}: reader closed", conn_id);
                break;
            }
            frame = reader.next() => frame,
        };

        match frame {
            Ok(Some(Frame::Response { id, result })) => {
                let mut map = pending.lock().await;
                if let Some(tx) = map.remove(&id) {
                    let _ = tx.send(Ok(result));
                } else {
                    debug!("bridge {}: response for unknown call {}", conn_id, id);
                }
            }
            Ok(Some(Frame::Event { event })) => {
                debug!("bridge {}: event {:?}", conn_id, event);
                if event_tx.send(DaemonEvent::Inbound(event)).await.is_err() {
                    warn!("DaemonEvent channel closed");
                    break;
                }
            }
            Ok(Some(other)) => {
                debug!("bridge {}: ignoring unexpected frame {:?}", conn_id, other);
            }
            Ok(None) => {
                info!("bridge {}: connection closed", conn_id);
                break;
            }
            Err(e) => {
                warn!("bridge {}: read error: {}", conn_id, e);
                break;
            }
        }
    }

    closed.cancel();
    fail_pending(&pending).await;
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingCall>,
    pending: PendingMap,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let call = tokio::select! {
            _ = closed.cancelled() => break,
            call = rx.recv() => match call {
                Some(call) => call,
                None => break,
            },
        };

        // Register the reply channel before writing so the reader can match it.
        pending.lock().await.insert(call.id, call.reply);
        if let Err(e) = writer.write_all(&call.payload).await {
            warn!("bridge writer: write error: {}", e);
            closed.cancel();
            break;
        }
    }

    let _ = writer.shutdown().await;
    fail_pending(&pending).await;
}

// ── client ────────────────────────────────────────────────────────────────────

/// The daemon's single view of the bridge.  A newer connection replaces an
/// older one; with none attached every call fails as unavailable.
#[derive(Default)]
pub struct BridgeClient {
    current: RwLock<Option<BridgeHandle>>,
}

impl BridgeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the current connection, closing any previous one.
    pub async fn attach(&self, handle: BridgeHandle) {
        let previous = self.current.write().await.replace(handle);
        if let Some(previous) = previous {
            info!("bridge {}: replaced by a newer connection", previous.conn_id());
            previous.close();
        }
    }

    /// Forget connection `conn_id` if it is still the current one.
    pub async fn detach(&self, conn_id: u64) -> bool {
        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|h| h.conn_id() == conn_id) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    async fn request(&self, call: Call) -> Result<Value, CallFailure> {
        let handle = self.current.read().await.clone().ok_or(CallFailure::Offline)?;
        match handle.call(call).await? {
            CallResult::Ok { data } => Ok(data),
            CallResult::Err { code, message } => Err(CallFailure::Remote { code, message }),
        }
    }

    async fn request_as<T: DeserializeOwned>(&self, call: Call) -> Result<T, CallFailure> {
        let data = self.request(call).await?;
        serde_json::from_value(data).map_err(|e| CallFailure::Malformed(e.to_string()))
    }

    async fn backend_unit(&self, guild: GuildId, call: Call) -> BackendResult<()> {
        self.request(call)
            .await
            .map(|_| ())
            .map_err(|e| e.into_backend(guild))
    }

    async fn transport_unit(&self, call: Call) -> TransportResult<()> {
        self.request(call)
            .await
            .map(|_| ())
            .map_err(CallFailure::into_transport)
    }
}

#[async_trait]
impl PlaybackBackend for BridgeClient {
    async fn player(&self, guild: GuildId) -> BackendResult<PlayerSnapshot> {
        self.request_as(Call::PlayerState { guild_id: guild })
            .await
            .map_err(|e| e.into_backend(guild))
    }

    async fn settings(&self, guild: GuildId) -> BackendResult<GuildSettings> {
        self.request_as(Call::Settings { guild_id: guild })
            .await
            .map_err(|e| e.into_backend(guild))
    }

    async fn play(
        &self,
        guild: GuildId,
        channel: ChannelId,
        requester: UserId,
        query: &str,
    ) -> BackendResult<()> {
        self.backend_unit(
            guild,
            Call::Play {
                guild_id: guild,
                channel_id: channel,
                requester,
                query: query.to_string(),
            },
        )
        .await
    }

    async fn set_paused(&self, guild: GuildId, paused: bool) -> BackendResult<()> {
        self.backend_unit(
            guild,
            Call::SetPaused {
                guild_id: guild,
                paused,
            },
        )
        .await
    }

    async fn stop(&self, guild: GuildId) -> BackendResult<()> {
        self.backend_unit(guild, Call::Stop { guild_id: guild }).await
    }

    async fn seek(&self, guild: GuildId, position_ms: u64) -> BackendResult<()> {
        self.backend_unit(
            guild,
            Call::Seek {
                guild_id: guild,
                position_ms,
            },
        )
        .await
    }

    async fn skip(&self, guild: GuildId) -> BackendResult<()> {
        self.backend_unit(guild, Call::Skip { guild_id: guild }).await
    }

    async fn toggle_shuffle(&self, guild: GuildId) -> BackendResult<()> {
        self.backend_unit(guild, Call::ToggleShuffle { guild_id: guild })
            .await
    }

    async fn toggle_repeat(&self, guild: GuildId) -> BackendResult<()> {
        self.backend_unit(guild, Call::ToggleRepeat { guild_id: guild })
            .await
    }

    async fn shuffle_queue(&self, guild: GuildId) -> BackendResult<()> {
        self.backend_unit(guild, Call::ShuffleQueue { guild_id: guild })
            .await
    }

    async fn set_volume(&self, guild: GuildId, volume: u32) -> BackendResult<()> {
        self.backend_unit(
            guild,
            Call::SetVolume {
                guild_id: guild,
                volume,
            },
        )
        .await
    }

    async fn disconnect(&self, guild: GuildId) -> BackendResult<()> {
        self.backend_unit(guild, Call::Disconnect { guild_id: guild })
            .await
    }

    async fn can_bypass(&self, guild: GuildId, user: UserId) -> BackendResult<bool> {
        self.request_as(Call::CanBypass {
            guild_id: guild,
            user_id: user,
        })
        .await
        .map_err(|e| e.into_backend(guild))
    }
}

#[async_trait]
impl Transport for BridgeClient {
    async fn send(&self, channel: ChannelId, view: &PanelView) -> TransportResult<MessageRef> {
        self.request_as(Call::SendMessage {
            channel_id: channel,
            view: view.clone(),
        })
        .await
        .map_err(CallFailure::into_transport)
    }

    async fn edit(&self, message: MessageRef, view: &PanelView) -> TransportResult<()> {
        self.transport_unit(Call::EditMessage {
            message,
            view: view.clone(),
        })
        .await
    }

    async fn delete(&self, message: MessageRef) -> TransportResult<()> {
        self.transport_unit(Call::DeleteMessage { message }).await
    }

    async fn exists(&self, message: MessageRef) -> TransportResult<bool> {
        self.request_as(Call::MessageExists { message })
            .await
            .map_err(CallFailure::into_transport)
    }

    async fn notify(&self, notice: &Notice) -> TransportResult<()> {
        self.transport_unit(Call::Notify {
            notice: notice.clone(),
        })
        .await
    }

    async fn voice_connected(&self, guild: GuildId) -> TransportResult<bool> {
        self.request_as(Call::VoiceConnected { guild_id: guild })
            .await
            .map_err(CallFailure::into_transport)
    }

    async fn force_disconnect(&self, guild: GuildId) -> TransportResult<()> {
        self.transport_unit(Call::ForceDisconnect { guild_id: guild })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_proto::display::Document;
    use jukebox_proto::model::{MessageId, Track};
    use jukebox_proto::protocol::InboundEvent;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// The bridge end of an in-memory connection.
    struct FakeBridge {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeBridge {
        async fn expect_call(&mut self) -> (u64, Call) {
            match self.reader.next().await.unwrap() {
                Some(Frame::Request { id, call }) => (id, call),
                other => panic!("expected a request, got {:?}", other),
            }
        }

        async fn send(&mut self, frame: Frame) {
            self.writer
                .write_all(&frame.encode().unwrap())
                .await
                .unwrap();
        }

        async fn reply(&mut self, id: u64, result: CallResult) {
            self.send(Frame::Response { id, result }).await;
        }
    }

    fn connect(
        conn_id: u64,
    ) -> (BridgeHandle, JoinHandle<()>, FakeBridge, mpsc::Receiver<DaemonEvent>) {
        let (daemon_side, bridge_side) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(daemon_side);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (handle, reader) = BridgeHandle::start(conn_id, FrameReader::new(read), write, event_tx);

        let (bread, bwrite) = tokio::io::split(bridge_side);
        let bridge = FakeBridge {
            reader: FrameReader::new(bread),
            writer: bwrite,
        };
        (handle, reader, bridge, event_rx)
    }

    fn ok(data: Value) -> CallResult {
        CallResult::Ok { data }
    }

    fn err(code: ErrorCode) -> CallResult {
        CallResult::Err {
            code,
            message: "nope".into(),
        }
    }

    #[tokio::test]
    async fn test_player_state_round_trip() {
        let (handle, _reader, mut bridge, _events) = connect(1);
        let client = Arc::new(BridgeClient::new());
        client.attach(handle).await;

        let c = client.clone();
        let call = tokio::spawn(async move { c.player(GuildId(7)).await });

        let (id, request) = bridge.expect_call().await;
        assert!(matches!(request, Call::PlayerState { guild_id: GuildId(7) }));
        bridge
            .reply(
                id,
                ok(json!({
                    "current": {"identifier": "x", "title": "Song", "length_ms": 1000},
                    "paused": true,
                    "queue": []
                })),
            )
            .await;

        let snapshot = call.await.unwrap().unwrap();
        assert!(snapshot.paused);
        assert_eq!(
            snapshot.current,
            Some(Track {
                identifier: "x".into(),
                title: "Song".into(),
                length_ms: 1000,
                ..Default::default()
            })
        );
    }

    #[tokio::test]
    async fn test_error_codes_map_onto_engine_errors() {
        let (handle, _reader, mut bridge, _events) = connect(1);
        let client = Arc::new(BridgeClient::new());
        client.attach(handle).await;
        let message = MessageRef {
            channel_id: ChannelId(1),
            message_id: MessageId(2),
        };

        let c = client.clone();
        let edit = tokio::spawn(async move {
            c.edit(message, &PanelView::detached(Document::new("x"))).await
        });
        let (id, _) = bridge.expect_call().await;
        bridge.reply(id, err(ErrorCode::NotFound)).await;
        assert_eq!(edit.await.unwrap(), Err(TransportError::NotFound));

        let c = client.clone();
        let skip = tokio::spawn(async move { c.skip(GuildId(3)).await });
        let (id, _) = bridge.expect_call().await;
        bridge.reply(id, err(ErrorCode::NoPlayer)).await;
        assert_eq!(skip.await.unwrap(), Err(BackendError::NoPlayer(GuildId(3))));

        let c = client.clone();
        let voice = tokio::spawn(async move { c.voice_connected(GuildId(3)).await });
        let (id, _) = bridge.expect_call().await;
        bridge.reply(id, err(ErrorCode::Forbidden)).await;
        assert_eq!(
            voice.await.unwrap(),
            Err(TransportError::Forbidden("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_malformed_reply_is_a_transient_failure() {
        let (handle, _reader, mut bridge, _events) = connect(1);
        let client = Arc::new(BridgeClient::new());
        client.attach(handle).await;

        let c = client.clone();
        let exists = tokio::spawn(async move {
            c.exists(MessageRef {
                channel_id: ChannelId(1),
                message_id: MessageId(1),
            })
            .await
        });
        let (id, _) = bridge.expect_call().await;
        bridge.reply(id, ok(json!("yes"))).await;

        let result = exists.await.unwrap();
        assert!(matches!(result, Err(TransportError::Failed(_))));
        assert!(!result.unwrap_err().is_terminal());
    }

    #[tokio::test]
    async fn test_offline_client_is_unavailable() {
        let client = BridgeClient::new();
        assert!(!client.is_connected().await);
        assert!(matches!(
            client.player(GuildId(1)).await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            client.force_disconnect(GuildId(1)).await,
            Err(TransportError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let (_handle, _reader, mut bridge, mut events) = connect(1);
        let message = MessageRef {
            channel_id: ChannelId(4),
            message_id: MessageId(5),
        };
        bridge
            .send(Frame::Event {
                event: InboundEvent::ControlsDetached { message },
            })
            .await;

        match events.recv().await {
            Some(DaemonEvent::Inbound(InboundEvent::ControlsDetached { message: m })) => {
                assert_eq!(m, message)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let (_handle, _reader, mut bridge, mut events) = connect(1);
        let junk = b"{not json";
        let mut raw = (junk.len() as u32).to_be_bytes().to_vec();
        raw.extend_from_slice(junk);
        bridge.writer.write_all(&raw).await.unwrap();

        let message = MessageRef {
            channel_id: ChannelId(1),
            message_id: MessageId(1),
        };
        bridge
            .send(Frame::Event {
                event: InboundEvent::ControlsDetached { message },
            })
            .await;
        assert!(matches!(events.recv().await, Some(DaemonEvent::Inbound(_))));
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_calls() {
        let (handle, reader, mut bridge, _events) = connect(1);
        let h = handle.clone();
        let call = tokio::spawn(async move { h.call(Call::Stop { guild_id: GuildId(1) }).await });

        let _ = bridge.expect_call().await;
        drop(bridge);

        assert_eq!(call.await.unwrap(), Err(CallFailure::Closed));
        reader.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out() {
        let (handle, _reader, mut bridge, _events) = connect(1);
        let h = handle.clone();
        let call = tokio::spawn(async move { h.call(Call::Skip { guild_id: GuildId(1) }).await });

        let (id, _) = bridge.expect_call().await;
        assert_eq!(call.await.unwrap(), Err(CallFailure::Timeout(id)));
    }

    #[tokio::test]
    async fn test_newer_connection_replaces_older() {
        let (first, first_reader, _b1, _e1) = connect(1);
        let (second, _second_reader, _b2, _e2) = connect(2);
        let client = BridgeClient::new();

        client.attach(first).await;
        client.attach(second).await;
        // The replaced connection's reader stops on its own.
        first_reader.await.unwrap();

        assert!(!client.detach(1).await);
        assert!(client.is_connected().await);
        assert!(client.detach(2).await);
        assert!(!client.is_connected().await);
    }
}
