use super::connector::{InboundFrame, OutboundFrame, ProviderConnector, ProviderLink};
use super::messages::{self, Decoded, TranscriptFragment};
use crate::error::{RelayError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of a provider session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    Closing,
    Errored,
    Closed,
}

/// Why a session reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Graceful stop completed with the provider's final result
    FinalReceived,
    /// Graceful stop gave up waiting for the final result
    StopTimeout,
    /// The provider closed the socket
    ProviderClosed { code: Option<u16>, reason: String },
    /// The socket failed after it was open
    TransportFailed,
    /// The connection never opened
    ConnectFailed,
    /// The owner closed the session, or stopped it before it connected
    Disconnected,
}

/// Normalized event stream of one provider session.
///
/// `Closed` is always the last event and is sent exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Connected,
    Fragment(TranscriptFragment),
    Error(RelayError),
    Closed(CloseReason),
}

/// Timing and queueing knobs for provider sessions
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub connect_timeout: Duration,

    /// How long a graceful stop waits for the final result
    pub stop_timeout: Duration,

    /// Audio chunks queued towards the provider before `send_audio` reports a forwarding error
    pub audio_queue_capacity: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            audio_queue_capacity: 256,
        }
    }
}

/// Handle to one provider connection.
///
/// The connection itself is owned by a worker task. Dropping the handle
/// closes the connection, so a session never outlives its owner.
pub struct ProviderSession {
    id: String,
    state: watch::Receiver<SessionState>,
    audio: mpsc::Sender<Vec<u8>>,
    stop: Option<oneshot::Sender<()>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProviderSession {
    /// Create a session and start connecting in the background.
    ///
    /// Returns the handle and the session's event stream.
    pub fn start(
        connector: Arc<dyn ProviderConnector>,
        settings: ProviderSettings,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ProviderEvent>) {
        let id = format!("session_{}", uuid::Uuid::new_v4().simple());
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let (audio_tx, audio_rx) = mpsc::channel(settings.audio_queue_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        info!("Initialized provider session {} ({})", id, connector.name());

        let worker = SessionWorker {
            id: id.clone(),
            settings,
            state: state_tx,
            events: Some(event_tx),
            segment: 0,
            partial_open: false,
        };
        tokio::spawn(worker.run(
            connector,
            Signals {
                audio: audio_rx,
                stop: stop_rx,
                kill: kill_rx,
            },
        ));

        (
            Self {
                id,
                state: state_rx,
                audio: audio_tx,
                stop: Some(stop_tx),
                kill: Some(kill_tx),
            },
            event_rx,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Queue an audio chunk for the provider.
    ///
    /// Returns `Ok(false)` without sending when the session is not `Connected`.
    pub fn send_audio(&self, chunk: Vec<u8>) -> Result<bool> {
        if self.state() != SessionState::Connected {
            return Ok(false);
        }

        match self.audio.try_send(chunk) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Err(RelayError::Forwarding(
                "provider audio queue is full".to_string(),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RelayError::Forwarding(
                "provider session has ended".to_string(),
            )),
        }
    }

    /// Request a graceful stop. Idempotent.
    ///
    /// Completion is reported as `ProviderEvent::Closed` on the event stream,
    /// at the latest after the stop timeout.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            debug!("Graceful stop requested for {}", self.id);
            let _ = stop.send(());
        }
    }

    /// Close the connection immediately, without ending the stream gracefully.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(kill) = self.kill.take() {
            debug!("Force-closing provider session {}", self.id);
            let _ = kill.send(());
        }
    }
}

impl Drop for ProviderSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receiving ends of the handle's channels
struct Signals {
    audio: mpsc::Receiver<Vec<u8>>,
    stop: oneshot::Receiver<()>,
    kill: oneshot::Receiver<()>,
}

struct SessionWorker {
    id: String,
    settings: ProviderSettings,
    state: watch::Sender<SessionState>,
    /// Taken when `Closed` is emitted; listeners are detached from then on
    events: Option<mpsc::Sender<ProviderEvent>>,
    /// Index of the segment the next fragment belongs to
    segment: u64,
    /// A partial of the current segment was emitted and not yet finalized
    partial_open: bool,
}

impl SessionWorker {
    async fn run(mut self, connector: Arc<dyn ProviderConnector>, mut signals: Signals) {
        self.set_state(SessionState::Connecting);

        let connect_timeout = self.settings.connect_timeout;
        let session_id = self.id.clone();
        let connect = async move {
            match tokio::time::timeout(connect_timeout, connector.connect(&session_id)).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Connection(format!(
                    "connection timed out after {}ms",
                    connect_timeout.as_millis()
                ))),
            }
        };
        tokio::pin!(connect);

        let link = tokio::select! {
            biased;
            _ = &mut signals.kill => {
                self.finish(CloseReason::Disconnected).await;
                return;
            }
            _ = &mut signals.stop => {
                info!("Stop requested before provider connected ({})", self.id);
                self.finish(CloseReason::Disconnected).await;
                return;
            }
            result = &mut connect => match result {
                Ok(link) => link,
                Err(e) => {
                    error!("Failed to connect provider session {}: {}", self.id, e);
                    self.set_state(SessionState::Errored);
                    self.emit(ProviderEvent::Error(e)).await;
                    self.finish(CloseReason::ConnectFailed).await;
                    return;
                }
            },
        };

        self.set_state(SessionState::Connected);
        info!("Provider session {} connected", self.id);
        self.emit(ProviderEvent::Connected).await;

        let reason = self.pump(link, signals).await;
        self.finish(reason).await;
    }

    /// Relay between the handle and the open link until the session ends.
    async fn pump(&mut self, link: ProviderLink, mut signals: Signals) -> CloseReason {
        let ProviderLink {
            outbound,
            mut inbound,
        } = link;
        let mut stop_requested = false;
        let mut stop_deadline: Option<Instant> = None;

        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut signals.kill => break CloseReason::Disconnected,
                _ = wait_until(stop_deadline) => {
                    warn!(
                        "No final result within {}ms for {}, closing",
                        self.settings.stop_timeout.as_millis(),
                        self.id
                    );
                    break CloseReason::StopTimeout;
                }
                frame = inbound.recv() => match frame {
                    Some(InboundFrame::Text(raw)) => {
                        let was_final = self.handle_text(&raw).await;
                        if was_final && stop_deadline.is_some() {
                            break CloseReason::FinalReceived;
                        }
                    }
                    Some(InboundFrame::Closed { code, reason }) => {
                        info!("Provider closed session {} (code={:?}, reason={})", self.id, code, reason);
                        // Remote side is gone; dropping `outbound` releases the writer
                        return CloseReason::ProviderClosed { code, reason };
                    }
                    None => {
                        return CloseReason::ProviderClosed { code: None, reason: String::new() };
                    }
                    Some(InboundFrame::Error(cause)) => {
                        error!("Provider transport error on {}: {}", self.id, cause);
                        self.set_state(SessionState::Errored);
                        self.emit(ProviderEvent::Error(RelayError::Connection(cause))).await;
                        break CloseReason::TransportFailed;
                    }
                },
                result = &mut signals.stop, if !stop_requested => {
                    stop_requested = true;
                    if result.is_err() {
                        // Handle dropped; the kill branch ends the session
                        continue;
                    }
                    self.set_state(SessionState::Closing);
                    stop_deadline = Some(Instant::now() + self.settings.stop_timeout);
                    let close_stream = OutboundFrame::Control(messages::CLOSE_STREAM.to_string());
                    match push_frame(&outbound, close_stream) {
                        Ok(()) => info!("Sent CloseStream for {}", self.id),
                        Err(e) => warn!("Could not send CloseStream for {}: {}", self.id, e),
                    }
                }
                chunk = signals.audio.recv() => match chunk {
                    Some(chunk) => {
                        if stop_requested {
                            debug!("Dropping audio for {} while closing", self.id);
                            continue;
                        }
                        if let Err(e) = push_frame(&outbound, OutboundFrame::Audio(chunk)) {
                            warn!("Dropping audio chunk for {}: {}", self.id, e);
                            self.emit(ProviderEvent::Error(e)).await;
                        }
                    }
                    None => break CloseReason::Disconnected,
                },
            }
        };

        // The only place a link is closed from this side. A stalled link is
        // released when `outbound` and `inbound` drop.
        if let Err(e) = push_frame(&outbound, OutboundFrame::Close) {
            debug!("Close frame not queued for {}: {}", self.id, e);
        }
        reason
    }

    /// Decode and emit one text frame. Returns true if it was a final result.
    async fn handle_text(&mut self, raw: &str) -> bool {
        match messages::decode(raw) {
            Ok(Decoded::Transcript {
                text,
                is_final,
                confidence,
                start_secs,
                duration_secs,
            }) => {
                // Empty results are relayed only to close a showing partial;
                // an empty final still ends a graceful stop
                if text.is_empty() && !(is_final && self.partial_open) {
                    return is_final;
                }

                debug!(
                    "Received transcription for {} (final={}): {}",
                    self.id, is_final, text
                );
                let fragment = TranscriptFragment {
                    text,
                    is_final,
                    confidence,
                    segment: self.segment,
                    start_secs,
                    duration_secs,
                };
                if is_final {
                    self.segment += 1;
                }
                self.partial_open = !is_final;
                self.emit(ProviderEvent::Fragment(fragment)).await;
                is_final
            }
            Ok(Decoded::Control) => {
                debug!("Provider metadata received for {}", self.id);
                false
            }
            Err(e) => {
                error!("Error parsing provider message for {}: {}", self.id, e);
                self.emit(ProviderEvent::Error(e)).await;
                false
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    async fn emit(&self, event: ProviderEvent) {
        if let Some(events) = &self.events {
            if events.send(event).await.is_err() {
                debug!("No listener for provider session {}", self.id);
            }
        }
    }

    /// Enter `Closed`, emit it once and detach listeners.
    async fn finish(&mut self, reason: CloseReason) {
        if *self.state.borrow() == SessionState::Closed {
            return;
        }
        self.set_state(SessionState::Closed);
        info!("Provider session {} closed ({:?})", self.id, reason);
        if let Some(events) = self.events.take() {
            let _ = events.send(ProviderEvent::Closed(reason)).await;
        }
    }
}

/// Queue a frame on the link without waiting for the provider to drain it
fn push_frame(outbound: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) -> Result<()> {
    outbound.try_send(frame).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => {
            RelayError::Forwarding("provider is not reading from its socket".to_string())
        }
        mpsc::error::TrySendError::Closed(_) => {
            RelayError::Forwarding("provider socket is closed".to_string())
        }
    })
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
