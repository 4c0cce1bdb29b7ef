use super::config::{EarlyAudioPolicy, RelaySettings};
use super::protocol::{ClientMessage, ServerEvent, StartOptions};
use super::stats::RelayShared;
use crate::error::RelayError;
use crate::provider::{CloseReason, ProviderConnector, ProviderEvent, ProviderSession, SessionState};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Mediates one client connection and at most one provider session.
///
/// All commands and provider events for a connection are handled by `run`
/// on a single task, one at a time, in arrival order.
pub struct SessionRelay {
    connector: Arc<dyn ProviderConnector>,
    settings: RelaySettings,

    /// Events towards the client
    client: mpsc::Sender<ServerEvent>,

    session: Option<ProviderSession>,
    provider_events: Option<mpsc::Receiver<ProviderEvent>>,

    /// Provider signalled `Connected` for the current session
    ready: bool,

    /// A stop was requested and `stopped` has not been sent yet
    stop_pending: bool,

    /// Audio received before ready (`Buffer` policy)
    early_audio: VecDeque<Vec<u8>>,

    shared: Arc<RelayShared>,
}

impl SessionRelay {
    pub fn new(
        connection_id: String,
        connector: Arc<dyn ProviderConnector>,
        settings: RelaySettings,
        client: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            connector,
            settings,
            client,
            session: None,
            provider_events: None,
            ready: false,
            stop_pending: false,
            early_audio: VecDeque::new(),
            shared: Arc::new(RelayShared::new(connection_id)),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.shared.connection_id
    }

    /// Shared view of this relay for the gateway's registry
    pub fn shared(&self) -> Arc<RelayShared> {
        Arc::clone(&self.shared)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Drive the relay until the client disconnects or shutdown is signalled.
    ///
    /// The client disconnecting is observed as `inbound` closing.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ClientMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Relay started for {}", self.connection_id());

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(ClientMessage::Start(options)) => self.on_start(options).await,
                    Some(ClientMessage::Audio(chunk)) => self.on_audio(chunk).await,
                    Some(ClientMessage::Stop) => self.on_stop().await,
                    None => {
                        self.on_disconnect().await;
                        break;
                    }
                },
                event = next_event(&mut self.provider_events) => match event {
                    Some(event) => self.on_provider_event(event).await,
                    // Worker ended without reporting Closed
                    None => {
                        self.on_provider_event(ProviderEvent::Closed(CloseReason::TransportFailed))
                            .await
                    }
                },
                _ = shutdown_requested(&mut shutdown) => {
                    self.on_shutdown().await;
                    break;
                }
            }
        }

        info!("Relay finished for {}", self.connection_id());
    }

    /// Begin a transcription session. A no-op while one is already active.
    pub async fn on_start(&mut self, options: StartOptions) {
        if let Some(session) = &self.session {
            warn!(
                "Start ignored for {}: session {} is already active",
                self.connection_id(),
                session.id()
            );
            return;
        }

        let (session, events) = ProviderSession::start(
            Arc::clone(&self.connector),
            self.settings.provider.clone(),
            self.settings.event_buffer,
        );
        info!(
            "Starting session {} for {} (title={:?}, language={:?})",
            session.id(),
            self.connection_id(),
            options.title,
            options.language
        );

        {
            let mut status = self.shared.status.lock().await;
            status.provider_session_id = Some(session.id().to_string());
            status.provider_state = Some(SessionState::Connecting);
            status.title = options.title;
            status.language = options.language;
        }
        self.shared.sessions_started.fetch_add(1, Ordering::SeqCst);

        self.ready = false;
        self.stop_pending = false;
        self.early_audio.clear();
        self.session = Some(session);
        self.provider_events = Some(events);
    }

    /// Forward an audio chunk, or apply the early-audio policy before ready.
    pub async fn on_audio(&mut self, chunk: Vec<u8>) {
        if self.session.is_none() {
            self.report(RelayError::NotStarted).await;
            return;
        }

        if !self.ready {
            self.hold_early_audio(chunk);
            return;
        }

        self.forward(chunk).await;
    }

    /// Request a graceful stop; `stopped` follows once the provider session has closed.
    pub async fn on_stop(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.report(RelayError::NotStarted).await;
            return;
        };

        if self.stop_pending {
            debug!("Stop already in progress for {}", session.id());
            return;
        }

        info!("Stopping session {} for {}", session.id(), self.shared.connection_id);
        self.stop_pending = true;
        session.stop();
        self.early_audio.clear();
        self.shared.status.lock().await.provider_state = Some(SessionState::Closing);
    }

    /// Client went away: close the provider connection without a graceful stop.
    pub async fn on_disconnect(&mut self) {
        info!("Client disconnected: {}", self.connection_id());
        self.teardown().await;
    }

    /// Process shutdown: close the provider connection and tell the client.
    pub async fn on_shutdown(&mut self) {
        info!("Shutting down relay {}", self.connection_id());
        if self.teardown().await {
            self.emit(ServerEvent::SessionClosed).await;
        }
    }

    /// Translate one provider event into client events.
    pub async fn on_provider_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::Connected => {
                info!("Provider connected, ready to receive audio ({})", self.connection_id());
                self.ready = true;
                self.shared.ready.store(true, Ordering::SeqCst);
                self.shared.status.lock().await.provider_state = Some(SessionState::Connected);
                self.emit(ServerEvent::Ready).await;

                if !self.early_audio.is_empty() {
                    info!(
                        "Flushing {} buffered audio chunks for {}",
                        self.early_audio.len(),
                        self.connection_id()
                    );
                }
                while let Some(chunk) = self.early_audio.pop_front() {
                    self.forward(chunk).await;
                }
            }
            ProviderEvent::Fragment(fragment) => {
                let counter = if fragment.is_final {
                    &self.shared.finals
                } else {
                    &self.shared.partials
                };
                counter.fetch_add(1, Ordering::SeqCst);
                self.shared.transcript.lock().await.apply(&fragment);
                self.emit(ServerEvent::transcript(&fragment)).await;
            }
            ProviderEvent::Error(e) => {
                error!("Provider session error for {}: {}", self.connection_id(), e);
                self.report(e).await;
            }
            ProviderEvent::Closed(reason) => {
                info!("Provider session closed for {} ({:?})", self.connection_id(), reason);
                self.session = None;
                self.provider_events = None;
                self.ready = false;
                self.early_audio.clear();
                self.shared.ready.store(false, Ordering::SeqCst);
                self.shared.status.lock().await.provider_state = Some(SessionState::Closed);

                if self.stop_pending {
                    self.stop_pending = false;
                    self.emit(ServerEvent::Stopped).await;
                }
                self.emit(ServerEvent::SessionClosed).await;
            }
        }
    }

    fn hold_early_audio(&mut self, chunk: Vec<u8>) {
        match self.settings.early_audio {
            EarlyAudioPolicy::Buffer if self.settings.max_buffered_chunks > 0 => {
                if self.early_audio.len() >= self.settings.max_buffered_chunks {
                    self.early_audio.pop_front();
                    self.shared.audio_chunks_dropped.fetch_add(1, Ordering::SeqCst);
                    warn!("Early audio buffer full for {}, dropping oldest chunk", self.connection_id());
                }
                self.early_audio.push_back(chunk);
                self.shared.audio_chunks_buffered.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.shared.audio_chunks_dropped.fetch_add(1, Ordering::SeqCst);
                warn!("Provider not ready, discarding audio chunk ({})", self.connection_id());
            }
        }
    }

    async fn forward(&mut self, chunk: Vec<u8>) {
        let Some(session) = &self.session else {
            return;
        };

        let len = chunk.len();
        match session.send_audio(chunk) {
            Ok(true) => {
                self.shared.audio_chunks_forwarded.fetch_add(1, Ordering::SeqCst);
                self.shared.audio_bytes_forwarded.fetch_add(len, Ordering::SeqCst);
            }
            Ok(false) => {
                self.shared.audio_chunks_dropped.fetch_add(1, Ordering::SeqCst);
                warn!("Provider not connected, discarding audio chunk ({})", self.connection_id());
            }
            Err(e) => {
                self.shared.audio_chunks_dropped.fetch_add(1, Ordering::SeqCst);
                error!("Failed to forward audio chunk for {}: {}", self.connection_id(), e);
                self.report(e).await;
            }
        }
    }

    /// Force-close the owned session. Returns whether there was one.
    async fn teardown(&mut self) -> bool {
        self.provider_events = None;
        self.early_audio.clear();
        self.ready = false;
        self.stop_pending = false;
        self.shared.ready.store(false, Ordering::SeqCst);

        match self.session.take() {
            Some(mut session) => {
                session.close();
                self.shared.status.lock().await.provider_state = Some(SessionState::Closed);
                true
            }
            None => false,
        }
    }

    async fn report(&self, err: RelayError) {
        self.shared.errors.fetch_add(1, Ordering::SeqCst);
        self.emit(ServerEvent::error(&err)).await;
    }

    async fn emit(&self, event: ServerEvent) {
        let name = event.name();
        if self.client.send(event).await.is_err() {
            debug!("Client {} gone, dropped {} event", self.connection_id(), name);
        }
    }
}

/// Next event of the current session; pending forever while there is none.
async fn next_event(events: &mut Option<mpsc::Receiver<ProviderEvent>>) -> Option<ProviderEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves once shutdown is signalled or the signal source is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
