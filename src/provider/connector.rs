use crate::config::ProviderConfig;
use crate::error::{RelayError, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Frame sent towards the provider
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Raw audio chunk, sent as a binary frame
    Audio(Vec<u8>),
    /// JSON control message, sent as a text frame
    Control(String),
    /// Close the socket. Nothing is sent after this.
    Close,
}

/// Frame received from the provider
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    /// The provider closed the socket
    Closed { code: Option<u16>, reason: String },
    /// Transport-level failure; the socket is unusable afterwards
    Error(String),
}

/// An open provider connection, bridged onto channels.
///
/// Dropping `outbound` closes the socket; dropping `inbound` abandons it even
/// if a write is blocked. Sessions queue on `outbound` with `try_send` and never
/// wait for the provider to drain it.
pub struct ProviderLink {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Opens provider connections
///
/// Implementations:
/// - `DeepgramConnector`: authenticated WebSocket to the Deepgram listen API
/// - test connectors: in-memory channels
#[async_trait::async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Open a new link for `session_id`
    async fn connect(&self, session_id: &str) -> Result<ProviderLink>;

    /// Connector name for logging
    fn name(&self) -> &'static str;
}

const LINK_BUFFER: usize = 100;

/// Upper bound on the close handshake with the provider
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connector for the Deepgram streaming socket
#[derive(Debug, Clone)]
pub struct DeepgramConnector {
    api_key: Option<String>,
    endpoint: Option<String>,
}

impl DeepgramConnector {
    pub fn new(api_key: Option<String>, endpoint: Option<String>) -> Self {
        Self { api_key, endpoint }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.api_key.clone(), config.endpoint.clone())
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RelayError::Configuration("DEEPGRAM_API_KEY is not configured".into()))?;
        let endpoint = self
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| RelayError::Configuration("DEEPGRAM_WS_URL is not configured".into()))?;
        Ok((api_key, endpoint))
    }
}

#[async_trait::async_trait]
impl ProviderConnector for DeepgramConnector {
    async fn connect(&self, session_id: &str) -> Result<ProviderLink> {
        let (api_key, endpoint) = self.credentials()?;

        let mut request = endpoint
            .into_client_request()
            .map_err(|e| RelayError::Configuration(format!("Invalid provider endpoint: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", api_key))
            .map_err(|e| RelayError::Configuration(format!("Invalid API key: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        info!("Provider WebSocket connection established (session={})", session_id);

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(LINK_BUFFER);

        // Writer: channel -> socket. Gives up on a blocked write once the
        // session has dropped its end of the link.
        let writer_session = session_id.to_string();
        let writer_errors = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match frame {
                    OutboundFrame::Audio(chunk) => Message::Binary(chunk),
                    OutboundFrame::Control(text) => Message::Text(text),
                    OutboundFrame::Close => break,
                };
                tokio::select! {
                    biased;
                    result = sink.send(message) => {
                        if let Err(e) = result {
                            error!("Failed to write to provider (session={}): {}", writer_session, e);
                            let _ = writer_errors.send(InboundFrame::Error(e.to_string())).await;
                            return;
                        }
                    }
                    _ = writer_errors.closed() => {
                        warn!("Provider stopped reading, dropping socket (session={})", writer_session);
                        return;
                    }
                }
            }

            // Close requested or sender dropped
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Provider socket close (session={}): {}", writer_session, e),
                Err(_) => warn!("Provider socket close timed out (session={})", writer_session),
            }
            info!("Provider WebSocket closed by relay (session={})", writer_session);
        });

        // Reader: socket -> channel
        let reader_session = session_id.to_string();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = source.next() => message,
                    _ = inbound_tx.closed() => {
                        debug!("Session gone, stopping provider reader (session={})", reader_session);
                        return;
                    }
                };
                let Some(message) = message else {
                    break;
                };

                let frame = match message {
                    Ok(Message::Text(text)) => InboundFrame::Text(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => InboundFrame::Text(text),
                        Err(_) => {
                            warn!("Ignoring non-UTF8 binary frame from provider (session={})", reader_session);
                            continue;
                        }
                    },
                    Ok(Message::Close(close)) => {
                        let (code, reason) = close
                            .map(|c| (Some(u16::from(c.code)), c.reason.into_owned()))
                            .unwrap_or((None, String::new()));
                        let _ = inbound_tx.send(InboundFrame::Closed { code, reason }).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(InboundFrame::Error(e.to_string())).await;
                        return;
                    }
                };
                if inbound_tx.send(frame).await.is_err() {
                    // Session is gone
                    return;
                }
            }

            let _ = inbound_tx
                .send(InboundFrame::Closed { code: None, reason: String::new() })
                .await;
        });

        Ok(ProviderLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}
