// Shared test doubles: an in-memory provider connector and helpers to script it.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use transcribe_relay::provider::{InboundFrame, OutboundFrame, ProviderConnector, ProviderLink};
use transcribe_relay::RelayError;

/// The provider's end of a mocked link
pub struct MockProvider {
    pub session_id: String,
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub inbound: mpsc::Sender<InboundFrame>,
}

impl MockProvider {
    pub async fn send_text(&self, text: impl Into<String>) {
        self.inbound
            .send(InboundFrame::Text(text.into()))
            .await
            .expect("session stopped reading");
    }

    pub async fn send_result(&self, transcript: &str, is_final: bool, confidence: f32) {
        self.send_text(results_json(transcript, is_final, confidence)).await;
    }

    /// Next frame the session wrote, or None once the link is dropped
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        tokio::time::timeout(Duration::from_secs(30), self.outbound.recv())
            .await
            .expect("timed out waiting for provider frame")
    }

    /// Drain until the session drops the link
    pub async fn remaining_frames(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }
}

pub struct MockConnector {
    providers: mpsc::UnboundedSender<MockProvider>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    failure: Option<RelayError>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    /// Connector whose links open immediately
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockProvider>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            providers: tx,
            gate: Mutex::new(None),
            failure: None,
            connects: AtomicUsize::new(0),
        };
        (Arc::new(connector), rx)
    }

    /// Connector whose first link opens only when the returned sender fires.
    ///
    /// The provider end is handed out before the connection completes.
    pub fn gated() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<MockProvider>,
        oneshot::Sender<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel();
        let connector = Self {
            providers: tx,
            gate: Mutex::new(Some(gate_rx)),
            failure: None,
            connects: AtomicUsize::new(0),
        };
        (Arc::new(connector), rx, gate_tx)
    }

    /// Connector that always fails with `err`
    pub fn failing(err: RelayError) -> Arc<Self> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            providers: tx,
            gate: Mutex::new(None),
            failure: Some(err),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProviderConnector for MockConnector {
    async fn connect(&self, session_id: &str) -> Result<ProviderLink, RelayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let _ = self.providers.send(MockProvider {
            session_id: session_id.to_string(),
            outbound: outbound_rx,
            inbound: inbound_tx,
        });

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        Ok(ProviderLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Connector whose provider accepts one outbound frame and then never reads again
pub struct StalledConnector {
    links: Mutex<Vec<(mpsc::Receiver<OutboundFrame>, mpsc::Sender<InboundFrame>)>>,
}

impl StalledConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl ProviderConnector for StalledConnector {
    async fn connect(&self, _session_id: &str) -> Result<ProviderLink, RelayError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        // Both ends stay open so the link looks alive but full
        self.links.lock().unwrap().push((outbound_rx, inbound_tx));

        Ok(ProviderLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}

pub fn results_json(transcript: &str, is_final: bool, confidence: f32) -> String {
    serde_json::json!({
        "type": "Results",
        "channel_index": [0, 1],
        "duration": 1.2,
        "start": 0.0,
        "is_final": is_final,
        "speech_final": is_final,
        "channel": {
            "alternatives": [
                { "transcript": transcript, "confidence": confidence, "words": [] }
            ]
        }
    })
    .to_string()
}

pub async fn next_provider(rx: &mut mpsc::UnboundedReceiver<MockProvider>) -> MockProvider {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for provider connection")
        .expect("connector dropped")
}
