use crate::provider::{SessionState, TranscriptFragment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// A finalized transcript segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,

    /// Segment index assigned by the provider session
    pub segment: u64,

    /// When the final result was received
    pub timestamp: DateTime<Utc>,
}

/// Transcript as the client sees it: finalized segments plus the live partial.
///
/// A partial replaces the previous partial; a final clears it and is appended once.
/// An empty final only clears the partial.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptLog {
    pub segments: Vec<TranscriptSegment>,
    pub partial: Option<String>,
}

impl TranscriptLog {
    pub fn apply(&mut self, fragment: &TranscriptFragment) {
        if fragment.is_final {
            self.partial = None;
            if fragment.text.is_empty() {
                return;
            }
            self.segments.push(TranscriptSegment {
                text: fragment.text.clone(),
                confidence: fragment.confidence,
                segment: fragment.segment,
                timestamp: Utc::now(),
            });
        } else {
            self.partial = Some(fragment.text.clone());
        }
    }

    /// Finalized text followed by the current partial, space separated
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .chain(self.partial.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Point-in-time view of a relay, served by the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct RelaySnapshot {
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    pub provider_session_id: Option<String>,
    pub provider_state: Option<SessionState>,
    pub ready: bool,
    pub title: Option<String>,
    pub language: Option<String>,
    pub sessions_started: usize,
    pub audio_chunks_forwarded: usize,
    pub audio_bytes_forwarded: usize,
    pub audio_chunks_dropped: usize,
    pub audio_chunks_buffered: usize,
    pub partials: usize,
    pub finals: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
pub(crate) struct RelayStatus {
    pub provider_session_id: Option<String>,
    pub provider_state: Option<SessionState>,
    pub title: Option<String>,
    pub language: Option<String>,
}

/// State of one relay shared with the gateway's registry.
///
/// Only the relay writes to it.
#[derive(Debug)]
pub struct RelayShared {
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    pub(crate) ready: AtomicBool,
    pub(crate) sessions_started: AtomicUsize,
    pub(crate) audio_chunks_forwarded: AtomicUsize,
    pub(crate) audio_bytes_forwarded: AtomicUsize,
    pub(crate) audio_chunks_dropped: AtomicUsize,
    pub(crate) audio_chunks_buffered: AtomicUsize,
    pub(crate) partials: AtomicUsize,
    pub(crate) finals: AtomicUsize,
    pub(crate) errors: AtomicUsize,
    pub(crate) status: Mutex<RelayStatus>,
    pub(crate) transcript: Mutex<TranscriptLog>,
}

impl RelayShared {
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            connected_at: Utc::now(),
            ready: AtomicBool::new(false),
            sessions_started: AtomicUsize::new(0),
            audio_chunks_forwarded: AtomicUsize::new(0),
            audio_bytes_forwarded: AtomicUsize::new(0),
            audio_chunks_dropped: AtomicUsize::new(0),
            audio_chunks_buffered: AtomicUsize::new(0),
            partials: AtomicUsize::new(0),
            finals: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            status: Mutex::new(RelayStatus::default()),
            transcript: Mutex::new(TranscriptLog::default()),
        }
    }

    pub async fn snapshot(&self) -> RelaySnapshot {
        let status = self.status.lock().await;

        RelaySnapshot {
            connection_id: self.connection_id.clone(),
            connected_at: self.connected_at,
            provider_session_id: status.provider_session_id.clone(),
            provider_state: status.provider_state,
            ready: self.ready.load(Ordering::SeqCst),
            title: status.title.clone(),
            language: status.language.clone(),
            sessions_started: self.sessions_started.load(Ordering::SeqCst),
            audio_chunks_forwarded: self.audio_chunks_forwarded.load(Ordering::SeqCst),
            audio_bytes_forwarded: self.audio_bytes_forwarded.load(Ordering::SeqCst),
            audio_chunks_dropped: self.audio_chunks_dropped.load(Ordering::SeqCst),
            audio_chunks_buffered: self.audio_chunks_buffered.load(Ordering::SeqCst),
            partials: self.partials.load(Ordering::SeqCst),
            finals: self.finals.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }

    /// Get accumulated transcript
    pub async fn transcript(&self) -> TranscriptLog {
        self.transcript.lock().await.clone()
    }
}
