//! Transcript routing
//!
//! Fragments are forwarded to the listener exactly as they arrive: no
//! buffering, merging, reordering or deduplication. Whether a fragment is a
//! whole utterance or an increment is up to the remote endpoint.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Error;
use crate::config::DEFAULT_ASSISTANT_NAME;

/// Who spoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The local user
    Caller,
    /// The remote assistant
    Remote,
}

/// Inbound channel a fragment arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// Transcription of the caller's speech
    CallerTranscription,
    /// Transcription of the remote's speech
    RemoteTranscription,
    /// Text the remote sent directly
    RemoteText,
}

impl TranscriptSource {
    /// Speaker tag for this channel
    #[must_use]
    pub const fn speaker(self) -> Speaker {
        match self {
            Self::CallerTranscription => Speaker::Caller,
            Self::RemoteTranscription | Self::RemoteText => Speaker::Remote,
        }
    }

    /// Display label used in transcript lines
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CallerTranscription => "You",
            Self::RemoteTranscription => DEFAULT_ASSISTANT_NAME,
            Self::RemoteText => "Model",
        }
    }
}

/// One routed transcript fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEvent {
    /// Arrival position within the session, starting at 0
    pub seq: u64,
    /// Inbound channel
    pub source: TranscriptSource,
    /// Fragment text as received
    pub text: String,
    /// When the fragment was routed
    pub received_at: DateTime<Utc>,
}

impl TranscriptEvent {
    /// Speaker tag
    #[must_use]
    pub const fn speaker(&self) -> Speaker {
        self.source.speaker()
    }

    /// Transcript line with the remote's transcribed speech labelled `assistant_name`
    #[must_use]
    pub fn line(&self, assistant_name: &str) -> String {
        let label = match self.source {
            TranscriptSource::RemoteTranscription => assistant_name,
            other => other.label(),
        };
        format!("{label}: {}", self.text)
    }
}

impl fmt::Display for TranscriptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source.label(), self.text)
    }
}

/// Receives transcript fragments and session failures
///
/// Any `FnMut(TranscriptEvent)` closure is a listener that ignores errors.
pub trait SessionListener: Send {
    /// Called once per fragment, in arrival order
    fn on_transcript(&mut self, event: TranscriptEvent);

    /// Called at most once when an open session fails
    fn on_error(&mut self, error: &Error) {
        let _ = error;
    }
}

impl<F> SessionListener for F
where
    F: FnMut(TranscriptEvent) + Send,
{
    fn on_transcript(&mut self, event: TranscriptEvent) {
        self(event);
    }
}

/// Forwards fragments to a listener in arrival order
pub struct TranscriptRouter<L> {
    listener: L,
    next_seq: u64,
}

impl<L: SessionListener> TranscriptRouter<L> {
    /// Create a router feeding `listener`
    pub const fn new(listener: L) -> Self {
        Self {
            listener,
            next_seq: 0,
        }
    }

    /// Forward one fragment, returning its sequence number
    pub fn route(&mut self, source: TranscriptSource, text: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        tracing::trace!(seq, ?source, "routing transcript fragment");
        self.listener.on_transcript(TranscriptEvent {
            seq,
            source,
            text,
            received_at: Utc::now(),
        });
        seq
    }

    /// Number of fragments routed so far
    #[must_use]
    pub const fn routed(&self) -> u64 {
        self.next_seq
    }

    /// Access the listener
    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Recover the listener
    pub fn into_listener(self) -> L {
        self.listener
    }
}
