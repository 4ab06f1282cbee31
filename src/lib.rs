//! Beacon Live - duplex voice sessions for AI assistants
//!
//! This library provides the real-time core of a hands-free voice session:
//! - Microphone capture and PCM16 encoding
//! - A duplex transport to a remote conversational endpoint
//! - Gapless, non-overlapping playback of streamed audio
//! - Ordered routing of caller and assistant transcripts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   blocks   ┌──────────────┐  chunks  ┌──────────────────┐
//! │  Microphone  ├───────────▶│   Encoder    ├─────────▶│                  │
//! └──────────────┘            └──────────────┘          │    Transport     │◀──▶ remote
//! ┌──────────────┐   audio    ┌──────────────┐          │  (state machine) │
//! │   Speaker    │◀───────────┤  Scheduler   │◀─────────┤                  │
//! └──────────────┘            └──────────────┘          └────────┬─────────┘
//!                             ┌──────────────┐    transcripts    │
//!                             │    Router    │◀──────────────────┘──▶ listener
//!                             └──────────────┘
//! ```
//!
//! [`LiveSession`] wires the pieces together and owns teardown.

pub mod config;
pub mod error;
pub mod live;
pub mod voice;

pub use config::LiveConfig;
pub use error::{Error, Result};
pub use live::{
    Connector, LiveSession, LiveSessionTransport, SessionListener, SessionState, Speaker,
    TranscriptEvent, TranscriptRouter, TranscriptSource, WebSocketConnector,
};
pub use voice::{
    AudioCaptureEncoder, AudioDevices, AudioFrame, AudioInput, AudioPlaybackScheduler,
    CpalDevices, PlaybackBackend, PlaybackEntry, PlaybackId,
};
