//! Live conversational sessions
//!
//! A session streams microphone audio to a remote live endpoint and plays the
//! spoken replies back while routing transcripts of both sides to a listener.

pub mod protocol;
mod session;
mod transcript;
mod transport;
mod websocket;

pub use protocol::{Control, Inbound, SessionSetup, TransportEvent};
pub use session::LiveSession;
pub use transcript::{SessionListener, Speaker, TranscriptEvent, TranscriptRouter, TranscriptSource};
pub use transport::{Connector, Flow, LiveLink, LiveSessionTransport, SessionState, Transition};
pub use websocket::WebSocketConnector;
