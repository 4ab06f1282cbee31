//! Live session transport
//!
//! Owns the connection to the remote endpoint for one session: the state
//! machine, the outbound queue, and classification of inbound frames.
//! Nothing is sent before the setup handshake completes and nothing inbound
//! is acted on once the session leaves [`SessionState::Open`].

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::protocol::{ClientMessage, Control, Inbound, SessionSetup, TransportEvent};
use super::transcript::{SessionListener, TranscriptRouter};
use crate::voice::{AudioPlaybackScheduler, ChunkSink, EncodedChunk};
use crate::{Error, Result};

/// How long the writer may keep running after close to flush a close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing acquired
    Idle,
    /// Acquiring devices and performing the handshake
    Connecting,
    /// Audio and transcripts are flowing
    Open,
    /// Teardown in progress
    Closing,
    /// Torn down
    Closed,
    /// Never opened
    Failed,
}

/// Events that move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Caller asked to connect
    Connect,
    /// Setup handshake completed
    Opened,
    /// Devices or handshake failed before opening
    Fail,
    /// Caller asked to disconnect
    Close,
    /// Remote error or close while open
    Fault,
    /// Teardown completed
    Finish,
}

impl SessionState {
    /// State reached by applying `transition`, if it is allowed
    #[must_use]
    pub const fn next(self, transition: Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Idle, Transition::Connect) => Some(Self::Connecting),
            (Self::Connecting, Transition::Opened) => Some(Self::Open),
            (Self::Connecting, Transition::Fail) => Some(Self::Failed),
            (Self::Connecting | Self::Open, Transition::Close)
            | (Self::Open, Transition::Fault) => Some(Self::Closing),
            (Self::Closing, Transition::Finish) => Some(Self::Closed),
            _ => None,
        }
    }

    /// True while connecting or open
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An established connection, handed over after a successful handshake
#[derive(Debug)]
pub struct LiveLink {
    /// Frames to send, in order
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Everything received from the remote, in arrival order
    pub inbound: mpsc::Receiver<TransportEvent>,
    /// Task draining `outbound`; it ends on its own once the sender is
    /// dropped and is aborted only if that takes longer than a grace period
    pub writer: Option<JoinHandle<()>>,
    /// Other background I/O tasks, aborted on teardown
    pub tasks: Vec<JoinHandle<()>>,
}

/// Opens connections to a live endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the setup handshake
    ///
    /// # Errors
    ///
    /// Returns error if the connection or handshake fails
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveLink>;
}

/// Outcome of dispatching one inbound event
#[derive(Debug)]
pub enum Flow {
    /// Keep receiving
    Continue,
    /// The stream ended or failed
    Terminal(Error),
}

struct Link {
    outbound: mpsc::Sender<ClientMessage>,
    writer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Connection to the remote endpoint for one session
pub struct LiveSessionTransport {
    id: Uuid,
    state: Mutex<SessionState>,
    link: Mutex<Option<Link>>,
}

impl Default for LiveSessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSessionTransport {
    /// Create an idle transport
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState::Idle),
            link: Mutex::new(None),
        }
    }

    /// Session identifier used in logs
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_guard()
    }

    fn state_guard(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link_guard(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, transition: Transition) -> bool {
        let mut state = self.state_guard();
        Self::apply_locked(self.id, &mut state, transition)
    }

    fn apply_locked(id: Uuid, state: &mut SessionState, transition: Transition) -> bool {
        match state.next(transition) {
            Some(next) => {
                tracing::debug!(session = %id, from = %state, to = %next, "session state");
                *state = next;
                true
            }
            None => false,
        }
    }

    /// Move from idle to connecting
    ///
    /// # Errors
    ///
    /// Returns `SessionActive` if this transport was already used
    pub fn begin_connect(&self) -> Result<()> {
        if self.apply(Transition::Connect) {
            Ok(())
        } else {
            Err(Error::SessionActive)
        }
    }

    /// Abandon a connection attempt before it opened
    pub fn fail_connect(&self) -> bool {
        self.apply(Transition::Fail)
    }

    /// Connect through `connector` and open the session
    ///
    /// Starts from idle or connecting. Returns the inbound event stream, which
    /// the caller feeds back through [`Self::dispatch`].
    ///
    /// # Errors
    ///
    /// Returns `SessionActive` if already open, or a connection error if the
    /// handshake fails or the session was closed before or during it
    pub async fn open(
        &self,
        connector: &dyn Connector,
        setup: &SessionSetup,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        {
            let mut state = self.state_guard();
            match *state {
                SessionState::Connecting => {}
                SessionState::Idle => {
                    Self::apply_locked(self.id, &mut state, Transition::Connect);
                }
                SessionState::Open => return Err(Error::SessionActive),
                SessionState::Closing | SessionState::Closed | SessionState::Failed => {
                    return Err(Error::Connection("session already closed".to_string()));
                }
            }
        }

        let link = match connector.connect(setup).await {
            Ok(link) => link,
            Err(e) => {
                self.fail_connect();
                tracing::warn!(session = %self.id, error = %e, "live handshake failed");
                return Err(match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(other.to_string()),
                });
            }
        };

        let LiveLink {
            outbound,
            inbound,
            writer,
            tasks,
        } = link;
        let link = Link {
            outbound,
            writer,
            tasks,
        };

        let mut state = self.state_guard();
        if !Self::apply_locked(self.id, &mut state, Transition::Opened) {
            drop(state);
            link.shut(self.id);
            return Err(Error::Connection(
                "session closed during handshake".to_string(),
            ));
        }
        *self.link_guard() = Some(link);
        drop(state);

        tracing::info!(session = %self.id, model = %setup.model, "live session open");
        Ok(inbound)
    }

    /// Queue one encoded audio chunk without blocking
    ///
    /// # Errors
    ///
    /// Returns a send error if the session is not open or the queue is full
    pub fn send(&self, chunk: EncodedChunk) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(Error::Send("session not open".to_string()));
        }

        let link = self.link_guard();
        let Some(link) = link.as_ref() else {
            return Err(Error::Send("transport closed".to_string()));
        };

        link.outbound
            .try_send(ClientMessage::audio(chunk))
            .map_err(|e| match e {
                TrySendError::Full(_) => Error::Send("outbound queue full".to_string()),
                TrySendError::Closed(_) => Error::Send("transport closed".to_string()),
            })
    }

    /// Act on one inbound event
    ///
    /// Audio goes to `playback` and text to `router`, but only while the
    /// session is open. Audio is scheduled under the state lock so teardown
    /// cannot interleave with it.
    pub fn dispatch<L: SessionListener>(
        &self,
        event: TransportEvent,
        playback: &Mutex<AudioPlaybackScheduler>,
        router: &mut TranscriptRouter<L>,
    ) -> Flow {
        for item in event.classify() {
            match item {
                Inbound::Audio { data, .. } => {
                    let state = self.state_guard();
                    if *state != SessionState::Open {
                        tracing::trace!(session = %self.id, "discarding audio after close");
                        continue;
                    }
                    let mut scheduler = playback.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = scheduler.enqueue_payload(&data) {
                        tracing::warn!(session = %self.id, error = %e, "skipping audio payload");
                    }
                }
                Inbound::Transcript { source, text } => {
                    if self.state() != SessionState::Open {
                        tracing::trace!(session = %self.id, "discarding transcript after close");
                        continue;
                    }
                    router.route(source, text);
                }
                Inbound::Control(control) => {
                    if let Some(error) = self.control(control, playback) {
                        return Flow::Terminal(error);
                    }
                }
            }
        }

        Flow::Continue
    }

    fn control(&self, control: Control, playback: &Mutex<AudioPlaybackScheduler>) -> Option<Error> {
        match control {
            Control::SetupComplete => {
                tracing::debug!(session = %self.id, "duplicate setup acknowledgement");
                None
            }
            Control::TurnComplete => {
                tracing::debug!(session = %self.id, "remote turn complete");
                None
            }
            Control::Interrupted => {
                let state = self.state_guard();
                if *state == SessionState::Open {
                    playback
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .stop_all();
                    tracing::debug!(session = %self.id, "remote turn interrupted");
                }
                None
            }
            Control::GoAway { time_left } => {
                tracing::warn!(
                    session = %self.id,
                    time_left = time_left.as_deref().unwrap_or("unknown"),
                    "remote is ending the session soon"
                );
                None
            }
            Control::Closed { reason } => Some(Error::Connection(match reason {
                Some(reason) => format!("closed by remote: {reason}"),
                None => "closed by remote".to_string(),
            })),
            Control::Fault(message) => Some(Error::Connection(message)),
        }
    }

    /// Mark an open session as failed; true if this call did it
    pub fn fault(&self) -> bool {
        self.apply(Transition::Fault)
    }

    /// Stop accepting inbound items; true if this call started the close
    pub fn begin_close(&self) -> bool {
        self.apply(Transition::Close)
    }

    /// Drop the connection and finish a close
    pub fn finish_close(&self) {
        if let Some(link) = self.link_guard().take() {
            link.shut(self.id);
        }
        if self.apply(Transition::Finish) {
            tracing::info!(session = %self.id, "live session closed");
        }
    }

    /// Close the session; safe to call in any state and more than once
    pub fn close(&self) {
        if self.begin_close() {
            self.finish_close();
        }
    }
}

impl Link {
    /// Stop the reader and let the writer flush a close frame
    fn shut(self, id: Uuid) {
        let Self {
            outbound,
            writer,
            tasks,
        } = self;

        drop(outbound);
        for task in tasks {
            task.abort();
        }

        let Some(mut writer) = writer else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                        tracing::debug!(session = %id, "writer still busy after close, aborting");
                        writer.abort();
                    }
                });
            }
            Err(_) => writer.abort(),
        }
    }
}

impl ChunkSink for LiveSessionTransport {
    fn send_chunk(&self, chunk: EncodedChunk) -> Result<()> {
        self.send(chunk)
    }
}

impl fmt::Debug for LiveSessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSessionTransport")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::live::protocol::ServerMessage;
    use crate::live::transcript::TranscriptEvent;
    use crate::voice::{AudioFrame, PlaybackBackend, PlaybackId, pcm};

    /// Records start times against a frozen clock
    #[derive(Default)]
    struct FrozenSpeaker {
        next_id: u64,
        stopped: usize,
    }

    impl PlaybackBackend for FrozenSpeaker {
        fn current_time(&self) -> Duration {
            Duration::ZERO
        }

        fn start_at(&mut self, _frame: AudioFrame, _at: Duration) -> Result<PlaybackId> {
            self.next_id += 1;
            Ok(PlaybackId(self.next_id))
        }

        fn stop(&mut self, _id: PlaybackId) {
            self.stopped += 1;
        }

        fn take_finished(&mut self) -> Vec<PlaybackId> {
            Vec::new()
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Connector returning a scripted link or error
    struct ScriptedConnector {
        fail: bool,
        inbound: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
        outbound: mpsc::Sender<ClientMessage>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _setup: &SessionSetup) -> Result<LiveLink> {
            if self.fail {
                return Err(Error::Connection("refused".to_string()));
            }
            let inbound = self
                .inbound
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Connection("used".to_string()))?;
            Ok(LiveLink {
                outbound: self.outbound.clone(),
                inbound,
                writer: None,
                tasks: Vec::new(),
            })
        }
    }

    struct Harness {
        connector: ScriptedConnector,
        events: mpsc::Sender<TransportEvent>,
        sent: mpsc::Receiver<ClientMessage>,
    }

    fn harness(fail: bool, queue: usize) -> Harness {
        let (events, inbound) = mpsc::channel(8);
        let (outbound, sent) = mpsc::channel(queue);
        Harness {
            connector: ScriptedConnector {
                fail,
                inbound: Mutex::new(Some(inbound)),
                outbound,
            },
            events,
            sent,
        }
    }

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "m".to_string(),
            voice: "v".to_string(),
            system_instruction: "s".to_string(),
            transcribe_input: true,
            transcribe_output: true,
        }
    }

    fn chunk() -> EncodedChunk {
        EncodedChunk {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAA=".to_string(),
        }
    }

    fn message(value: serde_json::Value) -> TransportEvent {
        TransportEvent::Message(serde_json::from_value::<ServerMessage>(value).unwrap())
    }

    fn playback() -> Mutex<AudioPlaybackScheduler> {
        Mutex::new(AudioPlaybackScheduler::new(Box::new(FrozenSpeaker::default())))
    }

    #[test]
    fn transition_table() {
        use SessionState::{Closed, Closing, Connecting, Failed, Idle, Open};

        assert_eq!(Idle.next(Transition::Connect), Some(Connecting));
        assert_eq!(Connecting.next(Transition::Opened), Some(Open));
        assert_eq!(Connecting.next(Transition::Fail), Some(Failed));
        assert_eq!(Connecting.next(Transition::Close), Some(Closing));
        assert_eq!(Open.next(Transition::Close), Some(Closing));
        assert_eq!(Open.next(Transition::Fault), Some(Closing));
        assert_eq!(Closing.next(Transition::Finish), Some(Closed));

        assert_eq!(Connecting.next(Transition::Connect), None);
        assert_eq!(Open.next(Transition::Connect), None);
        assert_eq!(Idle.next(Transition::Close), None);
        assert_eq!(Closing.next(Transition::Fault), None);
        assert_eq!(Closed.next(Transition::Connect), None);
        assert_eq!(Failed.next(Transition::Opened), None);

        assert!(Connecting.is_active() && Open.is_active());
        assert!(!Idle.is_active() && !Closed.is_active() && !Failed.is_active());
    }

    #[tokio::test]
    async fn open_then_send() {
        let mut h = harness(false, 4);
        let transport = LiveSessionTransport::new();

        assert!(transport.send(chunk()).is_err());
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();
        assert_eq!(transport.state(), SessionState::Open);

        transport.send(chunk()).unwrap();
        match h.sent.try_recv().unwrap() {
            ClientMessage::RealtimeInput(input) => assert_eq!(input.audio.data, "AAA="),
            ClientMessage::Setup(_) => panic!("unexpected setup frame"),
        }
    }

    #[tokio::test]
    async fn failed_handshake_is_terminal() {
        let h = harness(true, 4);
        let transport = LiveSessionTransport::new();

        let err = transport.open(&h.connector, &setup()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(transport.state(), SessionState::Failed);
        assert!(matches!(
            transport.open(&h.connector, &setup()).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn second_open_is_rejected() {
        let h = harness(false, 4);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();

        assert!(matches!(transport.begin_connect(), Err(Error::SessionActive)));
        assert!(matches!(
            transport.open(&h.connector, &setup()).await,
            Err(Error::SessionActive)
        ));
    }

    /// Closes the transport while its handshake is in flight
    struct CloseDuringConnect(Arc<LiveSessionTransport>);

    #[async_trait]
    impl Connector for CloseDuringConnect {
        async fn connect(&self, _setup: &SessionSetup) -> Result<LiveLink> {
            self.0.close();
            let (outbound, _sent) = mpsc::channel(1);
            let (_events, inbound) = mpsc::channel(1);
            Ok(LiveLink {
                outbound,
                inbound,
                writer: None,
                tasks: vec![tokio::spawn(std::future::pending::<()>())],
            })
        }
    }

    #[tokio::test]
    async fn close_during_handshake_discards_link() {
        let transport = Arc::new(LiveSessionTransport::new());
        let connector = CloseDuringConnect(Arc::clone(&transport));

        let err = transport.open(&connector, &setup()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(transport.state(), SessionState::Closed);
        assert!(transport.send(chunk()).is_err());
    }

    /// Connector whose writer reports whether it drained to the end
    struct DrainingConnector {
        drained: Mutex<Option<tokio::sync::oneshot::Sender<usize>>>,
    }

    #[async_trait]
    impl Connector for DrainingConnector {
        async fn connect(&self, _setup: &SessionSetup) -> Result<LiveLink> {
            let (outbound, mut queued) = mpsc::channel(4);
            let (_events, inbound) = mpsc::channel(1);
            let drained = self.drained.lock().unwrap().take();
            let writer = tokio::spawn(async move {
                let mut frames = 0;
                while queued.recv().await.is_some() {
                    frames += 1;
                }
                if let Some(drained) = drained {
                    let _ = drained.send(frames);
                }
            });
            Ok(LiveLink {
                outbound,
                inbound,
                writer: Some(writer),
                tasks: vec![tokio::spawn(std::future::pending::<()>())],
            })
        }
    }

    #[tokio::test]
    async fn close_lets_the_writer_finish() {
        let (drained_tx, drained_rx) = tokio::sync::oneshot::channel();
        let connector = DrainingConnector {
            drained: Mutex::new(Some(drained_tx)),
        };
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&connector, &setup()).await.unwrap();

        transport.send(chunk()).unwrap();
        transport.close();

        let frames = tokio::time::timeout(Duration::from_secs(2), drained_rx)
            .await
            .unwrap()
            .expect("writer was aborted before draining");
        assert_eq!(frames, 1);
        assert_eq!(transport.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn full_queue_fails_the_send_only() {
        let h = harness(false, 1);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();

        transport.send(chunk()).unwrap();
        assert!(matches!(transport.send(chunk()), Err(Error::Send(_))));
        assert_eq!(transport.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn dispatch_routes_audio_and_text() {
        let h = harness(false, 4);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();
        let playback = playback();
        let mut seen: Vec<String> = Vec::new();

        {
            let mut router = TranscriptRouter::new(|e: TranscriptEvent| seen.push(e.to_string()));
            let payload = pcm::encode_base64(&[0.0; 2400]);
            let flow = transport.dispatch(
                message(json!({
                    "serverContent": {
                        "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": payload}}]},
                        "inputTranscription": {"text": "hello"}
                    }
                })),
                &playback,
                &mut router,
            );
            assert!(matches!(flow, Flow::Continue));
        }

        assert_eq!(seen, vec!["You: hello".to_string()]);
        let scheduler = playback.lock().unwrap();
        assert_eq!(scheduler.active_len(), 1);
        assert_eq!(scheduler.next_start(), Some(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn bad_audio_is_skipped() {
        let h = harness(false, 4);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();
        let playback = playback();
        let mut router = TranscriptRouter::new(|_: TranscriptEvent| {});

        let flow = transport.dispatch(
            message(json!({
                "serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "%%"}}]}}
            })),
            &playback,
            &mut router,
        );

        assert!(matches!(flow, Flow::Continue));
        assert_eq!(playback.lock().unwrap().active_len(), 0);
        assert_eq!(transport.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn interruption_stops_playback() {
        let h = harness(false, 4);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();
        let playback = playback();
        let mut router = TranscriptRouter::new(|_: TranscriptEvent| {});

        let payload = pcm::encode_base64(&[0.0; 2400]);
        playback.lock().unwrap().enqueue_payload(&payload).unwrap();
        transport.dispatch(
            message(json!({"serverContent": {"interrupted": true}})),
            &playback,
            &mut router,
        );

        assert_eq!(playback.lock().unwrap().active_len(), 0);
        assert_eq!(playback.lock().unwrap().next_start(), None);
    }

    #[tokio::test]
    async fn nothing_is_dispatched_after_close() {
        let h = harness(false, 4);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();
        let playback = playback();
        let mut routed = 0;

        transport.close();
        assert_eq!(transport.state(), SessionState::Closed);
        {
            let mut router = TranscriptRouter::new(|_: TranscriptEvent| routed += 1);
            let payload = pcm::encode_base64(&[0.0; 240]);
            transport.dispatch(
                message(json!({
                    "serverContent": {
                        "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": payload}}]},
                        "outputTranscription": {"text": "late"}
                    }
                })),
                &playback,
                &mut router,
            );
        }

        assert_eq!(routed, 0);
        assert_eq!(playback.lock().unwrap().active_len(), 0);
        assert!(matches!(transport.send(chunk()), Err(Error::Send(_))));
    }

    #[tokio::test]
    async fn remote_close_is_terminal_and_faults_once() {
        let h = harness(false, 4);
        let transport = LiveSessionTransport::new();
        let _inbound = transport.open(&h.connector, &setup()).await.unwrap();
        let playback = playback();
        let mut router = TranscriptRouter::new(|_: TranscriptEvent| {});

        let flow = transport.dispatch(
            TransportEvent::Closed {
                reason: Some("quota".to_string()),
            },
            &playback,
            &mut router,
        );
        match flow {
            Flow::Terminal(Error::Connection(message)) => assert!(message.contains("quota")),
            other => panic!("unexpected flow {other:?}"),
        }

        assert!(transport.fault());
        assert!(!transport.fault());
        assert_eq!(transport.state(), SessionState::Closing);
        transport.finish_close();
        assert_eq!(transport.state(), SessionState::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let transport = LiveSessionTransport::new();
        transport.close();
        transport.close();
        assert_eq!(transport.state(), SessionState::Idle);

        transport.begin_connect().unwrap();
        transport.close();
        transport.close();
        assert_eq!(transport.state(), SessionState::Closed);
    }
}
