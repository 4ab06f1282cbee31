//! Shared test utilities
//!
//! A scripted live endpoint and fake audio hardware, so sessions can be
//! driven end to end without a network or sound card.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Notify, mpsc};

use beacon_live::live::protocol::{ClientMessage, ServerMessage};
use beacon_live::live::{LiveLink, SessionSetup, TransportEvent};
use beacon_live::voice::{AudioInput, PlaybackBackend, PlaybackEntry, PlaybackId, pcm};
use beacon_live::{
    AudioDevices, AudioFrame, Connector, Error, LiveConfig, LiveSession, Result, SessionListener,
    TranscriptEvent,
};

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, failing the test after two seconds
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

/// Session wired to a scripted endpoint and fake devices
pub fn test_session(endpoint: &Arc<FakeEndpoint>, devices: &Arc<FakeDevices>) -> LiveSession {
    let connector: Arc<dyn Connector> = endpoint.clone();
    let hardware: Arc<dyn AudioDevices> = devices.clone();
    LiveSession::new(LiveConfig::default(), connector, hardware)
}

/// Inbound frame carrying `samples` of 24kHz audio
pub fn audio_event(samples: usize) -> TransportEvent {
    let payload = pcm::encode_base64(&vec![0.1; samples]);
    message(json!({
        "serverContent": {
            "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": payload}}]}
        }
    }))
}

/// Inbound frame parsed from JSON
pub fn message(value: serde_json::Value) -> TransportEvent {
    TransportEvent::Message(
        serde_json::from_value::<ServerMessage>(value).expect("invalid server frame"),
    )
}

/// Test side of one connection
pub struct Remote {
    pub events: mpsc::Sender<TransportEvent>,
    pub sent: mpsc::Receiver<ClientMessage>,
}

impl Remote {
    /// Deliver an inbound event
    pub async fn push(&self, event: TransportEvent) {
        within(self.events.send(event))
            .await
            .expect("session stopped receiving");
    }

    /// Next frame the session sent
    pub async fn next_sent(&mut self) -> ClientMessage {
        within(self.sent.recv())
            .await
            .expect("session dropped its sender")
    }
}

#[derive(Default)]
struct EndpointState {
    refuse: Option<String>,
    hold: bool,
    outbound_capacity: Option<usize>,
    setups: Vec<SessionSetup>,
    remotes: Vec<Remote>,
}

/// Live endpoint whose connections are driven by the test
#[derive(Default)]
pub struct FakeEndpoint {
    state: Mutex<EndpointState>,
    release: Notify,
}

impl FakeEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every handshake with `reason`
    pub fn refusing(reason: &str) -> Arc<Self> {
        let endpoint = Self::default();
        endpoint.state.lock().unwrap().refuse = Some(reason.to_string());
        Arc::new(endpoint)
    }

    /// Stall handshakes until [`Self::release`] is called
    pub fn holding() -> Arc<Self> {
        let endpoint = Self::default();
        endpoint.state.lock().unwrap().hold = true;
        Arc::new(endpoint)
    }

    /// Bound the outbound queue of new connections
    pub fn with_outbound_capacity(capacity: usize) -> Arc<Self> {
        let endpoint = Self::default();
        endpoint.state.lock().unwrap().outbound_capacity = Some(capacity);
        Arc::new(endpoint)
    }

    /// Let a held handshake complete
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Number of handshakes attempted
    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().setups.len()
    }

    /// Setup of the most recent handshake
    pub fn last_setup(&self) -> SessionSetup {
        self.state
            .lock()
            .unwrap()
            .setups
            .last()
            .cloned()
            .expect("no handshake yet")
    }

    /// Take the test side of the oldest unclaimed connection
    pub fn take_remote(&self) -> Remote {
        let mut state = self.state.lock().unwrap();
        assert!(!state.remotes.is_empty(), "no connection yet");
        state.remotes.remove(0)
    }
}

#[async_trait]
impl Connector for FakeEndpoint {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveLink> {
        let hold = {
            let mut state = self.state.lock().unwrap();
            state.setups.push(setup.clone());
            if let Some(reason) = &state.refuse {
                return Err(Error::Connection(reason.clone()));
            }
            state.hold
        };

        if hold {
            self.release.notified().await;
        }

        let capacity = self.state.lock().unwrap().outbound_capacity.unwrap_or(64);
        let (outbound, sent) = mpsc::channel(capacity);
        let (events, inbound) = mpsc::channel(64);
        self.state
            .lock()
            .unwrap()
            .remotes
            .push(Remote { events, sent });

        Ok(LiveLink {
            outbound,
            inbound,
            writer: None,
            tasks: Vec::new(),
        })
    }
}

/// What the fake microphone saw
#[derive(Default)]
pub struct MicLog {
    opened: AtomicUsize,
    attached: AtomicUsize,
    detached: AtomicUsize,
    released: AtomicUsize,
    blocks: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl MicLog {
    /// Emit one captured block; false if nothing is attached or the queue is full
    pub fn emit(&self, frame: AudioFrame) -> bool {
        self.blocks
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.try_send(frame).is_ok())
    }

    /// Blocks waiting for the encoder
    pub fn queued(&self) -> usize {
        self.blocks
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeMicrophone {
    log: Arc<MicLog>,
    released: bool,
}

impl AudioInput for FakeMicrophone {
    fn attach(&mut self, _block_size: usize, blocks: mpsc::Sender<AudioFrame>) -> Result<()> {
        if self.released {
            return Err(Error::Audio("released".to_string()));
        }
        *self.log.blocks.lock().unwrap() = Some(blocks);
        self.log.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        match self.log.blocks.lock().unwrap().take() {
            Some(_) => {
                self.log.detached.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::Audio("not attached".to_string())),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::Audio("already released".to_string()));
        }
        self.released = true;
        self.log.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What the fake speaker saw
#[derive(Default, Clone)]
pub struct SpeakerLog {
    pub now: Duration,
    pub opened: usize,
    pub closed: usize,
    pub started: Vec<PlaybackEntry>,
    pub stopped: Vec<PlaybackId>,
    reported: Vec<PlaybackId>,
    next_id: u64,
}

/// Speaker driven by a hand-advanced clock
#[derive(Clone, Default)]
pub struct FakeSpeaker(Arc<Mutex<SpeakerLog>>);

impl FakeSpeaker {
    pub fn snapshot(&self) -> SpeakerLog {
        self.0.lock().unwrap().clone()
    }

    pub fn advance(&self, by: Duration) {
        self.0.lock().unwrap().now += by;
    }
}

impl PlaybackBackend for FakeSpeaker {
    fn current_time(&self) -> Duration {
        self.0.lock().unwrap().now
    }

    fn start_at(&mut self, frame: AudioFrame, at: Duration) -> Result<PlaybackId> {
        let mut log = self.0.lock().unwrap();
        if log.closed > 0 {
            return Err(Error::Audio("closed".to_string()));
        }
        log.next_id += 1;
        let id = PlaybackId(log.next_id);
        log.started.push(PlaybackEntry {
            id,
            start: at,
            duration: frame.duration(),
        });
        Ok(id)
    }

    fn stop(&mut self, id: PlaybackId) {
        self.0.lock().unwrap().stopped.push(id);
    }

    fn take_finished(&mut self) -> Vec<PlaybackId> {
        let mut log = self.0.lock().unwrap();
        let now = log.now;
        let finished: Vec<_> = log
            .started
            .iter()
            .filter(|e| e.end() <= now)
            .map(|e| e.id)
            .filter(|id| !log.stopped.contains(id) && !log.reported.contains(id))
            .collect();
        log.reported.extend(&finished);
        finished
    }

    fn close(&mut self) -> Result<()> {
        let mut log = self.0.lock().unwrap();
        log.closed += 1;
        if log.closed > 1 {
            return Err(Error::Audio("already closed".to_string()));
        }
        Ok(())
    }
}

/// Fake hardware shared by every session of a test
pub struct FakeDevices {
    pub mic: Arc<MicLog>,
    pub speaker: FakeSpeaker,
    deny_microphone: bool,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        let speaker = FakeSpeaker::default();
        speaker.advance(Duration::from_secs(5));
        Arc::new(Self {
            mic: Arc::default(),
            speaker,
            deny_microphone: false,
        })
    }

    /// Devices whose microphone refuses access
    pub fn denying_microphone() -> Arc<Self> {
        let devices = Self::new();
        Arc::new(Self {
            mic: Arc::clone(&devices.mic),
            speaker: devices.speaker.clone(),
            deny_microphone: true,
        })
    }
}

impl AudioDevices for FakeDevices {
    fn open_microphone(&self) -> Result<Box<dyn AudioInput>> {
        if self.deny_microphone {
            return Err(Error::Permission("access denied".to_string()));
        }
        self.mic.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMicrophone {
            log: Arc::clone(&self.mic),
            released: false,
        }))
    }

    fn open_speaker(&self) -> Result<Box<dyn PlaybackBackend>> {
        let mut log = self.speaker.0.lock().unwrap();
        log.opened += 1;
        log.closed = 0;
        drop(log);
        Ok(Box::new(self.speaker.clone()))
    }
}

/// Listener that records everything it receives
#[derive(Clone, Default)]
pub struct Recorder {
    pub transcripts: Arc<Mutex<Vec<TranscriptEvent>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn transcripts(&self) -> Vec<TranscriptEvent> {
        self.transcripts.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl SessionListener for Recorder {
    fn on_transcript(&mut self, event: TranscriptEvent) {
        self.transcripts.lock().unwrap().push(event);
    }

    fn on_error(&mut self, error: &Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
