//! Session lifecycle
//!
//! [`LiveSession`] acquires the microphone and speaker, opens the transport,
//! wires capture to the transport and the transport to playback and the
//! transcript listener, and tears everything down again in a fixed order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::protocol::TransportEvent;
use super::transcript::{SessionListener, TranscriptRouter};
use super::transport::{Connector, Flow, LiveSessionTransport, SessionState};
use super::websocket::WebSocketConnector;
use crate::config::LiveConfig;
use crate::voice::{
    AudioCaptureEncoder, AudioDevices, AudioInput, AudioPlaybackScheduler, CAPTURE_SAMPLE_RATE,
    CpalDevices, EncoderStats,
};
use crate::{Error, Result};

/// Everything acquired for an open session
struct SessionResources {
    microphone: Box<dyn AudioInput>,
    playback: Arc<Mutex<AudioPlaybackScheduler>>,
    encoder: JoinHandle<EncoderStats>,
    receiver: Option<JoinHandle<()>>,
}

struct Session {
    transport: Arc<LiveSessionTransport>,
    resources: Option<SessionResources>,
}

type Slot = Arc<Mutex<Option<Session>>>;

/// A voice conversation with a remote live endpoint
///
/// At most one session is active at a time. [`LiveSession::disconnect`] is
/// idempotent and safe before, during and after a connection attempt.
pub struct LiveSession {
    config: LiveConfig,
    connector: Arc<dyn Connector>,
    devices: Arc<dyn AudioDevices>,
    slot: Slot,
}

impl LiveSession {
    /// Create a session manager with explicit connector and devices
    #[must_use]
    pub fn new(
        config: LiveConfig,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        Self {
            config,
            connector,
            devices,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a session manager for the configured endpoint and default devices
    ///
    /// # Errors
    ///
    /// Returns a config error if the endpoint is invalid
    pub fn from_config(config: LiveConfig) -> Result<Self> {
        let connector = WebSocketConnector::from_config(&config)?;
        Ok(Self::new(config, Arc::new(connector), Arc::new(CpalDevices)))
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// State of the current session, `Idle` if none was started
    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.slot)
            .as_ref()
            .map_or(SessionState::Idle, |s| s.transport.state())
    }

    /// Identifier of the current session, if any
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        lock(&self.slot).as_ref().map(|s| s.transport.id())
    }

    /// Start time of the next buffer queued for playback, if any is pending
    #[must_use]
    pub fn next_start(&self) -> Option<Duration> {
        self.with_playback(AudioPlaybackScheduler::next_start)
            .flatten()
    }

    /// Number of scheduled or playing buffers
    #[must_use]
    pub fn active_playback(&self) -> usize {
        self.with_playback(AudioPlaybackScheduler::active_len)
            .unwrap_or_default()
    }

    fn with_playback<T>(&self, f: impl FnOnce(&AudioPlaybackScheduler) -> T) -> Option<T> {
        let slot = lock(&self.slot);
        let resources = slot.as_ref()?.resources.as_ref()?;
        let scheduler = lock(&resources.playback);
        Some(f(&scheduler))
    }

    /// Start a session, delivering transcripts and failures to `listener`
    ///
    /// Acquires the microphone, then the speaker, then performs the setup
    /// handshake. Audio capture starts only once the session is open.
    ///
    /// # Errors
    ///
    /// Returns `SessionActive` if a session is connecting or open, a
    /// permission error if the microphone is unavailable, or a connection
    /// error if the handshake fails. Everything acquired is released first.
    pub async fn connect<L>(&self, listener: L) -> Result<()>
    where
        L: SessionListener + 'static,
    {
        let transport = Arc::new(LiveSessionTransport::new());
        {
            let mut slot = lock(&self.slot);
            if slot.as_ref().is_some_and(|s| s.transport.state().is_active()) {
                return Err(Error::SessionActive);
            }
            transport.begin_connect()?;
            *slot = Some(Session {
                transport: Arc::clone(&transport),
                resources: None,
            });
        }

        tracing::info!(session = %transport.id(), "connecting live session");

        let devices = Arc::clone(&self.devices);
        let mut microphone = match run_blocking(move || devices.open_microphone()).await {
            Ok(microphone) => microphone,
            Err(e) => {
                transport.fail_connect();
                tracing::warn!(session = %transport.id(), error = %e, "microphone unavailable");
                return Err(match e {
                    Error::Permission(_) => e,
                    other => Error::Permission(other.to_string()),
                });
            }
        };

        let devices = Arc::clone(&self.devices);
        let speaker = match run_blocking(move || devices.open_speaker()).await {
            Ok(speaker) => speaker,
            Err(e) => {
                transport.fail_connect();
                release_devices(microphone, None).await;
                tracing::warn!(session = %transport.id(), error = %e, "speaker unavailable");
                return Err(e);
            }
        };
        let playback = Arc::new(Mutex::new(AudioPlaybackScheduler::new(speaker)));

        let inbound = match transport
            .open(self.connector.as_ref(), &self.config.setup())
            .await
        {
            Ok(inbound) => inbound,
            Err(e) => {
                release_devices(microphone, Some(playback)).await;
                return Err(e);
            }
        };

        let (block_tx, block_rx) = mpsc::channel(self.config.capture_queue.max(1));
        let encoder = tokio::spawn(
            AudioCaptureEncoder::new(CAPTURE_SAMPLE_RATE).run(block_rx, Arc::clone(&transport)),
        );
        let receiver = tokio::spawn(receive_loop(
            inbound,
            Arc::clone(&transport),
            Arc::clone(&playback),
            TranscriptRouter::new(listener),
            Arc::clone(&self.slot),
        ));
        let attached = microphone.attach(self.config.block_size, block_tx);

        let resources = SessionResources {
            microphone,
            playback,
            encoder,
            receiver: Some(receiver),
        };

        if let Err(e) = attached {
            shutdown_blocking(Arc::clone(&transport), resources).await;
            return Err(e);
        }

        let rejected = {
            let mut slot = lock(&self.slot);
            match slot.as_mut() {
                Some(session)
                    if Arc::ptr_eq(&session.transport, &transport)
                        && transport.state() == SessionState::Open =>
                {
                    session.resources = Some(resources);
                    None
                }
                _ => Some(resources),
            }
        };

        match rejected {
            None => {
                tracing::info!(session = %transport.id(), "live session connected");
                Ok(())
            }
            Some(resources) => {
                shutdown_blocking(Arc::clone(&transport), resources).await;
                Err(Error::Connection(
                    "session closed while connecting".to_string(),
                ))
            }
        }
    }

    /// End the current session and release everything it holds
    ///
    /// Safe to call at any time and more than once. Teardown errors are
    /// logged and ignored.
    pub fn disconnect(&self) {
        let current = lock(&self.slot)
            .as_mut()
            .map(|s| (Arc::clone(&s.transport), s.resources.take()));

        match current {
            Some((transport, Some(resources))) => shutdown(&transport, resources),
            Some((transport, None)) => transport.close(),
            None => tracing::debug!("disconnect with no session"),
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Audio(format!("device task failed: {e}")))?
}

fn release_quietly(microphone: &mut dyn AudioInput) {
    if let Err(e) = microphone.release() {
        tracing::debug!(error = %e, "microphone release failed");
    }
}

/// Release a session's resources in teardown order
///
/// Inbound handling is gated first so nothing is scheduled after playback
/// stops. Then: stop playback, stop the capture pipeline, release the
/// microphone, close the transport, release the speaker.
fn shutdown(transport: &LiveSessionTransport, resources: SessionResources) {
    let SessionResources {
        mut microphone,
        playback,
        encoder,
        receiver,
    } = resources;

    transport.begin_close();

    lock(&playback).stop_all();

    if let Err(e) = microphone.detach() {
        tracing::debug!(error = %e, "capture detach failed");
    }
    encoder.abort();

    release_quietly(microphone.as_mut());

    transport.finish_close();
    if let Some(receiver) = receiver {
        receiver.abort();
    }

    if let Err(e) = lock(&playback).close() {
        tracing::debug!(error = %e, "speaker close failed");
    }

    tracing::debug!(session = %transport.id(), "session resources released");
}

/// Release devices held by a connect attempt that never opened
async fn release_devices(
    mut microphone: Box<dyn AudioInput>,
    playback: Option<Arc<Mutex<AudioPlaybackScheduler>>>,
) {
    let released = tokio::task::spawn_blocking(move || {
        release_quietly(microphone.as_mut());
        if let Some(playback) = playback {
            if let Err(e) = lock(&playback).close() {
                tracing::debug!(error = %e, "speaker close failed");
            }
        }
    })
    .await;
    if let Err(e) = released {
        tracing::warn!(error = %e, "device release task failed");
    }
}

/// Run [`shutdown`] on the blocking pool; stopping device threads joins them
async fn shutdown_blocking(transport: Arc<LiveSessionTransport>, resources: SessionResources) {
    if let Err(e) = tokio::task::spawn_blocking(move || shutdown(&transport, resources)).await {
        tracing::warn!(error = %e, "session teardown task failed");
    }
}

/// Dispatch inbound events until the stream ends or fails
///
/// A failure while open tears the session down and reaches the listener
/// exactly once; a stream that ends because of a local disconnect does not.
async fn receive_loop<L: SessionListener>(
    mut inbound: mpsc::Receiver<TransportEvent>,
    transport: Arc<LiveSessionTransport>,
    playback: Arc<Mutex<AudioPlaybackScheduler>>,
    mut router: TranscriptRouter<L>,
    slot: Slot,
) {
    let error = loop {
        let Some(event) = inbound.recv().await else {
            break Error::Connection("transport stream ended".to_string());
        };
        if let Flow::Terminal(error) = transport.dispatch(event, &playback, &mut router) {
            break error;
        }
    };

    // Fault and claim under the slot lock so a new connect cannot replace
    // the session while it still holds devices
    let resources = {
        let mut current = lock(&slot);
        if !transport.fault() {
            tracing::debug!(session = %transport.id(), "receive loop stopped");
            return;
        }
        current
            .as_mut()
            .filter(|s| Arc::ptr_eq(&s.transport, &transport))
            .and_then(|s| s.resources.take())
    };

    tracing::warn!(session = %transport.id(), error = %error, "live session failed");

    match resources {
        Some(mut resources) => {
            // Detach rather than abort the running task
            resources.receiver.take();
            shutdown_blocking(Arc::clone(&transport), resources).await;
        }
        None => transport.finish_close(),
    }

    router.listener_mut().on_error(&error);
}
