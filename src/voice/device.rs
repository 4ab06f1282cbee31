//! Audio device access
//!
//! cpal streams cannot move between threads on every platform, so each one
//! lives on a dedicated worker thread that owns it until release.

use std::sync::mpsc;
use std::thread::JoinHandle;

use super::capture::{AudioInput, MicrophoneCapture};
use super::playback::SpeakerOutput;
use super::scheduler::PlaybackBackend;
use crate::{Error, Result};

/// Opens the hardware a live session needs
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone
    ///
    /// # Errors
    ///
    /// Returns a permission error if access is refused or no device exists
    fn open_microphone(&self) -> Result<Box<dyn AudioInput>>;

    /// Acquire the speaker
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    fn open_speaker(&self) -> Result<Box<dyn PlaybackBackend>>;
}

/// Default input and output devices of the cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_microphone(&self) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(MicrophoneCapture::open()?))
    }

    fn open_speaker(&self) -> Result<Box<dyn PlaybackBackend>> {
        Ok(Box::new(SpeakerOutput::open()?))
    }
}

/// Thread that builds a stream and keeps it alive until stopped
pub struct StreamWorker {
    name: String,
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl StreamWorker {
    /// Run `build` on a new thread and wait for it to report
    ///
    /// # Errors
    ///
    /// Returns the build error, or an audio error if the thread dies first
    pub fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Returns on stop or when the worker handle is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name: name.to_string(),
                shutdown: shutdown_tx,
                thread,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Audio(format!("{name} worker exited before starting")))
            }
        }
    }

    /// Drop the stream and join the thread
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            tracing::warn!(worker = %self.name, "audio worker panicked");
        }
    }
}
