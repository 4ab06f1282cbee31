//! Gapless playback scheduling
//!
//! Streamed audio arrives in jittery bursts. Each buffer is started at
//! `max(next_start, now)` and advances the cursor by its duration, so buffers
//! play back-to-back while data is ahead of real time and never overlap. When
//! the clock overtakes the cursor the next buffer starts immediately and the
//! underrun is heard as a short gap.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::frame::AudioFrame;
use super::pcm;
use crate::Result;

/// Sample rate of streamed assistant audio (24kHz)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Identifier of one scheduled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Output device able to start buffers at precise clock times
pub trait PlaybackBackend: Send {
    /// Current playback clock time
    fn current_time(&self) -> Duration;

    /// Start `frame` at clock time `at`
    ///
    /// # Errors
    ///
    /// Returns error if the device is closed or rejects the buffer
    fn start_at(&mut self, frame: AudioFrame, at: Duration) -> Result<PlaybackId>;

    /// Halt a scheduled or playing buffer
    fn stop(&mut self, id: PlaybackId);

    /// Ids of buffers that finished playing since the last call
    fn take_finished(&mut self) -> Vec<PlaybackId>;

    /// Release the output device
    ///
    /// # Errors
    ///
    /// Returns error if the device was already released
    fn close(&mut self) -> Result<()>;
}

/// A buffer that is scheduled or playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEntry {
    /// Backend handle
    pub id: PlaybackId,
    /// Resolved start time on the playback clock
    pub start: Duration,
    /// Buffer duration
    pub duration: Duration,
}

impl PlaybackEntry {
    /// Scheduled end time
    #[must_use]
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Orders decoded buffers into gapless, non-overlapping playback
pub struct AudioPlaybackScheduler {
    backend: Box<dyn PlaybackBackend>,
    sample_rate: u32,
    next_start: Option<Duration>,
    active: HashMap<PlaybackId, PlaybackEntry>,
}

impl AudioPlaybackScheduler {
    /// Create a scheduler for 24kHz streamed audio
    #[must_use]
    pub fn new(backend: Box<dyn PlaybackBackend>) -> Self {
        Self::with_sample_rate(backend, PLAYBACK_SAMPLE_RATE)
    }

    /// Create a scheduler for audio at `sample_rate`
    #[must_use]
    pub fn with_sample_rate(backend: Box<dyn PlaybackBackend>, sample_rate: u32) -> Self {
        Self {
            backend,
            sample_rate,
            next_start: None,
            active: HashMap::new(),
        }
    }

    /// Decode a base64 PCM16 payload and schedule it
    ///
    /// Returns `None` for an empty payload.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is malformed or the backend rejects it
    pub fn enqueue_payload(&mut self, payload: &str) -> Result<Option<PlaybackEntry>> {
        let samples = pcm::decode_base64(payload)?;
        self.schedule(AudioFrame::new(samples, self.sample_rate))
    }

    /// Schedule a decoded buffer right after everything already queued
    ///
    /// Returns `None` for an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the buffer; the cursor is left
    /// untouched in that case
    pub fn schedule(&mut self, frame: AudioFrame) -> Result<Option<PlaybackEntry>> {
        if frame.is_empty() {
            return Ok(None);
        }

        self.reap();

        let now = self.backend.current_time();
        let start = match self.next_start {
            Some(next) if next >= now => next,
            Some(next) => {
                tracing::trace!(gap = ?(now - next), "playback underrun");
                now
            }
            None => now,
        };
        let duration = frame.duration();

        let id = self.backend.start_at(frame, start)?;
        let entry = PlaybackEntry {
            id,
            start,
            duration,
        };
        self.next_start = Some(entry.end());
        self.active.insert(id, entry);

        tracing::trace!(%id, start = ?start, duration = ?duration, "scheduled audio");
        Ok(Some(entry))
    }

    /// Drop handles the backend reports as finished
    pub fn reap(&mut self) {
        for id in self.backend.take_finished() {
            self.active.remove(&id);
        }
    }

    /// Halt everything, clear the active set and reset the cursor
    pub fn stop_all(&mut self) {
        let stopped = self.active.len();
        for (id, _) in self.active.drain() {
            self.backend.stop(id);
        }
        // Stopped buffers may still be reported as finished
        drop(self.backend.take_finished());
        self.next_start = None;

        if stopped > 0 {
            tracing::debug!(stopped, "stopped playback");
        }
    }

    /// Stop everything and release the output device
    ///
    /// # Errors
    ///
    /// Returns error if the device was already released
    pub fn close(&mut self) -> Result<()> {
        self.stop_all();
        self.backend.close()
    }

    /// Cursor where the next buffer will start, if any is queued
    #[must_use]
    pub const fn next_start(&self) -> Option<Duration> {
        self.next_start
    }

    /// Number of scheduled or playing buffers
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Scheduled or playing buffers, ordered by start time
    #[must_use]
    pub fn active_entries(&self) -> Vec<PlaybackEntry> {
        let mut entries: Vec<_> = self.active.values().copied().collect();
        entries.sort_by_key(|e| e.start);
        entries
    }

    /// Current playback clock time
    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.backend.current_time()
    }
}

impl fmt::Debug for AudioPlaybackScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPlaybackScheduler")
            .field("sample_rate", &self.sample_rate)
            .field("next_start", &self.next_start)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}
