//! Configuration management for Beacon live sessions
//!
//! Values are resolved from defaults, then the optional TOML file, then
//! environment variables. The CLI applies its flags last.

pub mod file;

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::live::SessionSetup;
use crate::voice::DEFAULT_BLOCK_SIZE;
use crate::{Error, Result};

pub use file::{
    LiveConfigFile, config_file_path, load_config_file, load_config_file_from, parse_config_file,
};

/// Gemini Live bidirectional streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for live sessions
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used for assistant speech
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Persona instruction sent with the session setup
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are Medicinal AI Voice Assistant. Helpful, calm, and knowledgeable about health.";

/// Name shown on the assistant's transcribed speech, matching the persona
pub const DEFAULT_ASSISTANT_NAME: &str = "Medicinal AI";

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CAPTURE_QUEUE: usize = 8;
const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Live session configuration
#[derive(Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint URL
    pub endpoint: String,

    /// API key for the endpoint
    /// Set via `GEMINI_API_KEY` (or `API_KEY`) env var
    pub api_key: Option<String>,

    /// Model identifier, without the `models/` prefix
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// System instruction text
    pub system_instruction: String,

    /// Label for the assistant's transcribed speech
    pub assistant_name: String,

    /// Request transcripts of the caller's speech
    pub transcribe_input: bool,

    /// Request transcripts of the assistant's speech
    pub transcribe_output: bool,

    /// Samples per captured block
    pub block_size: usize,

    /// Maximum wait for the setup handshake
    pub handshake_timeout: Duration,

    /// Captured blocks buffered ahead of the encoder
    pub capture_queue: usize,

    /// Encoded chunks buffered ahead of the socket
    pub outbound_queue: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            transcribe_input: true,
            transcribe_output: true,
            block_size: DEFAULT_BLOCK_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            capture_queue: DEFAULT_CAPTURE_QUEUE,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("system_instruction", &self.system_instruction)
            .field("assistant_name", &self.assistant_name)
            .field("transcribe_input", &self.transcribe_input)
            .field("transcribe_output", &self.transcribe_output)
            .field("block_size", &self.block_size)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("capture_queue", &self.capture_queue)
            .field("outbound_queue", &self.outbound_queue)
            .finish()
    }
}

impl LiveConfig {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_file(load_config_file());
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values present in a config file
    pub fn apply_file(&mut self, file: LiveConfigFile) {
        let session = file.session;
        if let Some(endpoint) = session.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(model) = session.model {
            self.model = model;
        }
        if let Some(voice) = session.voice {
            self.voice = voice;
        }
        if let Some(instruction) = session.system_instruction {
            self.system_instruction = instruction;
        }
        if let Some(name) = session.assistant_name {
            self.assistant_name = name;
        }
        if let Some(enabled) = session.transcribe_input {
            self.transcribe_input = enabled;
        }
        if let Some(enabled) = session.transcribe_output {
            self.transcribe_output = enabled;
        }
        if let Some(secs) = session.handshake_timeout_secs {
            self.handshake_timeout = Duration::from_secs(secs);
        }

        let audio = file.audio;
        if let Some(size) = audio.block_size {
            self.block_size = size;
        }
        if let Some(queue) = audio.capture_queue {
            self.capture_queue = queue;
        }
        if let Some(queue) = audio.outbound_queue {
            self.outbound_queue = queue;
        }

        if file.api_keys.gemini.is_some() {
            self.api_key = file.api_keys.gemini;
        }
    }

    /// Overlay environment variables read through `var`
    ///
    /// Reads `BEACON_LIVE_ENDPOINT`, `BEACON_LIVE_MODEL`, `BEACON_LIVE_VOICE`,
    /// `BEACON_LIVE_INSTRUCTION`, `BEACON_LIVE_ASSISTANT_NAME`, and
    /// `GEMINI_API_KEY` with `API_KEY` as a fallback.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty("BEACON_LIVE_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(model) = non_empty("BEACON_LIVE_MODEL") {
            self.model = model;
        }
        if let Some(voice) = non_empty("BEACON_LIVE_VOICE") {
            self.voice = voice;
        }
        if let Some(instruction) = non_empty("BEACON_LIVE_INSTRUCTION") {
            self.system_instruction = instruction;
        }
        if let Some(name) = non_empty("BEACON_LIVE_ASSISTANT_NAME") {
            self.assistant_name = name;
        }
        if let Some(key) = non_empty("GEMINI_API_KEY").or_else(|| non_empty("API_KEY")) {
            self.api_key = Some(key);
        }
    }

    /// Check values that would otherwise fail mid-session
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a WebSocket URL or a size is zero
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "endpoint must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }
        if self.block_size == 0 || self.capture_queue == 0 || self.outbound_queue == 0 {
            return Err(Error::Config(
                "block size and queue lengths must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Session parameters sent in the setup handshake
    #[must_use]
    pub fn setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
            transcribe_input: self.transcribe_input,
            transcribe_output: self.transcribe_output,
        }
    }
}
