//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-live/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveConfigFile {
    /// Remote session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Capture and playback tuning
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Remote session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// WebSocket endpoint URL
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Zephyr")
    pub voice: Option<String>,

    /// System instruction sent with the session setup
    pub system_instruction: Option<String>,

    /// Name shown on the assistant's transcribed speech
    pub assistant_name: Option<String>,

    /// Request transcripts of the caller's speech
    pub transcribe_input: Option<bool>,

    /// Request transcripts of the assistant's speech
    pub transcribe_output: Option<bool>,

    /// Seconds to wait for the setup handshake
    pub handshake_timeout_secs: Option<u64>,
}

/// Capture and playback tuning
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per captured block
    pub block_size: Option<usize>,

    /// Captured blocks buffered ahead of the encoder
    pub capture_queue: Option<usize>,

    /// Encoded chunks buffered ahead of the socket
    pub outbound_queue: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveConfigFile {
    let Some(path) = config_file_path() else {
        return LiveConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> LiveConfigFile {
    if !path.exists() {
        return LiveConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LiveConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LiveConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<LiveConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/omni/beacon-live/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-live")
            .join("config.toml")
    })
}
