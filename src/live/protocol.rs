//! Wire messages for the live conversational endpoint
//!
//! Frames are JSON objects keyed by message kind (`setup`, `realtimeInput`
//! outbound; `setupComplete`, `serverContent`, `goAway` inbound).

use serde::{Deserialize, Serialize};

use super::transcript::TranscriptSource;
use crate::voice::EncodedChunk;

/// Session parameters sent in the setup handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model identifier, with or without the `models/` prefix
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// System instruction text
    pub system_instruction: String,
    /// Request transcripts of the caller's speech
    pub transcribe_input: bool,
    /// Request transcripts of the remote's speech
    pub transcribe_output: bool,
}

/// Message sent to the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First frame of every session
    Setup(SetupPayload),
    /// Streamed microphone audio
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Build the setup frame
    #[must_use]
    pub fn setup(setup: &SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        Self::Setup(SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: setup.system_instruction.clone(),
                }],
            },
            input_audio_transcription: setup.transcribe_input.then_some(Enabled {}),
            output_audio_transcription: setup.transcribe_output.then_some(Enabled {}),
        })
    }

    /// Wrap one encoded audio chunk
    #[must_use]
    pub fn audio(chunk: EncodedChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            },
        })
    }
}

/// Body of the setup frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Enabled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Enabled>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

/// Requested response modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Empty object that switches a feature on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Enabled {}

/// Body of a realtime input frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

/// Inline binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

/// Message received from the endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Everything a connector can report from the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A parsed server frame
    Message(ServerMessage),
    /// The remote closed the stream
    Closed { reason: Option<String> },
    /// The stream failed
    Error(String),
}

/// One classified inbound item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Base64 PCM audio for the playback scheduler
    Audio { mime_type: String, data: String },
    /// Text fragment for the transcript router
    Transcript {
        source: TranscriptSource,
        text: String,
    },
    /// Signal for the session state machine
    Control(Control),
}

/// Control and error signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Setup handshake acknowledged
    SetupComplete,
    /// The remote finished its turn
    TurnComplete,
    /// The remote abandoned its turn because the caller spoke
    Interrupted,
    /// The remote will close the session soon
    GoAway { time_left: Option<String> },
    /// The remote closed the session
    Closed { reason: Option<String> },
    /// The stream failed
    Fault(String),
}

impl TransportEvent {
    /// Split into classified items
    ///
    /// Items keep frame order: setup acknowledgement, model-turn parts (audio
    /// and direct text) in part order, remote transcription, caller
    /// transcription, then turn signals and `goAway`.
    #[must_use]
    pub fn classify(self) -> Vec<Inbound> {
        match self {
            Self::Closed { reason } => vec![Inbound::Control(Control::Closed { reason })],
            Self::Error(message) => vec![Inbound::Control(Control::Fault(message))],
            Self::Message(message) => classify_message(message),
        }
    }
}

fn classify_message(message: ServerMessage) -> Vec<Inbound> {
    let mut items = Vec::new();

    if message.setup_complete.is_some() {
        items.push(Inbound::Control(Control::SetupComplete));
    }

    if let Some(content) = message.server_content {
        let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
        for part in parts {
            if let Some(blob) = part.inline_data {
                if blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/") {
                    items.push(Inbound::Audio {
                        mime_type: blob.mime_type,
                        data: blob.data,
                    });
                } else {
                    tracing::trace!(mime_type = %blob.mime_type, "ignoring non-audio inline data");
                }
            }
            push_text(&mut items, TranscriptSource::RemoteText, part.text);
        }

        push_text(
            &mut items,
            TranscriptSource::RemoteTranscription,
            content.output_transcription.and_then(|t| t.text),
        );
        push_text(
            &mut items,
            TranscriptSource::CallerTranscription,
            content.input_transcription.and_then(|t| t.text),
        );

        if content.interrupted {
            items.push(Inbound::Control(Control::Interrupted));
        }
        if content.turn_complete {
            items.push(Inbound::Control(Control::TurnComplete));
        }
    }

    if let Some(go_away) = message.go_away {
        items.push(Inbound::Control(Control::GoAway {
            time_left: go_away.time_left,
        }));
    }

    items
}

fn push_text(items: &mut Vec<Inbound>, source: TranscriptSource, text: Option<String>) {
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        items.push(Inbound::Transcript { source, text });
    }
}
