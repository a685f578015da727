//! # Live Channel Abstraction
//!
//! The bidirectional message stream between a session and the remote live
//! voice model. This module defines the wire message types and the channel
//! seam; `session::live` provides the WebSocket implementation and tests
//! substitute an in-memory channel.
//!
//! ## Wire Protocol (JSON over the channel):
//! - **Client -> Model**: `setup` (configuration bundle, first message),
//!   then `audio` chunks (base64 16-bit PCM)
//! - **Model -> Client**: `output_transcript` / `input_transcript` deltas,
//!   `turn_complete`, `audio` fragments, `interrupted`, `error`

use crate::audio::codec::EncodedChunk;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Configuration bundle sent when opening a live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveChannelConfig {
    /// Whether the model should answer with synthesized audio
    pub audio_response: bool,
    /// Voice identifier the model should speak with
    pub voice: String,
    /// System instruction assembled from persona and language
    pub system_instruction: String,
    /// Whether the model should stream transcriptions of the user's speech
    pub input_transcription: bool,
    /// Whether the model should stream transcriptions of its own speech
    pub output_transcription: bool,
}

/// Messages sent from this backend to the live model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session configuration; must be the first message on the channel
    Setup {
        audio_response: bool,
        voice: String,
        system_instruction: String,
        input_transcription: bool,
        output_transcription: bool,
    },

    /// One encoded chunk of microphone audio
    Audio {
        /// Base64 of 16-bit little-endian PCM
        data: String,
    },
}

impl ClientMessage {
    pub fn setup(config: &LiveChannelConfig) -> Self {
        ClientMessage::Setup {
            audio_response: config.audio_response,
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
            input_transcription: config.input_transcription,
            output_transcription: config.output_transcription,
        }
    }

    pub fn audio(chunk: EncodedChunk) -> Self {
        ClientMessage::Audio { data: chunk.data }
    }
}

/// Messages received from the live model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Partial transcription of the assistant's synthesized speech
    OutputTranscript { text: String },

    /// Partial transcription of the user's speech
    InputTranscript { text: String },

    /// The current conversational turn is complete
    TurnComplete,

    /// One fragment of synthesized audio
    Audio {
        /// Base64 of 16-bit little-endian PCM at the playback rate
        data: String,
    },

    /// The user began speaking while the model was still talking; all queued
    /// playback must be cancelled immediately
    Interrupted,

    /// The model reported an error; the session cannot continue
    Error { message: String },
}

/// Channel-level events delivered to the session controller, in arrival order.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A parsed wire message from the model
    Message(ServerMessage),

    /// The remote side closed the channel
    Closed,

    /// The transport failed (connection reset, protocol error, ...)
    TransportError(String),
}

/// One open bidirectional channel.
///
/// ## Contract:
/// - `sender()` is the outbound primitive; the capture pipeline `try_send`s
///   encoded chunks onto it and drops on a full queue
/// - `take_events()` yields the inbound event stream exactly once
/// - `close()` is idempotent and must tolerate the remote side already being
///   gone
pub trait LiveChannel: Send {
    fn sender(&self) -> mpsc::Sender<EncodedChunk>;
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_serialization() {
        let config = LiveChannelConfig {
            audio_response: true,
            voice: "Zephyr".to_string(),
            system_instruction: "Speak like Zephyr.".to_string(),
            input_transcription: true,
            output_transcription: true,
        };

        let json = serde_json::to_string(&ClientMessage::setup(&config)).unwrap();
        assert!(json.contains(r#""type":"setup""#));
        assert!(json.contains(r#""voice":"Zephyr""#));

        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::Setup { voice, audio_response, .. } => {
                assert_eq!(voice, "Zephyr");
                assert!(audio_response);
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_audio_message_carries_chunk_payload() {
        let chunk = EncodedChunk::from_base64("AAAA");
        let json = serde_json::to_string(&ClientMessage::audio(chunk)).unwrap();
        assert_eq!(json, r#"{"type":"audio","data":"AAAA"}"#);
    }

    #[test]
    fn test_server_message_deserialization() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"output_transcript","text":"Hello"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::OutputTranscript { ref text } if text == "Hello"));

        let msg: ServerMessage = serde_json::from_str(r#"{"type":"turn_complete"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::TurnComplete));

        let msg: ServerMessage = serde_json::from_str(r#"{"type":"interrupted"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Interrupted));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"audio","data":"UE9N"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Audio { ref data } if data == "UE9N"));
    }

    #[test]
    fn test_unknown_server_message_is_an_error() {
        let result = serde_json::from_str::<ServerMessage>(r#"{"type":"telemetry"}"#);
        assert!(result.is_err());
    }
}
