//! Typed WebSocket contract with the Essence backend.
//!
//! Client frames are JSON objects tagged by `"type"`, plus binary frames that
//! carry raw microphone chunks. Server frames are JSON objects tagged by
//! `"type"` with their body under `"payload"`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tungstenite::Message;

// ============================================================================
// Client frames (client → backend)
// ============================================================================

/// How the backend should merge a `text_input` into the typed draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    Replace,
    Append,
}

/// Where an image came from; the backend records it as the turn's screen source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Shared,
    Pasted,
}

/// JSON frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Typed text for the current turn.
    TextInput {
        /// Draft text.
        text: String,
        /// Merge mode on the backend.
        mode: TextMode,
    },
    /// One image attached to the current turn.
    ImageInput {
        /// Base64 data URI (`data:<mime>;base64,...`).
        image: String,
        /// Capture source.
        source: ImageSource,
    },
    /// Close the turn and ask the backend to respond.
    Commit,
    /// Drop backend turn context and conversation memory.
    Reset,
}

impl ClientFrame {
    /// Short label for logs; never includes user content.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::TextInput { .. } => "text_input",
            ClientFrame::ImageInput { .. } => "image_input",
            ClientFrame::Commit => "commit",
            ClientFrame::Reset => "reset",
        }
    }
}

/// Anything the connection manager can put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Json(ClientFrame),
    /// Raw audio chunk bytes.
    Audio(Vec<u8>),
}

impl OutboundFrame {
    pub fn into_message(self) -> Result<Message> {
        match self {
            OutboundFrame::Json(frame) => {
                let text = serde_json::to_string(&frame)
                    .with_context(|| format!("encode {} frame", frame.kind()))?;
                Ok(Message::Text(text))
            }
            OutboundFrame::Audio(bytes) => Ok(Message::Binary(bytes)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Json(frame) => frame.kind(),
            OutboundFrame::Audio(_) => "audio",
        }
    }
}

impl From<ClientFrame> for OutboundFrame {
    fn from(frame: ClientFrame) -> Self {
        OutboundFrame::Json(frame)
    }
}

// ============================================================================
// Server frames (backend → client)
// ============================================================================

/// Bare status words sent when a turn starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStatus {
    Responding,
    Active,
    Inactive,
}

/// Which inputs have contributed to the backend's current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SourceFlags {
    pub audio: bool,
    pub text: bool,
    pub image: bool,
}

/// Full snapshot of the backend turn context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub active: bool,
    pub is_responding: bool,
    pub transcript: String,
    pub typed_text: String,
    pub has_screenshot: bool,
    pub sources: SourceFlags,
}

/// `state_update` payloads come in two shapes: a snapshot object or a status word.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StatePayload {
    Snapshot(ContextSnapshot),
    Status(TurnStatus),
}

impl StatePayload {
    #[must_use]
    pub fn is_responding(&self) -> bool {
        match self {
            StatePayload::Snapshot(snapshot) => snapshot.is_responding,
            StatePayload::Status(status) => *status == TurnStatus::Responding,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            StatePayload::Snapshot(snapshot) => snapshot.active,
            StatePayload::Status(status) => *status != TurnStatus::Inactive,
        }
    }
}

/// Backend-initiated client actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendCommand {
    CaptureScreenshot,
    #[serde(other)]
    Unsupported,
}

/// Echo of what the backend committed for the turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CommitConfirmation {
    pub text: Option<String>,
    pub image: Option<String>,
    pub images: Option<Vec<String>>,
}

impl CommitConfirmation {
    /// Single `image` first, then the `images` list, skipping duplicates.
    #[must_use]
    pub fn all_images(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .image
            .iter()
            .chain(self.images.iter().flatten())
            .filter(|uri| !uri.trim().is_empty());
        for uri in candidates {
            if !out.contains(uri) {
                out.push(uri.clone());
            }
        }
        out
    }

    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("").trim()
    }
}

/// JSON frames received from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    StateUpdate(StatePayload),
    TranscriptUpdate(String),
    /// Text delta for the reply being streamed.
    ResponseChunk(String),
    Command(BackendCommand),
    CommitConfirmation(CommitConfirmation),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("decode backend frame")
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::StateUpdate(_) => "state_update",
            ServerFrame::TranscriptUpdate(_) => "transcript_update",
            ServerFrame::ResponseChunk(_) => "response_chunk",
            ServerFrame::Command(_) => "command",
            ServerFrame::CommitConfirmation(_) => "commit_confirmation",
        }
    }
}
