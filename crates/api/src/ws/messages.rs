//! Wire protocol: JSON text frames exchanged with the browser.

use serde::{Deserialize, Serialize};

/// Control frames from the client. Audio arrives as binary WebM fragments,
/// not as JSON.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Barge-in: the participant wants to speak through an echo lockout.
    Interrupt,
}

/// Transcript frame body, shared between solo and conversation modes.
///
/// Solo frames carry `session_id`; conversation frames carry `speaker` and,
/// toward the partner, `speaker_name`.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
    pub text: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_tts: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Transcript(TranscriptBody),
    TranscriptPartial(TranscriptBody),
    RoomCreated {
        room_id: String,
        user_name: String,
        language: String,
        partner_language: String,
    },
    RoomJoined {
        room_id: String,
        user_name: String,
        language: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        partner_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        partner_language: Option<String>,
    },
    PartnerJoined {
        name: String,
        language: String,
    },
    PartnerLeft {
        name: String,
    },
    MicLocked {
        duration_ms: u64,
        reason: &'static str,
    },
    Error {
        message: String,
    },
}
