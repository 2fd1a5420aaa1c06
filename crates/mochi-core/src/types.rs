//! Shared types for the mochi character engine.
//!
//! Used across mochi-lib, mochi-cli, and any embedding frontend. Keeping them
//! here means consumers can depend on types without pulling in tokio, rodio,
//! or other heavy deps.

use serde::{Deserialize, Serialize};

// ─── Chat types ────────────────────────────────────────────────────────────

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Character,
}

/// One entry in the conversation log. Append-only; never edited after push.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp_ms: u64,
}

// ─── Gateway wire types ────────────────────────────────────────────────────

/// Role schema understood by the upstream chat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayRole {
    System,
    User,
    Assistant,
}

/// One turn in the context window sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub role: GatewayRole,
    pub content: String,
}

// ─── Playback types ────────────────────────────────────────────────────────

/// Observable playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
}

/// Playback status snapshot for at most one concurrent clip.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub position_secs: f64,
    pub duration_secs: f64,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            position_secs: 0.0,
            duration_secs: 0.0,
        }
    }
}

// ─── Gateway config ────────────────────────────────────────────────────────

/// Upstream service configuration. Chat fields are all-or-nothing; a partial
/// chat config behaves as not configured.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model_id: Option<String>,
    pub tts_api_key: Option<String>,
    pub language_code: String,
    pub voice_name: String,
    /// Deadline for each upstream call. Calls are not cancelable once issued,
    /// so this is the only bound on a wedged provider.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            llm_api_url: None,
            llm_api_key: None,
            llm_model_id: None,
            tts_api_key: None,
            language_code: "en-US".into(),
            voice_name: "en-US-Casual-K".into(),
            request_timeout_secs: 30,
        }
    }
}
