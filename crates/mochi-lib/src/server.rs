//! HTTP proxy for the hosted chat model and the TTS provider.
//!
//! Thin forwarding routes; the browser frontend never sees upstream keys.
//! CORS-permissive so a dev frontend on another port can call it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::error;

use mochi_core::types::GatewayMessage;

use crate::gateway::{GatewayError, RemoteGateway};

/// Build the proxy router with a shared [`RemoteGateway`].
pub fn router(gateway: RemoteGateway) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/tts", post(tts))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn err(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}

fn upstream_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

// ─── /api/chat ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatProxyRequest {
    #[serde(default)]
    messages: Vec<GatewayMessage>,
}

#[derive(Serialize)]
struct ChatProxyResponse {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<serde_json::Value>,
}

async fn chat(
    State(gateway): State<RemoteGateway>,
    Json(req): Json<ChatProxyRequest>,
) -> Result<Json<ChatProxyResponse>, ApiError> {
    if req.messages.is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "Messages are required"));
    }

    match gateway.chat(&req.messages).await {
        Ok(reply) => Ok(Json(ChatProxyResponse {
            content: reply.content,
            usage: reply.usage,
        })),
        Err(GatewayError::ChatNotConfigured) => Err(err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "LLM API not configured",
        )),
        Err(GatewayError::Upstream { status, .. }) => Err(err(
            upstream_status(status),
            "Failed to get response from LLM",
        )),
        Err(e) => {
            error!("chat proxy: {e}");
            Err(err(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"))
        }
    }
}

// ─── /api/tts ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsProxyRequest {
    #[serde(default)]
    text: String,
    language_code: Option<String>,
    voice_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsProxyResponse {
    audio_content: String,
    format: String,
}

async fn tts(
    State(gateway): State<RemoteGateway>,
    Json(req): Json<TtsProxyRequest>,
) -> Result<Json<TtsProxyResponse>, ApiError> {
    if req.text.trim().is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "Text is required"));
    }

    match gateway
        .synthesize(
            &req.text,
            req.language_code.as_deref(),
            req.voice_name.as_deref(),
        )
        .await
    {
        Ok(clip) => Ok(Json(TtsProxyResponse {
            audio_content: clip.audio_base64,
            format: clip.format,
        })),
        Err(GatewayError::TtsNotConfigured) => Err(err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "TTS API key not configured",
        )),
        Err(GatewayError::MissingAudio) => Err(err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "No audio content received",
        )),
        Err(GatewayError::Upstream { status, .. }) => {
            Err(err(upstream_status(status), "Failed to synthesize speech"))
        }
        Err(e) => {
            error!("tts proxy: {e}");
            Err(err(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"))
        }
    }
}
