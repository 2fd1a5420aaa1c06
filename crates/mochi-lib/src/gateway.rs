//! Remote service gateway — chat completion and speech synthesis.
//!
//! Two stateless request/response calls against hosted providers; no state
//! is kept between calls and nothing is retried. A shared client enforces a
//! fixed request deadline, since calls cannot be canceled once issued.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use mochi_core::types::{GatewayConfig, GatewayMessage, GatewayRole};

/// System prompt injected ahead of every context window.
const PERSONA: &str = "You are Mochi, a small shiba pup character living on a web page. \
You chat out loud with visitors through your avatar's mouth. Keep replies to one or two \
short, casual sentences. Be warm, playful, and encouraging. Plain text only: no markdown, \
no emoji, no stage directions.";

const MAX_TOKENS: u32 = 500;

const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("LLM API not configured")]
    ChatNotConfigured,
    #[error("TTS API key not configured")]
    TtsNotConfigured,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("no audio content received")]
    MissingAudio,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Reply text from the chat gateway, with the provider's usage block if any.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<serde_json::Value>,
}

/// A synthesized clip: base64 MP3, exactly as the provider returned it.
#[derive(Debug, Clone)]
pub struct SpeechClip {
    pub audio_base64: String,
    pub format: String,
}

impl SpeechClip {
    /// Decode to raw MP3 bytes for the playback controller.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.audio_base64)
    }
}

#[derive(Clone)]
pub struct RemoteGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl RemoteGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to build http client");
        Self { client, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// One chat completion over the given context window. The persona system
    /// prompt is prepended here; callers only supply conversation turns.
    pub async fn chat(&self, messages: &[GatewayMessage]) -> Result<ChatReply, GatewayError> {
        let (Some(url), Some(key), Some(model)) = (
            self.config.llm_api_url.as_deref(),
            self.config.llm_api_key.as_deref(),
            self.config.llm_model_id.as_deref(),
        ) else {
            return Err(GatewayError::ChatNotConfigured);
        };

        let mut window = Vec::with_capacity(messages.len() + 1);
        window.push(GatewayMessage {
            role: GatewayRole::System,
            content: PERSONA.to_string(),
        });
        window.extend(messages.iter().cloned());

        debug!("chat: POST {} messages", window.len());
        let resp = self
            .client
            .post(format!("{url}/v1/chat/completions"))
            .bearer_auth(key)
            .json(&serde_json::json!({
                "model": model,
                "messages": window,
                "max_tokens": MAX_TOKENS,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            error!("chat: upstream error {status}: {body}");
            return Err(GatewayError::Upstream { status, body });
        }

        #[derive(Deserialize)]
        struct Completion {
            #[serde(default)]
            choices: Vec<Choice>,
            usage: Option<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }

        let data: Completion = resp.json().await?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatReply {
            content,
            usage: data.usage,
        })
    }

    /// Synthesize speech for `text`. `None` overrides fall back to the
    /// configured language and voice.
    pub async fn synthesize(
        &self,
        text: &str,
        language_code: Option<&str>,
        voice_name: Option<&str>,
    ) -> Result<SpeechClip, GatewayError> {
        let Some(key) = self.config.tts_api_key.as_deref() else {
            return Err(GatewayError::TtsNotConfigured);
        };
        let language = language_code.unwrap_or(&self.config.language_code);
        let voice = voice_name.unwrap_or(&self.config.voice_name);

        debug!("tts: POST {} chars ({language}/{voice})", text.len());
        let resp = self
            .client
            .post(format!("{GOOGLE_TTS_URL}?key={key}"))
            .json(&serde_json::json!({
                "input": { "text": text },
                "voice": { "languageCode": language, "name": voice },
                "audioConfig": {
                    "audioEncoding": "MP3",
                    "speakingRate": 1.0,
                    "pitch": 0,
                },
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            error!("tts: upstream error {status}: {body}");
            return Err(GatewayError::Upstream { status, body });
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SynthesizeResponse {
            audio_content: Option<String>,
        }

        let data: SynthesizeResponse = resp.json().await?;
        match data.audio_content {
            Some(audio) if !audio.is_empty() => Ok(SpeechClip {
                audio_base64: audio,
                format: "mp3".into(),
            }),
            _ => Err(GatewayError::MissingAudio),
        }
    }
}

/// Build a [`GatewayConfig`] from the environment: `LLM_API_URL`,
/// `LLM_API_KEY`, `LLM_MODEL_ID`, `GOOGLE_TTS_API_KEY`, with optional
/// `MOCHI_TTS_LANGUAGE` / `MOCHI_TTS_VOICE` overrides.
pub fn config_from_env() -> GatewayConfig {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let mut config = GatewayConfig {
        llm_api_url: var("LLM_API_URL"),
        llm_api_key: var("LLM_API_KEY"),
        llm_model_id: var("LLM_MODEL_ID"),
        tts_api_key: var("GOOGLE_TTS_API_KEY"),
        ..Default::default()
    };
    if let Some(language) = var("MOCHI_TTS_LANGUAGE") {
        config.language_code = language;
    }
    if let Some(voice) = var("MOCHI_TTS_VOICE") {
        config.voice_name = voice;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_requires_full_config() {
        let gateway = RemoteGateway::new(GatewayConfig {
            // Partial config counts as unconfigured.
            llm_api_url: Some("http://localhost:9".into()),
            ..Default::default()
        });
        let result = gateway.chat(&[]).await;
        assert!(matches!(result, Err(GatewayError::ChatNotConfigured)));
    }

    #[tokio::test]
    async fn synthesize_requires_api_key() {
        let gateway = RemoteGateway::new(GatewayConfig::default());
        let result = gateway.synthesize("hi", None, None).await;
        assert!(matches!(result, Err(GatewayError::TtsNotConfigured)));
    }

    #[test]
    fn clip_decodes_base64() {
        let clip = SpeechClip {
            audio_base64: "aGVsbG8=".into(),
            format: "mp3".into(),
        };
        assert_eq!(clip.decode().unwrap(), b"hello");
    }
}
