//! Text-to-speech over HTTP

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::{ApiKeys, TtsProviderKind, VoiceConfig};
use crate::{Error, Result};

/// `ElevenLabs` voice stability
const ELEVENLABS_STABILITY: f32 = 0.4;

/// `ElevenLabs` similarity boost
const ELEVENLABS_SIMILARITY_BOOST: f32 = 0.75;

/// Renders text as audio in a given voice
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in `voice_id`, returning encoded audio (MP3)
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech with `ElevenLabs` or `OpenAI`
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: TtsProviderKind,
}

impl TextToSpeech {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (key, label) = match voice.tts_provider {
            TtsProviderKind::ElevenLabs => (keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY"),
            TtsProviderKind::OpenAI => (keys.openai.as_ref(), "OPENAI_API_KEY"),
        };
        let api_key = key
            .map(|k| k.expose_secret().to_string())
            .ok_or_else(|| Error::Config(format!("{label} is required for speech synthesis")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: voice.tts_model.clone(),
            provider: voice.tts_provider,
        })
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&elevenlabs_request(text, &self.model))
            .send()
            .await?;

        read_audio(response).await
    }

    async fn synthesize_openai(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct OpenAiRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&OpenAiRequest {
                model: &self.model,
                input: text,
                voice: voice_id,
            })
            .send()
            .await?;

        read_audio(response).await
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        tracing::debug!(provider = ?self.provider, voice = voice_id, chars = text.len(), "synthesizing");

        match self.provider {
            TtsProviderKind::ElevenLabs => self.synthesize_elevenlabs(text, voice_id).await,
            TtsProviderKind::OpenAI => self.synthesize_openai(text, voice_id).await,
        }
    }
}

fn elevenlabs_request(text: &str, model: &str) -> serde_json::Value {
    serde_json::json!({
        "text": text,
        "model_id": model,
        "voice_settings": {
            "stability": ELEVENLABS_STABILITY,
            "similarity_boost": ELEVENLABS_SIMILARITY_BOOST,
        },
    })
}

async fn read_audio(response: reqwest::Response) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, "speech synthesis failed");
        return Err(Error::Synthesis {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.bytes().await?.to_vec())
}
