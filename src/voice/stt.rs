//! Batch speech-to-text over HTTP

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::{ApiKeys, SttProviderKind, VoiceConfig};
use crate::{Error, Result};

/// Turns a WAV clip into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes phrases with Whisper or Deepgram
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProviderKind,
}

impl SpeechToText {
    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (key, label) = match voice.stt_provider {
            SttProviderKind::Whisper => (keys.openai.as_ref(), "OPENAI_API_KEY"),
            SttProviderKind::Deepgram => (keys.deepgram.as_ref(), "DEEPGRAM_API_KEY"),
        };
        let api_key = key
            .map(|k| k.expose_secret().to_string())
            .ok_or_else(|| Error::Config(format!("{label} is required for speech recognition")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: voice.stt_model.clone(),
            provider: voice.stt_provider,
        })
    }

    async fn transcribe_whisper(&self, wav: &[u8]) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("phrase.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, wav: &[u8]) -> Result<String> {
        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        Ok(first_transcript(result))
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(provider = ?self.provider, bytes = wav.len(), "transcribing phrase");

        let text = match self.provider {
            SttProviderKind::Whisper => self.transcribe_whisper(wav).await?,
            SttProviderKind::Deepgram => self.transcribe_deepgram(wav).await?,
        };

        tracing::debug!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

fn first_transcript(response: DeepgramResponse) -> String {
    response
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_config_error() {
        let voice = VoiceConfig::default();
        let result = SpeechToText::from_config(&voice, &ApiKeys::default());
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("OPENAI_API_KEY")));
    }

    #[test]
    fn deepgram_transcript_extraction() {
        let json = r#"{"results":{"channels":[{"alternatives":[{"transcript":"what is a heap"}]}]}}"#;
        let response: DeepgramResponse = serde_json::from_str(json).unwrap();
        assert_eq!(first_transcript(response), "what is a heap");

        let empty: DeepgramResponse =
            serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(first_transcript(empty), "");
    }
}
