//! Configuration management for the coaching pipeline

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};
use file::CoachConfigFile;

/// Default silence before an utterance is committed
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default number of conversational turns sent as history
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 2;

/// Default minimum gap between model dispatches
pub const DEFAULT_DISPATCH_SPACING: Duration = Duration::from_millis(6000);

/// Default requests-per-minute ceiling for the free tier
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;

/// Default OpenAI-compatible endpoint
pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default primary model
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

/// Default fallback models, tried in order on rate limiting
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "meta-llama/llama-3.3-70b-instruct:free",
    "mistralai/mistral-7b-instruct:free",
];

/// Coaching pipeline configuration
#[derive(Debug)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Turn-taking configuration
    pub pipeline: PipelineConfig,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Voice services configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Turn-taking configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Silence after the last fragment before an utterance is emitted
    pub silence_timeout: Duration,

    /// Conversational turns included as model history
    pub max_history_turns: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Model tried first
    pub primary_model: String,

    /// Models tried in order when the previous one was rate limited
    pub fallback_models: Vec<String>,

    pub temperature: f32,

    pub max_tokens: u32,

    /// Transport timeout per request
    pub request_timeout: Duration,

    /// Minimum gap between the end of one dispatch and the start of the next
    pub dispatch_spacing: Duration,

    /// Optional requests-per-minute ceiling across the process
    pub requests_per_minute: Option<u32>,
}

impl LlmConfig {
    /// Primary model followed by the fallbacks
    #[must_use]
    pub fn model_chain(&self) -> Vec<String> {
        std::iter::once(self.primary_model.clone())
            .chain(self.fallback_models.iter().cloned())
            .collect()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            primary_model: DEFAULT_MODEL.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS
                .iter()
                .map(ToString::to_string)
                .collect(),
            temperature: 0.7,
            max_tokens: 200,
            request_timeout: Duration::from_secs(10),
            dispatch_spacing: DEFAULT_DISPATCH_SPACING,
            requests_per_minute: Some(DEFAULT_REQUESTS_PER_MINUTE),
        }
    }
}

/// Speech synthesis provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProviderKind {
    ElevenLabs,
    OpenAI,
}

/// Speech recognition provider for microphone capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProviderKind {
    Whisper,
    Deepgram,
}

/// Voice services configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub tts_provider: TtsProviderKind,
    pub tts_model: String,
    pub stt_provider: SttProviderKind,
    pub stt_model: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            tts_provider: TtsProviderKind::ElevenLabs,
            tts_model: "eleven_multilingual_v2".to_string(),
            stt_provider: SttProviderKind::Whisper,
            stt_model: "whisper-1".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenRouter` key for the language model
    pub openrouter: Option<SecretString>,

    /// `ElevenLabs` key for speech synthesis
    pub elevenlabs: Option<SecretString>,

    /// `OpenAI` key (Whisper STT, OpenAI TTS)
    pub openai: Option<SecretString>,

    /// Deepgram key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognised
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir).ok();
        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognised
    pub fn from_sources<F>(fc: CoachConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str, file: Option<String>| {
            env(key).or(file).filter(|s| !s.is_empty()).map(SecretString::from)
        };
        let millis = |key: &str| env(key).and_then(|s| s.parse::<u64>().ok());

        let api_keys = ApiKeys {
            openrouter: secret("OPENROUTER_API_KEY", fc.api_keys.openrouter),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
        };

        let pipeline = PipelineConfig {
            silence_timeout: millis("COACH_SILENCE_TIMEOUT_MS")
                .or(fc.pipeline.silence_timeout_ms)
                .map_or(DEFAULT_SILENCE_TIMEOUT, Duration::from_millis),
            max_history_turns: env("COACH_MAX_HISTORY_TURNS")
                .and_then(|s| s.parse().ok())
                .or(fc.pipeline.max_history_turns)
                .unwrap_or(DEFAULT_MAX_HISTORY_TURNS),
        };

        let defaults = LlmConfig::default();
        let fallback_models = env("COACH_FALLBACK_MODELS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            })
            .or(fc.llm.fallback_models)
            .unwrap_or(defaults.fallback_models);
        let requests_per_minute = env("COACH_REQUESTS_PER_MINUTE")
            .and_then(|s| s.parse::<u32>().ok())
            .or(fc.llm.requests_per_minute)
            .map_or(defaults.requests_per_minute, |n| (n > 0).then_some(n));

        let llm = LlmConfig {
            base_url: env("COACH_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(defaults.base_url),
            primary_model: env("COACH_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.primary_model),
            fallback_models,
            temperature: fc.llm.temperature.unwrap_or(defaults.temperature),
            max_tokens: fc.llm.max_tokens.unwrap_or(defaults.max_tokens),
            request_timeout: fc
                .llm
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            dispatch_spacing: millis("COACH_DISPATCH_SPACING_MS")
                .or(fc.llm.dispatch_spacing_ms)
                .map_or(defaults.dispatch_spacing, Duration::from_millis),
            requests_per_minute,
        };

        let voice_defaults = VoiceConfig::default();
        let tts_provider = match env("COACH_TTS_PROVIDER").or(fc.voice.tts_provider) {
            None => voice_defaults.tts_provider,
            Some(name) => parse_tts_provider(&name)?,
        };
        let stt_provider = match env("COACH_STT_PROVIDER").or(fc.voice.stt_provider) {
            None => voice_defaults.stt_provider,
            Some(name) => parse_stt_provider(&name)?,
        };
        let tts_model = env("COACH_TTS_MODEL").or(fc.voice.tts_model).unwrap_or_else(|| {
            match tts_provider {
                TtsProviderKind::ElevenLabs => voice_defaults.tts_model.clone(),
                TtsProviderKind::OpenAI => "tts-1".to_string(),
            }
        });
        let stt_model = env("COACH_STT_MODEL").or(fc.voice.stt_model).unwrap_or_else(|| {
            match stt_provider {
                SttProviderKind::Whisper => voice_defaults.stt_model.clone(),
                SttProviderKind::Deepgram => "nova-2".to_string(),
            }
        });

        let voice = VoiceConfig {
            tts_provider,
            tts_model,
            stt_provider,
            stt_model,
        };

        // ~/.local/share/voice-coach on Linux
        let data_dir = env("COACH_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("voice-coach"))
            });

        Ok(Self {
            data_dir,
            pipeline,
            llm,
            voice,
            api_keys,
        })
    }

    /// Path of the room database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("coach.db")
    }
}

fn parse_tts_provider(name: &str) -> Result<TtsProviderKind> {
    match name.to_lowercase().as_str() {
        "elevenlabs" => Ok(TtsProviderKind::ElevenLabs),
        "openai" => Ok(TtsProviderKind::OpenAI),
        other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
    }
}

fn parse_stt_provider(name: &str) -> Result<SttProviderKind> {
    match name.to_lowercase().as_str() {
        "whisper" | "openai" => Ok(SttProviderKind::Whisper),
        "deepgram" => Ok(SttProviderKind::Deepgram),
        other => Err(Error::Config(format!("unknown STT provider: {other}"))),
    }
}
