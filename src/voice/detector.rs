//! Energy-based phrase detection
//!
//! Splits the microphone stream into phrases: a run of loud audio followed
//! by a short pause. Each phrase is sent to the STT service as one request.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Pause that closes a phrase (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Longest phrase before it is cut (in samples)
const MAX_PHRASE_SAMPLES: usize = 16000 * 20;

/// State of the phrase detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Inside a phrase, accumulating samples
    Speaking,
}

/// What a chunk of audio did to the detector
#[derive(Debug, Clone, PartialEq)]
pub enum PhraseEvent {
    /// Nothing worth reporting
    None,
    /// Speech began
    Started,
    /// A phrase closed; samples ready for transcription
    Completed(Vec<f32>),
    /// Speech stopped before it was long enough to transcribe
    Discarded,
}

/// Detects phrase boundaries in a mono sample stream
#[derive(Debug)]
pub struct PhraseDetector {
    state: DetectorState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl PhraseDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Process a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> PhraseEvent {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if !is_speech {
                    return PhraseEvent::None;
                }

                self.state = DetectorState::Speaking;
                self.speech_buffer.clear();
                self.speech_buffer.extend_from_slice(samples);
                self.silence_counter = 0;
                tracing::trace!(energy, "speech detected");
                PhraseEvent::Started
            }
            DetectorState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let paused = self.silence_counter > SILENCE_SAMPLES;
                let too_long = self.speech_buffer.len() > MAX_PHRASE_SAMPLES;
                if !paused && !too_long {
                    return PhraseEvent::None;
                }

                let spoken = self.speech_buffer.len() - self.silence_counter;
                let phrase = std::mem::take(&mut self.speech_buffer);
                self.reset();

                if spoken > MIN_SPEECH_SAMPLES {
                    tracing::debug!(samples = phrase.len(), "phrase complete");
                    PhraseEvent::Completed(phrase)
                } else {
                    tracing::trace!("phrase too short, discarded");
                    PhraseEvent::Discarded
                }
            }
        }
    }

    /// Reset detector to idle state
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

impl Default for PhraseDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
