//! Sentence-by-sentence speech output
//!
//! One dispatcher per session. A reply is split into sentences; each is
//! synthesized and played before the next one starts. A `speak` call that
//! arrives while another is playing does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::playback::AudioSink;
use super::tts::SpeechSynthesizer;

/// Result of a [`SpeechDispatcher::speak`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Every sentence was played
    Spoken,
    /// Another reply was already playing; nothing happened
    Busy,
    /// Empty text or no voice; nothing happened
    Skipped,
    /// A sentence failed; the rest were dropped
    Failed,
}

/// Serializes speech for one session
pub struct SpeechDispatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    speaking: AtomicBool,
}

/// Clears the speaking flag however `speak` exits
struct SpeakingGuard<'a>(&'a AtomicBool);

impl Drop for SpeakingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SpeechDispatcher {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            synthesizer,
            sink,
            speaking: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Speak `text` in `voice_id`
    ///
    /// Failures are logged, never returned.
    pub async fn speak(&self, text: &str, voice_id: Option<&str>) -> SpeakOutcome {
        let Some(voice_id) = voice_id.filter(|v| !v.is_empty()) else {
            return SpeakOutcome::Skipped;
        };
        if text.trim().is_empty() {
            return SpeakOutcome::Skipped;
        }

        if self
            .speaking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("speech already in progress, ignoring");
            return SpeakOutcome::Busy;
        }
        let _guard = SpeakingGuard(&self.speaking);

        for (i, sentence) in split_sentences(text).iter().enumerate() {
            let audio = match self.synthesizer.synthesize(sentence, voice_id).await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(error = %e, sentence = i, "synthesis failed, dropping rest of reply");
                    return SpeakOutcome::Failed;
                }
            };

            if let Err(e) = self.sink.play(audio).await {
                tracing::warn!(error = %e, sentence = i, "playback failed, dropping rest of reply");
                return SpeakOutcome::Failed;
            }
        }

        SpeakOutcome::Spoken
    }
}

/// Split text into sentences ending in `.`, `!` or `?`
///
/// Runs of terminators stay with their sentence ("Really?!"). Trailing text
/// without a terminator is its own chunk. Chunks are trimmed; blank ones are
/// dropped.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if is_terminator(c) && !chars.peek().copied().is_some_and(is_terminator) {
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);

    sentences
}

const fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn push_trimmed(sentences: &mut Vec<String>, chunk: &str) {
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        sentences.push(chunk.to_string());
    }
}
