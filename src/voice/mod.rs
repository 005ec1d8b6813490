//! Voice input and output
//!
//! Input: a [`RecognitionSource`] feeds fragments to the session, which runs
//! them through the [`UtteranceSegmenter`]. Output: the [`SpeechDispatcher`]
//! synthesizes replies sentence by sentence and plays them on an [`AudioSink`].

mod capture;
mod detector;
mod microphone;
mod playback;
mod recognition;
mod segmenter;
mod speech;
mod stt;
mod tts;

pub use capture::{SAMPLE_RATE, samples_to_wav};
pub use detector::{DetectorState, PhraseDetector, PhraseEvent};
pub use microphone::MicrophoneSource;
pub use playback::{AudioSink, DiscardSink, SpeakerSink};
pub use recognition::{
    EventReceiver, EventSender, ForwardHandle, ForwardedSource, Fragment, RecognitionAdapter,
    RecognitionErrorKind, RecognitionEvent, RecognitionSource,
};
pub use segmenter::UtteranceSegmenter;
pub use speech::{SpeakOutcome, SpeechDispatcher, split_sentences};
pub use stt::{SpeechToText, Transcriber};
pub use tts::{SpeechSynthesizer, TextToSpeech};
