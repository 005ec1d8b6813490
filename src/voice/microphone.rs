//! Microphone recognition backend
//!
//! A capture thread owns the cpal stream and ships 100ms chunks to an async
//! worker. The worker runs the phrase detector and sends each completed
//! phrase to the STT service, turning the result into recognition events:
//! an empty interim fragment when speech starts and a final fragment with
//! the transcript once the phrase is done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::capture::{AudioCapture, SAMPLE_RATE, probe_input_device, samples_to_wav};
use super::detector::{PhraseDetector, PhraseEvent};
use super::recognition::{
    EventSender, Fragment, RecognitionErrorKind, RecognitionEvent, RecognitionSource,
};
use super::stt::Transcriber;
use crate::{Error, Result};

/// How often the capture thread drains the device buffer
const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// Recognition from the default input device
pub struct MicrophoneSource {
    transcriber: Arc<dyn Transcriber>,
    running: Option<Running>,
}

struct Running {
    stop: Arc<AtomicBool>,
    capture: thread::JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl MicrophoneSource {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            running: None,
        }
    }
}

#[async_trait]
impl RecognitionSource for MicrophoneSource {
    fn name(&self) -> &'static str {
        "microphone"
    }

    async fn request_permission(&mut self) -> Result<()> {
        let device = tokio::task::spawn_blocking(probe_input_device)
            .await
            .map_err(|e| Error::Audio(e.to_string()))??;

        tracing::info!(device = %device, "microphone available");
        Ok(())
    }

    async fn start(&mut self, events: EventSender) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let capture = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("coach-mic".to_string())
                .spawn(move || capture_loop(&stop, &chunk_tx, ready_tx))?
        };

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || capture.join()).await;
                return Err(e);
            }
            Err(_) => return Err(Error::Audio("capture thread exited during startup".to_string())),
        }

        let worker = tokio::spawn(run_phrase_worker(
            chunk_rx,
            Arc::clone(&self.transcriber),
            events,
            Arc::clone(&stop),
        ));

        self.running = Some(Running {
            stop,
            capture,
            worker,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stop.store(true, Ordering::SeqCst);
        running.worker.abort();

        if tokio::task::spawn_blocking(move || running.capture.join())
            .await
            .is_err()
        {
            tracing::warn!("capture thread did not shut down cleanly");
        }
    }
}

fn capture_loop(
    stop: &AtomicBool,
    chunks: &mpsc::UnboundedSender<Vec<f32>>,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(CHUNK_INTERVAL);

        let samples = capture.take_buffer();
        if !samples.is_empty() && chunks.send(samples).is_err() {
            break;
        }
    }

    capture.stop();
}

async fn run_phrase_worker(
    mut chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    transcriber: Arc<dyn Transcriber>,
    events: EventSender,
    stop: Arc<AtomicBool>,
) {
    let mut detector = PhraseDetector::new();
    let mut result_index = 0;

    while let Some(samples) = chunks.recv().await {
        let event = match detector.process(&samples) {
            PhraseEvent::None | PhraseEvent::Discarded => continue,
            PhraseEvent::Started => {
                RecognitionEvent::Fragments(vec![Fragment::interim("").with_index(result_index)])
            }
            PhraseEvent::Completed(phrase) => {
                match transcribe_phrase(transcriber.as_ref(), &phrase).await {
                    Ok(text) if text.is_empty() => continue,
                    Ok(text) => {
                        let fragment = Fragment::final_text(format!(" {text}"))
                            .with_index(result_index);
                        result_index += 1;
                        RecognitionEvent::Fragments(vec![fragment])
                    }
                    Err(kind) => {
                        let _ = events.send(RecognitionEvent::Error(kind));
                        return;
                    }
                }
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }

    // Capture thread went away without being asked to
    if !stop.load(Ordering::SeqCst) {
        let _ = events.send(RecognitionEvent::End);
    }
}

async fn transcribe_phrase(
    transcriber: &dyn Transcriber,
    phrase: &[f32],
) -> std::result::Result<String, RecognitionErrorKind> {
    let wav = samples_to_wav(phrase, SAMPLE_RATE).map_err(|e| {
        tracing::error!(error = %e, "failed to encode phrase");
        RecognitionErrorKind::AudioCapture
    })?;

    transcriber
        .transcribe(&wav)
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "phrase transcription failed");
            RecognitionErrorKind::Network
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Scripted(Mutex<Vec<Result<String>>>);

    #[async_trait]
    impl Transcriber for Scripted {
        async fn transcribe(&self, wav: &[u8]) -> Result<String> {
            assert_eq!(&wav[0..4], b"RIFF");
            self.0.lock().unwrap().remove(0)
        }
    }

    fn spawn_worker(
        replies: Vec<Result<String>>,
    ) -> (
        mpsc::UnboundedSender<Vec<f32>>,
        mpsc::UnboundedReceiver<RecognitionEvent>,
    ) {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_phrase_worker(
            chunk_rx,
            Arc::new(Scripted(Mutex::new(replies))),
            event_tx,
            Arc::new(AtomicBool::new(false)),
        ));
        (chunk_tx, event_rx)
    }

    #[tokio::test]
    async fn phrase_becomes_interim_then_final() {
        let (chunks, mut events) = spawn_worker(vec![Ok("  tell me about heaps ".to_string())]);

        chunks.send(vec![0.5; 6400]).unwrap();
        chunks.send(vec![0.0; 9000]).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            RecognitionEvent::Fragments(vec![Fragment::interim("")])
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RecognitionEvent::Fragments(vec![Fragment::final_text(" tell me about heaps")])
        );

        drop(chunks);
        assert_eq!(events.recv().await.unwrap(), RecognitionEvent::End);
    }

    #[tokio::test]
    async fn transcription_failure_is_a_network_error() {
        let (chunks, mut events) = spawn_worker(vec![Err(Error::Stt("503".to_string()))]);

        chunks.send(vec![0.5; 6400]).unwrap();
        chunks.send(vec![0.0; 9000]).unwrap();

        let _started = events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            RecognitionEvent::Error(RecognitionErrorKind::Network)
        );
    }
}
