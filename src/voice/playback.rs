//! Audio playback

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Plays encoded audio to completion
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio` and return once playback has finished
    async fn play(&self, audio: Vec<u8>) -> Result<()>;
}

/// Decodes MP3 and plays it on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerSink;

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_mp3(&audio)?;
            play_blocking(&samples, sample_rate)
        })
        .await
        .map_err(|e| Error::Audio(e.to_string()))?
    }
}

/// Drops audio; used when running without speakers
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl AudioSink for DiscardSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        tracing::debug!(bytes = audio.len(), "audio discarded");
        Ok(())
    }
}

fn play_blocking(samples: &[f32], sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
                && c.sample_format() == cpal::SampleFormat::F32
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio(format!("no output config at {sample_rate}Hz")))?;
    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = usize::from(config.channels.max(1));

    let samples: Arc<[f32]> = Arc::from(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        pos += 1;
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(sample_rate);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) && start.elapsed() < timeout {
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    tracing::debug!(samples = samples.len(), sample_rate, "playback complete");
    Ok(())
}

/// Decode MP3 into mono f32 samples and the stream's sample rate
fn decode_mp3(mp3: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(mono_sample));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no MP3 frames in audio".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Average one interleaved frame down to a single f32 sample
#[allow(clippy::cast_precision_loss)]
fn mono_sample(frame: &[i16]) -> f32 {
    frame.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / frame.len() as f32
}
