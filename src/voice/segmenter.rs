//! Silence-based utterance segmentation
//!
//! Final fragments accumulate in a buffer. Every fragment, final or interim,
//! pushes the silence deadline out by the configured timeout. When the
//! deadline passes with text buffered, the buffer becomes one utterance.

use std::time::Duration;

use tokio::time::Instant;

use super::recognition::Fragment;

/// Accumulates transcript fragments into utterances
#[derive(Debug)]
pub struct UtteranceSegmenter {
    silence_timeout: Duration,
    buffer: String,
    preview: String,
    deadline: Option<Instant>,
}

impl UtteranceSegmenter {
    #[must_use]
    pub const fn new(silence_timeout: Duration) -> Self {
        Self {
            silence_timeout,
            buffer: String::new(),
            preview: String::new(),
            deadline: None,
        }
    }

    /// Consume one fragment observed at `now`
    pub fn push(&mut self, fragment: &Fragment, now: Instant) {
        if fragment.is_final {
            self.buffer.push_str(&fragment.text);
            self.preview.clear();
        } else {
            self.preview.clone_from(&fragment.text);
        }

        self.deadline = Some(now + self.silence_timeout);
    }

    /// When the silence timer fires, if armed
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Committed text waiting for silence
    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Latest interim text, for live display
    #[must_use]
    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// Fire the silence timer if its deadline has passed
    ///
    /// Returns the trimmed utterance when text was buffered. The timer is
    /// disarmed either way and stays so until the next fragment.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if deadline <= now => {}
            _ => return None,
        }

        self.deadline = None;
        let utterance = self.buffer.trim().to_string();
        if utterance.is_empty() {
            self.buffer.clear();
            return None;
        }

        self.buffer.clear();
        self.preview.clear();
        Some(utterance)
    }

    /// Disarm the timer without touching buffered text
    pub fn hold(&mut self) {
        self.deadline = None;
    }

    /// Re-arm the timer from `now` if text is waiting
    pub fn rearm(&mut self, now: Instant) {
        if !self.buffer.trim().is_empty() {
            self.deadline = Some(now + self.silence_timeout);
        }
    }

    /// Drop buffered text, preview and timer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.preview.clear();
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(3000);

    #[test]
    fn joins_finals_into_one_utterance() {
        let start = Instant::now();
        let mut seg = UtteranceSegmenter::new(TIMEOUT);

        seg.push(&Fragment::final_text("hello"), start);
        seg.push(&Fragment::final_text(" world"), start + Duration::from_millis(500));

        assert_eq!(seg.poll(start + Duration::from_millis(3000)), None);
        assert_eq!(
            seg.poll(start + Duration::from_millis(3500)),
            Some("hello world".to_string())
        );
        assert!(seg.buffered().is_empty());
        assert_eq!(seg.deadline(), None);
        // Only once
        assert_eq!(seg.poll(start + Duration::from_secs(60)), None);
    }

    #[test]
    fn interim_only_never_emits() {
        let start = Instant::now();
        let mut seg = UtteranceSegmenter::new(TIMEOUT);

        seg.push(&Fragment::interim("hel"), start);
        seg.push(&Fragment::interim("hello"), start + Duration::from_millis(200));
        assert_eq!(seg.preview(), "hello");

        assert_eq!(seg.poll(start + Duration::from_secs(10)), None);
        // Not re-armed without new input
        assert_eq!(seg.deadline(), None);
    }

    #[test]
    fn interim_resets_the_timer() {
        let start = Instant::now();
        let mut seg = UtteranceSegmenter::new(TIMEOUT);

        seg.push(&Fragment::final_text("still"), start);
        seg.push(&Fragment::interim("talk"), start + Duration::from_millis(2500));

        assert_eq!(seg.poll(start + Duration::from_millis(3100)), None);
        assert_eq!(
            seg.poll(start + Duration::from_millis(5500)),
            Some("still".to_string())
        );
        assert!(seg.preview().is_empty());
    }

    #[test]
    fn final_clears_preview() {
        let start = Instant::now();
        let mut seg = UtteranceSegmenter::new(TIMEOUT);

        seg.push(&Fragment::interim("what is"), start);
        seg.push(&Fragment::final_text("what is rust"), start);
        assert!(seg.preview().is_empty());
    }

    #[test]
    fn whitespace_only_buffer_is_not_an_utterance() {
        let start = Instant::now();
        let mut seg = UtteranceSegmenter::new(TIMEOUT);

        seg.push(&Fragment::final_text("   "), start);
        assert_eq!(seg.poll(start + TIMEOUT), None);
        assert!(seg.buffered().is_empty());
    }

    #[test]
    fn hold_and_rearm_keep_text() {
        let start = Instant::now();
        let mut seg = UtteranceSegmenter::new(TIMEOUT);

        seg.push(&Fragment::final_text("wait for me"), start);
        seg.hold();
        assert_eq!(seg.poll(start + Duration::from_secs(10)), None);
        assert_eq!(seg.buffered(), "wait for me");

        let later = start + Duration::from_secs(10);
        seg.rearm(later);
        assert_eq!(seg.deadline(), Some(later + TIMEOUT));
        assert_eq!(seg.poll(later + TIMEOUT), Some("wait for me".to_string()));
    }

    #[test]
    fn rearm_with_empty_buffer_stays_idle() {
        let mut seg = UtteranceSegmenter::new(TIMEOUT);
        seg.rearm(Instant::now());
        assert_eq!(seg.deadline(), None);
    }
}
