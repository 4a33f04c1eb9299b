//! The speech-to-text seam used by the pipeline

use crate::audio::AudioSegment;
use crate::error::Result;

/// Recognizes the speech in one padded segment.
///
/// `Ok(None)` means the segment held no recognizable speech. That is a normal
/// outcome and must not be reported as an error. Failures of the underlying
/// engine or service are returned as [`ParleyError::TranscriptionService`]
/// and abort the whole run.
///
/// Implementations are shared by every worker thread, so calls must be safe
/// to make concurrently.
///
/// [`ParleyError::TranscriptionService`]: crate::ParleyError::TranscriptionService
pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        audio: &AudioSegment,
        language: &str,
        adjust_for_noise: bool,
    ) -> Result<Option<String>>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Reduce a BCP 47 tag to its primary language subtag ("en-US" → "en").
pub fn primary_language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .trim()
        .to_ascii_lowercase()
}

/// Clean up raw recognizer output.
///
/// Drops bracketed non-speech markers such as `[BLANK_AUDIO]` and collapses
/// whitespace. Returns `None` when nothing is left.
pub fn normalize_text(raw: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => cleaned.push(c),
            _ => {}
        }
    }

    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    Some(words.join(" "))
}

/// Drop a single closing period, since the transcript writer adds its own
/// after every line. Ellipses and other punctuation are left alone.
pub fn strip_final_period(text: String) -> String {
    match text.strip_suffix('.') {
        Some(stripped) if !stripped.ends_with('.') => stripped.to_string(),
        _ => text,
    }
}
