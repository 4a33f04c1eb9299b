//! Splitting a track into silence-delimited segments

use crate::audio::{rms_dbfs, AudioData, AudioSegment};
use crate::config::TranscriptionConfig;
use crate::error::{ParleyError, Result};
use tracing::debug;

/// Turns a decoded track into ordered, padded segments.
///
/// Implementations must return segments in encounter order with indices
/// `0..n`, and an empty track must yield no segments.
pub trait Segmenter: Send + Sync {
    fn split(&self, audio: &AudioData) -> Result<Vec<AudioSegment>>;
}

/// Loudness-based splitter.
///
/// Loudness is measured in 1 ms steps. Any run of at least `min_silence_ms`
/// whose RMS level stays at or below `silence_threshold_dbfs` is silence and
/// separates two segments.
#[derive(Debug, Clone)]
pub struct SilenceSegmenter {
    pub min_silence_ms: u32,
    pub silence_threshold_dbfs: f32,
    /// Original audio kept on either side of each non-silent range
    pub keep_silence_ms: u32,
    /// Digital silence added to both ends of every segment
    pub padding_ms: u32,
}

impl Default for SilenceSegmenter {
    fn default() -> Self {
        Self::from_config(&TranscriptionConfig::default())
    }
}

impl SilenceSegmenter {
    pub fn new(min_silence_ms: u32, silence_threshold_dbfs: f32, padding_ms: u32) -> Self {
        Self {
            min_silence_ms,
            silence_threshold_dbfs,
            keep_silence_ms: 100,
            padding_ms,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self {
            min_silence_ms: config.silence_length_ms,
            silence_threshold_dbfs: config.silence_threshold_dbfs,
            keep_silence_ms: config.keep_silence_ms,
            padding_ms: config.padding_ms,
        }
    }

    pub fn with_keep_silence(mut self, ms: u32) -> Self {
        self.keep_silence_ms = ms;
        self
    }

    fn pad(&self, index: usize, samples: &[f32], sample_rate: u32) -> AudioSegment {
        let padding = self.padding_ms as usize * sample_rate as usize / 1000;
        let mut padded = Vec::with_capacity(samples.len() + 2 * padding);
        padded.resize(padding, 0.0);
        padded.extend_from_slice(samples);
        padded.resize(padded.len() + padding, 0.0);
        AudioSegment::new(index, padded, sample_rate)
    }

    /// Ranges of silence, in milliseconds, as half-open `(start, end)` pairs.
    fn silent_ranges(&self, energies: &[f64]) -> Vec<(usize, usize)> {
        let window = self.min_silence_ms as usize;
        let len = energies.len();
        if len < window {
            return Vec::new();
        }

        let threshold = 10f64.powf(self.silence_threshold_dbfs as f64 / 10.0);
        let mut prefix = Vec::with_capacity(len + 1);
        prefix.push(0.0f64);
        for energy in energies {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + energy);
        }

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for start in 0..=(len - window) {
            let mean_square = (prefix[start + window] - prefix[start]) / window as f64;
            if mean_square > threshold {
                continue;
            }
            let end = start + window;
            match ranges.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => ranges.push((start, end)),
            }
        }
        ranges
    }
}

/// Inverts silent ranges into the non-silent ranges of a track `len` ms long.
fn nonsilent_ranges(silent: &[(usize, usize)], len: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(silent.len() + 1);
    let mut previous_end = 0;
    for &(start, end) in silent {
        if start > previous_end {
            ranges.push((previous_end, start));
        }
        previous_end = end;
    }
    if previous_end < len {
        ranges.push((previous_end, len));
    }
    ranges
}

/// Widens each range by `keep` ms. Neighbours that would overlap meet at the
/// midpoint of the gap between them.
fn widen_ranges(ranges: &[(usize, usize)], keep: usize, len: usize) -> Vec<(usize, usize)> {
    let mut widened: Vec<(usize, usize)> = ranges
        .iter()
        .map(|&(start, end)| (start.saturating_sub(keep), (end + keep).min(len)))
        .collect();

    for i in 1..widened.len() {
        let last_end = widened[i - 1].1;
        let next_start = widened[i].0;
        if next_start < last_end {
            let middle = (last_end + next_start) / 2;
            widened[i - 1].1 = middle;
            widened[i].0 = middle;
        }
    }
    widened
}

impl Segmenter for SilenceSegmenter {
    fn split(&self, audio: &AudioData) -> Result<Vec<AudioSegment>> {
        if self.min_silence_ms == 0 {
            return Err(ParleyError::Segmentation(
                "minimum silence length must be greater than 0 ms".to_string(),
            ));
        }
        if audio.sample_rate < 1000 {
            return Err(ParleyError::Segmentation(format!(
                "unsupported sample rate: {} Hz",
                audio.sample_rate
            )));
        }
        if audio.is_empty() {
            return Ok(Vec::new());
        }

        let samples = &audio.samples;
        let per_ms = audio.sample_rate as usize / 1000;
        let len_ms = samples.len() / per_ms;

        // Shorter than a single silence window: all or nothing
        if len_ms < self.min_silence_ms as usize {
            if rms_dbfs(samples) <= self.silence_threshold_dbfs {
                return Ok(Vec::new());
            }
            return Ok(vec![self.pad(0, samples, audio.sample_rate)]);
        }

        let energies: Vec<f64> = samples
            .chunks_exact(per_ms)
            .map(|ms| ms.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / per_ms as f64)
            .collect();

        let silent = self.silent_ranges(&energies);
        let spoken = nonsilent_ranges(&silent, len_ms);
        let ranges = widen_ranges(&spoken, self.keep_silence_ms as usize, len_ms);

        debug!(
            "Found {} silent and {} non-silent ranges in {} ms of audio",
            silent.len(),
            ranges.len(),
            len_ms
        );

        let segments = ranges
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| {
                let from = start * per_ms;
                // The last range also takes the trailing partial millisecond
                let to = if end >= len_ms {
                    samples.len()
                } else {
                    end * per_ms
                };
                self.pad(index, &samples[from..to], audio.sample_rate)
            })
            .collect();

        Ok(segments)
    }
}
