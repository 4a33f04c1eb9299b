//! Audio decoding and in-memory audio buffers

use crate::error::{ParleyError, Result};
use ffmpeg_next as ffmpeg;
use std::io::Cursor;
use std::path::Path;
use tokio::task;
use tracing::{debug, warn};

/// Sample rate everything is decoded to
pub const SAMPLE_RATE: u32 = 16000;

/// Decoded audio track (f32, mono)
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Raw audio samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate
    pub sample_rate: u32,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One padded, silence-delimited slice of the source audio.
///
/// The index is assigned once at split time and is the only link between a
/// segment and its place in the transcript.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    index: usize,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSegment {
    pub fn new(index: usize, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            index,
            samples,
            sample_rate,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Encode as a 16-bit PCM mono WAV file in memory
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(self.sample_rate))?;
            for &sample in &self.samples {
                writer.write_sample(to_i16(sample))?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Write the segment to disk as a 16-bit PCM mono WAV file
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let mut writer = hound::WavWriter::create(path, wav_spec(self.sample_rate))?;
        for &sample in &self.samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Root-mean-square level of a block of samples, in dBFS.
///
/// Digital silence is `f32::NEG_INFINITY`.
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let energy = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy_to_dbfs(energy)
}

fn energy_to_dbfs(mean_square: f32) -> f32 {
    if mean_square <= 0.0 {
        return f32::NEG_INFINITY;
    }
    10.0 * mean_square.log10()
}

/// Ratio the speech energy must exceed the measured noise floor by
const DYNAMIC_ENERGY_RATIO: f32 = 1.5;

/// Length of the window used for noise calibration
const NOISE_CALIBRATION_MS: usize = 1000;

/// Calibrate against the ambient noise at the start of a segment and report
/// whether anything after it is loud enough to be speech.
///
/// The calibration window is the first second of audio, capped at half the
/// segment. Speech energy is measured in 50 ms blocks.
pub fn exceeds_ambient_noise(samples: &[f32], sample_rate: u32) -> bool {
    if samples.is_empty() || sample_rate == 0 {
        return false;
    }
    let calibration_len = (sample_rate as usize * NOISE_CALIBRATION_MS / 1000).min(samples.len() / 2);
    if calibration_len == 0 {
        return rms_energy(samples) > 0.0;
    }

    let noise_floor = rms_energy(&samples[..calibration_len]);
    let threshold = noise_floor * DYNAMIC_ENERGY_RATIO;
    let block = (sample_rate as usize / 20).max(1);

    samples[calibration_len..]
        .chunks(block)
        .any(|chunk| rms_energy(chunk) > threshold)
}

fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Audio decoder using FFmpeg
pub struct AudioProcessor {
    initialized: bool,
}

impl AudioProcessor {
    /// Create a new audio processor
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Initialize FFmpeg (call once)
    fn ensure_initialized(&mut self) -> Result<()> {
        if !self.initialized {
            ffmpeg::init().map_err(|e| {
                ParleyError::Segmentation(format!("Failed to initialize FFmpeg: {}", e))
            })?;

            // Keep FFmpeg's own logging off stderr
            unsafe {
                ffmpeg_next::sys::av_log_set_level(ffmpeg_next::sys::AV_LOG_QUIET);
            }

            self.initialized = true;
        }
        Ok(())
    }

    /// Load an audio file as 16 kHz mono samples
    pub async fn load_audio<P: AsRef<Path>>(&mut self, path: P) -> Result<AudioData> {
        let path = path.as_ref().to_path_buf();

        // FFmpeg decoding is blocking
        task::spawn_blocking(move || {
            let mut processor = AudioProcessor::new();
            processor.load_audio_sync(&path)
        })
        .await
        .map_err(|e| ParleyError::Segmentation(format!("Task join error: {}", e)))?
    }

    fn load_audio_sync(&mut self, path: &Path) -> Result<AudioData> {
        if !path.exists() {
            return Err(ParleyError::Segmentation(format!(
                "Audio file not found: {}",
                path.display()
            )));
        }

        self.ensure_initialized()?;

        let mut ictx = ffmpeg::format::input(&path).map_err(|e| {
            ParleyError::Segmentation(format!("Failed to open audio file: {}", e))
        })?;

        let input = ictx
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or_else(|| ParleyError::Segmentation("No audio stream found".to_string()))?;
        let stream_index = input.index();

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(input.parameters())?;
        let mut decoder = context_decoder.decoder().audio()?;

        let mut resampler = Resampler::default();
        let mut samples = Vec::new();
        let mut frame = ffmpeg::frame::Audio::empty();

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            match decoder.send_packet(&packet) {
                Ok(()) => {
                    while decoder.receive_frame(&mut frame).is_ok() {
                        resampler.push(&frame, &mut samples)?;
                    }
                }
                Err(ffmpeg::Error::InvalidData) => {
                    warn!("Skipping invalid packet at stream index {}", stream_index);
                }
                Err(e) => {
                    return Err(ParleyError::Segmentation(format!(
                        "Failed to send packet to decoder: {}",
                        e
                    )))
                }
            }
        }

        match decoder.send_eof() {
            Ok(()) => {
                while decoder.receive_frame(&mut frame).is_ok() {
                    resampler.push(&frame, &mut samples)?;
                }
            }
            Err(e) => warn!("Failed to flush decoder, but continuing: {}", e),
        }
        resampler.finish(&mut samples);

        if samples.is_empty() {
            return Err(ParleyError::Segmentation(
                "No audio data could be extracted from file - file may be corrupted or unsupported"
                    .to_string(),
            ));
        }

        debug!(
            "Decoded {} samples ({:.2}s) from {}",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32,
            path.display()
        );

        Ok(AudioData::new(samples, SAMPLE_RATE))
    }
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::new()
    }
}

const OUTPUT_FORMAT: ffmpeg::format::Sample =
    ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar);

/// Extra output room for the samples the resampler holds back between calls
const RESAMPLER_HEADROOM: usize = 512;

/// Converts decoded frames of any layout to mono planar f32 at `SAMPLE_RATE`,
/// rebuilding the software resampler whenever the input format changes.
///
/// The resampler keeps a tail of samples buffered. It is drained before a
/// rebuild and by [`Resampler::finish`] at end of stream.
#[derive(Default)]
struct Resampler {
    context: Option<ffmpeg::software::resampling::context::Context>,
    input: Option<(
        ffmpeg::format::Sample,
        ffmpeg::channel_layout::ChannelLayout,
        u32,
    )>,
    output: Option<ffmpeg::frame::Audio>,
    capacity: usize,
}

impl Resampler {
    fn push(&mut self, frame: &ffmpeg::frame::Audio, samples: &mut Vec<f32>) -> Result<()> {
        let layout = if frame.channel_layout().channels() == 0 {
            match frame.channels() {
                1 => ffmpeg::channel_layout::ChannelLayout::MONO,
                2 => ffmpeg::channel_layout::ChannelLayout::STEREO,
                n => ffmpeg::channel_layout::ChannelLayout::default(n as i32),
            }
        } else {
            frame.channel_layout()
        };
        let input = (frame.format(), layout, frame.rate());

        if self.context.is_none() || self.input != Some(input) {
            self.finish(samples);
            self.context = Some(
                ffmpeg::software::resampling::context::Context::get(
                    input.0,
                    input.1,
                    input.2,
                    OUTPUT_FORMAT,
                    ffmpeg::channel_layout::ChannelLayout::MONO,
                    SAMPLE_RATE,
                )
                .map_err(|e| {
                    ParleyError::Segmentation(format!("Failed to create resampler: {}", e))
                })?,
            );
            self.input = Some(input);
        }

        let rate = input.2.max(1) as usize;
        self.reserve(frame.samples() * SAMPLE_RATE as usize / rate + RESAMPLER_HEADROOM);

        let (Some(context), Some(output)) = (self.context.as_mut(), self.output.as_mut()) else {
            return Ok(());
        };
        if let Err(e) = context.run(frame, output) {
            warn!("Skipping frame due to resampling error: {}", e);
            self.context = None;
            self.input = None;
            return Ok(());
        }
        append_plane(output, samples);
        Ok(())
    }

    /// Drain the samples still buffered in the current resampler.
    fn finish(&mut self, samples: &mut Vec<f32>) {
        if self.context.is_none() {
            return;
        }
        self.reserve(RESAMPLER_HEADROOM);
        let capacity = self.capacity;
        let (Some(context), Some(output)) = (self.context.as_mut(), self.output.as_mut()) else {
            return;
        };
        loop {
            output.set_samples(capacity);
            match context.flush(output) {
                Ok(_) if output.samples() > 0 => append_plane(output, samples),
                Ok(_) => break,
                Err(e) => {
                    warn!("Failed to flush resampler, dropping its tail: {}", e);
                    break;
                }
            }
        }
    }

    /// Make the output frame hold at least `needed` samples.
    ///
    /// Every conversion shrinks the frame's sample count to what it produced,
    /// so the full capacity is restored before each call.
    fn reserve(&mut self, needed: usize) {
        if self.output.is_none() || needed > self.capacity {
            self.capacity = needed.max(self.capacity);
            self.output = Some(ffmpeg::frame::Audio::new(
                OUTPUT_FORMAT,
                self.capacity,
                ffmpeg::channel_layout::ChannelLayout::MONO,
            ));
        }
        if let Some(output) = self.output.as_mut() {
            output.set_samples(self.capacity);
        }
    }
}

fn append_plane(output: &ffmpeg::frame::Audio, samples: &mut Vec<f32>) {
    let count = output.samples();
    let data = output.data(0);
    // SAFETY: the resampler writes `count` planar f32 samples into plane 0,
    // and `data` is at least `count * 4` bytes long.
    let slice = unsafe { std::slice::from_raw_parts(data.as_ptr() as *const f32, count) };
    samples.extend_from_slice(slice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 0.3).sin())
            .collect()
    }

    #[tokio::test]
    async fn test_missing_file_error() {
        let mut processor = AudioProcessor::new();
        let result = processor.load_audio("nonexistent_file.wav").await;
        assert!(matches!(result, Err(ParleyError::Segmentation(_))));
    }

    #[test]
    fn test_rms_dbfs() {
        assert_eq!(rms_dbfs(&[]), f32::NEG_INFINITY);
        assert_eq!(rms_dbfs(&[0.0; 100]), f32::NEG_INFINITY);
        // Full-scale square wave is 0 dBFS
        let square: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(rms_dbfs(&square).abs() < 1e-4);
        // Halving the amplitude drops the level by ~6 dB
        let half: Vec<f32> = square.iter().map(|s| s * 0.5).collect();
        assert!((rms_dbfs(&half) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_segment_accessors() {
        let segment = AudioSegment::new(3, vec![0.0; 8000], SAMPLE_RATE);
        assert_eq!(segment.index(), 3);
        assert_eq!(segment.duration_ms(), 500);
        assert_eq!(segment.sample_rate(), SAMPLE_RATE);
    }

    #[test]
    fn test_wav_bytes_roundtrip_header() {
        let segment = AudioSegment::new(0, tone(1600, 0.5), SAMPLE_RATE);
        let bytes = segment.to_wav_bytes().unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 1600);
    }

    #[test]
    fn test_ambient_noise_rejects_flat_noise() {
        let noise = tone(SAMPLE_RATE as usize * 2, 0.01);
        assert!(!exceeds_ambient_noise(&noise, SAMPLE_RATE));
    }

    #[test]
    fn test_ambient_noise_accepts_speech_after_noise() {
        let mut samples = tone(SAMPLE_RATE as usize, 0.01);
        samples.extend(tone(SAMPLE_RATE as usize, 0.5));
        assert!(exceeds_ambient_noise(&samples, SAMPLE_RATE));
    }

    #[test]
    fn test_ambient_noise_empty() {
        assert!(!exceeds_ambient_noise(&[], SAMPLE_RATE));
    }
}
