//! Local speech recognition with whisper.cpp

use crate::audio::{exceeds_ambient_noise, AudioSegment, SAMPLE_RATE};
use crate::config::WhisperOptions;
use crate::error::{ParleyError, Result};
use crate::model::ModelManager;
use crate::transcriber::{normalize_text, primary_language, strip_final_period, Transcriber};
use std::path::PathBuf;
use tokio::task;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// whisper.cpp refuses inputs shorter than one second
const MIN_SAMPLES: usize = SAMPLE_RATE as usize * 21 / 20;

/// Shares one loaded model between all workers. Each call gets its own
/// decoding state.
pub struct WhisperTranscriber {
    context: WhisperContext,
    threads: i32,
}

impl WhisperTranscriber {
    /// Load the configured model, or the best downloaded one.
    pub async fn load(options: &WhisperOptions) -> Result<Self> {
        // Redirect whisper.cpp output to tracing
        whisper_rs::install_logging_hooks();

        let model_path = match &options.model_path {
            Some(path) => path.clone(),
            None => ModelManager::new()?.find_default_model()?,
        };
        let context = load_model(model_path, options.use_gpu).await?;

        Ok(Self {
            context,
            threads: options.threads_per_worker.max(1) as i32,
        })
    }

    fn recognize(&self, samples: &[f32], language: &str) -> Result<Option<String>> {
        let language = primary_language(language);
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if language != "auto" {
            params.set_language(Some(&language));
        }
        params.set_n_threads(self.threads);
        params.set_translate(false);
        params.set_no_context(true);
        params.set_suppress_blank(true);
        params.set_print_timestamps(false);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);

        let mut state = self.context.create_state().map_err(|e| {
            ParleyError::TranscriptionService(format!("Failed to create state: {}", e))
        })?;

        let padded;
        let input = if samples.len() < MIN_SAMPLES {
            let mut buffer = samples.to_vec();
            buffer.resize(MIN_SAMPLES, 0.0);
            padded = buffer;
            &padded[..]
        } else {
            samples
        };

        state
            .full(params, input)
            .map_err(|e| ParleyError::TranscriptionService(format!("Transcription failed: {}", e)))?;

        let num_segments = state.full_n_segments().map_err(|e| {
            ParleyError::TranscriptionService(format!("Failed to get segment count: {}", e))
        })?;

        let mut text = String::new();
        for i in 0..num_segments {
            let segment = state.full_get_segment_text(i).map_err(|e| {
                ParleyError::TranscriptionService(format!("Failed to read segment {}: {}", i, e))
            })?;
            text.push_str(&segment);
            text.push(' ');
        }

        Ok(normalize_text(&text).map(strip_final_period))
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &self,
        audio: &AudioSegment,
        language: &str,
        adjust_for_noise: bool,
    ) -> Result<Option<String>> {
        if audio.sample_rate() != SAMPLE_RATE {
            return Err(ParleyError::TranscriptionService(format!(
                "whisper needs {} Hz audio, got {} Hz",
                SAMPLE_RATE,
                audio.sample_rate()
            )));
        }
        if adjust_for_noise && !exceeds_ambient_noise(audio.samples(), audio.sample_rate()) {
            debug!("Segment {} is no louder than its ambient noise", audio.index());
            return Ok(None);
        }
        self.recognize(audio.samples(), language)
    }

    fn name(&self) -> &str {
        "whisper"
    }
}

async fn load_model(model_path: PathBuf, use_gpu: bool) -> Result<WhisperContext> {
    if !model_path.is_file() {
        return Err(ParleyError::Model(format!(
            "Model file not found: {}",
            model_path.display()
        )));
    }
    info!("Loading Whisper model: {}", model_path.display());

    let mut params = WhisperContextParameters::default();
    params.use_gpu(use_gpu);

    let model_path_str = model_path.to_string_lossy().to_string();
    task::spawn_blocking(move || WhisperContext::new_with_params(&model_path_str, params))
        .await
        .map_err(|e| ParleyError::Model(format!("Task join error: {}", e)))?
        .map_err(|e| ParleyError::Model(format!("Failed to load model: {}", e)))
}
