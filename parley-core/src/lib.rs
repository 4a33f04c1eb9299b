//! Parley Core Library
//!
//! Splits long recordings on silence and transcribes the pieces concurrently,
//! using whisper.cpp locally or an OpenAI-compatible HTTP service.

pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod pipeline;
pub mod segment;
pub mod temp;
pub mod transcriber;
pub mod transcript;
pub mod whisper;

pub use audio::{AudioData, AudioProcessor, AudioSegment};
pub use config::{Engine, HttpOptions, TranscriptionConfig, WhisperOptions};
pub use error::{ParleyError, Result};
pub use http::HttpTranscriber;
pub use model::{ModelManager, WhisperModel};
pub use pipeline::{Pipeline, PipelineOptions, Progress, SegmentJob, SegmentResult};
pub use segment::{Segmenter, SilenceSegmenter};
pub use temp::{ArtifactStore, TempArtifact};
pub use transcriber::Transcriber;
pub use transcript::{default_output_path, Transcript};
pub use whisper::WhisperTranscriber;

use std::path::Path;
use std::sync::Arc;
use tokio::task;
use tracing::info;

/// Build the backend selected by `config.engine`.
pub async fn build_transcriber(config: &TranscriptionConfig) -> Result<Arc<dyn Transcriber>> {
    match config.engine {
        Engine::Whisper => Ok(Arc::new(WhisperTranscriber::load(&config.whisper).await?)),
        Engine::Http => {
            // The blocking client may not be created on an async thread
            let options = config.http.clone();
            let transcriber = task::spawn_blocking(move || HttpTranscriber::new(&options))
                .await
                .map_err(|e| ParleyError::Configuration(format!("Task join error: {}", e)))??;
            Ok(Arc::new(transcriber))
        }
    }
}

/// Split decoded audio and transcribe every segment.
///
/// Temporary segment files are named after `base_name`. Nothing is written
/// besides those files; saving the transcript is up to the caller. Phase
/// messages are not logged when `config.silent` is set.
pub async fn transcribe_audio<F>(
    audio: &AudioData,
    base_name: &str,
    config: &TranscriptionConfig,
    transcriber: Arc<dyn Transcriber>,
    on_progress: F,
) -> Result<Transcript>
where
    F: FnMut(Progress),
{
    config.validate()?;

    if !config.silent {
        info!("Splitting audio (this could take a while)...");
    }
    let segments = SilenceSegmenter::from_config(config).split(audio)?;
    if !config.silent {
        info!("Found {} segments", segments.len());
    }

    let store = ArtifactStore::prepare(&config.temp_dir, base_name, config.keep_temporary_files)?;
    let pipeline = Pipeline::new(transcriber, PipelineOptions::from(config)).with_artifacts(store);
    let results = pipeline.run_with_progress(segments, on_progress).await?;

    Ok(Transcript::from_results(results))
}

/// High-level transcription function
pub async fn transcribe_file<P, F>(
    input: P,
    config: &TranscriptionConfig,
    on_progress: F,
) -> Result<Transcript>
where
    P: AsRef<Path>,
    F: FnMut(Progress),
{
    let input = input.as_ref();
    config.validate()?;

    let transcriber = build_transcriber(config).await?;

    if !config.silent {
        info!("Decoding {}", input.display());
    }
    let audio = AudioProcessor::new().load_audio(input).await?;

    transcribe_audio(
        &audio,
        &transcript::base_name(input),
        config,
        transcriber,
        on_progress,
    )
    .await
}
