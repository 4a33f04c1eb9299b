//! Configuration options for transcription runs

use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a transcription run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Minimum length of a pause, in milliseconds, that splits two segments
    pub silence_length_ms: u32,

    /// Anything quieter than this (dBFS) counts as silence
    pub silence_threshold_dbfs: f32,

    /// Digital silence added at both ends of every segment
    pub padding_ms: u32,

    /// Original audio kept around each non-silent range
    pub keep_silence_ms: u32,

    /// Language tag handed to the transcriber (e.g. "en-US")
    pub language: String,

    /// Calibrate against ambient noise before recognizing a segment
    pub adapt_to_ambient_noise: bool,

    /// Keep per-segment WAV files after transcription (debugging)
    pub keep_temporary_files: bool,

    /// Where per-segment WAV files are written
    pub temp_dir: PathBuf,

    /// Number of concurrent transcriptions
    pub max_workers: usize,

    /// Suppress phase messages, progress and summary output
    pub silent: bool,

    /// Which speech-to-text backend to use
    pub engine: Engine,

    pub whisper: WhisperOptions,

    pub http: HttpOptions,
}

/// Speech-to-text backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Engine {
    /// Local whisper.cpp inference
    Whisper,
    /// OpenAI-compatible transcription endpoint
    Http,
}

/// Options for the local whisper.cpp backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperOptions {
    /// Path to the ggml model file; the model manager picks one if unset
    pub model_path: Option<PathBuf>,

    /// Use GPU acceleration if available
    pub use_gpu: bool,

    /// Threads used by each whisper call
    pub threads_per_worker: usize,
}

/// Options for the remote HTTP backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpOptions {
    /// Base URL, e.g. "https://api.openai.com/v1"
    pub endpoint: Option<String>,

    /// Bearer token sent with each request
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Remote model name
    pub model: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            silence_length_ms: 700,
            silence_threshold_dbfs: -40.0,
            padding_ms: 100,
            keep_silence_ms: 100,
            language: "en-US".to_string(),
            adapt_to_ambient_noise: false,
            keep_temporary_files: false,
            temp_dir: PathBuf::from("./tmp"),
            max_workers: num_cpus::get(),
            silent: false,
            engine: Engine::Whisper,
            whisper: WhisperOptions::default(),
            http: HttpOptions::default(),
        }
    }
}

impl Default for WhisperOptions {
    fn default() -> Self {
        Self {
            model_path: None,
            use_gpu: true,
            threads_per_worker: 1,
        }
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "whisper-1".to_string(),
            timeout_secs: 60,
        }
    }
}

impl TranscriptionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_silence_length(mut self, ms: u32) -> Self {
        self.silence_length_ms = ms;
        self
    }

    pub fn with_silence_threshold(mut self, dbfs: f32) -> Self {
        self.silence_threshold_dbfs = dbfs;
        self
    }

    pub fn with_padding(mut self, ms: u32) -> Self {
        self.padding_ms = ms;
        self
    }

    /// Set the language
    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_ambient_noise(mut self, adapt: bool) -> Self {
        self.adapt_to_ambient_noise = adapt;
        self
    }

    pub fn with_keep_temporary(mut self, keep: bool) -> Self {
        self.keep_temporary_files = keep;
        self
    }

    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Set the number of concurrent workers
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Set the whisper model path
    pub fn with_model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.whisper.model_path = Some(path.into());
        self
    }

    /// Enable or disable GPU acceleration
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.whisper.use_gpu = use_gpu;
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.http.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.http.api_key = Some(key.into());
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ParleyError::Configuration(
                "max workers must be at least 1".to_string(),
            ));
        }
        if self.silence_length_ms == 0 {
            return Err(ParleyError::Configuration(
                "silence length must be greater than 0 ms".to_string(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(ParleyError::Configuration(
                "language tag must not be empty".to_string(),
            ));
        }
        if self.engine == Engine::Http && self.http.endpoint.is_none() {
            return Err(ParleyError::Configuration(
                "the http engine needs an endpoint".to_string(),
            ));
        }
        Ok(())
    }
}
