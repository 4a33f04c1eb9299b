//! Downloading and locating ggml Whisper models

use crate::error::{ParleyError, Result};
use directories::ProjectDirs;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use strum::{EnumIter, EnumMessage, EnumString, IntoEnumIterator, IntoStaticStr};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Whisper models published as ggml files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, EnumIter, EnumMessage)]
pub enum WhisperModel {
    #[strum(serialize = "tiny", message = "Tiny model (39 MB, fastest, lowest accuracy)")]
    Tiny,
    #[strum(serialize = "tiny.en", message = "Tiny English-only model (39 MB)")]
    TinyEn,
    #[strum(serialize = "base", message = "Base model (142 MB, good balance of speed and accuracy)")]
    Base,
    #[strum(serialize = "base.en", message = "Base English-only model (142 MB)")]
    BaseEn,
    #[strum(serialize = "small", message = "Small model (466 MB, good accuracy)")]
    Small,
    #[strum(serialize = "small.en", message = "Small English-only model (466 MB)")]
    SmallEn,
    #[strum(serialize = "medium", message = "Medium model (1.5 GB, high accuracy)")]
    Medium,
    #[strum(serialize = "medium.en", message = "Medium English-only model (1.5 GB)")]
    MediumEn,
    #[strum(serialize = "large-v3", message = "Large v3 model (3.0 GB, most accurate)")]
    LargeV3,
    #[strum(serialize = "large-v3-turbo", message = "Large v3 Turbo model (1.5 GB, faster large model)")]
    LargeV3Turbo,
}

impl WhisperModel {
    /// Identifier used in file names and URLs
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    pub fn description(&self) -> &'static str {
        self.get_message().unwrap_or("")
    }

    /// Approximate download size in bytes
    pub const fn size(&self) -> u64 {
        let mb = match self {
            WhisperModel::Tiny | WhisperModel::TinyEn => 39,
            WhisperModel::Base | WhisperModel::BaseEn => 142,
            WhisperModel::Small | WhisperModel::SmallEn => 466,
            WhisperModel::Medium | WhisperModel::MediumEn => 1_500,
            WhisperModel::LargeV3 => 3_000,
            WhisperModel::LargeV3Turbo => 1_500,
        };
        mb * 1024 * 1024
    }

    pub fn filename(&self) -> String {
        format!("ggml-{}.bin", self.as_str())
    }

    fn url(&self) -> String {
        format!("{}/{}", MODEL_BASE_URL, self.filename())
    }

    pub fn all() -> impl Iterator<Item = WhisperModel> {
        WhisperModel::iter()
    }
}

impl std::fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps models under the per-user data directory.
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("dev", "parley", "parley").ok_or_else(|| {
            ParleyError::Configuration("Failed to get XDG directories".to_string())
        })?;
        Ok(Self::with_dir(project_dirs.data_dir().join("models")))
    }

    /// Use an explicit models directory
    pub fn with_dir<P: Into<PathBuf>>(models_dir: P) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, model: WhisperModel) -> PathBuf {
        self.models_dir.join(model.filename())
    }

    pub fn is_downloaded(&self, model: WhisperModel) -> bool {
        self.model_path(model).is_file()
    }

    pub fn downloaded_models(&self) -> Vec<WhisperModel> {
        WhisperModel::all().filter(|&m| self.is_downloaded(m)).collect()
    }

    /// Pick a model for a run when none was given.
    ///
    /// Prefers the base models, then anything downloaded, then a
    /// `models/` directory next to the working directory.
    pub fn find_default_model(&self) -> Result<PathBuf> {
        let preferred = [
            WhisperModel::BaseEn,
            WhisperModel::Base,
            WhisperModel::SmallEn,
            WhisperModel::Small,
            WhisperModel::TinyEn,
            WhisperModel::Tiny,
        ];
        let found = preferred
            .into_iter()
            .chain(WhisperModel::all())
            .find(|&m| self.is_downloaded(m));
        if let Some(model) = found {
            return Ok(self.model_path(model));
        }

        for name in ["models/ggml-base.en.bin", "models/ggml-base.bin"] {
            let path = PathBuf::from(name);
            if path.is_file() {
                return Ok(path);
            }
        }

        Err(ParleyError::Model(format!(
            "No Whisper model found in {}. Run `parley models download base.en` first",
            self.models_dir.display()
        )))
    }

    pub async fn download(&self, model: WhisperModel) -> Result<PathBuf> {
        self.download_with_progress(model, |_, _| {}).await
    }

    /// Stream the model to a `.tmp` file and rename it into place.
    pub async fn download_with_progress<F>(
        &self,
        model: WhisperModel,
        mut progress_callback: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(u64, Option<u64>),
    {
        fs::create_dir_all(&self.models_dir).await.map_err(|e| {
            ParleyError::Resource(format!("Failed to create models directory: {}", e))
        })?;

        let model_path = self.model_path(model);
        debug!("Downloading model {} to {:?}", model, model_path);

        let response = reqwest::get(model.url())
            .await
            .map_err(|e| ParleyError::Model(format!("Failed to download model: {}", e)))?;
        if !response.status().is_success() {
            return Err(ParleyError::Model(format!(
                "Failed to download model {}: HTTP {}",
                model,
                response.status()
            )));
        }

        let total_size = response.content_length();
        let temp_path = model_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            ParleyError::Resource(format!("Failed to create temporary file: {}", e))
        })?;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ParleyError::Model(format!("Failed to read download chunk: {}", e)))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress_callback(downloaded, total_size);
        }
        file.flush().await?;
        drop(file);

        fs::rename(&temp_path, &model_path).await.map_err(|e| {
            ParleyError::Resource(format!("Failed to rename downloaded file: {}", e))
        })?;

        info!("Downloaded model {} to {:?}", model, model_path);
        Ok(model_path)
    }
}
