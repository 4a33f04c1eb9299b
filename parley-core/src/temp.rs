//! Per-segment WAV files kept next to a run for debugging

use crate::audio::AudioSegment;
use crate::error::{ParleyError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where per-segment WAV files go and whether they outlive their job.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    base_name: String,
    keep: bool,
}

impl ArtifactStore {
    /// Create the directory if needed. An existing directory is fine.
    pub fn prepare<P: Into<PathBuf>>(dir: P, base_name: &str, keep: bool) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ParleyError::Resource(format!(
                "Failed to create temporary directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            base_name: base_name.to_string(),
            keep,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for segment `index`, e.g. `talk.00000012.wav`
    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{:08}.wav", self.base_name, index))
    }

    /// Write the segment to disk.
    ///
    /// Write failures are only logged; the segment is still transcribed from
    /// memory. The returned guard also cleans up a partially written file.
    pub fn write(&self, segment: &AudioSegment) -> TempArtifact {
        let artifact = TempArtifact {
            path: self.path_for(segment.index()),
            keep: self.keep,
        };
        match segment.write_wav(&artifact.path) {
            Ok(()) => debug!("Wrote {}", artifact.path.display()),
            Err(e) => warn!(
                "Could not write temporary file {}: {}",
                artifact.path.display(),
                e
            ),
        }
        artifact
    }
}

/// A segment's WAV file, removed when dropped unless it is to be kept.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    keep: bool,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use tempfile::TempDir;

    fn segment(index: usize) -> AudioSegment {
        AudioSegment::new(index, vec![0.25; 1600], SAMPLE_RATE)
    }

    #[test]
    fn test_prepare_accepts_existing_directory() {
        let temp = TempDir::new().unwrap();
        assert!(ArtifactStore::prepare(temp.path(), "talk", false).is_ok());
        assert!(ArtifactStore::prepare(temp.path(), "talk", false).is_ok());
    }

    #[test]
    fn test_prepare_creates_nested_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");
        let store = ArtifactStore::prepare(&dir, "talk", false).unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_prepare_fails_when_path_is_a_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let err = ArtifactStore::prepare(&file, "talk", false).unwrap_err();
        assert!(matches!(err, ParleyError::Resource(_)));
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::prepare(temp.path(), "talk", false).unwrap();

        let artifact = store.write(&segment(12));
        let path = artifact.path().to_path_buf();
        assert_eq!(path.file_name().unwrap(), "talk.00000012.wav");
        assert!(path.exists());

        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_artifact_kept_when_requested() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::prepare(temp.path(), "talk", true).unwrap();

        let path = store.write(&segment(0)).path().to_path_buf();
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_on_drop_is_ignored() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::prepare(temp.path(), "talk", false).unwrap();
        let artifact = store.write(&segment(1));
        std::fs::remove_file(artifact.path()).unwrap();
        drop(artifact);
    }
}
