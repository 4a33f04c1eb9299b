//! Assembling and saving the final transcript

use crate::error::{ParleyError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Recognized lines in segment order. Segments without speech are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn from_results(results: Vec<Option<String>>) -> Self {
        Self {
            lines: results.into_iter().flatten().collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// One line per recognized segment, each ending in ".\n"
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.len() + 2).sum());
        for line in &self.lines {
            out.push_str(line);
            out.push_str(".\n");
        }
        out
    }

    /// Write the rendered transcript, replacing any existing file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.render()).await.map_err(|e| {
            ParleyError::Resource(format!(
                "Failed to write transcript to {}: {}",
                path.display(),
                e
            ))
        })
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// `talk.mp3` → `talk.txt`
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("txt")
}

/// File stem used to name temporary segment files.
pub fn base_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segment".to_string())
}
