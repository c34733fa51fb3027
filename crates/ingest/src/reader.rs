use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Failures at the document intake boundary. OCR and layout-aware
/// extraction live upstream; this reader only handles plain text formats.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<String, IntakeError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension {
            "txt" | "md" => fs::read_to_string(path).await.map_err(|e| IntakeError::Io {
                path: path.to_string_lossy().to_string(),
                source: e,
            }),
            _ => Err(IntakeError::UnsupportedFormat(extension.to_string())),
        }
    }

    /// Read all supported files in a directory, skipping the rest
    pub async fn read_directory(dir: &Path) -> Result<Vec<(String, String)>, IntakeError> {
        let mut files = Vec::new();

        let mut entries = fs::read_dir(dir).await.map_err(|e| IntakeError::Io {
            path: dir.to_string_lossy().to_string(),
            source: e,
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| IntakeError::Io {
            path: dir.to_string_lossy().to_string(),
            source: e,
        })? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            match Self::read_file(&path).await {
                Ok(content) => {
                    files.push((path.to_string_lossy().to_string(), content));
                }
                Err(IntakeError::UnsupportedFormat(ext)) => {
                    warn!(path = %path.display(), format = %ext, "skipping unsupported file");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(files)
    }
}
