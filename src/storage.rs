//! # Upload Storage
//!
//! Decides where an uploaded file lives on disk and writes it there.
//!
//! ## Naming Rule:
//! Files are stored as `<upload_dir>/<job_id>_<basename>`. The job id prefix
//! keeps concurrent uploads of `meeting.mp3` from overwriting each other, and
//! only the basename of the client-supplied name is used so a name like
//! `../../etc/passwd.mp3` cannot escape the upload directory.
//!
//! ## Rust Concepts Used:
//! - **Generic streams**: `write_stream` accepts any chunk stream, so the HTTP
//!   handler passes a multipart field and tests pass an in-memory stream
//! - **pin_mut!**: pins the stream on the stack so we can call `.next()` on it

use std::fmt::Display;
use std::path::{Path, PathBuf};

use futures_util::{pin_mut, Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::StorageConfig;
use crate::jobs::JobId;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file provided")]
    MissingFile,

    #[error("Empty file provided")]
    EmptyFile,

    #[error("Unsupported file type '{extension}'. Allowed: {allowed}")]
    UnsupportedType { extension: String, allowed: String },

    #[error("File too large. Maximum size: {}MB", .limit / (1024 * 1024))]
    TooLarge { limit: u64 },

    #[error("Upload interrupted: {0}")]
    Interrupted(String),

    #[error("Failed to save file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            dir: config.upload_dir.clone(),
            max_bytes: config.max_file_size_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the upload directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| UploadError::Io {
                path: self.dir.clone(),
                source,
            })
    }

    /// Reduces a client-supplied file name to a safe basename with an
    /// allowed extension.
    pub fn validate_name(&self, raw: &str) -> Result<String, UploadError> {
        // Browsers on Windows may send the full path with backslashes.
        let name = raw
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .trim()
            .to_string();

        if name.is_empty() || name == "." || name == ".." {
            return Err(UploadError::MissingFile);
        }

        let extension = Path::new(&name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();

        if !self.allowed_extensions.contains(&extension) {
            return Err(UploadError::UnsupportedType {
                extension,
                allowed: self.allowed_extensions.join(", "),
            });
        }

        Ok(name)
    }

    pub fn path_for(&self, id: JobId, file_name: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", id, file_name))
    }

    /// Streams chunks to `path`, enforcing the size limit as bytes arrive.
    ///
    /// On any failure the partial file is removed. Returns the number of
    /// bytes written.
    pub async fn write_stream<S, B, E>(&self, path: &Path, chunks: S) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let result = self.write_inner(path, chunks).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
                }
            }
        }
        result
    }

    async fn write_inner<S, B, E>(&self, path: &Path, chunks: S) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let io_err = |source: std::io::Error| UploadError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut written: u64 = 0;

        pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| UploadError::Interrupted(e.to_string()))?;
            let bytes = chunk.as_ref();

            written += bytes.len() as u64;
            if written > self.max_bytes {
                return Err(UploadError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(bytes).await.map_err(io_err)?;
        }

        file.flush().await.map_err(io_err)?;

        if written == 0 {
            return Err(UploadError::EmptyFile);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use futures_util::stream;

    fn store(dir: &Path, max_bytes: u64) -> UploadStore {
        UploadStore::new(&StorageConfig {
            upload_dir: dir.to_path_buf(),
            max_file_size_bytes: max_bytes,
            ..AppConfig::default().storage
        })
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], String>> {
        stream::iter(parts.iter().map(|p| Ok(p.as_bytes())).collect::<Vec<_>>())
    }

    #[test]
    fn test_validate_name_strips_directories() {
        let store = store(Path::new("uploads"), 1024);
        assert_eq!(store.validate_name("../../etc/speech.wav").unwrap(), "speech.wav");
        assert_eq!(store.validate_name(r"C:\Users\me\talk.MP3").unwrap(), r"talk.MP3");
    }

    #[test]
    fn test_validate_name_rejects_bad_input() {
        let store = store(Path::new("uploads"), 1024);
        assert!(matches!(store.validate_name(""), Err(UploadError::MissingFile)));
        assert!(matches!(store.validate_name("dir/"), Err(UploadError::MissingFile)));
        assert!(matches!(
            store.validate_name("notes.txt"),
            Err(UploadError::UnsupportedType { .. })
        ));
        assert!(matches!(
            store.validate_name("noextension"),
            Err(UploadError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_path_is_prefixed_with_job_id() {
        let store = store(Path::new("uploads"), 1024);
        let id = JobId::new();
        let path = store.path_for(id, "speech.wav");
        assert_eq!(path, Path::new("uploads").join(format!("{}_speech.wav", id)));
    }

    #[tokio::test]
    async fn test_write_stream_saves_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let path = dir.path().join("a.wav");

        let written = store.write_stream(&path, chunks(&["RIFF", "data"])).await.unwrap();
        assert_eq!(written, 8);
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFFdata");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 6);
        let path = dir.path().join("big.wav");

        let err = store.write_stream(&path, chunks(&["RIFF", "data"])).await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { limit: 6 }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let path = dir.path().join("empty.wav");

        let err = store.write_stream(&path, chunks(&[])).await.unwrap_err();
        assert!(matches!(err, UploadError::EmptyFile));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("a/b/uploads"), 1024);
        store.ensure_dir().await.unwrap();
        assert!(store.dir().is_dir());
    }
}
