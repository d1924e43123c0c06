use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use shared::{FileEntry, TaskVariant};
use uuid::Uuid;

/// Extensions accepted for upload and for serving result artifacts.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Upload size ceiling (50 MiB).
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Subdirectory of the data dir holding result artifacts. Keeping
/// results out of the top level is what excludes them from dedup scans
/// and upload listings.
const OUTPUT_SUBDIR: &str = "detected";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file extension not allowed: {0}")]
    ExtensionNotAllowed(String),
    #[error("empty file")]
    EmptyFile,
    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: usize, limit: usize },
    #[error("invalid file name: {0}")]
    InvalidFileName(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True for validation failures the caller should see as 4xx.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, StoreError::Io(_))
    }
}

/// An image persisted in the active namespace. Identity is the content
/// hash; the file name is only a display handle.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub image: StoredImage,
    /// True when identical bytes were already stored and no new file
    /// was written.
    pub deduplicated: bool,
}

#[derive(Clone)]
pub struct ContentStore {
    data_dir: PathBuf,
    output_dir: PathBuf,
}

impl ContentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let output_dir = data_dir.join(OUTPUT_SUBDIR);
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            data_dir,
            output_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn content_hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn extension_of(name: &str) -> Option<String> {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    fn is_allowed_extension(name: &str) -> bool {
        Self::extension_of(name)
            .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    fn validate(name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if !Self::is_allowed_extension(name) {
            return Err(StoreError::ExtensionNotAllowed(
                Self::extension_of(name).unwrap_or_default(),
            ));
        }
        if bytes.is_empty() {
            return Err(StoreError::EmptyFile);
        }
        if bytes.len() > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge {
                size: bytes.len(),
                limit: MAX_FILE_SIZE,
            });
        }
        Ok(())
    }

    /// Stores a payload under the caller-supplied display name.
    ///
    /// Identical bytes already present in the active namespace resolve
    /// to the existing file; a name collision with different content
    /// gets a numeric suffix before the extension.
    pub fn put(&self, name: &str, bytes: &[u8]) -> Result<PutOutcome, StoreError> {
        // Strip any client-supplied directory components.
        let name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidFileName(name.to_string()))?;
        Self::validate(name, bytes)?;

        let content_hash = Self::content_hash(bytes);

        if let Some(existing) = self.find_by_hash(&content_hash)? {
            log::info!(
                "reusing existing file {} (hash {})",
                existing.file_name,
                &content_hash[..8]
            );
            return Ok(PutOutcome {
                image: existing,
                deduplicated: true,
            });
        }

        let (file_name, path) = self.resolve_collision(name);
        self.write_atomic(&path, bytes)?;
        log::info!("stored new file {} (hash {})", file_name, &content_hash[..8]);

        Ok(PutOutcome {
            image: StoredImage {
                file_name,
                path,
                size: bytes.len() as u64,
                content_hash,
            },
            deduplicated: false,
        })
    }

    /// Full-file hash compare over the active namespace. Result
    /// artifacts live under the output subdirectory and are never
    /// scanned.
    fn find_by_hash(&self, hash: &str) -> Result<Option<StoredImage>, StoreError> {
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            if !Self::is_allowed_extension(&file_name) {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            if Self::content_hash(&bytes) == hash {
                return Ok(Some(StoredImage {
                    file_name,
                    size: bytes.len() as u64,
                    path,
                    content_hash: hash.to_string(),
                }));
            }
        }
        Ok(None)
    }

    fn resolve_collision(&self, name: &str) -> (String, PathBuf) {
        let path = self.data_dir.join(name);
        if !path.exists() {
            return (name.to_string(), path);
        }
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        let ext = Self::extension_of(name).unwrap_or_default();
        let mut counter = 1;
        loop {
            let candidate = format!("{}_{}.{}", stem, counter, ext);
            let candidate_path = self.data_dir.join(&candidate);
            if !candidate_path.exists() {
                return (candidate, candidate_path);
            }
            counter += 1;
        }
    }

    /// Writes via a temp file in the same directory plus rename, so a
    /// path either holds the complete payload or does not exist.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or(&self.data_dir);
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Deterministic result artifact path for an (image, variant) pair.
    pub fn output_path(&self, variant: TaskVariant, file_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}{}", variant.output_prefix(), file_name))
    }

    pub fn list_uploads(&self) -> Result<Vec<FileEntry>, StoreError> {
        Self::list_dir(&self.data_dir)
    }

    /// Result artifacts, newest first.
    pub fn list_results(&self) -> Result<Vec<FileEntry>, StoreError> {
        let mut files = Self::list_dir(&self.output_dir)?;
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    fn list_dir(dir: &Path) -> Result<Vec<FileEntry>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            if !Self::is_allowed_extension(&file_name) {
                continue;
            }
            let meta = entry.metadata()?;
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(FileEntry {
                file_name,
                size: meta.len(),
                created_at: DateTime::<Utc>::from(created).timestamp(),
            });
        }
        Ok(files)
    }

    /// Resolves a result artifact for serving. Rejects names carrying
    /// path separators and disallowed extensions; with separators gone
    /// the name is a single component and cannot traverse.
    pub fn result_file(&self, file_name: &str) -> Result<Option<PathBuf>, StoreError> {
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(StoreError::InvalidFileName(file_name.to_string()));
        }
        if !Self::is_allowed_extension(file_name) {
            return Err(StoreError::ExtensionNotAllowed(
                Self::extension_of(file_name).unwrap_or_default(),
            ));
        }
        let path = self.output_dir.join(file_name);
        if path.is_file() { Ok(Some(path)) } else { Ok(None) }
    }
}
