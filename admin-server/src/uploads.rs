use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::info;

pub const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024;
pub const DOCUMENT_SIZE_LIMIT: usize = 50 * 1024 * 1024;

const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Only {kind} files are allowed ({allowed}), got {filename:?}")]
    InvalidFileType {
        kind: AssetKind,
        allowed: String,
        filename: String,
    },
    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Failed to store upload: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Document,
}

impl AssetKind {
    pub const ALL: [AssetKind; 2] = [AssetKind::Image, AssetKind::Document];

    /// Directory under the public root, also the URL prefix the files are served from.
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetKind::Image => "images",
            AssetKind::Document => "files",
        }
    }

    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            AssetKind::Image => &["jpg", "jpeg", "png", "gif", "webp"],
            AssetKind::Document => &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt"],
        }
    }

    /// Multipart field carrying the file.
    pub fn form_field(self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Document => "file",
        }
    }

    fn default_hint(self) -> &'static str {
        self.form_field()
    }

    fn default_limit(self) -> usize {
        match self {
            AssetKind::Image => IMAGE_SIZE_LIMIT,
            AssetKind::Document => DOCUMENT_SIZE_LIMIT,
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetKind::Image => "image",
            AssetKind::Document => "document",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAsset {
    pub filename: String,
    pub path: String,
}

/// Writes uploaded payloads into `images/` and `files/` under the public root.
pub struct UploadManager {
    root: PathBuf,
    image_limit: usize,
    document_limit: usize,
    images_ready: AtomicBool,
    files_ready: AtomicBool,
}

impl UploadManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        UploadManager {
            root: root.into(),
            image_limit: AssetKind::Image.default_limit(),
            document_limit: AssetKind::Document.default_limit(),
            images_ready: AtomicBool::new(false),
            files_ready: AtomicBool::new(false),
        }
    }

    pub fn with_limits(mut self, image_limit: usize, document_limit: usize) -> Self {
        self.image_limit = image_limit;
        self.document_limit = document_limit;
        self
    }

    pub fn dir(&self, kind: AssetKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn limit(&self, kind: AssetKind) -> usize {
        match kind {
            AssetKind::Image => self.image_limit,
            AssetKind::Document => self.document_limit,
        }
    }

    pub fn store_image(
        &self,
        payload: &[u8],
        original_filename: &str,
        hint: Option<&str>,
    ) -> Result<StoredAsset, UploadError> {
        self.store(AssetKind::Image, payload, original_filename, hint)
    }

    pub fn store_document(
        &self,
        payload: &[u8],
        original_filename: &str,
        hint: Option<&str>,
    ) -> Result<StoredAsset, UploadError> {
        self.store(AssetKind::Document, payload, original_filename, hint)
    }

    /// Validates and writes one upload. Nothing touches the disk unless the
    /// extension is allowed and the payload fits the limit.
    pub fn store(
        &self,
        kind: AssetKind,
        payload: &[u8],
        original_filename: &str,
        hint: Option<&str>,
    ) -> Result<StoredAsset, UploadError> {
        let ext = allowed_extension(kind, original_filename).ok_or_else(|| {
            UploadError::InvalidFileType {
                kind,
                allowed: kind.allowed_extensions().join(", "),
                filename: original_filename.to_string(),
            }
        })?;

        let limit = self.limit(kind);
        if payload.len() > limit {
            return Err(UploadError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let dir = self.ensure_dir(kind)?;
        let hint = hint
            .and_then(sanitize_hint)
            .unwrap_or_else(|| kind.default_hint().to_string());
        let filename = unique_filename(&hint, ext);
        write_or_discard(&dir.join(&filename), |file| file.write_all(payload))?;

        info!(kind = %kind, filename = %filename, bytes = payload.len(), "Stored upload");

        Ok(StoredAsset {
            path: format!("/{}/{}", kind.dir_name(), filename),
            filename,
        })
    }

    /// Non-hidden files currently in the directory for `kind`, sorted.
    pub fn list_stored(&self, kind: AssetKind) -> io::Result<Vec<String>> {
        let dir = self.dir(kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn ensure_dir(&self, kind: AssetKind) -> io::Result<PathBuf> {
        let dir = self.dir(kind);
        let ready = match kind {
            AssetKind::Image => &self.images_ready,
            AssetKind::Document => &self.files_ready,
        };
        if !ready.load(Ordering::Acquire) {
            fs::create_dir_all(&dir)?;
            ready.store(true, Ordering::Release);
        }
        Ok(dir)
    }
}

/// Extension of `filename` as written, if it is on the allow-list for `kind`.
fn allowed_extension(kind: AssetKind, filename: &str) -> Option<&str> {
    let ext = Path::new(filename).extension()?.to_str()?;
    let lower = ext.to_ascii_lowercase();
    kind.allowed_extensions()
        .contains(&lower.as_str())
        .then_some(ext)
}

fn sanitize_hint(hint: &str) -> Option<String> {
    let cleaned: String = hint
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Creates `path` and fills it with `write`. On failure the partial file is
/// removed so a failed upload never leaves anything behind.
fn write_or_discard(
    path: &Path,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let mut file = File::create(path)?;
    if let Err(e) = write(&mut file).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

fn unique_filename(hint: &str, ext: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}.{}", hint, Utc::now().timestamp_millis(), suffix, ext)
}
