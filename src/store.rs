//! Track metadata storage.
//!
//! The engine only needs a key/value view of the metadata: it records the
//! format each track resolved to, looks up downloaded copies and searches
//! the local library as a last resort.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{error::Result, track::TrackId};

/// Format a track resolved to.
#[derive(Clone, Debug, PartialEq)]
pub struct FormatRecord {
    pub track_id: TrackId,
    pub bitrate: u32,
    pub mime_type: String,
    pub content_length: Option<u64>,
    pub loudness: Option<f64>,
}

/// A file in the local library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub title: String,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_format(&self, record: FormatRecord) -> Result<()>;

    /// First local file whose title contains `needle`.
    async fn find_local_by_title_substring(&self, needle: &str) -> Result<Option<LocalFile>>;

    /// Path of the downloaded copy of catalog track `id`.
    async fn download_path(&self, id: &str) -> Result<Option<PathBuf>>;
}

/// Metadata kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    formats: Mutex<HashMap<TrackId, FormatRecord>>,
    library: Mutex<Vec<LocalFile>>,
    downloads: Mutex<HashMap<String, PathBuf>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(&self, file: LocalFile) {
        if let Ok(mut library) = self.library.lock() {
            library.push(file);
        }
    }

    pub fn add_download(&self, id: impl Into<String>, path: impl Into<PathBuf>) {
        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.insert(id.into(), path.into());
        }
    }

    /// The last format recorded for `track_id`.
    #[must_use]
    pub fn format(&self, track_id: &TrackId) -> Option<FormatRecord> {
        self.formats.lock().ok()?.get(track_id).cloned()
    }

    /// Adds the regular files in `dir` to the library, titled by file stem.
    ///
    /// Subdirectories are not descended into. Returns the number of files
    /// added.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be listed.
    pub async fn scan_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(title) = path.file_stem().and_then(|stem| stem.to_str()) {
                found.push(LocalFile {
                    title: title.to_owned(),
                    path,
                });
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        let count = found.len();
        self.library.lock()?.extend(found);

        debug!("library: added {count} files from {}", dir.as_ref().display());
        Ok(count)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn put_format(&self, record: FormatRecord) -> Result<()> {
        self.formats.lock()?.insert(record.track_id.clone(), record);
        Ok(())
    }

    async fn find_local_by_title_substring(&self, needle: &str) -> Result<Option<LocalFile>> {
        if needle.is_empty() {
            return Ok(None);
        }
        let library = self.library.lock()?;
        Ok(library.iter().find(|file| file.title.contains(needle)).cloned())
    }

    async fn download_path(&self, id: &str) -> Result<Option<PathBuf>> {
        Ok(self.downloads.lock()?.get(id).cloned())
    }
}
