//! Content store that mirrors fetched files under the storage directory

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::TrawlConfig;
use crate::crawl_engine::collaborators::{ContentStore, SaveStatus, SavedFile};
use crate::crawl_engine::url_store::UrlRecord;
use crate::utils::{ensure_domain_gitignore, get_mirror_path};

/// Writes `storage_dir/<host>/<path>` and remembers what it wrote, in order
pub struct MirrorStore {
    root: PathBuf,
    ignore_cache: bool,
    saved: Mutex<Vec<SavedFile>>,
}

impl MirrorStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, ignore_cache: bool) -> Self {
        Self {
            root: root.into(),
            ignore_cache,
            saved: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &TrawlConfig) -> Self {
        Self::new(config.storage_dir(), config.ignore_cache())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, record: &UrlRecord) -> Result<PathBuf> {
        get_mirror_path(&record.url, &self.root)
    }
}

impl ContentStore for MirrorStore {
    fn save_bytes(&self, record: &UrlRecord, body: &[u8]) -> Result<SaveStatus> {
        let path = self.path_for(record)?;

        if fs::read(&path).is_ok_and(|existing| existing == body) {
            return Ok(SaveStatus::Unchanged(path));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        ensure_domain_gitignore(&path, &self.root)?;
        fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;

        self.saved.lock().push(SavedFile {
            url: record.url.clone(),
            path: path.clone(),
            saved_at: Utc::now(),
        });
        Ok(SaveStatus::Saved(path))
    }

    fn is_already_downloaded(&self, record: &UrlRecord) -> bool {
        self.path_for(record).is_ok_and(|path| path.is_file())
    }

    /// Pages and stylesheets are always refetched so their links are
    /// followed again; other files are kept unless the cache is ignored.
    fn needs_refetch(&self, record: &UrlRecord) -> bool {
        self.ignore_cache || record.kind.is_parseable()
    }

    fn saved_files(&self) -> Vec<SavedFile> {
        self.saved.lock().clone()
    }

    fn delete_saved(&self, file: &SavedFile) -> Result<()> {
        match fs::remove_file(&file.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", file.path.display()));
            }
        }
        self.saved.lock().retain(|saved| saved.path != file.path);
        Ok(())
    }
}
