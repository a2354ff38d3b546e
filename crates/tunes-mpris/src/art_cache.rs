//! Content-addressed album art cache.
//!
//! Remote art URLs are downloaded once into `<sha256(url)><ext>` under the
//! cache directory. The directory listing is the only index, so the mapping is
//! rebuilt from disk on startup. File modification time is the recency signal
//! for eviction and is refreshed on every cache hit.

use crate::error::ArtError;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

static ALLOWED_EXTENSIONS: [(&str, &str); 5] = [
    ("jpg", ".jpg"),
    ("jpeg", ".jpeg"),
    ("png", ".png"),
    ("webp", ".webp"),
    ("gif", ".gif"),
];
const DEFAULT_EXTENSION: &str = ".jpg";

/// Blocking byte fetcher for remote art.
pub trait ArtFetcher: Send {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtError>;
}

/// HTTP(S) fetcher backed by ureq.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtError> {
        // ureq reports non-2xx statuses as errors too
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| ArtError::Download(e.to_string()))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| ArtError::Download(e.to_string()))?;
        Ok(bytes)
    }
}

/// Hex sha-256 of the URL string.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// File extension (with dot) for a URL, restricted to known image types.
pub fn extension_for(url: &str) -> &'static str {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = after_scheme
        .find('/')
        .map_or("", |idx| &after_scheme[idx..]);
    let path = path.split(['?', '#']).next().unwrap_or(path);

    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| {
            ALLOWED_EXTENSIONS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(e))
        })
        .map_or(DEFAULT_EXTENSION, |(_, dotted)| *dotted)
}

/// Bounded on-disk art cache.
pub struct ArtCache<F = HttpFetcher> {
    /// `None` when the directory could not be created; every lookup then
    /// passes the URL through.
    dir: Option<PathBuf>,
    capacity: usize,
    /// cache key -> file
    entries: HashMap<String, PathBuf>,
    fetcher: F,
}

impl<F: ArtFetcher> ArtCache<F> {
    /// Open (creating if needed) the cache directory. Never fails.
    pub fn open(dir: PathBuf, capacity: usize, fetcher: F) -> Self {
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let entries = scan_dir(&dir).unwrap_or_else(|e| {
                    warn!("Failed to index art cache {}: {}", dir.display(), e);
                    HashMap::new()
                });
                info!(
                    "Album art cache at {} ({} files)",
                    dir.display(),
                    entries.len()
                );
                Self {
                    dir: Some(dir),
                    capacity,
                    entries,
                    fetcher,
                }
            }
            Err(e) => {
                warn!(
                    "Failed to create art cache dir {}: {}. Art URLs will be passed through.",
                    dir.display(),
                    e
                );
                Self {
                    dir: None,
                    capacity,
                    entries: HashMap::new(),
                    fetcher,
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Turn a remote URL into a local path, or give the URL back when that
    /// is not possible.
    pub fn resolve(&mut self, url: &str) -> String {
        let Some(dir) = self.dir.clone() else {
            return url.to_string();
        };
        let key = cache_key(url);

        if let Some(path) = self.lookup(&key) {
            touch(&path);
            return path.to_string_lossy().to_string();
        }

        let path = match self.download(&dir, url, &key) {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to cache album art from {}: {}", url, e);
                return url.to_string();
            }
        };

        if let Err(e) = self.enforce_capacity(&dir) {
            warn!("Art cache eviction failed: {}", e);
        }
        path.to_string_lossy().to_string()
    }

    fn lookup(&mut self, key: &str) -> Option<PathBuf> {
        let path = self.entries.get(key)?;
        if path.is_file() {
            return Some(path.clone());
        }
        debug!("Cached art {} was removed externally", path.display());
        self.entries.remove(key);
        None
    }

    fn download(&mut self, dir: &Path, url: &str, key: &str) -> Result<PathBuf, ArtError> {
        let bytes = self.fetcher.fetch(url)?;
        let path = dir.join(format!("{}{}", key, extension_for(url)));
        fs::write(&path, &bytes)?;
        touch(&path);
        debug!("Cached {} bytes of album art at {}", bytes.len(), path.display());
        self.entries.insert(key.to_string(), path.clone());
        Ok(path)
    }

    /// Delete the oldest files until at most `capacity` remain.
    /// Returns how many were removed.
    fn enforce_capacity(&mut self, dir: &Path) -> Result<usize, ArtError> {
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let Ok(entry) = entry else { continue };
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, entry.path()));
        }

        if files.len() <= self.capacity {
            return Ok(0);
        }

        files.sort();
        let excess = files.len() - self.capacity;
        let mut removed = 0;
        for (_, path) in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                debug!("Failed to evict {}: {}", path.display(), e);
                continue;
            }
            self.entries.retain(|_, p| *p != path);
            removed += 1;
        }
        debug!("Evicted {} album art files", removed);
        Ok(removed)
    }
}

/// Rebuild the key -> file mapping from a directory listing.
fn scan_dir(dir: &Path) -> Result<HashMap<String, PathBuf>, std::io::Error> {
    let mut entries = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| ALLOWED_EXTENSIONS.iter().any(|(name, _)| *name == e));
        if ext_ok && stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()) {
            entries.insert(stem.to_string(), path.clone());
        }
    }
    Ok(entries)
}

fn touch(path: &Path) {
    let result = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        debug!("Failed to touch {}: {}", path.display(), e);
    }
}
