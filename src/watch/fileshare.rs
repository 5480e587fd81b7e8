//! Local-filesystem share pollers.
//!
//! Each watched path gets its own supervised task: every poll interval it
//! scans a glob pattern, compares file mtimes against what it has seen, and
//! re-ingests anything that advanced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ingest::{IngestPipeline, local, sha256_hex};

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Observable state of one fileshare watcher.
#[derive(Debug, Clone, Serialize)]
pub struct FileShareWatch {
    /// Watcher id (derived from the path).
    pub watcher_id: String,
    /// Watched mount point.
    pub path: String,
    /// Glob pattern filtering files.
    pub pattern: String,
    /// Poll interval in seconds.
    pub poll_interval: u64,
    /// Files currently tracked by mtime.
    pub files_tracked: usize,
}

/// Result of a start request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new watcher task was spawned.
    Watching(FileShareWatch),
    /// The path already has an active watcher.
    AlreadyWatching {
        /// Existing watcher id.
        watcher_id: String,
    },
}

struct WatcherHandle {
    path: String,
    pattern: String,
    poll_interval: u64,
    shutdown: watch::Sender<bool>,
    tracked: Arc<Mutex<HashMap<PathBuf, SystemTime>>>,
}

/// Registry of per-path polling tasks.
pub struct FileShareManager {
    pipeline: Arc<IngestPipeline>,
    watchers: Mutex<HashMap<String, WatcherHandle>>,
}

impl FileShareManager {
    /// Creates a manager over the shared ingestion pipeline.
    #[must_use]
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self {
            pipeline,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts watching a share path with a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is missing, not a directory, or the
    /// pattern is invalid.
    pub fn start(
        &self,
        share_path: &str,
        pattern: &str,
        poll_interval_secs: u64,
    ) -> Result<StartOutcome> {
        let root = PathBuf::from(share_path);
        if !root.exists() {
            return Err(Error::permanent(format!("file share not found: {share_path}")));
        }
        if !root.is_dir() {
            return Err(Error::permanent(format!(
                "path is not a directory: {share_path}"
            )));
        }

        let matcher = glob_to_regex(pattern)?;
        let watcher_id: String = sha256_hex(share_path.as_bytes()).chars().take(16).collect();

        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| Error::invariant("fileshare registry poisoned"))?;
        if watchers.contains_key(&watcher_id) {
            return Ok(StartOutcome::AlreadyWatching { watcher_id });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tracked = Arc::new(Mutex::new(HashMap::new()));
        let interval = poll_interval_secs.max(1);

        tokio::spawn(poll_loop(
            Arc::clone(&self.pipeline),
            root,
            matcher,
            Duration::from_secs(interval),
            Arc::clone(&tracked),
            shutdown_rx,
        ));

        let handle = WatcherHandle {
            path: share_path.to_string(),
            pattern: pattern.to_string(),
            poll_interval: interval,
            shutdown: shutdown_tx,
            tracked,
        };
        info!(path = %share_path, %watcher_id, "file share watcher started");
        let watch = describe(&watcher_id, &handle);
        watchers.insert(watcher_id, handle);
        Ok(StartOutcome::Watching(watch))
    }

    /// Stops a watcher. Returns `false` when the id is unknown.
    pub fn stop(&self, watcher_id: &str) -> bool {
        let Ok(mut watchers) = self.watchers.lock() else {
            return false;
        };
        if let Some(handle) = watchers.remove(watcher_id) {
            let _ = handle.shutdown.send(true);
            info!(%watcher_id, "file share watcher stopped");
            return true;
        }
        false
    }

    /// Stops every watcher (shutdown path).
    pub fn stop_all(&self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            for (_, handle) in watchers.drain() {
                let _ = handle.shutdown.send(true);
            }
        }
    }

    /// Lists active watchers.
    #[must_use]
    pub fn list(&self) -> Vec<FileShareWatch> {
        self.watchers.lock().map_or_else(
            |_| Vec::new(),
            |watchers| {
                watchers
                    .iter()
                    .map(|(id, handle)| describe(id, handle))
                    .collect()
            },
        )
    }
}

fn describe(watcher_id: &str, handle: &WatcherHandle) -> FileShareWatch {
    FileShareWatch {
        watcher_id: watcher_id.to_string(),
        path: handle.path.clone(),
        pattern: handle.pattern.clone(),
        poll_interval: handle.poll_interval,
        files_tracked: handle.tracked.lock().map_or(0, |t| t.len()),
    }
}

async fn poll_loop(
    pipeline: Arc<IngestPipeline>,
    root: PathBuf,
    matcher: Regex,
    interval: Duration,
    tracked: Arc<Mutex<HashMap<PathBuf, SystemTime>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match poll_once(&pipeline, &root, &matcher, &tracked).await {
                    Ok(0) => {}
                    Ok(ingested) => info!(path = %root.display(), ingested, "share poll ingested files"),
                    Err(e) => warn!(path = %root.display(), error = %e, "share poll failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(path = %root.display(), "file share watcher exited");
}

/// One scan pass: ingest files whose mtime advanced. Returns how many were
/// (re)ingested.
///
/// # Errors
///
/// Returns an error when enumeration fails.
pub async fn poll_once(
    pipeline: &IngestPipeline,
    root: &Path,
    matcher: &Regex,
    tracked: &Mutex<HashMap<PathBuf, SystemTime>>,
) -> Result<usize> {
    let files = local::enumerate_files(root, true)?;
    let mut ingested = 0usize;

    for file in files {
        let relative = file
            .strip_prefix(root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        if !matcher.is_match(&relative) {
            continue;
        }

        let Ok(mtime) = std::fs::metadata(&file).and_then(|m| m.modified()) else {
            continue;
        };
        let changed = {
            let map = tracked
                .lock()
                .map_err(|_| Error::invariant("mtime map poisoned"))?;
            map.get(&file).is_none_or(|seen| *seen < mtime)
        };
        if !changed {
            continue;
        }

        match pipeline.ingest_local_file(&file).await {
            Ok(_) => ingested += 1,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "failed to ingest changed file");
                continue;
            }
        }
        tracked
            .lock()
            .map_err(|_| Error::invariant("mtime map poisoned"))?
            .insert(file, mtime);
    }

    Ok(ingested)
}

/// Translates a glob pattern (`**`, `*`, `?`) into an anchored regex over
/// forward-slash relative paths.
///
/// # Errors
///
/// Returns an error for patterns that do not compile.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        regex.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        regex.push_str(".*");
                        i += 2;
                    }
                } else {
                    regex.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                regex.push_str("[^/]");
                i += 1;
            }
            c => {
                if "\\.+()[]{}^$|".contains(c) {
                    regex.push('\\');
                }
                regex.push(c);
                i += 1;
            }
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| Error::permanent(format!("invalid watch pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{BuiltinExtractor, DEFAULT_DIMENSIONS, FallbackEmbedder};
    use crate::store::{DocStore, LocalBlobStore, SqliteDocStore};
    use tempfile::TempDir;
    use test_case::test_case;

    fn pipeline() -> (Arc<IngestPipeline>, Arc<SqliteDocStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteDocStore::in_memory().unwrap());
        store.init().unwrap();
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&store) as Arc<dyn DocStore>,
            Arc::new(LocalBlobStore::new(dir.path().join("blobs")).unwrap()),
            Arc::new(FallbackEmbedder::new(DEFAULT_DIMENSIONS)),
            Arc::new(BuiltinExtractor::new()),
            1000,
        ));
        (pipeline, store, dir)
    }

    #[test_case("**/*", "a/b/c.txt", true)]
    #[test_case("**/*", "c.txt", true)]
    #[test_case("*.txt", "c.txt", true)]
    #[test_case("*.txt", "a/c.txt", false)]
    #[test_case("**/*.md", "docs/deep/x.md", true)]
    #[test_case("**/*.md", "x.md", true)]
    #[test_case("**/*.md", "x.txt", false)]
    #[test_case("data-?.csv", "data-1.csv", true)]
    #[test_case("data-?.csv", "data-10.csv", false)]
    fn test_glob_matching(pattern: &str, path: &str, expected: bool) {
        let regex = glob_to_regex(pattern).unwrap();
        assert_eq!(regex.is_match(path), expected, "{pattern} vs {path}");
    }

    #[tokio::test]
    async fn test_poll_once_ingests_new_and_modified() {
        let (pipeline, store, dir) = pipeline();
        let share = dir.path().join("share");
        std::fs::create_dir_all(&share).unwrap();
        std::fs::write(share.join("a.txt"), b"first file contents").unwrap();

        let matcher = glob_to_regex("**/*").unwrap();
        let tracked = Mutex::new(HashMap::new());

        let ingested = poll_once(&pipeline, &share, &matcher, &tracked).await.unwrap();
        assert_eq!(ingested, 1);
        assert_eq!(store.list_documents().unwrap().len(), 1);

        // Unchanged files are not re-ingested.
        let ingested = poll_once(&pipeline, &share, &matcher, &tracked).await.unwrap();
        assert_eq!(ingested, 0);

        // An mtime advance triggers a re-scan of the file.
        let future = SystemTime::now() + Duration::from_secs(10);
        let file = std::fs::File::options()
            .write(true)
            .open(share.join("a.txt"))
            .unwrap();
        file.set_modified(future).unwrap();
        let ingested = poll_once(&pipeline, &share, &matcher, &tracked).await.unwrap();
        assert_eq!(ingested, 1);
    }

    #[tokio::test]
    async fn test_manager_lifecycle() {
        let (pipeline, _store, dir) = pipeline();
        let share = dir.path().join("share");
        std::fs::create_dir_all(&share).unwrap();
        let manager = FileShareManager::new(pipeline);

        let outcome = manager
            .start(&share.display().to_string(), "**/*", 300)
            .unwrap();
        let StartOutcome::Watching(watch) = outcome else {
            panic!("expected a new watcher");
        };

        // Second start on the same path reports the existing watcher.
        let outcome = manager
            .start(&share.display().to_string(), "**/*", 300)
            .unwrap();
        assert!(matches!(
            outcome,
            StartOutcome::AlreadyWatching { ref watcher_id } if *watcher_id == watch.watcher_id
        ));

        assert_eq!(manager.list().len(), 1);
        assert!(manager.stop(&watch.watcher_id));
        assert!(!manager.stop(&watch.watcher_id));
        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_start_missing_path() {
        let (pipeline, _store, _dir) = pipeline();
        let manager = FileShareManager::new(pipeline);
        let err = manager.start("/no/such/share", "**/*", 300).unwrap_err();
        assert!(matches!(err, Error::PermanentIo { .. }));
    }
}
