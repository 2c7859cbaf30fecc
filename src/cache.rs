//! A content-addressed cache of completed responses.
//!
//! Each entry is the ordered list of text fragments of one finished completion,
//! stored as a JSON file named after the request's [`Fingerprint`].  Only streams
//! that run to exhaustion without error are committed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::Stream;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::observability::{
    CACHE_COMMITS, CACHE_CORRUPTIONS, CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES,
};
use crate::vendor::CompletionRequest;

const ENTRY_EXTENSION: &str = "json";

/// A boxed stream of text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The cache key of a request: md5 over its model, sampling parameters,
/// messages and function schemas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a request.
    pub fn of(request: &CompletionRequest) -> Result<Self> {
        let bytes = serde_json::to_vec(request)?;
        Ok(Self(format!("{:x}", md5::compute(bytes))))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directory of cached responses bounded by entry count.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    capacity: usize,
}

impl Cache {
    /// Create a cache rooted at `dir` holding at most `capacity` entries.
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity,
        }
    }

    /// Create the cache the configuration describes.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.cache_path, config.cache_length)
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXTENSION}", key.as_str()))
    }

    /// Look up a finished response.
    ///
    /// An unreadable entry is logged, removed and reported as a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<Vec<String>> {
        let path = self.entry_path(key);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                self.discard(key, &path, err.to_string());
                return None;
            }
        };
        match serde_json::from_slice::<Vec<String>>(&content) {
            Ok(fragments) => Some(fragments),
            Err(err) => {
                self.discard(key, &path, err.to_string());
                None
            }
        }
    }

    fn discard(&self, key: &Fingerprint, path: &Path, message: String) {
        CACHE_CORRUPTIONS.click();
        let err = Error::cache_corruption(key.as_str(), message);
        warn!(error = %err, "discarding cache entry");
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "could not remove corrupt cache entry");
        }
    }

    /// Returns true if a finished response is stored under `key`.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entry_path(key).is_file()
    }

    /// The number of stored entries.
    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a finished response and evict the oldest entries beyond capacity.
    ///
    /// The entry is written to a temporary file and renamed into place, so a
    /// reader never observes a partially written entry.
    pub fn insert(&self, key: &Fingerprint, fragments: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::io(format!("cannot create {}", self.dir.display()), e))?;
        let path = self.entry_path(key);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let temp = self
            .dir
            .join(format!(".{}.{}.{nanos}.tmp", key.as_str(), std::process::id()));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            serde_json::to_writer(&mut file, fragments)?;
            file.flush()?;
            fs::rename(&temp, &path)
        };
        if let Err(err) = write() {
            let _ = fs::remove_file(&temp);
            return Err(Error::io(format!("cannot write {}", path.display()), err));
        }
        CACHE_COMMITS.click();
        debug!(key = %key, fragments = fragments.len(), "cached response");
        self.evict(key)
    }

    /// Remove the oldest entries until at most `capacity` remain.
    fn evict(&self, keep: &Fingerprint) -> Result<()> {
        let mut entries = self.entries()?;
        if entries.len() <= self.capacity {
            return Ok(());
        }
        let keep = self.entry_path(keep);
        entries.sort();
        let excess = entries.len() - self.capacity;
        for (_, path) in entries.into_iter().filter(|(_, p)| *p != keep).take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    CACHE_EVICTIONS.click();
                    debug!(path = %path.display(), "evicted cache entry");
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(Error::io(format!("cannot evict {}", path.display()), err));
                }
            }
        }
        Ok(())
    }

    /// Entries with their modification times.
    fn entries(&self) -> Result<Vec<(SystemTime, PathBuf)>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::io(format!("cannot read {}", self.dir.display()), err));
            }
        };
        let mut entries = Vec::new();
        for entry in dir {
            let entry =
                entry.map_err(|e| Error::io(format!("cannot read {}", self.dir.display()), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            entries.push((modified, path));
        }
        Ok(entries)
    }

    /// Wrap a fragment stream with this cache.
    ///
    /// With `caching` off the stream passes through untouched.  Otherwise a hit
    /// replays the stored fragments without calling `make_stream`, and a miss
    /// records the live stream and commits it once the stream is exhausted.
    pub fn wrap<F>(&self, key: Fingerprint, caching: bool, make_stream: F) -> CachingStream
    where
        F: FnOnce() -> FragmentStream,
    {
        if !caching {
            return CachingStream {
                source: Source::Live(make_stream()),
                recorder: None,
            };
        }
        if let Some(fragments) = self.get(&key) {
            CACHE_HITS.click();
            debug!(key = %key, "cache hit");
            return CachingStream {
                source: Source::Replay(fragments.into_iter()),
                recorder: None,
            };
        }
        CACHE_MISSES.click();
        debug!(key = %key, "cache miss");
        CachingStream {
            source: Source::Live(make_stream()),
            recorder: Some(Recorder {
                cache: self.clone(),
                key,
                fragments: Vec::new(),
            }),
        }
    }
}

enum Source {
    Replay(std::vec::IntoIter<String>),
    Live(FragmentStream),
}

struct Recorder {
    cache: Cache,
    key: Fingerprint,
    fragments: Vec<String>,
}

impl Recorder {
    fn commit(self) {
        if let Err(err) = self.cache.insert(&self.key, &self.fragments) {
            warn!(key = %self.key, error = %err, "could not cache response");
        }
    }
}

/// A fragment stream that is either replayed from the cache or recorded into it.
///
/// Dropping the stream before it is exhausted, or an error from the live source,
/// discards the recording.
pub struct CachingStream {
    source: Source,
    recorder: Option<Recorder>,
}

impl CachingStream {
    /// Returns true if the fragments come from the cache.
    pub fn is_replay(&self) -> bool {
        matches!(self.source, Source::Replay(_))
    }
}

impl Stream for CachingStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = match &mut self.source {
            Source::Replay(fragments) => return Poll::Ready(fragments.next().map(Ok)),
            Source::Live(stream) => stream.as_mut().poll_next(cx),
        };
        match inner {
            Poll::Ready(Some(Ok(fragment))) => {
                if let Some(recorder) = self.recorder.as_mut() {
                    recorder.fragments.push(fragment.clone());
                }
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.recorder = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if let Some(recorder) = self.recorder.take() {
                    recorder.commit();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use futures::StreamExt;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fragments(items: &[&str]) -> FragmentStream {
        let items: Vec<Result<String>> = items.iter().map(|s| Ok(s.to_string())).collect();
        Box::pin(stream::iter(items))
    }

    fn key(prompt: &str) -> Fingerprint {
        Fingerprint::of(&CompletionRequest::new("gpt-4o", vec![Message::user(prompt)])).unwrap()
    }

    #[test]
    fn fingerprint_is_reproducible() {
        assert_eq!(key("hello"), key("hello"));
        assert_ne!(key("hello"), key("hello!"));
        assert_eq!(key("hello").as_str().len(), 32);

        let base = CompletionRequest::new("gpt-4o", vec![Message::user("hello")]);
        let warmer = base.clone().with_temperature(0.7);
        assert_ne!(
            Fingerprint::of(&base).unwrap(),
            Fingerprint::of(&warmer).unwrap()
        );
    }

    #[tokio::test]
    async fn miss_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), 10);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let stream = cache.wrap(key("hello"), true, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                fragments(&["Hi", " there"])
            });
            let collected: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
            assert_eq!(collected, vec!["Hi", " there"]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&key("hello")));
    }

    #[tokio::test]
    async fn bypass_never_reads_or_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), 10);
        cache.insert(&key("hello"), &["stale".to_string()]).unwrap();

        let stream = cache.wrap(key("hello"), false, || fragments(&["fresh"]));
        assert!(!stream.is_replay());
        let collected: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(collected, vec!["fresh"]);
        assert_eq!(cache.get(&key("hello")), Some(vec!["stale".to_string()]));

        let stream = cache.wrap(key("other"), false, || fragments(&["x"]));
        let _: Vec<_> = stream.collect().await;
        assert!(!cache.contains(&key("other")));
    }

    #[tokio::test]
    async fn early_drop_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), 10);
        let mut stream = cache.wrap(key("hello"), true, || fragments(&["Hi", " there"]));
        assert_eq!(stream.next().await.unwrap().unwrap(), "Hi");
        drop(stream);
        assert!(!cache.contains(&key("hello")));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn errors_leave_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), 10);
        let failing: FragmentStream = Box::pin(stream::iter(vec![
            Ok("Hi".to_string()),
            Err(Error::streaming("connection reset", None)),
        ]));
        let stream = cache.wrap(key("hello"), true, move || failing);
        let items: Vec<Result<String>> = stream.collect().await;
        assert!(items[1].is_err());
        assert!(!cache.contains(&key("hello")));
    }

    #[test]
    fn eviction_bounds_entry_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), 3);
        for i in 0..4 {
            cache
                .insert(&key(&format!("prompt {i}")), &[format!("answer {i}")])
                .unwrap();
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&key("prompt 3")));
    }

    #[test]
    fn corrupt_entry_is_a_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), 3);
        let k = key("hello");
        fs::write(dir.path().join(format!("{k}.json")), b"{not json").unwrap();
        assert!(cache.contains(&k));
        assert_eq!(cache.get(&k), None);
        assert!(!cache.contains(&k));
    }
}
