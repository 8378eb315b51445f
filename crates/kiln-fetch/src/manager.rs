//! Bounded worker pool with a keyed download cache and per-batch barriers.

use crate::{ArtifactSource, CallbackError, FetchError};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// A fetched artifact: the requested location and where its bytes now live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub location: String,
    pub path: PathBuf,
}

type Slot = Arc<Mutex<Option<Result<PathBuf, String>>>>;

struct Shared {
    source: Arc<dyn ArtifactSource>,
    pool: ThreadPool,
    cache: Mutex<HashMap<String, Slot>>,
    scratch: TempDir,
    next_dir: AtomicUsize,
}

impl Shared {
    /// Fetch once per location for the lifetime of the manager. Concurrent
    /// requests for one location wait on that location's slot only.
    fn fetch_cached(&self, location: &str) -> Result<PathBuf, FetchError> {
        let slot = {
            let mut cache = self.cache.lock();
            Arc::clone(cache.entry(location.to_owned()).or_default())
        };
        let mut entry = slot.lock();
        match &*entry {
            Some(Ok(path)) => return Ok(path.clone()),
            Some(Err(reason)) => {
                return Err(FetchError::Failed {
                    location: location.to_owned(),
                    reason: reason.clone(),
                })
            }
            None => {}
        }

        let dir = self.scratch_dir()?;
        debug!("fetching {location}");
        match self.source.fetch(location, &dir) {
            Ok(path) => {
                *entry = Some(Ok(path.clone()));
                Ok(path)
            }
            Err(e) => {
                *entry = Some(Err(e.to_string()));
                Err(e)
            }
        }
    }

    fn scratch_dir(&self) -> Result<PathBuf, FetchError> {
        let n = self.next_dir.fetch_add(1, Ordering::Relaxed);
        let dir = self.scratch.path().join(format!("{n:06}"));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Owns the worker pool, the download cache and the scratch directory that
/// fetched remote artifacts are written to. Paths handed out stay valid for
/// as long as the manager lives.
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    pub fn new(source: Arc<dyn ArtifactSource>, threads: usize) -> Result<Self, FetchError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("kiln-fetch-{i}"))
            .build()
            .map_err(|e| FetchError::Pool(e.to_string()))?;
        let scratch = tempfile::Builder::new().prefix("kiln-fetch-").tempdir()?;
        Ok(Self {
            shared: Arc::new(Shared {
                source,
                pool,
                cache: Mutex::new(HashMap::new()),
                scratch,
                next_dir: AtomicUsize::new(0),
            }),
        })
    }

    pub fn source(&self) -> &Arc<dyn ArtifactSource> {
        &self.shared.source
    }

    pub fn scratch_path(&self) -> &Path {
        self.shared.scratch.path()
    }

    /// Start a new batch.
    pub fn downloader(&self) -> Downloader {
        Downloader {
            shared: Arc::clone(&self.shared),
            batch: Arc::new(Batch::default()),
        }
    }

    /// Fetch a single location on the calling thread, through the cache.
    pub fn fetch(&self, location: &str) -> Result<Artifact, FetchError> {
        let path = self.shared.fetch_cached(location)?;
        Ok(Artifact {
            location: location.to_owned(),
            path,
        })
    }
}

#[derive(Default)]
struct Batch {
    pending: Mutex<usize>,
    idle: Condvar,
    errors: Mutex<Vec<FetchError>>,
}

/// One batch of downloads. Cloned into callbacks so they can queue more work
/// that the same [`await_all`](Self::await_all) waits for.
#[derive(Clone)]
pub struct Downloader {
    shared: Arc<Shared>,
    batch: Arc<Batch>,
}

impl Downloader {
    /// Queue `location`; `callback` runs on a worker once the bytes are local.
    pub fn download<F>(&self, location: &str, callback: F)
    where
        F: FnOnce(&Downloader, &Artifact) -> Result<(), CallbackError> + Send + 'static,
    {
        *self.batch.pending.lock() += 1;
        let this = self.clone();
        let location = location.to_owned();
        self.shared.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| this.run(&location, callback)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(FetchError::Pool(format!("worker panicked on {location}"))),
            };
            if let Some(e) = failure {
                this.batch.errors.lock().push(e);
            }
            this.finish_one();
        });
    }

    fn run<F>(&self, location: &str, callback: F) -> Result<(), FetchError>
    where
        F: FnOnce(&Downloader, &Artifact) -> Result<(), CallbackError>,
    {
        let path = self.shared.fetch_cached(location)?;
        let artifact = Artifact {
            location: location.to_owned(),
            path,
        };
        callback(self, &artifact).map_err(|source| FetchError::Callback {
            location: location.to_owned(),
            source,
        })
    }

    fn finish_one(&self) {
        let mut pending = self.batch.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.batch.idle.notify_all();
        }
    }

    /// Block until every download queued on this batch, including those
    /// queued by callbacks, has finished. Returns the batch's failures.
    pub fn await_all(&self) -> Result<(), FetchError> {
        {
            let mut pending = self.batch.pending.lock();
            while *pending > 0 {
                self.batch.idle.wait(&mut pending);
            }
        }
        let mut errors = std::mem::take(&mut *self.batch.errors.lock());
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(FetchError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySource;

    fn manager(source: MemorySource, threads: usize) -> (Arc<MemorySource>, DownloadManager) {
        let source = Arc::new(source);
        let manager = DownloadManager::new(source.clone(), threads).unwrap();
        (source, manager)
    }

    #[test]
    fn barrier_waits_for_all_callbacks() {
        let mut mem = MemorySource::new();
        for i in 0..20 {
            mem = mem.with(&format!("mvn:g/a{i}/1.0"), vec![b'x'; i]);
        }
        let (_source, manager) = manager(mem, 4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let downloader = manager.downloader();
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            downloader.download(&format!("mvn:g/a{i}/1.0"), move |_, artifact| {
                seen.lock().push(fs::read(&artifact.path)?.len());
                Ok(())
            });
        }
        downloader.await_all().unwrap();

        let mut sizes = seen.lock().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn nested_downloads_join_the_same_batch() {
        let mem = MemorySource::new()
            .with("mvn:g/root/1.0", "root")
            .with("mvn:g/child/1.0", "child");
        let (_source, manager) = manager(mem, 2);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let downloader = manager.downloader();
        let outer = Arc::clone(&seen);
        downloader.download("mvn:g/root/1.0", move |d, artifact| {
            outer.lock().push(artifact.location.clone());
            let inner = Arc::clone(&outer);
            d.download("mvn:g/child/1.0", move |_, artifact| {
                inner.lock().push(artifact.location.clone());
                Ok(())
            });
            Ok(())
        });
        downloader.await_all().unwrap();

        assert_eq!(
            *seen.lock(),
            vec!["mvn:g/root/1.0".to_owned(), "mvn:g/child/1.0".to_owned()]
        );
    }

    #[test]
    fn cache_fetches_each_location_once() {
        let mem = MemorySource::new().with("mvn:g/shared/1.0", "s");
        let (source, manager) = manager(mem, 8);

        let downloader = manager.downloader();
        for _ in 0..16 {
            downloader.download("mvn:g/shared/1.0", |_, _| Ok(()));
        }
        downloader.await_all().unwrap();
        manager.fetch("mvn:g/shared/1.0").unwrap();

        assert_eq!(source.fetch_count("mvn:g/shared/1.0"), 1);
    }

    #[test]
    fn cached_failures_are_replayed() {
        let (source, manager) = manager(MemorySource::new(), 2);
        assert!(matches!(
            manager.fetch("mvn:g/gone/1.0"),
            Err(FetchError::NotFound(_))
        ));
        assert!(matches!(
            manager.fetch("mvn:g/gone/1.0"),
            Err(FetchError::Failed { .. })
        ));
        assert_eq!(source.fetch_count("mvn:g/gone/1.0"), 1);
    }

    #[test]
    fn errors_are_collected_per_batch() {
        let mem = MemorySource::new().with("mvn:g/ok/1.0", "ok");
        let (_source, manager) = manager(mem, 2);

        let downloader = manager.downloader();
        downloader.download("mvn:g/missing/1.0", |_, _| Ok(()));
        downloader.download("mvn:g/ok/1.0", |_, _| Err("bad manifest".into()));
        let err = downloader.await_all().unwrap_err();
        assert!(matches!(err, FetchError::Multiple(ref errors) if errors.len() == 2));

        let next = manager.downloader();
        next.download("mvn:g/ok/1.0", |_, _| Ok(()));
        next.await_all().unwrap();
    }

    #[test]
    fn panicking_callback_does_not_hang_the_barrier() {
        let mem = MemorySource::new().with("mvn:g/p/1.0", "p");
        let (_source, manager) = manager(mem, 1);
        let downloader = manager.downloader();
        downloader.download("mvn:g/p/1.0", |_, _| panic!("boom"));
        assert!(matches!(
            downloader.await_all(),
            Err(FetchError::Pool(_))
        ));
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let (_source, manager) = manager(MemorySource::new(), 1);
        manager.downloader().await_all().unwrap();
    }
}
