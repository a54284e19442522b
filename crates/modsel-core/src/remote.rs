use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use modsel_registry::ModuleVersion;
use parking_lot::Mutex;

use crate::catalog::{Catalog, MergeOutcome};
use crate::error::FetchError;

/// Anything that can produce the remote module list.
pub trait ModuleListSource: Send {
    fn fetch_modules(&self) -> Result<Vec<ModuleVersion>, FetchError>;
}

/// Append-only list filled by a background fetch.
///
/// Readers only ever see a prefix of what the producer pushed.
#[derive(Debug, Clone, Default)]
pub struct RemoteFeed {
    modules: Arc<Mutex<Vec<ModuleVersion>>>,
    done: Arc<AtomicBool>,
}

impl RemoteFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, module: ModuleVersion) {
        self.modules.lock().push(module);
    }

    pub fn extend(&self, modules: impl IntoIterator<Item = ModuleVersion>) {
        self.modules.lock().extend(modules);
    }

    /// Mark the feed complete. Nothing may be pushed afterwards.
    pub fn finish(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of everything pushed at or after `start`.
    pub fn snapshot_from(&self, start: usize) -> Vec<ModuleVersion> {
        let modules = self.modules.lock();
        modules.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }
}

/// Owner-side cursor that merges new feed items into a catalog.
#[derive(Debug)]
pub struct RemoteIngestor {
    feed: RemoteFeed,
    merged: usize,
    done: bool,
}

impl RemoteIngestor {
    pub fn new(feed: RemoteFeed) -> Self {
        Self {
            feed,
            merged: 0,
            done: false,
        }
    }

    /// True once the feed finished and every item has been merged.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Merge items not yet seen. Returns how many entries were inserted.
    pub fn poll(&mut self, catalog: &mut Catalog) -> usize {
        if self.done {
            return 0;
        }
        // Read the flag first so items pushed before finish() are not missed.
        let finished = self.feed.is_done();
        let batch = self.feed.snapshot_from(self.merged);
        self.merged += batch.len();

        let mut inserted = 0;
        for module in batch {
            if catalog.upsert_remote(module) == MergeOutcome::Inserted {
                inserted += 1;
            }
        }
        if finished {
            self.done = true;
            tracing::debug!(merged = self.merged, "remote module list fully merged");
        }
        inserted
    }
}

/// Fetch the module list on a background thread.
///
/// The returned feed is always finished eventually, whether or not the fetch
/// succeeded.
pub fn spawn_remote_fetch<S>(source: S) -> io::Result<RemoteFeed>
where
    S: ModuleListSource + 'static,
{
    let feed = RemoteFeed::new();
    let publisher = feed.clone();
    thread::Builder::new()
        .name("modsel-remote-list".into())
        .spawn(move || {
            match source.fetch_modules() {
                Ok(modules) => {
                    tracing::info!(count = modules.len(), "fetched remote module list");
                    publisher.extend(modules);
                }
                Err(err) => tracing::warn!("failed to fetch remote module list: {err}"),
            }
            publisher.finish();
        })?;
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use modsel_registry::{ModuleId, Version};
    use pretty_assertions::assert_eq;

    use super::*;

    struct FixedList(Vec<ModuleVersion>);

    impl ModuleListSource for FixedList {
        fn fetch_modules(&self) -> Result<Vec<ModuleVersion>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    impl ModuleListSource for Unreachable {
        fn fetch_modules(&self) -> Result<Vec<ModuleVersion>, FetchError> {
            Err(FetchError::Status {
                url: "http://meta.invalid/modules/list/latest".into(),
                status: 503,
            })
        }
    }

    fn poll_until_done(ingestor: &mut RemoteIngestor, catalog: &mut Catalog) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut inserted = 0;
        while !ingestor.is_done() {
            assert!(Instant::now() < deadline, "remote feed never finished");
            inserted += ingestor.poll(catalog);
            std::thread::sleep(Duration::from_millis(2));
        }
        inserted
    }

    #[test]
    fn incremental_polls_merge_each_item_once() {
        let feed = RemoteFeed::new();
        let mut ingestor = RemoteIngestor::new(feed.clone());
        let mut catalog = Catalog::new();

        feed.push(ModuleVersion::new("A", Version::new(1, 0, 0)));
        assert_eq!(ingestor.poll(&mut catalog), 1);
        assert_eq!(ingestor.poll(&mut catalog), 0);

        feed.push(ModuleVersion::new("B", Version::new(1, 0, 0)));
        feed.push(ModuleVersion::new("A", Version::new(2, 0, 0)));
        feed.finish();
        assert_eq!(ingestor.poll(&mut catalog), 1);
        assert!(ingestor.is_done());
        assert_eq!(catalog.len(), 2);
        let a = catalog.get(&ModuleId::new("A")).unwrap();
        assert_eq!(a.online().unwrap().version, Version::new(2, 0, 0));
    }

    #[test]
    fn finished_ingestor_ignores_late_items() {
        let feed = RemoteFeed::new();
        let mut ingestor = RemoteIngestor::new(feed.clone());
        let mut catalog = Catalog::new();
        feed.push(ModuleVersion::new("A", Version::new(1, 0, 0)));
        feed.finish();
        assert_eq!(ingestor.poll(&mut catalog), 1);
        assert!(ingestor.is_done());

        feed.push(ModuleVersion::new("Late", Version::new(1, 0, 0)));
        assert_eq!(ingestor.poll(&mut catalog), 0);
        assert_eq!(catalog.len(), 1);
        assert!(!catalog.contains(&ModuleId::new("Late")));
    }

    #[test]
    fn background_fetch_fills_catalog() {
        let feed = spawn_remote_fetch(FixedList(vec![
            ModuleVersion::new("Remote", Version::new(1, 0, 0)),
            ModuleVersion::new("engine", Version::new(5, 0, 0)),
        ]))
        .unwrap();
        let mut ingestor = RemoteIngestor::new(feed);
        let mut catalog = Catalog::with_exclusions(crate::default_exclusions());
        assert_eq!(poll_until_done(&mut ingestor, &mut catalog), 1);
        assert!(catalog.contains(&ModuleId::new("Remote")));
        assert!(!catalog.contains(&ModuleId::new("engine")));
    }

    #[test]
    fn failed_fetch_still_finishes() {
        let feed = spawn_remote_fetch(Unreachable).unwrap();
        let mut ingestor = RemoteIngestor::new(feed);
        let mut catalog = Catalog::new();
        assert_eq!(poll_until_done(&mut ingestor, &mut catalog), 0);
        assert!(catalog.is_empty());
    }
}
