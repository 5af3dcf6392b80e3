#[cfg(feature = "persistent-cache")]
mod std_imports {
    pub use std::fs;
    pub use std::fs::File;
    pub use std::io;
}

#[cfg(feature = "persistent-cache")]
use std_imports::*;

use core::time::Duration;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilecraft_ir::ShapeFingerprint;

use super::{Configuration, TuneOutcome};

/// Return the file path of the persistent cache of a tuner on one device.
pub fn get_persistent_cache_file_path(root: &Path, name: &str, device_id: &str) -> PathBuf {
    let name = sanitize_filename::sanitize(name);
    let device_id = sanitize_filename::sanitize(device_id);
    root.join("tilecraft")
        .join("autotune")
        .join(name)
        .join(format!("{device_id}.json"))
}

/// Identifies one search problem on one target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Fingerprint of the graph.
    pub fingerprint: ShapeFingerprint,
    /// Name of the hardware profile.
    pub hardware: String,
}

/// Persistent cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentCacheEntry {
    checksum: String,
    config: Configuration,
    latency: Duration,
}

/// Keeps the accepted outcome of every search problem already tuned.
#[derive(Debug)]
pub struct TuneCache<A, K> {
    in_memory_cache: HashMap<CacheKey, Arc<TuneOutcome<A, K>>>,
    persistent_cache: HashMap<CacheKey, PersistentCacheEntry>,
    checksum: String,
    file_path: Option<PathBuf>,
}

/// Result of the cache try
#[derive(Debug)]
pub enum TuneCacheResult<A, K> {
    /// The problem was tuned during this run.
    Hit(Arc<TuneOutcome<A, K>>),
    /// The problem was tuned by a previous run with the same policy and compiler; only its
    /// configuration is known.
    Warm(Configuration),
    /// The problem was never tuned.
    Miss,
}

impl<A, K> TuneCache<A, K> {
    /// Create a cache, loading the persistent entries of `name` on `device_id` under `root`.
    ///
    /// Entries whose checksum differs from `checksum` were written by another policy or compiler
    /// and are never returned.
    pub fn new(name: &str, device_id: &str, root: &Path, checksum: String) -> Self {
        #[cfg_attr(not(feature = "persistent-cache"), allow(unused_mut))]
        let mut cache = Self {
            in_memory_cache: HashMap::new(),
            persistent_cache: HashMap::new(),
            checksum,
            file_path: Some(get_persistent_cache_file_path(root, name, device_id)),
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "persistent-cache")] {
                if let Err(err) = cache.load() {
                    log::warn!("Unable to load autotune cache. Cache will be ignored ({err}).");
                }
            }
        }

        cache
    }

    /// Create a cache that lives only as long as the tuner.
    pub fn in_memory(checksum: String) -> Self {
        Self {
            in_memory_cache: HashMap::new(),
            persistent_cache: HashMap::new(),
            checksum,
            file_path: None,
        }
    }

    /// Look up a search problem.
    pub fn try_cache(&self, key: &CacheKey) -> TuneCacheResult<A, K> {
        if let Some(outcome) = self.in_memory_cache.get(key) {
            return TuneCacheResult::Hit(outcome.clone());
        }

        match self.persistent_cache.get(key) {
            Some(entry) if entry.checksum == self.checksum => TuneCacheResult::Warm(entry.config),
            Some(_) => {
                log::debug!("Ignoring stale autotune entry for {}", key.fingerprint.hex());
                TuneCacheResult::Miss
            }
            None => TuneCacheResult::Miss,
        }
    }

    /// Store the accepted outcome of a search problem.
    pub fn insert(&mut self, key: CacheKey, outcome: Arc<TuneOutcome<A, K>>) {
        self.persistent_cache.insert(
            key.clone(),
            PersistentCacheEntry {
                checksum: self.checksum.clone(),
                config: outcome.best.config,
                latency: outcome.best.latency,
            },
        );
        self.in_memory_cache.insert(key, outcome);
    }

    /// Number of problems with an accepted outcome in memory.
    pub fn len(&self) -> usize {
        self.in_memory_cache.len()
    }

    /// Whether no problem was tuned during this run.
    pub fn is_empty(&self) -> bool {
        self.in_memory_cache.is_empty()
    }

    /// Return the file path of the persistent cache, if any.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

#[cfg(feature = "persistent-cache")]
impl<A, K> TuneCache<A, K> {
    /// Load the persistent cache data from disk
    pub fn load(&mut self) -> Result<(), io::Error> {
        let Some(file_path) = &self.file_path else {
            return Ok(());
        };
        // note: reading file from memory is faster than using
        // serde from_reader with a buffered reader
        match fs::read_to_string(file_path) {
            Ok(data) => {
                let data: Vec<(CacheKey, PersistentCacheEntry)> = serde_json::from_str(&data)?;
                for (key, value) in data.into_iter() {
                    self.persistent_cache.insert(key, value);
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Save the persistent cache on disk
    pub fn save(&self) -> Result<(), io::Error> {
        let Some(file_path) = &self.file_path else {
            return Ok(());
        };
        if let Some(parent_dir) = file_path.parent() {
            fs::create_dir_all(parent_dir)?;
        }
        let file = File::create(file_path)?;
        let mut data = self.persistent_cache.iter().collect::<Vec<_>>();
        data.sort_by(|(a, _), (b, _)| {
            (&a.hardware, &a.fingerprint.key).cmp(&(&b.hardware, &b.fingerprint.key))
        });
        serde_json::to_writer_pretty(file, &data)?;
        Ok(())
    }
}

/// Checksum identifying the policy and the compiler that produced cached results.
pub fn compute_checksum(policy: &str, compiler: &str) -> String {
    format!("{:x}", md5::compute(format!("{policy}/{compiler}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tune::{
        CandidateResult, Pass, SearchSummary, Throughput, configuration::tests::config,
    };
    use pretty_assertions::assert_eq;
    use tilecraft_ir::HardwareProfile;

    fn key(value: &str) -> CacheKey {
        CacheKey {
            fingerprint: ShapeFingerprint::from_key(value.to_string()),
            hardware: "a100".to_string(),
        }
    }

    fn outcome() -> Arc<TuneOutcome<(), ()>> {
        let mut best = CandidateResult::pending(0, Pass::Broad, config(64, 64, 32), "c0".into());
        best.kernel = Some(Arc::new(()));
        best.latency = Duration::from_micros(17);
        let summary = SearchSummary::new("g", "a100", core::slice::from_ref(&best));
        let throughput = Throughput::new(1_000, best.latency, &HardwareProfile::a100(), true);

        Arc::new(TuneOutcome {
            best,
            summary,
            passes: 1,
            throughput,
        })
    }

    #[cfg(feature = "persistent-cache")]
    fn temp_root(test: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "tilecraft-cache-{test}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        root
    }

    #[test]
    fn hit_after_insert() {
        let mut cache = TuneCache::in_memory("sum".into());
        assert!(matches!(cache.try_cache(&key("a")), TuneCacheResult::Miss));

        cache.insert(key("a"), outcome());

        match cache.try_cache(&key("a")) {
            TuneCacheResult::Hit(outcome) => {
                assert_eq!(outcome.best.latency, Duration::from_micros(17))
            }
            other => panic!("Expected a hit, got {other:?}"),
        }
        assert!(matches!(cache.try_cache(&key("b")), TuneCacheResult::Miss));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.file_path(), None);
    }

    #[test]
    fn file_path_is_sanitized() {
        let path = get_persistent_cache_file_path(Path::new("/tmp"), "dequant/matmul", "cuda:0");

        assert!(path.starts_with("/tmp/tilecraft/autotune"));
        assert_eq!(path.components().count(), 6);
    }

    #[cfg(feature = "persistent-cache")]
    #[test]
    fn saved_entries_warm_start_with_the_same_checksum() {
        let root = temp_root("warm");
        let mut cache = TuneCache::<(), ()>::new("t", "gpu:0", &root, "sum".into());
        cache.insert(key("a"), outcome());
        cache.save().unwrap();

        let reloaded = TuneCache::<(), ()>::new("t", "gpu:0", &root, "sum".into());
        match reloaded.try_cache(&key("a")) {
            TuneCacheResult::Warm(restored) => assert_eq!(restored, config(64, 64, 32)),
            other => panic!("Expected a warm entry, got {other:?}"),
        }

        let stale = TuneCache::<(), ()>::new("t", "gpu:0", &root, "other".into());
        assert!(matches!(stale.try_cache(&key("a")), TuneCacheResult::Miss));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn checksum_depends_on_both_names() {
        let checksum = compute_checksum("policy", "compiler");

        assert_eq!(checksum.len(), 32);
        assert_ne!(checksum, compute_checksum("policy", "other"));
        assert_ne!(checksum, compute_checksum("other", "compiler"));
    }
}
