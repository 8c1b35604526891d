use super::*;
use crate::fingerprint::mtime_fingerprint;
use crate::types::ParseError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Visit {
    ts: i64,
    url: String,
}

fn visits() -> Vec<Res<Visit>> {
    vec![
        Ok(Visit {
            ts: 1,
            url: "https://a.example".into(),
        }),
        Err(ParseError::new(Path::new("history.db"), Some(2), "bad row")),
        Ok(Visit {
            ts: 3,
            url: "https://b.example".into(),
        }),
    ]
}

/// A memo whose fingerprint is whatever the `version` counter holds and whose
/// generator counts how often it runs.
fn counting_memo(
    store: Arc<dyn CacheBackend>,
    version: Arc<AtomicI64>,
    runs: Arc<AtomicUsize>,
) -> Memo<(), Visit> {
    Memo::new(
        "visits",
        store,
        move |_: &()| Ok(Fingerprint::Mtimes(vec![version.load(Ordering::SeqCst) as i128])),
        move |_: &()| {
            runs.fetch_add(1, Ordering::SeqCst);
            visits().into_iter()
        },
    )
}

/// Backend that fails every operation.
struct BrokenStore;

impl CacheBackend for BrokenStore {
    fn load(&self, _: &str, _: u64) -> Result<Option<Vec<u8>>> {
        anyhow::bail!("disk on fire")
    }

    fn store(&self, _: &str, _: u64, _: &[u8]) -> Result<()> {
        anyhow::bail!("disk on fire")
    }

    fn clear(&self, _: Option<&str>) -> Result<usize> {
        anyhow::bail!("disk on fire")
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }
}

/// Backend that loads nothing and refuses writes.
struct ReadOnlyEmptyStore;

impl CacheBackend for ReadOnlyEmptyStore {
    fn load(&self, _: &str, _: u64) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn store(&self, _: &str, _: u64, _: &[u8]) -> Result<()> {
        anyhow::bail!("read-only")
    }

    fn clear(&self, _: Option<&str>) -> Result<usize> {
        Ok(0)
    }

    fn describe(&self) -> String {
        "read-only".to_string()
    }
}

// ==========================================================================
// REPLAY
// ==========================================================================

#[test]
fn cold_and_warm_calls_match_fresh_output() {
    let store: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(store, Arc::new(AtomicI64::new(1)), runs.clone());

    let cold = memo.call(&()).unwrap();
    assert!(!cold.is_hit());
    let cold: Vec<_> = cold.collect();

    let warm = memo.call(&()).unwrap();
    assert!(warm.is_hit());
    let warm: Vec<_> = warm.collect();

    assert_eq!(cold, visits());
    assert_eq!(warm, visits());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Each call is a fresh iterator
    assert_eq!(memo.call(&()).unwrap().count(), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn changed_fingerprint_recomputes() {
    let store: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let version = Arc::new(AtomicI64::new(1));
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(store, version.clone(), runs.clone());

    memo.call(&()).unwrap().for_each(drop);
    version.store(2, Ordering::SeqCst);
    assert!(!memo.call(&()).unwrap().is_hit());
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // The old entry was not evicted, it is simply addressed again
    version.store(1, Ordering::SeqCst);
    assert!(memo.call(&()).unwrap().is_hit());
}

#[test]
fn abandoned_iteration_is_not_persisted() {
    let store: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(store, Arc::new(AtomicI64::new(1)), runs.clone());

    let first: Vec<_> = memo.call(&()).unwrap().take(1).collect();
    assert_eq!(first.len(), 1);

    let second = memo.call(&()).unwrap();
    assert!(!second.is_hit());
    assert_eq!(second.collect::<Vec<_>>(), visits());
    assert!(memo.call(&()).unwrap().is_hit());
}

#[test]
fn fingerprint_errors_propagate() {
    let memo: Memo<(), Visit> = Memo::new(
        "visits",
        Arc::new(MemoryCache::new()),
        |_: &()| anyhow::bail!("input vanished"),
        |_: &()| visits().into_iter(),
    );
    let err = memo.call(&()).err().unwrap();
    assert!(err.to_string().contains("input vanished"));
}

#[test]
fn namespaces_do_not_share_entries() {
    let store: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let make = |ns: &'static str, url: &'static str| -> Memo<(), Visit> {
        Memo::new(
            ns,
            Arc::clone(&store),
            |_: &()| Ok(Fingerprint::Paths(vec!["same".into()])),
            move |_: &()| {
                vec![Ok(Visit {
                    ts: 0,
                    url: url.to_string(),
                })]
                .into_iter()
            },
        )
    };
    let zsh = make("zsh", "from-zsh");
    let bash = make("bash", "from-bash");

    zsh.call(&()).unwrap().for_each(drop);
    bash.call(&()).unwrap().for_each(drop);

    let replayed: Vec<_> = bash.call(&()).unwrap().collect();
    assert_eq!(replayed[0].as_ref().unwrap().url, "from-bash");
}

// ==========================================================================
// FAIL OPEN
// ==========================================================================

#[test]
fn unavailable_store_fails_open() {
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(
        Arc::new(BrokenStore),
        Arc::new(AtomicI64::new(1)),
        runs.clone(),
    );

    for _ in 0..2 {
        let replay = memo.call(&()).unwrap();
        assert!(matches!(replay, Replay::Uncached(_)));
        assert_eq!(replay.collect::<Vec<_>>(), visits());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_write_still_emits_everything() {
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(
        Arc::new(ReadOnlyEmptyStore),
        Arc::new(AtomicI64::new(1)),
        runs.clone(),
    );

    assert_eq!(memo.call(&()).unwrap().collect::<Vec<_>>(), visits());
    assert_eq!(memo.call(&()).unwrap().collect::<Vec<_>>(), visits());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn corrupted_entry_is_recomputed_and_repaired() {
    let store = Arc::new(MemoryCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(store.clone(), Arc::new(AtomicI64::new(7)), runs.clone());

    let digest = Fingerprint::Mtimes(vec![7]).digest();
    store.corrupt("visits", digest, vec![0xff, 0x00, 0x13, 0x37]);

    assert_eq!(memo.call(&()).unwrap().collect::<Vec<_>>(), visits());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert!(memo.call(&()).unwrap().is_hit());
}

#[test]
fn snapshot_for_other_fingerprint_is_a_miss() {
    let fp = Fingerprint::Mtimes(vec![1]);
    let other = Fingerprint::Mtimes(vec![2]);
    let bytes = encode_snapshot("visits", &fp, &visits()).unwrap();

    assert_eq!(
        decode_snapshot::<Visit>(&bytes, "visits", &fp).unwrap(),
        Some(visits())
    );
    assert_eq!(decode_snapshot::<Visit>(&bytes, "visits", &other).unwrap(), None);
    assert_eq!(decode_snapshot::<Visit>(&bytes, "other", &fp).unwrap(), None);
    assert!(decode_snapshot::<Visit>(b"nonsense", "visits", &fp).is_err());
}

// ==========================================================================
// DISK
// ==========================================================================

fn touch(path: &Path, secs: u64) {
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn disk_cache_replays_across_store_instances() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("history");
    touch(&input, 1_000);

    let runs = Arc::new(AtomicUsize::new(0));
    let make = |root: PathBuf, runs: Arc<AtomicUsize>| -> Memo<[PathBuf], Visit> {
        Memo::new(
            "visits",
            Arc::new(DiskCache::open(root).unwrap()),
            |paths: &[PathBuf]| mtime_fingerprint(paths),
            move |_: &[PathBuf]| {
                runs.fetch_add(1, Ordering::SeqCst);
                visits().into_iter()
            },
        )
    };

    let first = make(dir.path().join("cache"), runs.clone());
    let cold: Vec<_> = first.call(&[input.clone()]).unwrap().collect();

    // A new process would open a new store on the same directory
    let second = make(dir.path().join("cache"), runs.clone());
    let warm = second.call(&[input.clone()]).unwrap();
    assert!(warm.is_hit());
    assert_eq!(warm.collect::<Vec<_>>(), cold);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    touch(&input, 2_000);
    assert!(!second.call(&[input.clone()]).unwrap().is_hit());

    assert!(second.clear().unwrap() >= 1);
    touch(&input, 1_000);
    assert!(!second.call(&[input]).unwrap().is_hit());
}

#[test]
fn disk_cache_with_garbage_file_fails_open() {
    let dir = TempDir::new().unwrap();
    let disk = DiskCache::open(dir.path()).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(
        Arc::new(disk.clone()),
        Arc::new(AtomicI64::new(3)),
        runs.clone(),
    );

    let path = disk.entry_path("visits", Fingerprint::Mtimes(vec![3]).digest());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"\x00\x01garbage").unwrap();

    assert_eq!(memo.call(&()).unwrap().collect::<Vec<_>>(), visits());
    assert!(memo.call(&()).unwrap().is_hit());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// ==========================================================================
// SETTINGS
// ==========================================================================

#[test]
fn env_toggle_values() {
    assert!(!env_disables(None));
    assert!(!env_disables(Some(OsStr::new(""))));
    assert!(!env_disables(Some(OsStr::new("0"))));
    assert!(!env_disables(Some(OsStr::new("false"))));
    assert!(env_disables(Some(OsStr::new("1"))));
    assert!(env_disables(Some(OsStr::new("yes"))));
}

#[test]
fn configured_cache_dir_is_used() {
    if std::env::var_os(CACHE_DIR_ENV).is_some() {
        return;
    }
    let mut config = Config::default();
    config.cache.dir = Some(PathBuf::from("/var/tmp/hpi-test-cache"));
    assert_eq!(cache_dir(&config), PathBuf::from("/var/tmp/hpi-test-cache"));

    config.cache.dir = None;
    assert!(cache_dir(&config).ends_with("hpi") || cache_dir(&config).ends_with("hpi-cache"));
}
