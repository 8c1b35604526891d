//! The process-wide cache switch. Kept in its own test binary since flipping
//! it affects every other cache user in the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hpi::cache::{self, CacheBackend, Memo, MemoryCache, Replay};
use hpi::fingerprint::Fingerprint;
use hpi::types::Res;

fn counting_memo(store: Arc<dyn CacheBackend>, runs: Arc<AtomicUsize>) -> Memo<(), u32> {
    Memo::new(
        "numbers",
        store,
        |_: &()| Ok(Fingerprint::Paths(vec!["fixed".to_string()])),
        move |_: &()| {
            runs.fetch_add(1, Ordering::SeqCst);
            vec![Ok(1), Ok(2), Ok(3)].into_iter()
        },
    )
}

#[test]
fn disabling_bypasses_storage_and_fingerprinting() {
    if cache::env_disables(std::env::var_os(cache::DISABLE_ENV).as_deref()) {
        return;
    }

    let store = Arc::new(MemoryCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let memo = counting_memo(store.clone(), runs.clone());

    // Warm the cache
    assert_eq!(memo.call(&()).unwrap().count(), 3);
    assert!(memo.call(&()).unwrap().is_hit());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    cache::set_enabled(false);
    assert!(!cache::is_enabled());

    let replay = memo.call(&()).unwrap();
    assert!(matches!(replay, Replay::Uncached(_)));
    let items: Vec<Res<u32>> = replay.collect();
    assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // Fingerprinting is skipped too, so a vanished input is no error
    let failing: Memo<(), u32> = Memo::new(
        "failing",
        store.clone(),
        |_: &()| anyhow::bail!("input vanished"),
        |_: &()| std::iter::once(Ok(7)),
    );
    assert_eq!(failing.call(&()).unwrap().count(), 1);
    assert_eq!(store.len(), 1);

    cache::set_enabled(true);
    assert!(memo.call(&()).unwrap().is_hit());
    assert!(failing.call(&()).is_err());
}
