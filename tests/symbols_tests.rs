//! Integration tests for name-based symbol resolution.

use std::sync::{Mutex, MutexGuard};

use ktrace::error::Error;
use ktrace::platform;
use ktrace::symbols::{ResolvedSym, lookup_addr};

static MOCK_LOCK: Mutex<()> = Mutex::new(());

fn lock_mock() -> MutexGuard<'static, ()> {
    MOCK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[test]
fn test_resolve_caches_positive_result() {
    let _guard = lock_mock();
    static SYM: ResolvedSym = ResolvedSym::new("cache_probe_fn");
    platform::mock_register_symbol("cache_probe_fn", 0x1000);

    assert_eq!(SYM.resolve().unwrap(), 0x1000);
    assert!(SYM.is_resolved());

    // The cached address survives the symbol disappearing.
    platform::mock_unregister_symbol("cache_probe_fn");
    assert_eq!(SYM.resolve().unwrap(), 0x1000);
}

#[test]
fn test_resolve_failure_is_retryable() {
    let _guard = lock_mock();
    static SYM: ResolvedSym = ResolvedSym::new("late_loaded_fn");
    platform::mock_unregister_symbol("late_loaded_fn");

    assert!(matches!(
        SYM.resolve(),
        Err(Error::DependencyUnavailable("late_loaded_fn"))
    ));
    assert!(!SYM.is_resolved());

    // A failed lookup is not cached: the next resolve sees the symbol.
    platform::mock_register_symbol("late_loaded_fn", 0x2000);
    assert_eq!(SYM.resolve().unwrap(), 0x2000);
    platform::mock_unregister_symbol("late_loaded_fn");
}

#[test]
fn test_reset_forces_fresh_lookup() {
    let _guard = lock_mock();
    static SYM: ResolvedSym = ResolvedSym::new("relocatable_fn");
    platform::mock_register_symbol("relocatable_fn", 0x3000);
    assert_eq!(SYM.resolve().unwrap(), 0x3000);

    platform::mock_register_symbol("relocatable_fn", 0x4000);
    // Still the cached address until reset.
    assert_eq!(SYM.resolve().unwrap(), 0x3000);
    SYM.reset();
    assert_eq!(SYM.resolve().unwrap(), 0x4000);
    platform::mock_unregister_symbol("relocatable_fn");
}

#[test]
fn test_lookup_addr_passthrough() {
    let _guard = lock_mock();
    platform::mock_register_symbol("one_shot_fn", 0x5000);
    assert_eq!(lookup_addr("one_shot_fn"), Some(0x5000));
    platform::mock_unregister_symbol("one_shot_fn");
    assert_eq!(lookup_addr("one_shot_fn"), None);
}
