//! Best-effort resolution of non-exported kernel symbols.
//!
//! Some accessors a context provider needs are not part of the stable
//! kernel export surface. Resolution is deferred to first use: the
//! provider's attach path resolves by name, caches the address, and
//! fails its own registration with a dependency error when the symbol
//! is absent -- never affecting other providers or the control
//! protocol. Negative results are not cached; the next attach attempt
//! probes again.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::platform;

/// A named kernel symbol resolved once on first use.
///
/// The cached address doubles as the initialization flag: zero means
/// unresolved (a real symbol is never at address zero).
pub struct ResolvedSym {
    name: &'static str,
    addr: AtomicU64,
}

impl ResolvedSym {
    pub const fn new(name: &'static str) -> Self {
        Self { name, addr: AtomicU64::new(0) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve the symbol, caching a successful lookup.
    pub fn resolve(&self) -> Result<u64> {
        let cached = self.addr.load(Ordering::Acquire);
        if cached != 0 {
            return Ok(cached);
        }
        match platform::resolve_symbol(self.name) {
            Some(addr) if addr != 0 => {
                self.addr.store(addr, Ordering::Release);
                Ok(addr)
            }
            _ => {
                log::warn!("ktrace: {} symbol lookup failed", self.name);
                Err(Error::DependencyUnavailable(self.name))
            }
        }
    }

    /// Whether a previous [`resolve`](Self::resolve) succeeded.
    pub fn is_resolved(&self) -> bool {
        self.addr.load(Ordering::Acquire) != 0
    }

    /// Drop the cached address so the next resolve probes again.
    pub fn reset(&self) {
        self.addr.store(0, Ordering::Release);
    }
}

/// One-shot lookup without caching.
pub fn lookup_addr(name: &str) -> Option<u64> {
    platform::resolve_symbol(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_caches_positive_result() {
        static SYM: ResolvedSym = ResolvedSym::new("cache_probe_helper");
        platform::mock_register_symbol("cache_probe_helper", 0x1234);
        assert_eq!(SYM.resolve(), Ok(0x1234));
        // Table removal must not invalidate the cache.
        platform::mock_unregister_symbol("cache_probe_helper");
        assert_eq!(SYM.resolve(), Ok(0x1234));
        assert!(SYM.is_resolved());
    }

    #[test]
    fn test_negative_result_reprobed() {
        static SYM: ResolvedSym = ResolvedSym::new("late_bound_helper");
        assert_eq!(SYM.resolve(), Err(Error::DependencyUnavailable("late_bound_helper")));
        platform::mock_register_symbol("late_bound_helper", 0x4321);
        assert_eq!(SYM.resolve(), Ok(0x4321));
        platform::mock_unregister_symbol("late_bound_helper");
    }
}
