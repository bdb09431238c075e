//! Kernel-state abstraction consumed by context providers.
//!
//! Providers never touch kernel internals directly; they go through
//! this module so the whole capture path can be exercised in user
//! space. The mock implementation keeps its state in atomics and
//! spin locks so tests can steer it.

use alloc::collections::BTreeMap;
use alloc::string::String;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

/// Maximum system hostname length, NUL included (`__NEW_UTS_LEN + 1`).
pub const HOSTNAME_LEN: usize = 65;

/// Kernel-state operations trait.
///
/// Abstracts the accessors the capture path needs: current-task
/// attributes, the task's UTS namespace, and dynamic symbol lookup.
pub trait KernelStateOps {
    /// Current tracer timestamp in nanoseconds.
    fn timestamp_ns() -> u64;

    /// Current CPU ID.
    fn cpu_id() -> u32;

    /// PID of the current task.
    fn current_pid() -> i32;

    /// PID of the current task's parent.
    ///
    /// Best-effort snapshot: must never block and must tolerate the
    /// parent being reparented or exiting concurrently.
    fn current_ppid() -> i32;

    /// Scheduling priority of the current task.
    fn current_prio() -> i32;

    /// Copy the current task's hostname into `buf`, NUL padded.
    ///
    /// Returns `false` when the task has no namespace context (e.g.
    /// during teardown); callers record a zero-filled array then.
    fn current_hostname(buf: &mut [u8; HOSTNAME_LEN]) -> bool;

    /// Resolve a kernel symbol by name.
    ///
    /// Returns `None` when the symbol is not present in this kernel.
    fn resolve_symbol(name: &str) -> Option<u64>;

    /// Ensure freshly attached capture code is mapped into every
    /// address space that may execute the capture path.
    fn sync_capture_mappings();
}

// =============================================================================
// Mock Implementation (user-space testing)
// =============================================================================

static MOCK_TIME_NS: AtomicU64 = AtomicU64::new(1_000_000_000);
static MOCK_CPU_ID: AtomicU32 = AtomicU32::new(0);
static MOCK_PID: AtomicI32 = AtomicI32::new(1);
static MOCK_PPID: AtomicI32 = AtomicI32::new(0);
static MOCK_PRIO: AtomicI32 = AtomicI32::new(120);
static MOCK_SYNC_CALLS: AtomicU64 = AtomicU64::new(0);

struct MockHostState {
    available: bool,
    name: [u8; HOSTNAME_LEN],
}

static MOCK_HOST: Mutex<MockHostState> = Mutex::new(MockHostState {
    available: true,
    name: [0; HOSTNAME_LEN],
});

static MOCK_SYMBOLS: Mutex<BTreeMap<String, u64>> = Mutex::new(BTreeMap::new());
static MOCK_SYMBOLS_SEEDED: AtomicBool = AtomicBool::new(false);

fn mock_symbols() -> spin::MutexGuard<'static, BTreeMap<String, u64>> {
    let mut table = MOCK_SYMBOLS.lock();
    if !MOCK_SYMBOLS_SEEDED.swap(true, Ordering::SeqCst) {
        // Symbols a stock kernel carries but does not export.
        table.insert(String::from("task_prio"), 0xffff_ffff_8110_2640);
    }
    table
}

/// Mock kernel-state backend.
///
/// Kernel builds replace this with a HAL-backed implementation; the
/// crate itself only ships the mock so it can be tested in user space.
pub struct MockKernel;

impl KernelStateOps for MockKernel {
    fn timestamp_ns() -> u64 {
        MOCK_TIME_NS.load(Ordering::Relaxed)
    }

    fn cpu_id() -> u32 {
        MOCK_CPU_ID.load(Ordering::Relaxed)
    }

    fn current_pid() -> i32 {
        MOCK_PID.load(Ordering::Relaxed)
    }

    fn current_ppid() -> i32 {
        // Single atomic load: the snapshot contract from the trait.
        MOCK_PPID.load(Ordering::Relaxed)
    }

    fn current_prio() -> i32 {
        MOCK_PRIO.load(Ordering::Relaxed)
    }

    fn current_hostname(buf: &mut [u8; HOSTNAME_LEN]) -> bool {
        let host = MOCK_HOST.lock();
        if !host.available {
            return false;
        }
        buf.copy_from_slice(&host.name);
        true
    }

    fn resolve_symbol(name: &str) -> Option<u64> {
        mock_symbols().get(name).copied()
    }

    fn sync_capture_mappings() {
        MOCK_SYNC_CALLS.fetch_add(1, Ordering::Relaxed);
    }
}

/// The active kernel-state implementation.
pub type Platform = MockKernel;

// =============================================================================
// Convenience Functions
// =============================================================================

/// Current tracer timestamp in nanoseconds.
#[inline]
pub fn timestamp_ns() -> u64 {
    Platform::timestamp_ns()
}

/// Current CPU ID.
#[inline]
pub fn cpu_id() -> u32 {
    Platform::cpu_id()
}

/// PID of the current task.
#[inline]
pub fn current_pid() -> i32 {
    Platform::current_pid()
}

/// PID of the current task's parent (best-effort snapshot).
#[inline]
pub fn current_ppid() -> i32 {
    Platform::current_ppid()
}

/// Scheduling priority of the current task.
#[inline]
pub fn current_prio() -> i32 {
    Platform::current_prio()
}

/// Copy the current hostname into `buf`; `false` if unavailable.
#[inline]
pub fn current_hostname(buf: &mut [u8; HOSTNAME_LEN]) -> bool {
    Platform::current_hostname(buf)
}

/// Resolve a kernel symbol by name.
#[inline]
pub fn resolve_symbol(name: &str) -> Option<u64> {
    Platform::resolve_symbol(name)
}

/// Publish freshly attached capture code to all address spaces.
#[inline]
pub fn sync_capture_mappings() {
    Platform::sync_capture_mappings()
}

// =============================================================================
// Mock State Setters
// =============================================================================

/// Set mock time for testing.
pub fn set_mock_time(ns: u64) {
    MOCK_TIME_NS.store(ns, Ordering::Relaxed);
}

/// Advance mock time by given nanoseconds.
pub fn advance_mock_time(ns: u64) {
    MOCK_TIME_NS.fetch_add(ns, Ordering::Relaxed);
}

/// Set mock CPU ID for testing.
pub fn set_mock_cpu_id(id: u32) {
    MOCK_CPU_ID.store(id, Ordering::Relaxed);
}

/// Set the mock current PID.
pub fn set_mock_pid(pid: i32) {
    MOCK_PID.store(pid, Ordering::Relaxed);
}

/// Set the mock parent PID.
pub fn set_mock_ppid(ppid: i32) {
    MOCK_PPID.store(ppid, Ordering::Relaxed);
}

/// Set the mock scheduling priority.
pub fn set_mock_prio(prio: i32) {
    MOCK_PRIO.store(prio, Ordering::Relaxed);
}

/// Set the mock hostname (truncated to [`HOSTNAME_LEN`] - 1 bytes).
pub fn set_mock_hostname(name: &str) {
    let mut host = MOCK_HOST.lock();
    host.name = [0; HOSTNAME_LEN];
    let n = name.len().min(HOSTNAME_LEN - 1);
    host.name[..n].copy_from_slice(&name.as_bytes()[..n]);
    host.available = true;
}

/// Toggle mock namespace availability (hostname lookup failure path).
pub fn set_mock_hostname_available(available: bool) {
    MOCK_HOST.lock().available = available;
}

/// Register a symbol in the mock symbol table.
pub fn mock_register_symbol(name: &str, addr: u64) {
    mock_symbols().insert(String::from(name), addr);
}

/// Remove a symbol from the mock symbol table.
pub fn mock_unregister_symbol(name: &str) {
    mock_symbols().remove(name);
}

/// Number of capture-mapping sync requests issued so far.
pub fn mock_sync_count() -> u64 {
    MOCK_SYNC_CALLS.load(Ordering::Relaxed)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_time() {
        set_mock_time(5000);
        assert_eq!(timestamp_ns(), 5000);

        advance_mock_time(1000);
        assert_eq!(timestamp_ns(), 6000);
    }

    #[test]
    fn test_mock_hostname_roundtrip() {
        set_mock_hostname("testhost");
        let mut buf = [0u8; HOSTNAME_LEN];
        assert!(current_hostname(&mut buf));
        assert_eq!(&buf[..8], b"testhost");
        assert_eq!(buf[8], 0);
    }

    #[test]
    fn test_mock_symbol_table() {
        mock_register_symbol("nonexported_helper", 0xdead_beef);
        assert_eq!(resolve_symbol("nonexported_helper"), Some(0xdead_beef));
        mock_unregister_symbol("nonexported_helper");
        assert_eq!(resolve_symbol("nonexported_helper"), None);
    }
}
