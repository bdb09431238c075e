//! Tracing sessions, channels, events and the capture path.
//!
//! Ownership mirrors the control protocol: a session owns its channels,
//! a channel owns its events, and teardown runs in reverse dependency
//! order so no in-flight capture ever observes a dangling registry.
//! Enable/disable and session stop are control-path operations that
//! only prevent future captures; a capture already in progress always
//! completes against the snapshot it took.

use alloc::boxed::Box;
use alloc::collections::{BTreeSet, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use spin::Mutex;

use crate::abi::{
    ChannelAttr, EventAttr, EventNotifierAttr, FILTER_BYTECODE_MAX_LEN, FilterBytecode,
    Instrumentation, InstrumentationConfig, OutputMode, SESSION_CREATION_TIME_ISO8601_LEN,
    SESSION_NAME_LEN, SyscallAbi, SyscallMatch, TrackerType,
};
use crate::context::{self, ContextRegistry};
use crate::error::{Error, Result};
use crate::platform;
use crate::ring_buffer::RingBufferOps;

// =============================================================================
// Glob Matching
// =============================================================================

/// Match `name` against a glob `pattern` where `*` matches any run of
/// characters. Used for syscall event names; `"*"` means "all".
pub fn name_matches_glob(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..])),
            (Some(pc), Some(nc)) if pc == nc => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

// =============================================================================
// Id Trackers
// =============================================================================

struct TrackerInner {
    /// Track-all is the initial state and the `track(-1)` state.
    all: bool,
    ids: BTreeSet<i32>,
}

/// Inclusion filter over one id namespace (pid, uid, ...).
pub struct IdTracker {
    inner: Mutex<TrackerInner>,
}

impl IdTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner { all: true, ids: BTreeSet::new() }),
        }
    }

    /// Track `id`; `-1` switches back to track-all.
    pub fn track(&self, id: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        if id == -1 {
            inner.all = true;
            inner.ids.clear();
            return Ok(());
        }
        if inner.all {
            inner.all = false;
            inner.ids.clear();
        }
        if !inner.ids.insert(id) {
            return Err(Error::AlreadyExists(String::from("tracked id")));
        }
        Ok(())
    }

    /// Untrack `id`; `-1` empties the tracker (track nothing).
    pub fn untrack(&self, id: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        if id == -1 {
            inner.all = false;
            inner.ids.clear();
            return Ok(());
        }
        if inner.all {
            return Err(Error::InvalidArgument("cannot untrack one id while tracking all"));
        }
        if !inner.ids.remove(&id) {
            return Err(Error::NotFound(String::from("tracked id")));
        }
        Ok(())
    }

    pub fn is_tracked(&self, id: i32) -> bool {
        let inner = self.inner.lock();
        inner.all || inner.ids.contains(&id)
    }

    /// Tracked ids in ascending order; `[-1]` when tracking all.
    pub fn list(&self) -> Vec<i32> {
        let inner = self.inner.lock();
        if inner.all {
            return alloc::vec![-1];
        }
        inner.ids.iter().copied().collect()
    }
}

impl Default for IdTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The six per-session tracker namespaces.
///
/// All six are controllable over the protocol, but the capture path
/// consults only `pid`: the platform layer exposes no vpid/uid/gid
/// accessors for the current task yet. The others gate nothing until
/// it does.
pub struct TrackerSet {
    pub pid: IdTracker,
    pub vpid: IdTracker,
    pub uid: IdTracker,
    pub vuid: IdTracker,
    pub gid: IdTracker,
    pub vgid: IdTracker,
}

impl TrackerSet {
    fn new() -> Self {
        Self {
            pid: IdTracker::new(),
            vpid: IdTracker::new(),
            uid: IdTracker::new(),
            vuid: IdTracker::new(),
            gid: IdTracker::new(),
            vgid: IdTracker::new(),
        }
    }

    /// Tracker for a wire tracker type; `Unknown` has none.
    pub fn get(&self, tracker_type: TrackerType) -> Result<&IdTracker> {
        Ok(match tracker_type {
            TrackerType::Pid => &self.pid,
            TrackerType::Vpid => &self.vpid,
            TrackerType::Uid => &self.uid,
            TrackerType::Vuid => &self.vuid,
            TrackerType::Gid => &self.gid,
            TrackerType::Vgid => &self.vgid,
            TrackerType::Unknown => {
                return Err(Error::InvalidArgument("unknown tracker type"));
            }
        })
    }
}

// =============================================================================
// Event
// =============================================================================

/// One instrumented trigger point owned by a channel.
pub struct Event {
    name: String,
    config: InstrumentationConfig,
    token: u64,
    enabled: AtomicBool,
    context: ContextRegistry,
    filter: Mutex<Option<FilterBytecode>>,
    /// Highest filter seqnum accepted so far.
    filter_seqnum: AtomicU64,
    callsites: Mutex<Vec<u64>>,
}

impl Event {
    /// Validate creation attributes and build the event.
    pub fn new(attr: EventAttr) -> Result<Self> {
        if attr.name.is_empty() {
            return Err(Error::InvalidArgument("empty event name"));
        }
        if let InstrumentationConfig::Syscall(sc) = &attr.config {
            if sc.abi != SyscallAbi::All {
                return Err(Error::NotImplemented("syscall abi selection"));
            }
            if sc.match_mode != SyscallMatch::Name {
                return Err(Error::NotImplemented("syscall match by number"));
            }
        }
        Ok(Self {
            name: attr.name,
            config: attr.config,
            token: attr.token,
            enabled: AtomicBool::new(true),
            context: ContextRegistry::new(),
            filter: Mutex::new(None),
            filter_seqnum: AtomicU64::new(0),
            callsites: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    pub fn instrumentation(&self) -> Instrumentation {
        self.config.instrumentation()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Event-scoped context registry.
    pub fn context(&self) -> &ContextRegistry {
        &self.context
    }

    /// Whether this event applies to `candidate`: glob match for
    /// syscall events, exact match otherwise.
    pub fn matches(&self, candidate: &str) -> bool {
        if self.instrumentation() == Instrumentation::Syscall {
            name_matches_glob(&self.name, candidate)
        } else {
            self.name == candidate
        }
    }

    /// Attach compiled filter bytecode.
    ///
    /// Oversized blobs are rejected before being stored; a seqnum at
    /// or below one already accepted is a stale recompilation and is
    /// rejected too.
    pub fn set_filter(&self, bytecode: FilterBytecode) -> Result<()> {
        if bytecode.data.len() > FILTER_BYTECODE_MAX_LEN {
            return Err(Error::SizeExceeded {
                len: bytecode.data.len(),
                max: FILTER_BYTECODE_MAX_LEN,
            });
        }
        let mut filter = self.filter.lock();
        if filter.is_some() && bytecode.seqnum <= self.filter_seqnum.load(Ordering::Acquire) {
            return Err(Error::InvalidArgument("stale filter bytecode seqnum"));
        }
        self.filter_seqnum.store(bytecode.seqnum, Ordering::Release);
        *filter = Some(bytecode);
        Ok(())
    }

    pub fn filter(&self) -> Option<FilterBytecode> {
        self.filter.lock().clone()
    }

    /// Register a uprobe callsite.
    pub fn add_callsite(&self, offset: u64) -> Result<()> {
        if self.instrumentation() != Instrumentation::Uprobe {
            return Err(Error::InvalidArgument("callsite on non-uprobe event"));
        }
        self.callsites.lock().push(offset);
        Ok(())
    }

    pub fn callsites(&self) -> Vec<u64> {
        self.callsites.lock().clone()
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Outcome of one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Record committed; carries the record length in bytes.
    Recorded(usize),
    /// Buffer full in discard mode (counted by the backend).
    Discarded,
    /// Session, channel or event not currently enabled.
    Disabled,
    /// Current pid excluded by the session's pid tracker.
    Untracked,
}

/// One ring-buffer-backed event stream.
pub struct Channel {
    subbuf_size: u64,
    num_subbuf: u64,
    switch_timer_interval: u32,
    read_timer_interval: u32,
    output: OutputMode,
    overwrite: bool,
    is_metadata: bool,
    enabled: AtomicBool,
    events: Mutex<Vec<Arc<Event>>>,
    context: ContextRegistry,
    backend: Box<dyn RingBufferOps>,
}

impl Channel {
    pub fn new(attr: &ChannelAttr, backend: Box<dyn RingBufferOps>, is_metadata: bool) -> Self {
        Self {
            subbuf_size: attr.subbuf_size,
            num_subbuf: attr.num_subbuf,
            switch_timer_interval: attr.switch_timer_interval,
            read_timer_interval: attr.read_timer_interval,
            output: attr.output,
            overwrite: attr.overwrite,
            is_metadata,
            enabled: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
            context: ContextRegistry::new(),
            backend,
        }
    }

    pub fn subbuf_size(&self) -> u64 {
        self.subbuf_size
    }

    pub fn num_subbuf(&self) -> u64 {
        self.num_subbuf
    }

    pub fn switch_timer_interval(&self) -> u32 {
        self.switch_timer_interval
    }

    pub fn read_timer_interval(&self) -> u32 {
        self.read_timer_interval
    }

    pub fn output(&self) -> OutputMode {
        self.output
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn is_metadata(&self) -> bool {
        self.is_metadata
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Channel-scoped context registry, applied to every event.
    pub fn context(&self) -> &ContextRegistry {
        &self.context
    }

    pub fn backend(&self) -> &dyn RingBufferOps {
        &*self.backend
    }

    /// Create an event owned by this channel. Duplicate names at this
    /// attach point are rejected.
    pub fn create_event(&self, attr: EventAttr) -> Result<Arc<Event>> {
        let mut events = self.events.lock();
        if events.iter().any(|e| e.name() == attr.name) {
            return Err(Error::AlreadyExists(attr.name));
        }
        let event = Arc::new(Event::new(attr)?);
        events.push(event.clone());
        Ok(event)
    }

    pub fn events(&self) -> Vec<Arc<Event>> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Capture one firing of `event` into this channel.
    ///
    /// Walks the session, channel and event registries in that order:
    /// a size pass computing the record length, then a record pass
    /// writing each field at the offset the size pass planned. Runs
    /// synchronously in the triggering context; never blocks, never
    /// allocates beyond the reserved slot.
    pub fn capture(&self, session: &Session, event: &Event) -> CaptureOutcome {
        if !session.is_active() || !self.is_enabled() || !event.is_enabled() {
            return CaptureOutcome::Disabled;
        }
        if !session.trackers().pid.is_tracked(platform::current_pid()) {
            return CaptureOutcome::Untracked;
        }

        // One snapshot per registry for the whole capture: the record
        // pass must walk exactly the field sequence the size pass
        // measured, even if an attach or detach lands in between.
        let session_fields = session.context().snapshot();
        let channel_fields = self.context.snapshot();
        let event_fields = event.context().snapshot();

        let mut len = context::fields_size(&session_fields, 0);
        len += context::fields_size(&channel_fields, len);
        len += context::fields_size(&event_fields, len);

        let Some(mut slot) = self.backend.reserve(len) else {
            return CaptureOutcome::Discarded;
        };
        context::record_fields(&session_fields, &mut slot, &*self.backend);
        context::record_fields(&channel_fields, &mut slot, &*self.backend);
        context::record_fields(&event_fields, &mut slot, &*self.backend);

        let written = slot.written();
        debug_assert_eq!(written, len, "context fields wrote a different size than planned");
        self.backend.commit(slot);
        CaptureOutcome::Recorded(written)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Started = 1,
    Stopped = 2,
}

/// Top-level tracing scope.
pub struct Session {
    name: Mutex<String>,
    creation_time: Mutex<Option<String>>,
    channels: Mutex<Vec<Arc<Channel>>>,
    context: ContextRegistry,
    trackers: TrackerSet,
    state: AtomicU8,
}

impl Session {
    pub fn new() -> Self {
        Self {
            name: Mutex::new(String::new()),
            creation_time: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            context: ContextRegistry::new(),
            trackers: TrackerSet::new(),
            state: AtomicU8::new(SessionState::Created as u8),
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        if name.len() >= SESSION_NAME_LEN {
            return Err(Error::InvalidArgument("session name too long"));
        }
        *self.name.lock() = String::from(name);
        Ok(())
    }

    pub fn creation_time(&self) -> Option<String> {
        self.creation_time.lock().clone()
    }

    pub fn set_creation_time(&self, iso8601: &str) -> Result<()> {
        if iso8601.len() >= SESSION_CREATION_TIME_ISO8601_LEN {
            return Err(Error::InvalidArgument("creation time too long"));
        }
        *self.creation_time.lock() = Some(String::from(iso8601));
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            1 => SessionState::Started,
            2 => SessionState::Stopped,
            _ => SessionState::Created,
        }
    }

    /// Start tracing. Restarting a stopped session is allowed.
    pub fn start(&self) {
        self.state.store(SessionState::Started as u8, Ordering::SeqCst);
    }

    /// Stop tracing: prevents future captures only, never interrupts
    /// one in progress.
    pub fn stop(&self) {
        self.state.store(SessionState::Stopped as u8, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SessionState::Started as u8
    }

    /// Session-scoped context registry, applied to every channel.
    pub fn context(&self) -> &ContextRegistry {
        &self.context
    }

    pub fn trackers(&self) -> &TrackerSet {
        &self.trackers
    }

    /// Create a channel owned by this session.
    pub fn add_channel(
        &self,
        attr: &ChannelAttr,
        backend: Box<dyn RingBufferOps>,
        is_metadata: bool,
    ) -> Arc<Channel> {
        let channel = Arc::new(Channel::new(attr, backend, is_metadata));
        self.channels.lock().push(channel.clone());
        channel
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.lock().clone()
    }

    /// Tear down in reverse dependency order: events first, then
    /// channels.
    pub fn teardown(&self) {
        self.stop();
        let channels = self.channels.lock().clone();
        for channel in &channels {
            channel.clear_events();
        }
        self.channels.lock().clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Event Notifiers
// =============================================================================

/// A session-independent event paired with a notification queue
/// instead of a channel.
pub struct EventNotifier {
    event: Event,
}

impl EventNotifier {
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Deliver one firing: pushes the caller's correlation token onto
    /// the group's notification queue.
    pub fn fire(&self, group: &EventNotifierGroup) {
        if self.event.is_enabled() {
            group.push_notification(self.event.token());
        }
    }
}

/// Owner of event notifiers and their shared notification queue.
pub struct EventNotifierGroup {
    notifiers: Mutex<Vec<Arc<EventNotifier>>>,
    queue: Mutex<VecDeque<u64>>,
    notification_fd: i32,
}

impl EventNotifierGroup {
    pub fn new(notification_fd: i32) -> Self {
        Self {
            notifiers: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            notification_fd,
        }
    }

    /// File descriptor the consumer polls for notifications.
    pub fn notification_fd(&self) -> i32 {
        self.notification_fd
    }

    pub fn create_notifier(&self, attr: EventNotifierAttr) -> Result<Arc<EventNotifier>> {
        let mut notifiers = self.notifiers.lock();
        if notifiers.iter().any(|n| n.event.name() == attr.event.name) {
            return Err(Error::AlreadyExists(attr.event.name));
        }
        let notifier = Arc::new(EventNotifier { event: Event::new(attr.event)? });
        notifiers.push(notifier.clone());
        Ok(notifier)
    }

    pub fn notifiers(&self) -> Vec<Arc<EventNotifier>> {
        self.notifiers.lock().clone()
    }

    fn push_notification(&self, token: u64) {
        self.queue.lock().push_back(token);
    }

    /// Drain pending notification tokens in delivery order.
    pub fn drain_notifications(&self) -> Vec<u64> {
        self.queue.lock().drain(..).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        assert!(name_matches_glob("*", "openat"));
        assert!(name_matches_glob("open*", "openat"));
        assert!(name_matches_glob("open*", "open"));
        assert!(name_matches_glob("*at", "openat"));
        assert!(name_matches_glob("o*n*t", "openat"));
        assert!(!name_matches_glob("open", "openat"));
        assert!(!name_matches_glob("close*", "openat"));
    }

    #[test]
    fn test_tracker_semantics() {
        let tracker = IdTracker::new();
        assert!(tracker.is_tracked(42));
        assert_eq!(tracker.list(), alloc::vec![-1]);

        tracker.track(7).unwrap();
        assert!(tracker.is_tracked(7));
        assert!(!tracker.is_tracked(42));
        assert!(matches!(tracker.track(7), Err(Error::AlreadyExists(_))));

        tracker.untrack(7).unwrap();
        assert!(!tracker.is_tracked(7));
        assert_eq!(tracker.list(), Vec::<i32>::new());

        tracker.track(-1).unwrap();
        assert!(tracker.is_tracked(42));
    }

    #[test]
    fn test_session_lifecycle() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Created);
        assert!(!session.is_active());
        session.start();
        assert!(session.is_active());
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        session.start();
        assert!(session.is_active());
    }

    #[test]
    fn test_stale_filter_rejected() {
        let event = Event::new(EventAttr {
            name: String::from("probe"),
            token: 0,
            config: InstrumentationConfig::Tracepoint,
        })
        .unwrap();
        let fresh = FilterBytecode { reloc_offset: 0, seqnum: 2, data: alloc::vec![0x01] };
        event.set_filter(fresh).unwrap();
        let stale = FilterBytecode { reloc_offset: 0, seqnum: 1, data: alloc::vec![0x02] };
        assert!(matches!(event.set_filter(stale), Err(Error::InvalidArgument(_))));
        assert_eq!(event.filter().unwrap().seqnum, 2);
    }
}
