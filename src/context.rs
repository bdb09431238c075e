//! Context-field descriptor contract and registry.
//!
//! A context field captures one named, typed piece of auxiliary data
//! alongside every event at its attach point (session, channel or
//! event). The capture path runs a strict three-phase protocol per
//! field: `get_size` (pure planning, callable concurrently), `record`
//! (alignment-aware write into the reserved slot) and `get_value` (an
//! allocation-free snapshot for the filter evaluator).
//!
//! The registry is read-mostly: the capture path reads a published
//! immutable snapshot, while attach/detach rebuild and republish it
//! under a control-path lock. A reader therefore sees either the old
//! or the new sequence in full, never a partially linked one. Detached
//! descriptors are retired with the generation (epoch) current at
//! detach time and reclaimed only once no snapshot references them.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::platform;
use crate::ring_buffer::{RingBufferOps, SlotCtx};

/// Inline capacity of a text snapshot value.
pub const VALUE_TEXT_MAX: usize = 128;

// =============================================================================
// Type Descriptors
// =============================================================================

/// String encoding of an integer or array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    None,
    Utf8,
    Ascii,
}

/// Wire description of one integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerType {
    pub size_bits: usize,
    pub alignment_bits: usize,
    pub signed: bool,
    pub reverse_byte_order: bool,
    /// Display base (10, 16, ...).
    pub base: u8,
    pub encoding: Encoding,
}

impl IntegerType {
    pub const fn new(size_bits: usize, alignment_bits: usize, signed: bool) -> Self {
        Self {
            size_bits,
            alignment_bits,
            signed,
            reverse_byte_order: false,
            base: 10,
            encoding: Encoding::None,
        }
    }

    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Type descriptor a provider publishes once at attach time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Integer(IntegerType),
    Array {
        elem: IntegerType,
        length: usize,
        alignment_bits: usize,
    },
    String {
        encoding: Encoding,
    },
}

impl TypeDescriptor {
    /// Alignment this field requires, in bits.
    pub fn alignment_bits(&self) -> usize {
        match self {
            Self::Integer(i) => i.alignment_bits,
            Self::Array { alignment_bits, .. } => *alignment_bits,
            Self::String { .. } => 8,
        }
    }
}

// =============================================================================
// Snapshot Values
// =============================================================================

/// Fixed-capacity text captured without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextValue {
    buf: [u8; VALUE_TEXT_MAX],
    len: usize,
}

impl TextValue {
    pub const fn empty() -> Self {
        Self { buf: [0; VALUE_TEXT_MAX], len: 0 }
    }

    /// Copy `bytes` up to the first NUL (truncating at capacity).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut v = Self::empty();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let n = end.min(VALUE_TEXT_MAX);
        v.buf[..n].copy_from_slice(&bytes[..n]);
        v.len = n;
        v
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Snapshot value a field reports to the filter evaluator.
///
/// Must be consistent with what `record` would have written at the
/// same instant; coherence across a preemption window is not
/// guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextValue {
    Signed(i64),
    Unsigned(u64),
    Text(TextValue),
}

/// Per-event probe state handed to `get_value`.
#[derive(Debug, Clone, Copy)]
pub struct ProbeCtx {
    pub cpu: u32,
    pub timestamp_ns: u64,
}

impl ProbeCtx {
    /// Snapshot the current execution context.
    pub fn capture() -> Self {
        Self {
            cpu: platform::cpu_id(),
            timestamp_ns: platform::timestamp_ns(),
        }
    }
}

// =============================================================================
// Descriptor Contract
// =============================================================================

/// The three-phase contract every context field implements, plus its
/// name and wire type. Implementations are immutable once attached and
/// must be callable concurrently from any capture context.
pub trait ContextField: Send + Sync {
    /// Stable field name; unique per registry.
    fn name(&self) -> &'static str;

    /// Wire type, queried once at attach time.
    fn type_descriptor(&self) -> TypeDescriptor;

    /// Bytes this field will occupy at `offset`, alignment padding
    /// included. Pure: no I/O, no allocation, idempotent.
    fn get_size(&self, offset: usize) -> usize;

    /// Write exactly the bytes sized in phase one, honoring the same
    /// alignment discipline.
    fn record(&self, slot: &mut SlotCtx, chan: &dyn RingBufferOps);

    /// Allocation-free snapshot of the field's current value.
    fn get_value(&self, probe_ctx: &ProbeCtx) -> ContextValue;
}

// =============================================================================
// Registry
// =============================================================================

type FieldList = Arc<[Arc<dyn ContextField>]>;

struct Retired {
    epoch: u64,
    field: Arc<dyn ContextField>,
}

/// Ordered, name-unique collection of context fields at one attach
/// point. Insertion order defines the serialized field layout.
pub struct ContextRegistry {
    /// Control-path staging list; the capture path never touches it.
    fields: Mutex<Vec<Arc<dyn ContextField>>>,
    /// Published snapshot read by in-flight captures.
    snapshot: RwLock<FieldList>,
    /// Publish epoch, bumped by every update.
    generation: AtomicU64,
    largest_align_bits: AtomicUsize,
    retired: Mutex<Vec<Retired>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            fields: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Vec::new().into()),
            generation: AtomicU64::new(0),
            largest_align_bits: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Attach a field. Fails with `AlreadyExists` and leaves the
    /// registry unchanged when a field of the same name is present.
    pub fn attach(&self, field: Arc<dyn ContextField>) -> Result<()> {
        let mut fields = self.fields.lock();
        if fields.iter().any(|f| f.name() == field.name()) {
            return Err(Error::AlreadyExists(String::from(field.name())));
        }
        fields.push(field);
        self.publish(&fields);
        // New capture code must be visible in every address space
        // before the registry is considered live.
        platform::sync_capture_mappings();
        Ok(())
    }

    /// Detach the field named `name` and retire it for deferred
    /// reclamation.
    pub fn detach(&self, name: &str) -> Result<()> {
        let mut fields = self.fields.lock();
        let pos = fields
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| Error::NotFound(String::from(name)))?;
        let removed = fields.remove(pos);
        self.publish(&fields);
        let epoch = self.generation.load(Ordering::Acquire);
        self.retired.lock().push(Retired { epoch, field: removed });
        Ok(())
    }

    /// Rebuild and publish the snapshot: the registry "update" step.
    fn publish(&self, fields: &[Arc<dyn ContextField>]) {
        let largest = fields
            .iter()
            .map(|f| f.type_descriptor().alignment_bits())
            .max()
            .unwrap_or(0);
        let snap: FieldList = fields.to_vec().into();
        *self.snapshot.write() = snap;
        self.largest_align_bits.store(largest, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Reclaim retired fields no in-flight capture still references.
    /// Returns how many were freed.
    pub fn reap(&self) -> usize {
        let mut retired = self.retired.lock();
        let before = retired.len();
        retired.retain(|r| {
            let busy = Arc::strong_count(&r.field) > 1;
            if !busy {
                log::trace!(
                    "ktrace: reclaiming context field {:?} retired at epoch {}",
                    r.field.name(),
                    r.epoch
                );
            }
            busy
        });
        before - retired.len()
    }

    /// Retired fields still awaiting quiescence.
    pub fn retired_len(&self) -> usize {
        self.retired.lock().len()
    }

    /// Current published snapshot. The caller's clone keeps every
    /// field alive until dropped; that is the read-side guarantee the
    /// reclamation protocol relies on.
    pub fn snapshot(&self) -> FieldList {
        self.snapshot.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Largest field alignment in this registry, in bits.
    pub fn largest_align_bits(&self) -> usize {
        self.largest_align_bits.load(Ordering::Acquire)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.lock().iter().any(|f| f.name() == name)
    }

    pub fn len(&self) -> usize {
        self.fields.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names in layout order.
    pub fn names(&self) -> Vec<&'static str> {
        self.snapshot().iter().map(|f| f.name()).collect()
    }

    /// Total bytes this registry's fields occupy in a record starting
    /// at `offset`.
    ///
    /// Convenience over a fresh snapshot; a capture that also records
    /// must instead take one snapshot and pass it to both
    /// [`fields_size`] and [`record_fields`] so the two phases walk
    /// the same field sequence.
    pub fn event_size(&self, offset: usize) -> usize {
        fields_size(&self.snapshot(), offset)
    }

    /// Record every field in layout order (fresh snapshot; see
    /// [`event_size`](Self::event_size) for the capture-path caveat).
    pub fn record_all(&self, slot: &mut SlotCtx, chan: &dyn RingBufferOps) {
        record_fields(&self.snapshot(), slot, chan);
    }
}

/// Total bytes `fields` occupy in a record starting at `offset`.
pub fn fields_size(fields: &[Arc<dyn ContextField>], offset: usize) -> usize {
    let mut total = 0;
    for field in fields {
        total += field.get_size(offset + total);
    }
    total
}

/// Record `fields` in order. Must be called with the same sequence
/// the size pass used.
pub fn record_fields(fields: &[Arc<dyn ContextField>], slot: &mut SlotCtx, chan: &dyn RingBufferOps) {
    for field in fields {
        field.record(slot, chan);
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ByteField(&'static str);

    impl ContextField for ByteField {
        fn name(&self) -> &'static str {
            self.0
        }

        fn type_descriptor(&self) -> TypeDescriptor {
            TypeDescriptor::Integer(IntegerType::new(8, 8, false))
        }

        fn get_size(&self, _offset: usize) -> usize {
            1
        }

        fn record(&self, slot: &mut SlotCtx, chan: &dyn RingBufferOps) {
            chan.event_write(slot, &[0x42]);
        }

        fn get_value(&self, _probe_ctx: &ProbeCtx) -> ContextValue {
            ContextValue::Unsigned(0x42)
        }
    }

    #[test]
    fn test_duplicate_attach_leaves_registry_unchanged() {
        let reg = ContextRegistry::new();
        reg.attach(Arc::new(ByteField("a"))).unwrap();
        let generation = reg.generation();
        let err = reg.attach(Arc::new(ByteField("a"))).unwrap_err();
        assert_eq!(err, Error::AlreadyExists(String::from("a")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.generation(), generation);
    }

    #[test]
    fn test_detach_then_reattach() {
        let reg = ContextRegistry::new();
        reg.attach(Arc::new(ByteField("a"))).unwrap();
        reg.detach("a").unwrap();
        assert!(!reg.contains("a"));
        reg.attach(Arc::new(ByteField("a"))).unwrap();
        assert!(reg.contains("a"));
    }

    #[test]
    fn test_retired_field_held_by_snapshot() {
        let reg = ContextRegistry::new();
        reg.attach(Arc::new(ByteField("a"))).unwrap();
        let snapshot = reg.snapshot();
        reg.detach("a").unwrap();
        // A capture in flight still holds the old snapshot.
        assert_eq!(reg.reap(), 0);
        assert_eq!(reg.retired_len(), 1);
        drop(snapshot);
        assert_eq!(reg.reap(), 1);
        assert_eq!(reg.retired_len(), 0);
    }
}
