//! Integration tests for the context registry.
//!
//! Covers attach/detach semantics, snapshot isolation for in-flight
//! captures, layout sizing, and deferred reclamation.

use std::sync::Arc;

use ktrace::context::{
    ContextField, ContextRegistry, ContextValue, Encoding, IntegerType, ProbeCtx, TypeDescriptor,
};
use ktrace::error::Error;
use ktrace::ring_buffer::{MockRingBuffer, RingBufferOps, SlotCtx, align};

/// Fixed-width unsigned field recording a constant.
struct U64Field {
    name: &'static str,
    value: u64,
}

impl ContextField for U64Field {
    fn name(&self) -> &'static str {
        self.name
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Integer(IntegerType::new(64, 64, false))
    }

    fn get_size(&self, offset: usize) -> usize {
        align(offset, 8) - offset + 8
    }

    fn record(&self, slot: &mut SlotCtx, chan: &dyn RingBufferOps) {
        slot.align_to(8);
        chan.event_write(slot, &self.value.to_ne_bytes());
    }

    fn get_value(&self, _probe_ctx: &ProbeCtx) -> ContextValue {
        ContextValue::Unsigned(self.value)
    }
}

/// Single unaligned byte, to force padding in front of later fields.
struct ByteField(&'static str);

impl ContextField for ByteField {
    fn name(&self) -> &'static str {
        self.0
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Integer(IntegerType::new(8, 8, false).with_encoding(Encoding::None))
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

// =============================================================================
// Attach / Detach
// =============================================================================

#[test]
fn test_attach_detach() {
    let registry = ContextRegistry::new();
    registry.attach(Arc::new(ByteField("one"))).unwrap();
    registry.attach(Arc::new(ByteField("two"))).unwrap();
    assert_eq!(registry.names(), vec!["one", "two"]);

    registry.detach("one").unwrap();
    assert_eq!(registry.names(), vec!["two"]);
    assert!(matches!(registry.detach("one"), Err(Error::NotFound(_))));
}

#[test]
fn test_duplicate_attach_leaves_registry_unchanged() {
    let registry = ContextRegistry::new();
    registry.attach(Arc::new(U64Field { name: "dup", value: 1 })).unwrap();
    let generation = registry.generation();

    let result = registry.attach(Arc::new(U64Field { name: "dup", value: 2 }));
    assert!(matches!(result, Err(Error::AlreadyExists(_))));
    // Failed attach publishes nothing.
    assert_eq!(registry.generation(), generation);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_detach_then_reattach_same_name() {
    let registry = ContextRegistry::new();
    registry.attach(Arc::new(ByteField("flag"))).unwrap();
    registry.detach("flag").unwrap();
    registry.attach(Arc::new(ByteField("flag"))).unwrap();
    assert!(registry.contains("flag"));
}

// =============================================================================
// Layout
// =============================================================================

#[test]
fn test_event_size_accounts_for_alignment() {
    let registry = ContextRegistry::new();
    registry.attach(Arc::new(ByteField("pad_source"))).unwrap();
    registry.attach(Arc::new(U64Field { name: "wide", value: 7 })).unwrap();

    // At offset 0: 1 byte, then 7 bytes padding, then 8 bytes.
    assert_eq!(registry.event_size(0), 16);
    // At offset 7: 1 byte lands at 7, next field is already aligned.
    assert_eq!(registry.event_size(7), 9);
}

#[test]
fn test_record_writes_exactly_sized_bytes() {
    let registry = ContextRegistry::new();
    registry.attach(Arc::new(ByteField("pad_source"))).unwrap();
    registry.attach(Arc::new(U64Field { name: "wide", value: 0x0102_0304 })).unwrap();

    let chan = MockRingBuffer::new(4096, 4, false);
    for offset in [0usize, 1, 3, 7, 8] {
        let planned = registry.event_size(offset);
        let mut slot = SlotCtx::new(offset + planned);
        slot.align_to(1);
        // Pre-fill up to the starting offset.
        for _ in 0..offset {
            chan.event_write(&mut slot, &[0]);
        }
        registry.record_all(&mut slot, &chan);
        assert_eq!(slot.written(), offset + planned, "offset {offset}");
    }
}

#[test]
fn test_largest_align_tracks_membership() {
    let registry = ContextRegistry::new();
    assert_eq!(registry.largest_align_bits(), 0);
    registry.attach(Arc::new(ByteField("small"))).unwrap();
    assert_eq!(registry.largest_align_bits(), 8);
    registry.attach(Arc::new(U64Field { name: "wide", value: 0 })).unwrap();
    assert_eq!(registry.largest_align_bits(), 64);
    registry.detach("wide").unwrap();
    assert_eq!(registry.largest_align_bits(), 8);
}

// =============================================================================
// Snapshot Isolation and Reclamation
// =============================================================================

#[test]
fn test_inflight_snapshot_survives_detach() {
    let registry = ContextRegistry::new();
    registry.attach(Arc::new(U64Field { name: "transient", value: 11 })).unwrap();

    // An in-flight capture takes the snapshot before the detach lands.
    let snapshot = registry.snapshot();
    registry.detach("transient").unwrap();

    // The capture still sees (and can use) the detached field.
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].name(), "transient");
    let probe = ProbeCtx { cpu: 0, timestamp_ns: 0 };
    assert_eq!(snapshot[0].get_value(&probe), ContextValue::Unsigned(11));

    // The field cannot be reclaimed while the snapshot holds it.
    assert_eq!(registry.reap(), 0);
    assert_eq!(registry.retired_len(), 1);

    drop(snapshot);
    assert_eq!(registry.reap(), 1);
    assert_eq!(registry.retired_len(), 0);
}

#[test]
fn test_generation_bumps_on_every_publish() {
    let registry = ContextRegistry::new();
    let g0 = registry.generation();
    registry.attach(Arc::new(ByteField("a"))).unwrap();
    let g1 = registry.generation();
    assert!(g1 > g0);
    registry.detach("a").unwrap();
    assert!(registry.generation() > g1);
}
