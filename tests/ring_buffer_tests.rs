//! Integration tests for the mock ring-buffer backend.

use ktrace::ring_buffer::{MockRingBuffer, RingBufferOps, SlotCtx};

// =============================================================================
// Discard Mode
// =============================================================================

#[test]
fn test_discard_mode_counts_monotonically() {
    // 4 KiB sub-buffers, 4 sub-buffers, discard on full.
    let rb = MockRingBuffer::new(4096, 4, false);
    let record_len = 512;
    let capacity_records = 4096 * 4 / record_len;

    for _ in 0..capacity_records {
        let slot = rb.reserve(record_len).unwrap();
        rb.commit(slot);
    }
    assert_eq!(rb.events_discarded(), 0);
    assert_eq!(rb.committed_records(), capacity_records);

    // Every further reserve fails and bumps the counter, never
    // decreasing and never overwriting committed data.
    for expect in 1..=5u64 {
        assert!(rb.reserve(record_len).is_none());
        assert_eq!(rb.events_discarded(), expect);
    }
    assert_eq!(rb.committed_records(), capacity_records);
}

#[test]
fn test_record_never_spans_subbuffers() {
    let rb = MockRingBuffer::new(4096, 4, false);
    // Larger than one sub-buffer: dropped even though total capacity
    // would hold it.
    assert!(rb.reserve(4097).is_none());
    assert_eq!(rb.events_discarded(), 1);
    assert!(rb.reserve(4096).is_some());
}

// =============================================================================
// Overwrite Mode
// =============================================================================

#[test]
fn test_overwrite_mode_evicts_oldest() {
    let rb = MockRingBuffer::new(1024, 2, true);
    for i in 0u8..2 {
        let mut slot = rb.reserve(1024).unwrap();
        rb.event_memset(&mut slot, i, 1024);
        rb.commit(slot);
    }
    // Third record evicts the first; nothing counted as discarded.
    let slot = rb.reserve(1024).unwrap();
    rb.commit(slot);
    assert_eq!(rb.committed_records(), 2);
    assert_eq!(rb.events_discarded(), 0);
}

#[test]
fn test_overwrite_mode_never_counts_discards() {
    let rb = MockRingBuffer::new(1024, 2, true);
    // Even a record too large for any sub-buffer is dropped silently.
    assert!(rb.reserve(1025).is_none());
    assert_eq!(rb.events_discarded(), 0);
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_stream_ids_are_distinct_and_stable() {
    let a = MockRingBuffer::new(4096, 2, false);
    let b = MockRingBuffer::new(4096, 2, false);
    assert_ne!(a.stream_id(), b.stream_id());
    assert_eq!(a.stream_id(), a.stream_id());
    assert_eq!(a.stream_instance_id(), a.stream_id());
}

#[test]
fn test_content_size_tracks_commits() {
    let rb = MockRingBuffer::new(4096, 4, false);
    assert_eq!(rb.content_size(), 0);
    let slot = rb.reserve(100).unwrap();
    rb.commit(slot);
    assert_eq!(rb.content_size(), 100);
    assert_eq!(rb.packet_size(), 4096);
}

#[test]
fn test_slot_write_primitives() {
    let rb = MockRingBuffer::new(4096, 4, false);
    let mut slot = SlotCtx::new(16);
    rb.event_write(&mut slot, &[1, 2, 3]);
    slot.align_to(8);
    rb.event_memset(&mut slot, 0xEE, 8);
    assert_eq!(slot.written(), 16);
    assert_eq!(&slot.bytes()[..3], &[1, 2, 3]);
    assert_eq!(&slot.bytes()[3..8], &[0; 5]);
    assert_eq!(&slot.bytes()[8..], &[0xEE; 8]);
}
