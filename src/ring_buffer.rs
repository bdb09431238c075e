//! Ring-buffer collaborator interface.
//!
//! The lock-free ring buffer engine itself lives outside this crate;
//! context capture only needs the write primitives and the per-sub-buffer
//! introspection queries defined here. `MockRingBuffer` is the in-crate
//! backend used for user-space testing, the same way the platform
//! module ships a mock kernel.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::abi::ChannelAttr;
use crate::platform;

/// Align `offset` up to `alignment` (a power of two; 0 and 1 mean none).
pub const fn align(offset: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return offset;
    }
    (offset + alignment - 1) & !(alignment - 1)
}

/// One reserved record in a ring-buffer sub-buffer.
///
/// Carries the destination bytes and the current write position; every
/// context field advances the position by exactly the number of bytes
/// it sized, alignment padding included.
pub struct SlotCtx {
    buf: Vec<u8>,
    pos: usize,
}

impl SlotCtx {
    /// Reserve a zero-filled slot of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { buf: vec![0; len], pos: 0 }
    }

    /// Bytes written so far, alignment padding included.
    pub fn written(&self) -> usize {
        self.pos
    }

    /// Total reserved length.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The slot content (valid up to `written()`).
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Advance the write position to the next `alignment` boundary.
    /// The skipped padding stays zero.
    pub fn align_to(&mut self, alignment: usize) {
        let new_pos = align(self.pos, alignment);
        assert!(new_pos <= self.buf.len(), "alignment past end of reserved slot");
        self.pos = new_pos;
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        assert!(
            self.pos + bytes.len() <= self.buf.len(),
            "write past end of reserved slot"
        );
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub(crate) fn memset(&mut self, value: u8, len: usize) {
        assert!(self.pos + len <= self.buf.len(), "memset past end of reserved slot");
        for b in &mut self.buf[self.pos..self.pos + len] {
            *b = value;
        }
        self.pos += len;
    }
}

/// Write primitives and introspection the capture path needs from the
/// ring buffer engine.
///
/// `reserve` returning `None` means the record was not written: in
/// discard mode the engine counts it in `events_discarded`.
pub trait RingBufferOps: Send + Sync {
    /// Reserve space for one record. `None` if the record was dropped.
    fn reserve(&self, len: usize) -> Option<SlotCtx>;

    /// Commit a fully written record.
    fn commit(&self, slot: SlotCtx);

    /// Write `bytes` at the slot's current position.
    fn event_write(&self, slot: &mut SlotCtx, bytes: &[u8]) {
        slot.write(bytes);
    }

    /// Write `len` copies of `value` at the slot's current position
    /// (fallback for absent values).
    fn event_memset(&self, slot: &mut SlotCtx, value: u8, len: usize) {
        slot.memset(value, len);
    }

    // Read-only per-sub-buffer queries exposed to the control plane.

    /// Timestamp of the first record in the current sub-buffer.
    fn timestamp_begin(&self) -> u64;
    /// Timestamp of the last record in the current sub-buffer.
    fn timestamp_end(&self) -> u64;
    /// Monotonic count of records dropped in discard mode.
    fn events_discarded(&self) -> u64;
    /// Payload bytes in the current packet.
    fn content_size(&self) -> u64;
    /// Packet size including padding.
    fn packet_size(&self) -> u64;
    /// Stream id, invariant for the stream.
    fn stream_id(&self) -> u64;
    /// Current tracer timestamp.
    fn current_timestamp(&self) -> u64;
    /// Packet sequence number of the current sub-buffer.
    fn packet_seq_num(&self) -> u64;
    /// Stream instance id, invariant for the stream.
    fn stream_instance_id(&self) -> u64;
}

// =============================================================================
// Mock Ring Buffer
// =============================================================================

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

struct MockState {
    records: VecDeque<Vec<u8>>,
    used: usize,
    ts_begin: u64,
    ts_end: u64,
}

/// In-memory ring buffer with the capacity accounting of the real
/// engine: capacity = sub-buffer size x sub-buffer count, one record
/// never spans sub-buffers, and on a full buffer either the newest
/// record is discarded (and counted) or the oldest records are
/// overwritten, per channel policy.
pub struct MockRingBuffer {
    subbuf_size: usize,
    num_subbuf: usize,
    overwrite: bool,
    stream_id: u64,
    instance_id: u64,
    state: Mutex<MockState>,
    discarded: AtomicU64,
}

impl MockRingBuffer {
    pub fn new(subbuf_size: usize, num_subbuf: usize, overwrite: bool) -> Self {
        let stream_id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            subbuf_size,
            num_subbuf,
            overwrite,
            stream_id,
            instance_id: stream_id,
            state: Mutex::new(MockState {
                records: VecDeque::new(),
                used: 0,
                ts_begin: 0,
                ts_end: 0,
            }),
            discarded: AtomicU64::new(0),
        }
    }

    /// Build a backend from channel creation attributes.
    pub fn from_attr(attr: &ChannelAttr) -> Self {
        Self::new(attr.subbuf_size as usize, attr.num_subbuf as usize, attr.overwrite)
    }

    fn capacity(&self) -> usize {
        self.subbuf_size * self.num_subbuf
    }

    /// Number of committed records currently buffered.
    pub fn committed_records(&self) -> usize {
        self.state.lock().records.len()
    }
}

impl RingBufferOps for MockRingBuffer {
    fn reserve(&self, len: usize) -> Option<SlotCtx> {
        // A record can never span sub-buffers. Only discard-mode
        // channels count the drop; overwrite channels report zero
        // discards always.
        if len > self.subbuf_size {
            if !self.overwrite {
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }
        let mut state = self.state.lock();
        if state.used + len > self.capacity() {
            if !self.overwrite {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            while state.used + len > self.capacity() {
                match state.records.pop_front() {
                    Some(old) => state.used -= old.len(),
                    None => break,
                }
            }
        }
        state.used += len;
        Some(SlotCtx::new(len))
    }

    fn commit(&self, slot: SlotCtx) {
        let now = platform::timestamp_ns();
        let mut state = self.state.lock();
        if state.records.is_empty() {
            state.ts_begin = now;
        }
        state.ts_end = now;
        state.records.push_back(slot.buf);
    }

    fn timestamp_begin(&self) -> u64 {
        self.state.lock().ts_begin
    }

    fn timestamp_end(&self) -> u64 {
        self.state.lock().ts_end
    }

    fn events_discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn content_size(&self) -> u64 {
        self.state.lock().used as u64
    }

    fn packet_size(&self) -> u64 {
        align(self.state.lock().used, self.subbuf_size) as u64
    }

    fn stream_id(&self) -> u64 {
        self.stream_id
    }

    fn current_timestamp(&self) -> u64 {
        platform::timestamp_ns()
    }

    fn packet_seq_num(&self) -> u64 {
        (self.state.lock().used / self.subbuf_size) as u64
    }

    fn stream_instance_id(&self) -> u64 {
        self.instance_id
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(0, 8), 0);
        assert_eq!(align(1, 8), 8);
        assert_eq!(align(8, 8), 8);
        assert_eq!(align(9, 4), 12);
        assert_eq!(align(13, 1), 13);
        assert_eq!(align(13, 0), 13);
    }

    #[test]
    fn test_slot_write_and_align() {
        let mut slot = SlotCtx::new(16);
        slot.write(&[0xAA]);
        slot.align_to(4);
        assert_eq!(slot.written(), 4);
        slot.write(&[1, 2, 3, 4]);
        assert_eq!(slot.written(), 8);
        assert_eq!(slot.bytes()[..8], [0xAA, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_discard_mode_counts() {
        let rb = MockRingBuffer::new(64, 1, false);
        let slot = rb.reserve(64).unwrap();
        rb.commit(slot);
        assert!(rb.reserve(1).is_none());
        assert_eq!(rb.events_discarded(), 1);
    }

    #[test]
    fn test_overwrite_mode_drops_oldest() {
        let rb = MockRingBuffer::new(64, 2, true);
        for _ in 0..2 {
            let mut slot = rb.reserve(64).unwrap();
            slot.memset(0xFF, 64);
            rb.commit(slot);
        }
        assert_eq!(rb.committed_records(), 2);
        let slot = rb.reserve(64).unwrap();
        rb.commit(slot);
        assert_eq!(rb.events_discarded(), 0);
        assert_eq!(rb.committed_records(), 2);
    }
}
