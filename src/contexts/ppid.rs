//! Parent-PID context provider.
//!
//! Reads the current task's parent pid as a best-effort snapshot: the
//! accessor never blocks and tolerates the parent exiting or the task
//! being reparented concurrently. No consistency across the read is
//! guaranteed.

use alloc::sync::Arc;
use core::mem::{align_of, size_of};

use crate::context::{
    ContextField, ContextRegistry, ContextValue, IntegerType, ProbeCtx, TypeDescriptor,
};
use crate::error::Result;
use crate::platform;
use crate::ring_buffer::{RingBufferOps, SlotCtx, align};

struct PpidContext;

impl ContextField for PpidContext {
    fn name(&self) -> &'static str {
        "ppid"
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Integer(IntegerType::new(
            size_of::<i32>() * 8,
            align_of::<i32>() * 8,
            true,
        ))
    }

    fn get_size(&self, offset: usize) -> usize {
        align(offset, align_of::<i32>()) - offset + size_of::<i32>()
    }

    fn record(&self, slot: &mut SlotCtx, chan: &dyn RingBufferOps) {
        let ppid = platform::current_ppid();
        slot.align_to(align_of::<i32>());
        chan.event_write(slot, &ppid.to_ne_bytes());
    }

    fn get_value(&self, _probe_ctx: &ProbeCtx) -> ContextValue {
        ContextValue::Signed(platform::current_ppid() as i64)
    }
}

/// Attach the "ppid" field to `registry`.
pub fn attach_ppid(registry: &ContextRegistry) -> Result<()> {
    registry.attach(Arc::new(PpidContext))
}
