//! Scheduling-priority context provider.
//!
//! `task_prio` is not part of the stable kernel export surface, so the
//! accessor is resolved by name on first attach; an absent symbol
//! fails this provider's registration only.

use alloc::sync::Arc;
use core::mem::{align_of, size_of};

use crate::context::{
    ContextField, ContextRegistry, ContextValue, IntegerType, ProbeCtx, TypeDescriptor,
};
use crate::error::Result;
use crate::platform;
use crate::ring_buffer::{RingBufferOps, SlotCtx, align};
use crate::symbols::ResolvedSym;

static TASK_PRIO_SYM: ResolvedSym = ResolvedSym::new("task_prio");

/// Expected signature of the resolved priority accessor.
type TaskPrioFn = fn() -> i32;

// Canary: signature drift in the platform accessor fails this binding
// at compile time.
#[allow(dead_code)]
const TASK_PRIO_CANARY: TaskPrioFn = platform::current_prio;

struct PrioContext;

impl ContextField for PrioContext {
    fn name(&self) -> &'static str {
        "prio"
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
        let prio = platform::current_prio();
        slot.align_to(align_of::<i32>());
        chan.event_write(slot, &prio.to_ne_bytes());
    }

    fn get_value(&self, _probe_ctx: &ProbeCtx) -> ContextValue {
        ContextValue::Signed(platform::current_prio() as i64)
    }
}

/// Attach the "prio" field to `registry`.
///
/// Fails with `DependencyUnavailable` when `task_prio` cannot be
/// resolved; nothing is registered in that case.
pub fn attach_prio(registry: &ContextRegistry) -> Result<()> {
    TASK_PRIO_SYM.resolve()?;
    registry.attach(Arc::new(PrioContext))
}

/// Drop the cached accessor address (test hook for resolution paths).
pub fn reset_task_prio_cache() {
    TASK_PRIO_SYM.reset();
}
