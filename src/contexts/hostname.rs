//! Hostname context provider.
//!
//! Records the current task's UTS-namespace hostname as a fixed-width
//! byte array. When the task has no namespace context the field is
//! zero-filled rather than failing the capture.

use alloc::sync::Arc;

use crate::context::{
    ContextField, ContextRegistry, ContextValue, Encoding, IntegerType, ProbeCtx, TextValue,
    TypeDescriptor,
};
use crate::error::Result;
use crate::platform;
use crate::ring_buffer::{RingBufferOps, SlotCtx};

/// Recorded field width: maximum hostname length plus NUL.
pub const HOSTNAME_CTX_LEN: usize = platform::HOSTNAME_LEN;

struct HostnameContext;

impl ContextField for HostnameContext {
    fn name(&self) -> &'static str {
        "hostname"
    }

    fn type_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Array {
            elem: IntegerType::new(8, 8, false).with_encoding(Encoding::Utf8),
            length: HOSTNAME_CTX_LEN,
            alignment_bits: 8,
        }
    }

    fn get_size(&self, _offset: usize) -> usize {
        // Byte array, no alignment padding.
        HOSTNAME_CTX_LEN
    }

    fn record(&self, slot: &mut SlotCtx, chan: &dyn RingBufferOps) {
        let mut buf = [0u8; HOSTNAME_CTX_LEN];
        if platform::current_hostname(&mut buf) {
            chan.event_write(slot, &buf);
        } else {
            chan.event_memset(slot, 0, HOSTNAME_CTX_LEN);
        }
    }

    fn get_value(&self, _probe_ctx: &ProbeCtx) -> ContextValue {
        let mut buf = [0u8; HOSTNAME_CTX_LEN];
        if platform::current_hostname(&mut buf) {
            ContextValue::Text(TextValue::from_bytes(&buf))
        } else {
            ContextValue::Text(TextValue::empty())
        }
    }
}

/// Attach the "hostname" field to `registry`.
pub fn attach_hostname(registry: &ContextRegistry) -> Result<()> {
    registry.attach(Arc::new(HostnameContext))
}
