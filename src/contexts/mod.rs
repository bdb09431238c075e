//! Built-in context providers.
//!
//! One module per captured fact; each exposes a single `attach_*`
//! entry point that constructs and registers its descriptor. A failed
//! attach never leaves partial registration behind.

pub mod hostname;
pub mod ppid;
pub mod prio;

pub use hostname::attach_hostname;
pub use ppid::attach_ppid;
pub use prio::{attach_prio, reset_task_prio_cache};

use crate::abi::{ContextAttr, ContextType};
use crate::context::ContextRegistry;
use crate::error::{Error, Result};

/// Attach the provider selected by a control-protocol context request.
///
/// Context types without an in-tree provider report `NotImplemented`;
/// the caller treats that as a capability probe, not a failure of the
/// session.
pub fn attach_by_type(registry: &ContextRegistry, attr: &ContextAttr) -> Result<()> {
    match attr.context_type {
        ContextType::Hostname => attach_hostname(registry),
        ContextType::Prio => attach_prio(registry),
        ContextType::Ppid => attach_ppid(registry),
        _ => Err(Error::NotImplemented("context type")),
    }
}
