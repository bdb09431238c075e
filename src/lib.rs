//! Kernel Event Tracer Control Core
//!
//! This crate provides the control-plane of a kernel-resident event
//! tracer: a versioned binary control protocol for sessions, channels,
//! events, id trackers and filters, plus the context-field machinery
//! that appends ambient kernel state (hostname, priority, parent pid)
//! to every captured record.
//!
//! # Quick Start
//!
//! ```ignore
//! use ktrace::{Controller, Reply, TRACER_HANDLE};
//! use ktrace::abi::{self, cmd, TracerAbiVersion};
//!
//! let mut ctl = Controller::new();
//! ctl.negotiate(&TracerAbiVersion::current()).unwrap();
//!
//! // Create a session and a channel inside it.
//! let Reply::Handle(session) = ctl.command(TRACER_HANDLE, cmd::SESSION, &[]).unwrap()
//!     else { unreachable!() };
//! let attr = abi::ChannelAttr {
//!     subbuf_size: 4096,
//!     num_subbuf: 4,
//!     switch_timer_interval: 0,
//!     read_timer_interval: 0,
//!     output: abi::OutputMode::Mmap,
//!     overwrite: false,
//! };
//! let Reply::Handle(_chan) = ctl.command(session, cmd::CHANNEL, &attr.encode()).unwrap()
//!     else { unreachable!() };
//! ctl.command(session, cmd::SESSION_START, &[]).unwrap();
//! ```

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

// =============================================================================
// Platform Abstraction (for testing support)
// =============================================================================

pub mod platform;

// =============================================================================
// Wire Format
// =============================================================================

pub mod abi;

// =============================================================================
// Capture Infrastructure
// =============================================================================

pub mod context;

pub mod contexts;

pub mod ring_buffer;

pub mod symbols;

// =============================================================================
// Control Plane
// =============================================================================

pub mod control;

pub mod error;

pub mod session;

// Re-export key types for convenience
pub use control::{BackendFactory, Controller, HandleId, Reply, TRACER_HANDLE};

pub use error::{Error, Result};

pub use session::{CaptureOutcome, Channel, Event, IdTracker, Session, SessionState};

pub use context::{ContextField, ContextRegistry, ContextValue, ProbeCtx, TypeDescriptor};

pub use ring_buffer::{MockRingBuffer, RingBufferOps, SlotCtx};
