//! Binary control protocol definitions.
//!
//! Fixed-layout, versioned request structures and the numbered command
//! namespace the control plane speaks. Every struct reserves explicit
//! padding sized for future fields, so a minor ABI bump can add fields
//! without changing any struct's encoded size. Encoding is an explicit
//! little-endian schema per struct (the in-memory types stay idiomatic
//! Rust); decoders skip padding bytes and never interpret them.
//!
//! Command numbers live in a private `(class, nr)` namespace with an
//! ioctl-style direction/size encoding. The numeric ranges are
//! partitioned by function and are a published contract: retired
//! numbers (0x40-0x44, 0x50-0x53, 0x5A-0x5B, 0x60-0x61, 0x70,
//! 0x80-0x81) are never reused.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};

// =============================================================================
// Versions
// =============================================================================

/// Tracer release version.
pub const TRACER_MAJOR_VERSION: u32 = 2;
pub const TRACER_MINOR_VERSION: u32 = 12;
pub const TRACER_PATCHLEVEL_VERSION: u32 = 0;

/// ABI compatibility version, independent of the release version.
/// Major is bumped on incompatible changes; minor bumps are additive
/// only (new commands or padding-consuming fields).
pub const ABI_MAJOR_VERSION: u32 = 2;
pub const ABI_MINOR_VERSION: u32 = 5;

// =============================================================================
// Size Constants
// =============================================================================

pub const SYM_NAME_LEN: usize = 256;
pub const SESSION_NAME_LEN: usize = 256;
pub const SESSION_CREATION_TIME_ISO8601_LEN: usize = 26;

pub const CHANNEL_PADDING: usize = SYM_NAME_LEN + 32;
pub const EVENT_PADDING1: usize = 8;
pub const EVENT_PADDING2: usize = SYM_NAME_LEN + 32;
pub const EVENT_NOTIFIER_PADDING1: usize = 16;
pub const CONTEXT_PADDING1: usize = 16;
pub const CONTEXT_PADDING2: usize = SYM_NAME_LEN + 32;

/// Hard cap on compiled filter bytecode accepted over the protocol.
pub const FILTER_BYTECODE_MAX_LEN: usize = 65536;

// =============================================================================
// Wire Enums
// =============================================================================

/// Instrumentation kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Instrumentation {
    Tracepoint = 0,
    Kprobe = 1,
    FunctionTracer = 2,
    Kretprobe = 3,
    /// Not hooked.
    Noop = 4,
    Syscall = 5,
    Uprobe = 6,
}

impl TryFrom<u32> for Instrumentation {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => Self::Tracepoint,
            1 => Self::Kprobe,
            2 => Self::FunctionTracer,
            3 => Self::Kretprobe,
            4 => Self::Noop,
            5 => Self::Syscall,
            6 => Self::Uprobe,
            _ => return Err(Error::InvalidArgument("unknown instrumentation kind")),
        })
    }
}

/// Consumer delivery mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OutputMode {
    Splice = 0,
    Mmap = 1,
}

impl TryFrom<u32> for OutputMode {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => Self::Splice,
            1 => Self::Mmap,
            _ => return Err(Error::InvalidArgument("unknown output mode")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyscallEntryExit {
    EntryExit = 0,
    Entry = 1,
    Exit = 2,
}

impl TryFrom<u8> for SyscallEntryExit {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::EntryExit,
            1 => Self::Entry,
            2 => Self::Exit,
            _ => return Err(Error::InvalidArgument("unknown syscall entry/exit")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyscallAbi {
    All = 0,
    /// Reserved, not implemented.
    Native = 1,
    /// Reserved, not implemented.
    Compat = 2,
}

impl TryFrom<u8> for SyscallAbi {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::All,
            1 => Self::Native,
            2 => Self::Compat,
            _ => return Err(Error::InvalidArgument("unknown syscall abi")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyscallMatch {
    Name = 0,
    /// Reserved, not implemented.
    Number = 1,
}

impl TryFrom<u8> for SyscallMatch {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Name,
            1 => Self::Number,
            _ => return Err(Error::InvalidArgument("unknown syscall match mode")),
        })
    }
}

/// Context field type tags carried by [`ContextAttr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ContextType {
    Pid = 0,
    PerfCounter = 1,
    Procname = 2,
    Prio = 3,
    Nice = 4,
    Vpid = 5,
    Tid = 6,
    Vtid = 7,
    Ppid = 8,
    Vppid = 9,
    Hostname = 10,
    CpuId = 11,
    Interruptible = 12,
    Preemptible = 13,
    NeedReschedule = 14,
    Migratable = 15,
    CallstackKernel = 16,
    CallstackUser = 17,
    CgroupNs = 18,
    IpcNs = 19,
    MntNs = 20,
    NetNs = 21,
    PidNs = 22,
    UserNs = 23,
    UtsNs = 24,
    Uid = 25,
    Euid = 26,
    Suid = 27,
    Gid = 28,
    Egid = 29,
    Sgid = 30,
    Vuid = 31,
    Veuid = 32,
    Vsuid = 33,
    Vgid = 34,
    Vegid = 35,
    Vsgid = 36,
    TimeNs = 37,
}

impl TryFrom<u32> for ContextType {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        Ok(match v {
            0 => Self::Pid,
            1 => Self::PerfCounter,
            2 => Self::Procname,
            3 => Self::Prio,
            4 => Self::Nice,
            5 => Self::Vpid,
            6 => Self::Tid,
            7 => Self::Vtid,
            8 => Self::Ppid,
            9 => Self::Vppid,
            10 => Self::Hostname,
            11 => Self::CpuId,
            12 => Self::Interruptible,
            13 => Self::Preemptible,
            14 => Self::NeedReschedule,
            15 => Self::Migratable,
            16 => Self::CallstackKernel,
            17 => Self::CallstackUser,
            18 => Self::CgroupNs,
            19 => Self::IpcNs,
            20 => Self::MntNs,
            21 => Self::NetNs,
            22 => Self::PidNs,
            23 => Self::UserNs,
            24 => Self::UtsNs,
            25 => Self::Uid,
            26 => Self::Euid,
            27 => Self::Suid,
            28 => Self::Gid,
            29 => Self::Egid,
            30 => Self::Sgid,
            31 => Self::Vuid,
            32 => Self::Veuid,
            33 => Self::Vsuid,
            34 => Self::Vgid,
            35 => Self::Vegid,
            36 => Self::Vsgid,
            37 => Self::TimeNs,
            _ => return Err(Error::InvalidArgument("unknown context type")),
        })
    }
}

/// Tracker id namespaces a session can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TrackerType {
    Unknown = -1,
    Pid = 0,
    Vpid = 1,
    Uid = 2,
    Vuid = 3,
    Gid = 4,
    Vgid = 5,
}

impl TryFrom<i32> for TrackerType {
    type Error = Error;

    fn try_from(v: i32) -> Result<Self> {
        Ok(match v {
            -1 => Self::Unknown,
            0 => Self::Pid,
            1 => Self::Vpid,
            2 => Self::Uid,
            3 => Self::Vuid,
            4 => Self::Gid,
            5 => Self::Vgid,
            _ => return Err(Error::InvalidArgument("unknown tracker type")),
        })
    }
}

// =============================================================================
// Wire Codec Helpers
// =============================================================================

struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    fn with_capacity(len: usize) -> Self {
        Self { buf: Vec::with_capacity(len) }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn pad(&mut self, len: usize) {
        self.buf.resize(self.buf.len() + len, 0);
    }

    /// Write a NUL-terminated string into a fixed-width field.
    fn put_fixed_str(&mut self, s: &str, width: usize) -> Result<()> {
        if s.len() >= width {
            return Err(Error::InvalidArgument("string too long for fixed field"));
        }
        self.buf.extend_from_slice(s.as_bytes());
        self.pad(width - s.len());
        Ok(())
    }

    fn finish(self, expected: usize) -> Vec<u8> {
        debug_assert_eq!(self.buf.len(), expected);
        self.buf
    }
}

struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(Error::InvalidArgument("truncated payload"));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn get_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    /// Padding is reserved space: skip it, never interpret it.
    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Read a fixed-width, NUL-terminated string field.
    fn get_fixed_str(&mut self, width: usize) -> Result<String> {
        let field = self.take(width)?;
        let end = field
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::InvalidArgument("string field not NUL-terminated"))?;
        let s = core::str::from_utf8(&field[..end])
            .map_err(|_| Error::InvalidArgument("string field not valid UTF-8"))?;
        Ok(String::from(s))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

// =============================================================================
// Version Structs
// =============================================================================

/// Tracer release version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerVersion {
    pub major: u32,
    pub minor: u32,
    pub patchlevel: u32,
}

impl TracerVersion {
    pub const ENCODED_LEN: usize = 12;

    /// The version of this tracer.
    pub const fn current() -> Self {
        Self {
            major: TRACER_MAJOR_VERSION,
            minor: TRACER_MINOR_VERSION,
            patchlevel: TRACER_PATCHLEVEL_VERSION,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_u32(self.major);
        w.put_u32(self.minor);
        w.put_u32(self.patchlevel);
        w.finish(Self::ENCODED_LEN)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        Ok(Self {
            major: r.get_u32()?,
            minor: r.get_u32()?,
            patchlevel: r.get_u32()?,
        })
    }
}

/// ABI compatibility version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerAbiVersion {
    pub major: u32,
    pub minor: u32,
}

impl TracerAbiVersion {
    pub const ENCODED_LEN: usize = 8;

    /// The ABI version this tracer speaks.
    pub const fn current() -> Self {
        Self { major: ABI_MAJOR_VERSION, minor: ABI_MINOR_VERSION }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_u32(self.major);
        w.put_u32(self.minor);
        w.finish(Self::ENCODED_LEN)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        Ok(Self { major: r.get_u32()?, minor: r.get_u32()? })
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Channel creation attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAttr {
    /// Sub-buffer size in bytes.
    pub subbuf_size: u64,
    /// Number of sub-buffers.
    pub num_subbuf: u64,
    /// Switch timer interval in microseconds.
    pub switch_timer_interval: u32,
    /// Read timer interval in microseconds.
    pub read_timer_interval: u32,
    pub output: OutputMode,
    /// `true`: overwrite oldest on full buffer; `false`: discard new.
    pub overwrite: bool,
}

impl ChannelAttr {
    pub const ENCODED_LEN: usize = 8 + 8 + 4 + 4 + 4 + 4 + CHANNEL_PADDING;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_u64(self.subbuf_size);
        w.put_u64(self.num_subbuf);
        w.put_u32(self.switch_timer_interval);
        w.put_u32(self.read_timer_interval);
        w.put_u32(self.output as u32);
        w.put_i32(self.overwrite as i32);
        w.pad(CHANNEL_PADDING);
        w.finish(Self::ENCODED_LEN)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let subbuf_size = r.get_u64()?;
        let num_subbuf = r.get_u64()?;
        let switch_timer_interval = r.get_u32()?;
        let read_timer_interval = r.get_u32()?;
        let output = OutputMode::try_from(r.get_u32()?)?;
        let overwrite = r.get_i32()? != 0;
        r.skip(CHANNEL_PADDING)?;
        Ok(Self {
            subbuf_size,
            num_subbuf,
            switch_timer_interval,
            read_timer_interval,
            output,
            overwrite,
        })
    }
}

// =============================================================================
// Event
// =============================================================================

/// Probe location: either `addr`, or `symbol_name` + `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeLocation {
    pub addr: u64,
    pub offset: u64,
    pub symbol_name: String,
}

impl ProbeLocation {
    pub const ENCODED_LEN: usize = 8 + 8 + SYM_NAME_LEN;

    fn write(&self, w: &mut WireWriter) -> Result<()> {
        w.put_u64(self.addr);
        w.put_u64(self.offset);
        w.put_fixed_str(&self.symbol_name, SYM_NAME_LEN)
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            addr: r.get_u64()?,
            offset: r.get_u64()?,
            symbol_name: r.get_fixed_str(SYM_NAME_LEN)?,
        })
    }
}

/// Syscall instrumentation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallAttr {
    pub entryexit: SyscallEntryExit,
    pub abi: SyscallAbi,
    pub match_mode: SyscallMatch,
    /// Syscall number, used only with [`SyscallMatch::Number`].
    pub nr: u32,
}

impl SyscallAttr {
    pub const ENCODED_LEN: usize = 8;

    fn write(&self, w: &mut WireWriter) {
        w.put_u8(self.entryexit as u8);
        w.put_u8(self.abi as u8);
        w.put_u8(self.match_mode as u8);
        w.pad(1);
        w.put_u32(self.nr);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let entryexit = SyscallEntryExit::try_from(r.get_u8()?)?;
        let abi = SyscallAbi::try_from(r.get_u8()?)?;
        let match_mode = SyscallMatch::try_from(r.get_u8()?)?;
        r.skip(1)?;
        let nr = r.get_u32()?;
        Ok(Self { entryexit, abi, match_mode, nr })
    }
}

/// Per-instrumentation-kind configuration.
///
/// The wire format carries this as a tagged, zero-padded union region
/// of [`EVENT_PADDING2`] bytes; the in-memory form is a plain enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationConfig {
    Tracepoint,
    Kprobe(ProbeLocation),
    Kretprobe(ProbeLocation),
    FunctionTracer { symbol_name: String },
    Noop,
    Syscall(SyscallAttr),
    Uprobe { fd: i32 },
}

impl InstrumentationConfig {
    /// The wire tag of this configuration.
    pub fn instrumentation(&self) -> Instrumentation {
        match self {
            Self::Tracepoint => Instrumentation::Tracepoint,
            Self::Kprobe(_) => Instrumentation::Kprobe,
            Self::Kretprobe(_) => Instrumentation::Kretprobe,
            Self::FunctionTracer { .. } => Instrumentation::FunctionTracer,
            Self::Noop => Instrumentation::Noop,
            Self::Syscall(_) => Instrumentation::Syscall,
            Self::Uprobe { .. } => Instrumentation::Uprobe,
        }
    }
}

/// Event creation attributes.
///
/// For syscall events the name may be a glob pattern; `"*"` enables
/// all syscalls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttr {
    pub name: String,
    /// Opaque caller-provided correlation token.
    pub token: u64,
    pub config: InstrumentationConfig,
}

impl EventAttr {
    pub const ENCODED_LEN: usize =
        SYM_NAME_LEN + 4 + 8 + EVENT_PADDING1 + EVENT_PADDING2;

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_fixed_str(&self.name, SYM_NAME_LEN)?;
        w.put_u32(self.config.instrumentation() as u32);
        w.put_u64(self.token);
        w.pad(EVENT_PADDING1);

        let union_start = w.buf.len();
        match &self.config {
            InstrumentationConfig::Tracepoint | InstrumentationConfig::Noop => {}
            InstrumentationConfig::Kprobe(loc) | InstrumentationConfig::Kretprobe(loc) => {
                loc.write(&mut w)?;
            }
            InstrumentationConfig::FunctionTracer { symbol_name } => {
                w.put_fixed_str(symbol_name, SYM_NAME_LEN)?;
            }
            InstrumentationConfig::Syscall(sc) => sc.write(&mut w),
            InstrumentationConfig::Uprobe { fd } => w.put_i32(*fd),
        }
        w.pad(EVENT_PADDING2 - (w.buf.len() - union_start));
        Ok(w.finish(Self::ENCODED_LEN))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let name = r.get_fixed_str(SYM_NAME_LEN)?;
        let instrumentation = Instrumentation::try_from(r.get_u32()?)?;
        let token = r.get_u64()?;
        r.skip(EVENT_PADDING1)?;

        let mut u = WireReader::new(r.take(EVENT_PADDING2)?);
        let config = match instrumentation {
            Instrumentation::Tracepoint => InstrumentationConfig::Tracepoint,
            Instrumentation::Noop => InstrumentationConfig::Noop,
            Instrumentation::Kprobe => InstrumentationConfig::Kprobe(ProbeLocation::read(&mut u)?),
            Instrumentation::Kretprobe => {
                InstrumentationConfig::Kretprobe(ProbeLocation::read(&mut u)?)
            }
            Instrumentation::FunctionTracer => InstrumentationConfig::FunctionTracer {
                symbol_name: u.get_fixed_str(SYM_NAME_LEN)?,
            },
            Instrumentation::Syscall => InstrumentationConfig::Syscall(SyscallAttr::read(&mut u)?),
            Instrumentation::Uprobe => InstrumentationConfig::Uprobe { fd: u.get_i32()? },
        };
        Ok(Self { name, token, config })
    }
}

/// Event notifier creation attributes: an event plus reserved space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotifierAttr {
    pub event: EventAttr,
}

impl EventNotifierAttr {
    pub const ENCODED_LEN: usize = EventAttr::ENCODED_LEN + EVENT_NOTIFIER_PADDING1;

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = self.event.encode()?;
        bytes.resize(Self::ENCODED_LEN, 0);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let event = EventAttr::decode(r.take(EventAttr::ENCODED_LEN)?)?;
        r.skip(EVENT_NOTIFIER_PADDING1)?;
        Ok(Self { event })
    }
}

/// Uprobe callsite for `ADD_CALLSITE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCallsiteAttr {
    pub offset: u64,
}

impl EventCallsiteAttr {
    pub const ENCODED_LEN: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_u64(self.offset);
        w.finish(Self::ENCODED_LEN)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        Ok(Self { offset: r.get_u64()? })
    }
}

// =============================================================================
// Session Attributes
// =============================================================================

/// Session name payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionName {
    pub name: String,
}

impl SessionName {
    pub const ENCODED_LEN: usize = SESSION_NAME_LEN;

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_fixed_str(&self.name, SESSION_NAME_LEN)?;
        Ok(w.finish(Self::ENCODED_LEN))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        Ok(Self { name: r.get_fixed_str(SESSION_NAME_LEN)? })
    }
}

/// ISO-8601 session creation timestamp payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreationTime {
    pub iso8601: String,
}

impl SessionCreationTime {
    pub const ENCODED_LEN: usize = SESSION_CREATION_TIME_ISO8601_LEN;

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_fixed_str(&self.iso8601, SESSION_CREATION_TIME_ISO8601_LEN)?;
        Ok(w.finish(Self::ENCODED_LEN))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        Ok(Self { iso8601: r.get_fixed_str(SESSION_CREATION_TIME_ISO8601_LEN)? })
    }
}

/// Tracker command payload: namespace plus one id (`-1` = all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerArgs {
    pub tracker_type: TrackerType,
    pub id: i32,
}

impl TrackerArgs {
    pub const ENCODED_LEN: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_i32(self.tracker_type as i32);
        w.put_i32(self.id);
        w.finish(Self::ENCODED_LEN)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let tracker_type = TrackerType::try_from(r.get_i32()?)?;
        let id = r.get_i32()?;
        Ok(Self { tracker_type, id })
    }
}

// =============================================================================
// Context Attributes
// =============================================================================

/// Perf counter context configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfCounterAttr {
    pub counter_type: u32,
    pub config: u64,
    pub name: String,
}

impl PerfCounterAttr {
    pub const ENCODED_LEN: usize = 4 + 8 + SYM_NAME_LEN;

    fn write(&self, w: &mut WireWriter) -> Result<()> {
        w.put_u32(self.counter_type);
        w.put_u64(self.config);
        w.put_fixed_str(&self.name, SYM_NAME_LEN)
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            counter_type: r.get_u32()?,
            config: r.get_u64()?,
            name: r.get_fixed_str(SYM_NAME_LEN)?,
        })
    }
}

/// Type-specific configuration of a context attach request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextConfig {
    None,
    PerfCounter(PerfCounterAttr),
}

/// Context attach request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextAttr {
    pub context_type: ContextType,
    pub config: ContextConfig,
}

impl ContextAttr {
    pub const ENCODED_LEN: usize = 4 + CONTEXT_PADDING1 + CONTEXT_PADDING2;

    /// Context attach request without type-specific configuration.
    pub fn simple(context_type: ContextType) -> Self {
        Self { context_type, config: ContextConfig::None }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::with_capacity(Self::ENCODED_LEN);
        w.put_u32(self.context_type as u32);
        w.pad(CONTEXT_PADDING1);
        let union_start = w.buf.len();
        match &self.config {
            ContextConfig::None => {}
            ContextConfig::PerfCounter(pc) => pc.write(&mut w)?,
        }
        w.pad(CONTEXT_PADDING2 - (w.buf.len() - union_start));
        Ok(w.finish(Self::ENCODED_LEN))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let context_type = ContextType::try_from(r.get_u32()?)?;
        r.skip(CONTEXT_PADDING1)?;
        let mut u = WireReader::new(r.take(CONTEXT_PADDING2)?);
        let config = match context_type {
            ContextType::PerfCounter => ContextConfig::PerfCounter(PerfCounterAttr::read(&mut u)?),
            _ => ContextConfig::None,
        };
        Ok(Self { context_type, config })
    }
}

// =============================================================================
// Filter Bytecode
// =============================================================================

/// Compiled filter bytecode blob.
///
/// Length-prefixed on the wire; `seqnum` increases monotonically per
/// recompilation so stale filters can be rejected at attach time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterBytecode {
    pub reloc_offset: u32,
    pub seqnum: u64,
    pub data: Vec<u8>,
}

impl FilterBytecode {
    pub const HEADER_LEN: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::HEADER_LEN + self.data.len());
        w.put_u32(self.data.len() as u32);
        w.put_u32(self.reloc_offset);
        w.put_u64(self.seqnum);
        w.put_bytes(&self.data);
        w.buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let len = r.get_u32()? as usize;
        let reloc_offset = r.get_u32()?;
        let seqnum = r.get_u64()?;
        if len > FILTER_BYTECODE_MAX_LEN {
            return Err(Error::SizeExceeded { len, max: FILTER_BYTECODE_MAX_LEN });
        }
        if r.remaining() != len {
            return Err(Error::InvalidArgument("filter bytecode length mismatch"));
        }
        let data = Vec::from(r.take(len)?);
        Ok(Self { reloc_offset, seqnum, data })
    }
}

// =============================================================================
// Command Numbers
// =============================================================================

/// The numbered command namespace.
///
/// ioctl-style encoding: `dir << 30 | size << 16 | class << 8 | nr`,
/// class `0xF6`. Ranges are partitioned by function; see module docs
/// for the retired ranges that must never be reused.
pub mod cmd {
    use super::*;

    const CLASS: u32 = 0xF6;
    const DIR_NONE: u32 = 0;
    const DIR_WRITE: u32 = 1;
    const DIR_READ: u32 = 2;

    const fn ioc(dir: u32, nr: u32, size: u32) -> u32 {
        (dir << 30) | (size << 16) | (CLASS << 8) | nr
    }

    const fn io(nr: u32) -> u32 {
        ioc(DIR_NONE, nr, 0)
    }

    const fn ior(nr: u32, size: u32) -> u32 {
        ioc(DIR_READ, nr, size)
    }

    const fn iow(nr: u32, size: u32) -> u32 {
        ioc(DIR_WRITE, nr, size)
    }

    const fn iowr(nr: u32, size: u32) -> u32 {
        ioc(DIR_READ | DIR_WRITE, nr, size)
    }

    // Ring-buffer introspection (stream handles), 0x20-0x28.
    pub const RING_BUFFER_GET_TIMESTAMP_BEGIN: u32 = ior(0x20, 8);
    pub const RING_BUFFER_GET_TIMESTAMP_END: u32 = ior(0x21, 8);
    pub const RING_BUFFER_GET_EVENTS_DISCARDED: u32 = ior(0x22, 8);
    pub const RING_BUFFER_GET_CONTENT_SIZE: u32 = ior(0x23, 8);
    pub const RING_BUFFER_GET_PACKET_SIZE: u32 = ior(0x24, 8);
    pub const RING_BUFFER_GET_STREAM_ID: u32 = ior(0x25, 8);
    pub const RING_BUFFER_GET_CURRENT_TIMESTAMP: u32 = ior(0x26, 8);
    pub const RING_BUFFER_GET_SEQ_NUM: u32 = ior(0x27, 8);
    pub const RING_BUFFER_INSTANCE_ID: u32 = ior(0x28, 8);

    // Tracer-global commands, 0x45-0x4C (0x40-0x44 retired).
    pub const SESSION: u32 = io(0x45);
    pub const TRACER_VERSION: u32 = ior(0x46, TracerVersion::ENCODED_LEN as u32);
    pub const TRACEPOINT_LIST: u32 = io(0x47);
    pub const WAIT_QUIESCENT: u32 = io(0x48);
    pub const CALIBRATE: u32 = iowr(0x49, 4);
    pub const SYSCALL_LIST: u32 = io(0x4A);
    pub const TRACER_ABI_VERSION: u32 = ior(0x4B, TracerAbiVersion::ENCODED_LEN as u32);
    pub const EVENT_NOTIFIER_GROUP_CREATE: u32 = io(0x4C);

    // Session commands, 0x54-0x5E (0x50-0x53 and 0x5A-0x5B retired).
    pub const METADATA: u32 = iow(0x54, ChannelAttr::ENCODED_LEN as u32);
    pub const CHANNEL: u32 = iow(0x55, ChannelAttr::ENCODED_LEN as u32);
    pub const SESSION_START: u32 = io(0x56);
    pub const SESSION_STOP: u32 = io(0x57);
    pub const SESSION_TRACK_PID: u32 = ior(0x58, 4);
    pub const SESSION_UNTRACK_PID: u32 = ior(0x59, 4);

    // nr 0x58 and 0x59 are duplicated here: the direction/size bits
    // make the encoded values distinct. Historical accident, kept
    // bit-for-bit for compatibility with deployed control planes.
    pub const SESSION_LIST_TRACKER_PIDS: u32 = io(0x58);
    pub const SESSION_METADATA_REGEN: u32 = io(0x59);

    pub const SESSION_STATEDUMP: u32 = io(0x5C);
    pub const SESSION_SET_NAME: u32 = ior(0x5D, SessionName::ENCODED_LEN as u32);
    pub const SESSION_SET_CREATION_TIME: u32 =
        ior(0x5E, SessionCreationTime::ENCODED_LEN as u32);

    // Channel commands, 0x62-0x64 (0x60-0x61 retired).
    pub const STREAM: u32 = io(0x62);
    pub const EVENT: u32 = iow(0x63, EventAttr::ENCODED_LEN as u32);
    pub const SYSCALL_MASK: u32 = iowr(0x64, 4);

    // Event and channel context command, 0x71 (0x70 retired).
    pub const CONTEXT: u32 = iow(0x71, ContextAttr::ENCODED_LEN as u32);

    // Event, event notifier, channel and session, 0x82-0x83
    // (0x80-0x81 retired).
    pub const ENABLE: u32 = io(0x82);
    pub const DISABLE: u32 = io(0x83);

    // Event and event notifier commands.
    pub const FILTER: u32 = io(0x90);
    pub const ADD_CALLSITE: u32 = io(0x91);

    // Session tracker commands (continued).
    pub const SESSION_LIST_TRACKER_IDS: u32 = ior(0xA0, TrackerArgs::ENCODED_LEN as u32);
    pub const SESSION_TRACK_ID: u32 = ior(0xA1, TrackerArgs::ENCODED_LEN as u32);
    pub const SESSION_UNTRACK_ID: u32 = ior(0xA2, TrackerArgs::ENCODED_LEN as u32);

    // Event notifier group commands.
    pub const EVENT_NOTIFIER_CREATE: u32 = iow(0xB0, EventNotifierAttr::ENCODED_LEN as u32);
    pub const EVENT_NOTIFIER_GROUP_NOTIFICATION_FD: u32 = io(0xB1);

    /// Whether `cmd` is part of the published command namespace.
    pub fn is_known(cmd: u32) -> bool {
        matches!(
            cmd,
            RING_BUFFER_GET_TIMESTAMP_BEGIN
                | RING_BUFFER_GET_TIMESTAMP_END
                | RING_BUFFER_GET_EVENTS_DISCARDED
                | RING_BUFFER_GET_CONTENT_SIZE
                | RING_BUFFER_GET_PACKET_SIZE
                | RING_BUFFER_GET_STREAM_ID
                | RING_BUFFER_GET_CURRENT_TIMESTAMP
                | RING_BUFFER_GET_SEQ_NUM
                | RING_BUFFER_INSTANCE_ID
                | SESSION
                | TRACER_VERSION
                | TRACEPOINT_LIST
                | WAIT_QUIESCENT
                | CALIBRATE
                | SYSCALL_LIST
                | TRACER_ABI_VERSION
                | EVENT_NOTIFIER_GROUP_CREATE
                | METADATA
                | CHANNEL
                | SESSION_START
                | SESSION_STOP
                | SESSION_TRACK_PID
                | SESSION_UNTRACK_PID
                | SESSION_LIST_TRACKER_PIDS
                | SESSION_METADATA_REGEN
                | SESSION_STATEDUMP
                | SESSION_SET_NAME
                | SESSION_SET_CREATION_TIME
                | STREAM
                | EVENT
                | SYSCALL_MASK
                | CONTEXT
                | ENABLE
                | DISABLE
                | FILTER
                | ADD_CALLSITE
                | SESSION_LIST_TRACKER_IDS
                | SESSION_TRACK_ID
                | SESSION_UNTRACK_ID
                | EVENT_NOTIFIER_CREATE
                | EVENT_NOTIFIER_GROUP_NOTIFICATION_FD
        )
    }

    /// Command number without the direction/size encoding.
    pub const fn nr(cmd: u32) -> u32 {
        cmd & 0xFF
    }
}

// =============================================================================
// Tests
// =============================================================================
