//! Integration tests for the wire format.
//!
//! Covers encoded sizes, round-trips through the padded layouts, and
//! the historical command-number collisions.

use ktrace::abi::{
    ChannelAttr, ContextAttr, ContextConfig, ContextType, EventAttr, EventNotifierAttr,
    FilterBytecode, InstrumentationConfig, OutputMode, PerfCounterAttr, ProbeLocation,
    SessionCreationTime, SessionName, SyscallAbi, SyscallAttr, SyscallEntryExit, SyscallMatch,
    TracerAbiVersion, TracerVersion, TrackerArgs, TrackerType, cmd,
};
use ktrace::error::Error;

// =============================================================================
// Encoded Sizes
// =============================================================================

#[test]
fn test_encoded_sizes_match_layout() {
    assert_eq!(TracerVersion::ENCODED_LEN, 12);
    assert_eq!(TracerAbiVersion::ENCODED_LEN, 8);
    assert_eq!(ChannelAttr::ENCODED_LEN, 320);
    assert_eq!(EventAttr::ENCODED_LEN, 564);
    assert_eq!(EventNotifierAttr::ENCODED_LEN, 580);
    assert_eq!(ContextAttr::ENCODED_LEN, 308);
    assert_eq!(SessionName::ENCODED_LEN, 256);
    assert_eq!(SessionCreationTime::ENCODED_LEN, 26);
    assert_eq!(TrackerArgs::ENCODED_LEN, 8);
}

#[test]
fn test_encode_produces_exact_len() {
    let attr = ChannelAttr {
        subbuf_size: 4096,
        num_subbuf: 4,
        switch_timer_interval: 0,
        read_timer_interval: 200,
        output: OutputMode::Mmap,
        overwrite: false,
    };
    assert_eq!(attr.encode().len(), ChannelAttr::ENCODED_LEN);
    assert_eq!(
        TracerVersion::current().encode().len(),
        TracerVersion::ENCODED_LEN
    );
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_channel_attr_round_trip() {
    let attr = ChannelAttr {
        subbuf_size: 262144,
        num_subbuf: 8,
        switch_timer_interval: 1000,
        read_timer_interval: 200,
        output: OutputMode::Splice,
        overwrite: true,
    };
    assert_eq!(ChannelAttr::decode(&attr.encode()).unwrap(), attr);
}

#[test]
fn test_kprobe_event_round_trip() {
    let attr = EventAttr {
        name: String::from("my_kprobe"),
        token: 0xDEAD_BEEF,
        config: InstrumentationConfig::Kprobe(ProbeLocation {
            addr: 0,
            offset: 16,
            symbol_name: String::from("do_sys_openat2"),
        }),
    };
    let decoded = EventAttr::decode(&attr.encode().unwrap()).unwrap();
    assert_eq!(decoded, attr);
}

#[test]
fn test_syscall_event_round_trip() {
    let attr = EventAttr {
        name: String::from("open*"),
        token: 7,
        config: InstrumentationConfig::Syscall(SyscallAttr {
            entryexit: SyscallEntryExit::EntryExit,
            abi: SyscallAbi::All,
            match_mode: SyscallMatch::Name,
            nr: 0,
        }),
    };
    let decoded = EventAttr::decode(&attr.encode().unwrap()).unwrap();
    assert_eq!(decoded, attr);
}

#[test]
fn test_notifier_attr_round_trip() {
    let attr = EventNotifierAttr {
        event: EventAttr {
            name: String::from("notify_me"),
            token: 99,
            config: InstrumentationConfig::Tracepoint,
        },
    };
    let bytes = attr.encode().unwrap();
    assert_eq!(bytes.len(), EventNotifierAttr::ENCODED_LEN);
    assert_eq!(EventNotifierAttr::decode(&bytes).unwrap(), attr);
}

#[test]
fn test_perf_counter_context_round_trip() {
    let attr = ContextAttr {
        context_type: ContextType::PerfCounter,
        config: ContextConfig::PerfCounter(PerfCounterAttr {
            counter_type: 0,
            config: 0x11,
            name: String::from("cycles"),
        }),
    };
    assert_eq!(ContextAttr::decode(&attr.encode().unwrap()).unwrap(), attr);
}

#[test]
fn test_tracker_args_round_trip() {
    let args = TrackerArgs { tracker_type: TrackerType::Vuid, id: -1 };
    assert_eq!(TrackerArgs::decode(&args.encode()).unwrap(), args);
}

#[test]
fn test_filter_bytecode_round_trip() {
    let bc = FilterBytecode {
        reloc_offset: 12,
        seqnum: 3,
        data: vec![0xAA; 48],
    };
    assert_eq!(FilterBytecode::decode(&bc.encode()).unwrap(), bc);
}

// =============================================================================
// Padding and Validation
// =============================================================================

#[test]
fn test_decode_ignores_padding_garbage() {
    let attr = ContextAttr::simple(ContextType::Hostname);
    let mut bytes = attr.encode().unwrap();
    // Padding content is reserved but must not affect decoding.
    for b in bytes.iter_mut().skip(4) {
        *b = 0x5A;
    }
    assert_eq!(ContextAttr::decode(&bytes).unwrap().context_type, ContextType::Hostname);
}

#[test]
fn test_name_too_long_rejected() {
    let attr = EventAttr {
        name: "x".repeat(256),
        token: 0,
        config: InstrumentationConfig::Tracepoint,
    };
    assert!(attr.encode().is_err());
}

#[test]
fn test_truncated_payload_rejected() {
    let bytes = ChannelAttr {
        subbuf_size: 4096,
        num_subbuf: 4,
        switch_timer_interval: 0,
        read_timer_interval: 0,
        output: OutputMode::Mmap,
        overwrite: false,
    }
    .encode();
    assert!(ChannelAttr::decode(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_oversized_filter_rejected_at_decode() {
    let bc = FilterBytecode {
        reloc_offset: 0,
        seqnum: 1,
        data: vec![0; 65537],
    };
    let result = FilterBytecode::decode(&bc.encode());
    assert!(matches!(
        result,
        Err(Error::SizeExceeded { len: 65537, max: 65536 })
    ));
}

// =============================================================================
// Command Numbers
// =============================================================================

#[test]
fn test_colliding_nrs_encode_distinctly() {
    // 0x58 and 0x59 are shared pairs distinguished by direction and
    // size bits; the full 32-bit encodings must differ.
    assert_eq!(cmd::nr(cmd::SESSION_TRACK_PID), 0x58);
    assert_eq!(cmd::nr(cmd::SESSION_LIST_TRACKER_PIDS), 0x58);
    assert_ne!(cmd::SESSION_TRACK_PID, cmd::SESSION_LIST_TRACKER_PIDS);

    assert_eq!(cmd::nr(cmd::SESSION_UNTRACK_PID), 0x59);
    assert_eq!(cmd::nr(cmd::SESSION_METADATA_REGEN), 0x59);
    assert_ne!(cmd::SESSION_UNTRACK_PID, cmd::SESSION_METADATA_REGEN);
}

#[test]
fn test_command_table_is_known() {
    for command in [
        cmd::SESSION,
        cmd::TRACER_VERSION,
        cmd::TRACER_ABI_VERSION,
        cmd::CHANNEL,
        cmd::METADATA,
        cmd::EVENT,
        cmd::CONTEXT,
        cmd::FILTER,
        cmd::ENABLE,
        cmd::DISABLE,
        cmd::SESSION_TRACK_ID,
        cmd::EVENT_NOTIFIER_CREATE,
        cmd::RING_BUFFER_GET_EVENTS_DISCARDED,
    ] {
        assert!(cmd::is_known(command), "command {command:#010x} not in table");
    }
    assert!(!cmd::is_known(0));
    assert!(!cmd::is_known(0xF6FF));
}

#[test]
fn test_abi_version_current() {
    let abi = TracerAbiVersion::current();
    assert_eq!(abi.major, 2);
    assert_eq!(abi.minor, 5);
    let tracer = TracerVersion::current();
    assert_eq!((tracer.major, tracer.minor, tracer.patchlevel), (2, 12, 0));
}
