//! Control protocol dispatcher.
//!
//! Commands arrive as an ioctl-style `(handle, cmd, payload)` triple.
//! The controller owns the handle table: handle 0 is the tracer itself
//! and every object-creating command returns a fresh handle for the
//! created session, channel, stream, event or notifier. All commands
//! except the two version queries are gated behind a successful ABI
//! major-version negotiation.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::abi::{
    ABI_MAJOR_VERSION, ChannelAttr, ContextAttr, EventAttr, EventCallsiteAttr,
    EventNotifierAttr, FilterBytecode, SessionCreationTime, SessionName, TracerAbiVersion,
    TracerVersion, TrackerArgs, cmd,
};
use crate::contexts;
use crate::error::{Error, Result};
use crate::ring_buffer::{MockRingBuffer, RingBufferOps};
use crate::session::{Channel, Event, EventNotifier, EventNotifierGroup, Session};

/// Opaque object handle returned by creation commands.
pub type HandleId = u32;

/// The pre-existing handle addressing the tracer itself.
pub const TRACER_HANDLE: HandleId = 0;

/// Factory producing the ring-buffer backend for a new channel.
pub type BackendFactory = fn(&ChannelAttr) -> Box<dyn RingBufferOps>;

fn default_backend(attr: &ChannelAttr) -> Box<dyn RingBufferOps> {
    Box::new(MockRingBuffer::from_attr(attr))
}

/// Reply payload of a successfully dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    None,
    /// Handle of a newly created object.
    Handle(HandleId),
    /// Encoded out-payload (version structs, tracker lists, queries).
    Bytes(Vec<u8>),
    /// File descriptor (notification fd).
    Fd(i32),
}

enum HandleObj {
    Session(Arc<Session>),
    Channel {
        session: Arc<Session>,
        channel: Arc<Channel>,
    },
    Stream {
        channel: Arc<Channel>,
    },
    Event {
        channel: Arc<Channel>,
        event: Arc<Event>,
    },
    NotifierGroup(Arc<EventNotifierGroup>),
    Notifier {
        #[allow(dead_code)]
        group: Arc<EventNotifierGroup>,
        notifier: Arc<EventNotifier>,
    },
}

/// Owner of the handle table and entry point of the control protocol.
pub struct Controller {
    negotiated: bool,
    handles: BTreeMap<HandleId, HandleObj>,
    next_handle: HandleId,
    backend_factory: BackendFactory,
    next_notification_fd: i32,
}

impl Controller {
    pub fn new() -> Self {
        Self::with_backend_factory(default_backend)
    }

    /// Controller whose channels use backends from `factory`.
    pub fn with_backend_factory(factory: BackendFactory) -> Self {
        Self {
            negotiated: false,
            handles: BTreeMap::new(),
            next_handle: TRACER_HANDLE + 1,
            backend_factory: factory,
            next_notification_fd: 128,
        }
    }

    /// Check the consumer's ABI version. The major version must match
    /// exactly; minor-version skew is tolerated.
    pub fn negotiate(&mut self, consumer: &TracerAbiVersion) -> Result<()> {
        if consumer.major != ABI_MAJOR_VERSION {
            return Err(Error::VersionMismatch {
                expected: ABI_MAJOR_VERSION,
                got: consumer.major,
            });
        }
        self.negotiated = true;
        Ok(())
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    fn alloc_handle(&mut self, obj: HandleObj) -> HandleId {
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, obj);
        id
    }

    /// Dispatch one command against `handle`.
    pub fn command(&mut self, handle: HandleId, command: u32, payload: &[u8]) -> Result<Reply> {
        // Version queries bypass the negotiation gate so a consumer
        // can discover what to negotiate.
        if handle == TRACER_HANDLE {
            match command {
                cmd::TRACER_VERSION => {
                    return Ok(Reply::Bytes(TracerVersion::current().encode()));
                }
                cmd::TRACER_ABI_VERSION => {
                    return Ok(Reply::Bytes(TracerAbiVersion::current().encode()));
                }
                _ => {}
            }
        }
        if !self.negotiated {
            return Err(Error::VersionMismatch { expected: ABI_MAJOR_VERSION, got: 0 });
        }
        if !cmd::is_known(command) {
            return Err(Error::UnknownCommand(command));
        }

        if handle == TRACER_HANDLE {
            return self.tracer_command(command, payload);
        }
        match self.handles.get(&handle) {
            None => Err(Error::InvalidHandle),
            Some(HandleObj::Session(session)) => {
                let session = session.clone();
                self.session_command(&session, command, payload)
            }
            Some(HandleObj::Channel { channel, .. }) => {
                let channel = channel.clone();
                self.channel_command(&channel, command, payload)
            }
            Some(HandleObj::Stream { channel }) => {
                let channel = channel.clone();
                stream_command(&channel, command)
            }
            Some(HandleObj::Event { event, .. }) => {
                let event = event.clone();
                event_command(&event, command, payload)
            }
            Some(HandleObj::NotifierGroup(group)) => {
                let group = group.clone();
                self.notifier_group_command(&group, command, payload)
            }
            Some(HandleObj::Notifier { notifier, .. }) => {
                let notifier = notifier.clone();
                notifier_command(&notifier, command, payload)
            }
        }
    }

    fn tracer_command(&mut self, command: u32, _payload: &[u8]) -> Result<Reply> {
        match command {
            cmd::SESSION => {
                let session = Arc::new(Session::new());
                Ok(Reply::Handle(self.alloc_handle(HandleObj::Session(session))))
            }
            cmd::EVENT_NOTIFIER_GROUP_CREATE => {
                let fd = self.next_notification_fd;
                self.next_notification_fd += 1;
                let group = Arc::new(EventNotifierGroup::new(fd));
                Ok(Reply::Handle(self.alloc_handle(HandleObj::NotifierGroup(group))))
            }
            cmd::WAIT_QUIESCENT => {
                let mut freed = 0usize;
                for obj in self.handles.values() {
                    match obj {
                        HandleObj::Session(session) => {
                            freed += session.context().reap();
                            for channel in session.channels() {
                                freed += channel.context().reap();
                                for event in channel.events() {
                                    freed += event.context().reap();
                                }
                            }
                        }
                        HandleObj::NotifierGroup(group) => {
                            for notifier in group.notifiers() {
                                freed += notifier.event().context().reap();
                            }
                        }
                        _ => {}
                    }
                }
                debug!("ktrace: quiescence reaped {} retired context fields", freed);
                Ok(Reply::None)
            }
            cmd::TRACEPOINT_LIST => Err(Error::NotImplemented("tracepoint listing")),
            cmd::SYSCALL_LIST => Err(Error::NotImplemented("syscall listing")),
            cmd::CALIBRATE => Err(Error::NotImplemented("calibration")),
            _ => Err(Error::InvalidHandle),
        }
    }

    fn session_command(
        &mut self,
        session: &Arc<Session>,
        command: u32,
        payload: &[u8],
    ) -> Result<Reply> {
        match command {
            cmd::CHANNEL | cmd::METADATA => {
                let attr = ChannelAttr::decode(payload)?;
                let backend = (self.backend_factory)(&attr);
                let channel = session.add_channel(&attr, backend, command == cmd::METADATA);
                Ok(Reply::Handle(self.alloc_handle(HandleObj::Channel {
                    session: session.clone(),
                    channel,
                })))
            }
            cmd::SESSION_START | cmd::ENABLE => {
                session.start();
                Ok(Reply::None)
            }
            cmd::SESSION_STOP | cmd::DISABLE => {
                session.stop();
                Ok(Reply::None)
            }
            cmd::SESSION_SET_NAME => {
                let name = SessionName::decode(payload)?;
                session.set_name(&name.name)?;
                Ok(Reply::None)
            }
            cmd::SESSION_SET_CREATION_TIME => {
                let time = SessionCreationTime::decode(payload)?;
                session.set_creation_time(&time.iso8601)?;
                Ok(Reply::None)
            }
            cmd::SESSION_TRACK_PID => {
                let id = decode_pid(payload)?;
                session.trackers().pid.track(id)?;
                Ok(Reply::None)
            }
            cmd::SESSION_UNTRACK_PID => {
                let id = decode_pid(payload)?;
                session.trackers().pid.untrack(id)?;
                Ok(Reply::None)
            }
            cmd::SESSION_LIST_TRACKER_PIDS => {
                Ok(Reply::Bytes(encode_id_list(&session.trackers().pid.list())))
            }
            cmd::SESSION_TRACK_ID => {
                let args = TrackerArgs::decode(payload)?;
                session.trackers().get(args.tracker_type)?.track(args.id)?;
                Ok(Reply::None)
            }
            cmd::SESSION_UNTRACK_ID => {
                let args = TrackerArgs::decode(payload)?;
                session.trackers().get(args.tracker_type)?.untrack(args.id)?;
                Ok(Reply::None)
            }
            cmd::SESSION_LIST_TRACKER_IDS => {
                let args = TrackerArgs::decode(payload)?;
                let tracker = session.trackers().get(args.tracker_type)?;
                Ok(Reply::Bytes(encode_id_list(&tracker.list())))
            }
            cmd::CONTEXT => {
                let attr = ContextAttr::decode(payload)?;
                contexts::attach_by_type(session.context(), &attr)?;
                Ok(Reply::None)
            }
            cmd::SESSION_METADATA_REGEN => Err(Error::NotImplemented("metadata regeneration")),
            cmd::SESSION_STATEDUMP => Err(Error::NotImplemented("state dump")),
            _ => Err(Error::InvalidHandle),
        }
    }

    fn channel_command(
        &mut self,
        channel: &Arc<Channel>,
        command: u32,
        payload: &[u8],
    ) -> Result<Reply> {
        match command {
            cmd::STREAM => {
                // Single-stream backends: each stream handle views the
                // same per-channel buffer.
                Ok(Reply::Handle(
                    self.alloc_handle(HandleObj::Stream { channel: channel.clone() }),
                ))
            }
            cmd::EVENT => {
                if channel.is_metadata() {
                    return Err(Error::InvalidArgument("event on metadata channel"));
                }
                let attr = EventAttr::decode(payload)?;
                let event = channel.create_event(attr)?;
                Ok(Reply::Handle(self.alloc_handle(HandleObj::Event {
                    channel: channel.clone(),
                    event,
                })))
            }
            cmd::CONTEXT => {
                let attr = ContextAttr::decode(payload)?;
                contexts::attach_by_type(channel.context(), &attr)?;
                Ok(Reply::None)
            }
            cmd::ENABLE => {
                channel.enable();
                Ok(Reply::None)
            }
            cmd::DISABLE => {
                channel.disable();
                Ok(Reply::None)
            }
            cmd::SYSCALL_MASK => Err(Error::NotImplemented("syscall mask")),
            _ => Err(Error::InvalidHandle),
        }
    }

    fn notifier_group_command(
        &mut self,
        group: &Arc<EventNotifierGroup>,
        command: u32,
        payload: &[u8],
    ) -> Result<Reply> {
        match command {
            cmd::EVENT_NOTIFIER_CREATE => {
                let attr = EventNotifierAttr::decode(payload)?;
                let notifier = group.create_notifier(attr)?;
                Ok(Reply::Handle(self.alloc_handle(HandleObj::Notifier {
                    group: group.clone(),
                    notifier,
                })))
            }
            cmd::EVENT_NOTIFIER_GROUP_NOTIFICATION_FD => Ok(Reply::Fd(group.notification_fd())),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Release `handle`, tearing the object down. Releasing a session
    /// tears down its channels and events; their handles become stale
    /// and report [`Error::InvalidHandle`] from then on.
    pub fn release(&mut self, handle: HandleId) -> Result<()> {
        let obj = self.handles.remove(&handle).ok_or(Error::InvalidHandle)?;
        if let HandleObj::Session(session) = &obj {
            // Snapshot the channel list before teardown empties it;
            // child handles are matched against it below.
            let channels = session.channels();
            session.teardown();
            self.handles.retain(|_, other| match other {
                HandleObj::Channel { session: s, .. } => !Arc::ptr_eq(s, session),
                HandleObj::Stream { channel } | HandleObj::Event { channel, .. } => {
                    !channels.iter().any(|c| Arc::ptr_eq(c, channel))
                }
                _ => true,
            });
        }
        Ok(())
    }

    /// Look up a session object by handle (for direct capture use).
    pub fn session(&self, handle: HandleId) -> Result<Arc<Session>> {
        match self.handles.get(&handle) {
            Some(HandleObj::Session(session)) => Ok(session.clone()),
            Some(_) => Err(Error::InvalidHandle),
            None => Err(Error::InvalidHandle),
        }
    }

    /// Look up a channel object by handle.
    pub fn channel(&self, handle: HandleId) -> Result<Arc<Channel>> {
        match self.handles.get(&handle) {
            Some(HandleObj::Channel { channel, .. }) => Ok(channel.clone()),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Look up an event object by handle.
    pub fn event(&self, handle: HandleId) -> Result<Arc<Event>> {
        match self.handles.get(&handle) {
            Some(HandleObj::Event { event, .. }) => Ok(event.clone()),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Look up a notifier group by handle.
    pub fn notifier_group(&self, handle: HandleId) -> Result<Arc<EventNotifierGroup>> {
        match self.handles.get(&handle) {
            Some(HandleObj::NotifierGroup(group)) => Ok(group.clone()),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Look up a notifier by handle.
    pub fn notifier(&self, handle: HandleId) -> Result<Arc<EventNotifier>> {
        match self.handles.get(&handle) {
            Some(HandleObj::Notifier { notifier, .. }) => Ok(notifier.clone()),
            _ => Err(Error::InvalidHandle),
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

fn stream_command(channel: &Arc<Channel>, command: u32) -> Result<Reply> {
    let backend = channel.backend();
    let value = match command {
        cmd::RING_BUFFER_GET_TIMESTAMP_BEGIN => backend.timestamp_begin(),
        cmd::RING_BUFFER_GET_TIMESTAMP_END => backend.timestamp_end(),
        cmd::RING_BUFFER_GET_EVENTS_DISCARDED => backend.events_discarded(),
        cmd::RING_BUFFER_GET_CONTENT_SIZE => backend.content_size(),
        cmd::RING_BUFFER_GET_PACKET_SIZE => backend.packet_size(),
        cmd::RING_BUFFER_GET_STREAM_ID => backend.stream_id(),
        cmd::RING_BUFFER_GET_CURRENT_TIMESTAMP => backend.current_timestamp(),
        cmd::RING_BUFFER_GET_SEQ_NUM => backend.packet_seq_num(),
        cmd::RING_BUFFER_INSTANCE_ID => backend.stream_instance_id(),
        _ => return Err(Error::InvalidHandle),
    };
    Ok(Reply::Bytes(value.to_le_bytes().to_vec()))
}

fn event_command(event: &Arc<Event>, command: u32, payload: &[u8]) -> Result<Reply> {
    match command {
        cmd::ENABLE => {
            event.enable();
            Ok(Reply::None)
        }
        cmd::DISABLE => {
            event.disable();
            Ok(Reply::None)
        }
        cmd::CONTEXT => {
            let attr = ContextAttr::decode(payload)?;
            contexts::attach_by_type(event.context(), &attr)?;
            Ok(Reply::None)
        }
        cmd::FILTER => {
            let bytecode = FilterBytecode::decode(payload)?;
            event.set_filter(bytecode)?;
            Ok(Reply::None)
        }
        cmd::ADD_CALLSITE => {
            let callsite = EventCallsiteAttr::decode(payload)?;
            event.add_callsite(callsite.offset)?;
            Ok(Reply::None)
        }
        _ => Err(Error::InvalidHandle),
    }
}

fn notifier_command(notifier: &Arc<EventNotifier>, command: u32, payload: &[u8]) -> Result<Reply> {
    match command {
        cmd::ENABLE => {
            notifier.event().enable();
            Ok(Reply::None)
        }
        cmd::DISABLE => {
            notifier.event().disable();
            Ok(Reply::None)
        }
        cmd::FILTER => {
            let bytecode = FilterBytecode::decode(payload)?;
            notifier.event().set_filter(bytecode)?;
            Ok(Reply::None)
        }
        cmd::ADD_CALLSITE => {
            let callsite = EventCallsiteAttr::decode(payload)?;
            notifier.event().add_callsite(callsite.offset)?;
            Ok(Reply::None)
        }
        _ => Err(Error::InvalidHandle),
    }
}

fn decode_pid(payload: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::InvalidArgument("truncated pid payload"))?;
    Ok(i32::from_le_bytes(bytes))
}

fn encode_id_list(ids: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    bytes
}
