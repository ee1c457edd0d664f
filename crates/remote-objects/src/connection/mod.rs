//! Connection engine.
//!
//! One connection is symmetric: either side may export objects, issue calls
//! and serve calls. Each connection runs three kinds of threads:
//!
//! - a **reader** that owns the receiving half of the transport, decodes
//!   frames, dispatches inbound calls to the worker pool and routes
//!   `Return`/`Yield` messages to the callers waiting for them;
//! - **workers** that execute inbound calls (see [`pool`]);
//! - a **releaser** that turns dropped proxies into `Release` messages.
//!
//! Outbound calls block the calling thread. A `Yield` addressed to a blocked
//! caller wakes it up to run its block, after which it keeps waiting for the
//! final `Return`, so callbacks always execute on the thread that made the
//! call and arbitrarily deep call/callback nesting works in both directions.

mod pending;
mod pool;
mod stats;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use self::pending::{PendingCalls, Reply};
use self::pool::{Job, WorkerPool};
pub use self::stats::StatsSnapshot;
use self::stats::ConnectionStats;
use crate::codec::FrameCodec;
use crate::config::ConnectionConfig;
use crate::error::{RpcError, RpcResult};
use crate::message::{Call, Message, MessageDecoder, Release, Return, Yield};
use crate::proxy::Proxy;
use crate::security::{self, DenyList, SecurityPolicy};
use crate::tables::ObjectTables;
use crate::transport::{Transport, TransportType};
use crate::value::{Block, Handle, ObjectRef, RemoteObject, Value};
use crate::wire::{CallId, ObjectId, Serializer, WireValue};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// How the peer should return a call's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallMode {
    /// Copy or reference as the value's kind dictates
    Plain,
    /// Always by reference unless nil
    ByRef,
}

/// An inbound call, decoded and ready for a worker.
pub(crate) struct InboundCall {
    caller: CallId,
    target: ObjectId,
    method: Option<String>,
    args: RpcResult<Vec<Value>>,
    has_block: bool,
    by_ref: bool,
}

/// State shared by a connection's handles, proxies and threads.
pub(crate) struct Shared {
    serial: u64,
    peer: String,
    config: ConnectionConfig,
    serializer: Arc<dyn Serializer>,
    decoder: MessageDecoder,
    codec: FrameCodec,
    policy: Arc<dyn SecurityPolicy>,
    /// Send lock: one frame at a time
    writer: Mutex<Box<dyn Transport>>,
    control: Box<dyn Transport>,
    pub(crate) tables: Mutex<ObjectTables>,
    pending: PendingCalls,
    pool: WorkerPool,
    releases: Sender<ObjectId>,
    next_call: AtomicU64,
    closed: AtomicBool,
    stats: ConnectionStats,
}

impl Shared {
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next_call_id(&self) -> CallId {
        CallId(self.next_call.fetch_add(1, Ordering::Relaxed))
    }

    /// Write one message under the send lock.
    fn send(&self, message: &Message) -> RpcResult<()> {
        if self.is_closed() {
            return Err(RpcError::connection("connection is closed"));
        }
        let bytes = match self.encode(message) {
            Ok(bytes) => bytes,
            Err(err) => self.encode_failure(message, err)?,
        };
        let mut writer = self.writer.lock();
        self.codec.write_frame(&mut **writer, &bytes)?;
        drop(writer);
        ConnectionStats::bump(&self.stats.frames_sent);
        trace!(connection = self.serial, tag = ?message.tag(), bytes = bytes.len(), "sent frame");
        Ok(())
    }

    fn encode(&self, message: &Message) -> RpcResult<Vec<u8>> {
        let bytes = self.serializer.serialize(&message.to_envelope())?;
        if !self.codec.is_valid_size(bytes.len()) {
            return Err(RpcError::protocol(format!(
                "encoded {:?} is {} bytes",
                message.tag(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// A result the peer is waiting for is replaced by the encoding error.
    fn encode_failure(&self, message: &Message, err: RpcError) -> RpcResult<Vec<u8>> {
        let Message::Return(ret) = message else {
            return Err(err);
        };
        if ret.is_error {
            return Err(err);
        }
        warn!(connection = self.serial, id = %ret.id, error = %err, "result could not be encoded");
        self.encode(&Message::Return(Return {
            id: ret.id,
            payload: WireValue::Error(err.to_error_value()),
            is_error: true,
        }))
    }

    /// Issue a call and block until it returns.
    pub(crate) fn call(
        self: &Arc<Self>,
        target: ObjectId,
        method: Option<&str>,
        args: Vec<Value>,
        block: Option<&Block<'_>>,
        mode: CallMode,
    ) -> RpcResult<Value> {
        let caller = self.next_call_id();
        let call = Call {
            caller,
            target,
            method: method.map(str::to_string),
            args: self.encode_args(&args),
            has_block: block.is_some(),
        };
        let message = match mode {
            CallMode::Plain => Message::Call(call),
            CallMode::ByRef => Message::RefCall(call),
        };
        ConnectionStats::bump(&self.stats.calls_issued);
        self.await_return(caller, message, block)
    }

    /// Send `message` and wait for the `Return` addressed to `id`, running
    /// `block` for every `Yield` that arrives in between.
    fn await_return(
        self: &Arc<Self>,
        id: CallId,
        mut message: Message,
        block: Option<&Block<'_>>,
    ) -> RpcResult<Value> {
        loop {
            let waiter = self.pending.register(id)?;
            if let Err(err) = self.send(&message) {
                self.pending.cancel(id);
                return Err(err);
            }

            match waiter.wait() {
                Reply::Return(result) => return result,
                Reply::Closed(err) => return Err(err),
                Reply::Yield { yield_id, args } => {
                    ConnectionStats::bump(&self.stats.yields_handled);
                    let outcome = match (block, args) {
                        (None, _) => Err(RpcError::application(
                            "LocalJumpError",
                            "no block given (yield)",
                        )),
                        (Some(_), Err(err)) => Err(err),
                        (Some(block), Ok(args)) => block(args),
                    };
                    message = Message::Return(self.build_return(yield_id, outcome, false));
                }
            }
        }
    }

    /// Run the block of the peer's call `caller`.
    fn remote_yield(self: &Arc<Self>, caller: CallId, args: Vec<Value>) -> RpcResult<Value> {
        let yield_id = self.next_call_id();
        let message = Message::Yield(Yield {
            caller,
            yield_id,
            args: self.encode_args(&args),
        });
        self.await_return(yield_id, message, None)
    }

    fn build_return(&self, id: CallId, outcome: RpcResult<Value>, by_ref: bool) -> Return {
        match outcome {
            Ok(value) => Return {
                id,
                payload: self.make_reference(&value, by_ref),
                is_error: false,
            },
            Err(err) => Return {
                id,
                payload: WireValue::Error(err.to_error_value()),
                is_error: true,
            },
        }
    }

    fn reply(&self, id: CallId, outcome: RpcResult<Value>, by_ref: bool) {
        let message = Message::Return(self.build_return(id, outcome, by_ref));
        if let Err(err) = self.send(&message) {
            debug!(connection = self.serial, %id, error = %err, "dropping reply");
        }
    }

    /// Worker entry point.
    pub(crate) fn serve(self: &Arc<Self>, call: InboundCall) {
        let caller = call.caller;
        let by_ref = call.by_ref;
        let outcome = self.execute(call);
        ConnectionStats::bump(&self.stats.calls_served);
        if let Err(err) = &outcome {
            ConnectionStats::bump(&self.stats.calls_failed);
            debug!(connection = self.serial, %caller, error = %err, "inbound call failed");
        }
        self.reply(caller, outcome, by_ref);
    }

    fn execute(self: &Arc<Self>, call: InboundCall) -> RpcResult<Value> {
        let InboundCall {
            caller,
            target,
            method,
            args,
            has_block,
            ..
        } = call;
        let args = args?;
        let handle = self.tables.lock().lookup_local(target)?;
        let Some(method) = method else {
            return Ok(Value::Object(ObjectRef::new(handle)));
        };

        if let Err(err) = security::check_inbound(self.policy.as_ref(), &handle, &method) {
            ConnectionStats::bump(&self.stats.security_violations);
            warn!(connection = self.serial, peer = %self.peer, method = %method, "rejected inbound call");
            return Err(err);
        }

        trace!(connection = self.serial, %caller, %target, method = %method, "executing");
        let block = |args: Vec<Value>| self.remote_yield(caller, args);
        let block: Option<&Block<'_>> = if has_block { Some(&block) } else { None };
        handle.invoke(&method, args, block)
    }

    /// Reader thread body.
    fn run_reader(self: Arc<Self>, mut reader: Box<dyn Transport>) {
        debug!(
            connection = self.serial,
            peer = %self.peer,
            security_level = self.config.security_level,
            "reader started"
        );
        let cause = loop {
            match self.read_message(reader.as_mut()) {
                Ok(message) => self.dispatch(message),
                Err(err) => break err,
            }
        };
        self.teardown(&cause);
    }

    fn read_message(&self, reader: &mut dyn Transport) -> RpcResult<Message> {
        let frame = self.codec.read_frame(reader)?;
        ConnectionStats::bump(&self.stats.frames_received);
        let envelope = self.serializer.deserialize(&frame)?;
        self.decoder.decode(envelope)
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        trace!(connection = self.serial, tag = ?message.tag(), "received");
        match message {
            Message::Call(call) => self.accept_call(call, false),
            Message::RefCall(call) => self.accept_call(call, true),
            Message::Return(ret) => {
                let id = ret.id;
                let reply = Reply::Return(self.decode_return(ret));
                if !self.pending.deliver(id, reply) {
                    warn!(connection = self.serial, %id, "return for a call nobody is waiting on");
                }
            }
            Message::Yield(y) => {
                let reply = Reply::Yield {
                    yield_id: y.yield_id,
                    args: self.decode_args(y.args),
                };
                if !self.pending.deliver(y.caller, reply) {
                    warn!(connection = self.serial, caller = %y.caller, "yield for a call nobody is waiting on");
                    let err = RpcError::reference_not_found(format!("no call {} is waiting", y.caller));
                    self.reply(y.yield_id, Err(err), false);
                }
            }
            Message::Release(Release { id }) => {
                ConnectionStats::bump(&self.stats.releases_received);
                let released = self.tables.lock().delete_local(id);
                trace!(connection = self.serial, %id, known = released.is_some(), "release");
            }
        }
    }

    fn accept_call(self: &Arc<Self>, call: Call, by_ref: bool) {
        let caller = call.caller;
        let inbound = InboundCall {
            caller,
            target: call.target,
            method: call.method,
            args: self.decode_args(call.args),
            has_block: call.has_block,
            by_ref,
        };
        let job = Job {
            conn: Arc::clone(self),
            call: inbound,
        };
        if let Err(err) = self.pool.dispatch(job) {
            warn!(connection = self.serial, %caller, error = %err, "could not dispatch inbound call");
            self.reply(caller, Err(err), false);
        }
    }

    fn decode_return(self: &Arc<Self>, ret: Return) -> RpcResult<Value> {
        let value = self.make_object(ret.payload)?;
        if !ret.is_error {
            return Ok(value);
        }
        match value {
            Value::Error(err) => Err(RpcError::from_error_value(err)),
            other => Err(RpcError::runtime(other.inspect())),
        }
    }

    /// Fail everything still in flight and drop every table entry.
    fn teardown(&self, cause: &RpcError) {
        self.closed.store(true, Ordering::Release);
        match cause {
            RpcError::Connection(msg) => info!(connection = self.serial, peer = %self.peer, "connection closed: {msg}"),
            other => error!(connection = self.serial, peer = %self.peer, error = %other, "connection failed"),
        }

        if let Err(e) = self.control.shutdown() {
            trace!(connection = self.serial, error = %e, "transport already shut down");
        }

        let failure = match cause {
            RpcError::Connection(_) => cause.clone(),
            other => RpcError::connection(other.to_string()),
        };
        let woken = self.pending.close(&failure);
        if woken > 0 {
            debug!(connection = self.serial, callers = woken, "failed pending callers");
        }

        let dropped = self.tables.lock().clear();
        drop(dropped);
        self.pool.shutdown();
    }

    /// Called from a proxy's destructor.
    pub(crate) fn queue_release(&self, id: ObjectId) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.releases.send(id) {
            trace!(connection = self.serial, id = %e.into_inner(), "releaser gone, release dropped");
        }
    }

    fn send_release(&self, id: ObjectId) {
        if !self.tables.lock().forget_remote(id) {
            trace!(connection = self.serial, %id, "proxy revived, release skipped");
            return;
        }
        if self.is_closed() {
            return;
        }
        match self.send(&Message::Release(Release { id })) {
            Ok(()) => ConnectionStats::bump(&self.stats.releases_sent),
            Err(err) => debug!(connection = self.serial, %id, error = %err, "release not sent"),
        }
    }
}

fn release_loop(conn: &Weak<Shared>, rx: &Receiver<ObjectId>) {
    while let Ok(id) = rx.recv() {
        let Some(conn) = conn.upgrade() else {
            break;
        };
        conn.send_release(id);
    }
}

/// Builder for [`Connection`].
#[derive(Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    root: Option<Arc<dyn RemoteObject>>,
    policy: Option<Arc<dyn SecurityPolicy>>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl ConnectionBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Export `root` as the object the peer reaches through id 0.
    #[must_use]
    pub fn root(mut self, root: Arc<dyn RemoteObject>) -> Self {
        self.root = Some(root);
        self
    }

    /// Export `root` as the root object.
    #[must_use]
    pub fn root_object(self, root: impl RemoteObject) -> Self {
        self.root(Arc::new(root))
    }

    /// Replace the default deny list.
    #[must_use]
    pub fn policy(mut self, policy: impl SecurityPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Share a policy between connections.
    #[must_use]
    pub fn shared_policy(mut self, policy: Arc<dyn SecurityPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Use a serializer other than the one named in the configuration.
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Connect to `endpoint` (`host[:port]`) and open a connection on it.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the peer is unreachable.
    pub fn connect(self, endpoint: &str) -> RpcResult<Connection> {
        let transport = TransportType::parse_client(endpoint)?.connect()?;
        self.open_boxed(transport)
    }

    /// Open a connection over an established transport.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the transport cannot be
    /// split into reading and writing halves.
    pub fn open(self, transport: impl Transport) -> RpcResult<Connection> {
        self.open_boxed(Box::new(transport))
    }

    /// Open a connection over a boxed transport.
    ///
    /// # Errors
    ///
    /// See [`ConnectionBuilder::open`].
    pub fn open_boxed(self, transport: Box<dyn Transport>) -> RpcResult<Connection> {
        let Self {
            config,
            root,
            policy,
            serializer,
        } = self;
        config.validate()?;
        transport.configure()?;
        let reader = transport.try_clone_transport()?;
        let control = transport.try_clone_transport()?;

        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let prefix = config.thread_prefix.clone();
        let peer = transport.description();
        let (release_tx, release_rx) = channel::unbounded();

        let shared = Arc::new(Shared {
            serial,
            peer,
            serializer: serializer.unwrap_or_else(|| config.serializer.build()),
            decoder: MessageDecoder::new(config.ref_call_enabled),
            codec: FrameCodec::with_max_size(config.max_frame_size),
            policy: policy.unwrap_or_else(|| Arc::new(DenyList::default())),
            writer: Mutex::new(transport),
            control,
            tables: Mutex::new(ObjectTables::new(root.map(Handle::Local))),
            pending: PendingCalls::new(),
            pool: WorkerPool::new(config.pool_size, format!("{prefix}-worker-{serial}")),
            releases: release_tx,
            next_call: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            stats: ConnectionStats::default(),
            config,
        });

        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name(format!("{prefix}-release-{serial}"))
            .spawn(move || release_loop(&weak, &release_rx))?;

        let reader_handle = thread::Builder::new()
            .name(format!("{prefix}-reader-{serial}"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.run_reader(reader)
            })?;

        info!(
            connection = serial,
            peer = %shared.peer,
            serializer = shared.serializer.name(),
            "connection open"
        );

        Ok(Connection {
            root: Proxy::root(Arc::clone(&shared)),
            shared,
            reader: Arc::new(Mutex::new(Some(reader_handle))),
        })
    }
}

/// Handle to an open connection.
///
/// Clones share the same connection. Dropping every handle does not close
/// the connection; it stays up until the transport fails or [`close`] is
/// called.
///
/// [`close`]: Connection::close
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    root: Proxy,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Connection {
    /// Configure a new connection.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Open a connection with default settings, optionally exporting `root`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionBuilder::open`].
    pub fn open(transport: impl Transport, root: Option<Arc<dyn RemoteObject>>) -> RpcResult<Self> {
        let builder = ConnectionBuilder::new();
        match root {
            Some(root) => builder.root(root).open(transport),
            None => builder.open(transport),
        }
    }

    /// Connect to `endpoint` with default settings and no root object.
    ///
    /// An empty endpoint means `localhost` on [`crate::DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// See [`ConnectionBuilder::connect`].
    pub fn connect(endpoint: &str) -> RpcResult<Self> {
        ConnectionBuilder::new().connect(endpoint)
    }

    /// Proxy for the peer's root object.
    pub fn root(&self) -> &Proxy {
        &self.root
    }

    /// Call `method` on the peer's root object.
    ///
    /// # Errors
    ///
    /// Any error raised on the remote side, or a connection error.
    pub fn call(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.root.call(method, args)
    }

    /// Proxy for an arbitrary id in the peer's tables.
    ///
    /// The proxy is tracked like any other: dropping it releases `id` on the
    /// peer. Id 0 yields the root proxy.
    pub fn proxy_for(&self, id: ObjectId) -> Proxy {
        if id.is_root() {
            return self.root.clone();
        }
        self.shared.remote_object(id)
    }

    /// Shut the transport down; blocked callers fail with a connection error.
    ///
    /// # Errors
    ///
    /// Returns the transport's shutdown error, unless it was already closed.
    pub fn close(&self) -> RpcResult<()> {
        if self.shared.is_closed() {
            return Ok(());
        }
        info!(connection = self.shared.serial, "closing connection");
        match self.shared.control.shutdown() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the reader thread to finish, i.e. for the connection to end.
    pub fn join(&self) {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(connection = self.shared.serial, "reader thread panicked");
        }
    }

    /// Check if the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Process-unique number of this connection, used in thread names.
    pub fn serial(&self) -> u64 {
        self.shared.serial
    }

    /// Description of the peer.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Active configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Configured security level. Carried for applications; the engine
    /// itself does not interpret it.
    pub fn security_level(&self) -> u8 {
        self.shared.config.security_level
    }

    /// Number of objects currently exported to the peer.
    pub fn exported_count(&self) -> usize {
        self.shared.tables.lock().exported_count()
    }

    /// Number of live proxies for the peer's objects.
    pub fn proxy_count(&self) -> usize {
        self.shared.tables.lock().proxy_count()
    }

    /// Number of calls and yields waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Idle workers ready to take an inbound call.
    pub fn idle_workers(&self) -> usize {
        self.shared.pool.idle()
    }

    /// Snapshot of the connection counters.
    pub fn stats(&self) -> StatsSnapshot {
        let (exported, proxies) = {
            let tables = self.shared.tables.lock();
            (tables.exported_count(), tables.proxy_count())
        };
        self.shared.stats.snapshot(exported, proxies)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("serial", &self.shared.serial)
            .field("peer", &self.shared.peer)
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}
