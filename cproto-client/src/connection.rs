//! Connection management.
//!
//! A [`Connection`] owns one TCP socket driven by a dedicated I/O thread.
//! Caller threads dispatch calls concurrently: each call gets a fresh
//! sequence number, claims a slot in the [`CompletionTable`] and queues its
//! frame for the writer. The I/O thread resolves slots from inbound frames,
//! from the periodic deadline sweep, or all at once when the connection fails.

use crate::answer::Answer;
use crate::clock::{duration_ms_ceil, Clock};
use crate::error::ClientError;
use crate::io;
use crate::table::{Completion, CompletionTable};
use bytes::Bytes;
use cproto_protocol::{Args, CmdCode, Encoder};
use parking_lot::{Condvar, Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default completion table capacity.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 40;

const MIN_DEADLINE_CHECK_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) const TERMINATED: &str = "connection terminated";

/// Sequence number of the login call. Regular calls start after it and
/// never share the completion table with it.
pub(crate) const LOGIN_SEQ: u32 = 0;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database opened by the login call.
    pub database: String,
    /// Upper bound for dial + login. Zero means no limit.
    pub login_timeout: Duration,
    /// Default per-call timeout used by [`Client`](crate::Client).
    pub request_timeout: Duration,
    /// Idle interval after which a ping is sent. Zero disables keep-alive.
    pub keep_alive_interval: Duration,
    /// Period of the deadline sweep.
    pub deadline_check_interval: Duration,
    /// Completion table capacity.
    pub max_pending_calls: usize,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            login_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(30),
            deadline_check_interval: Duration::from_secs(1),
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_deadline_check_interval(mut self, interval: Duration) -> Self {
        self.deadline_check_interval = interval.max(MIN_DEADLINE_CHECK_INTERVAL);
        self
    }

    pub fn with_max_pending_calls(mut self, capacity: usize) -> Self {
        self.max_pending_calls = capacity.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// Applies the builder limits to fields set directly.
    fn normalized(self) -> Self {
        let interval = self.deadline_check_interval;
        let capacity = self.max_pending_calls;
        let size = self.read_buffer_size;
        self.with_deadline_check_interval(interval)
            .with_max_pending_calls(capacity)
            .with_read_buffer_size(size)
    }
}

/// Connection lifecycle. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Init,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Failed,
        }
    }
}

/// Handler for server-pushed update frames.
pub type UpdatesHandler = Arc<dyn for<'a> Fn(Result<Answer<'a>, ClientError>) + Send + Sync>;

struct Failure {
    reason: String,
    while_connecting: bool,
}

/// State shared between the connection handle, the I/O thread and the
/// completions that refer back to the connection.
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    state: AtomicU8,
    failure: Mutex<Option<Failure>>,
    pub(crate) table: CompletionTable,
    /// Deadline of the login call while it is in flight.
    login: Mutex<Option<u64>>,
    next_seq: AtomicU32,
    pending_waiters: AtomicUsize,
    terminate: AtomicBool,
    pub(crate) clock: Clock,
    outbound: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    pub(crate) wake: Notify,
    io_thread: OnceLock<ThreadId>,
    io_handle: Mutex<Option<JoinHandle<()>>>,
    updates: RwLock<Option<UpdatesHandler>>,
    pub(crate) last_read: AtomicU64,
    server_start_time: AtomicI64,
}

impl Shared {
    fn new(config: ConnectionConfig) -> Self {
        let config = config.normalized();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            table: CompletionTable::new(config.max_pending_calls),
            config,
            state: AtomicU8::new(ConnectionState::Init as u8),
            failure: Mutex::new(None),
            login: Mutex::new(None),
            next_seq: AtomicU32::new(LOGIN_SEQ + 1),
            pending_waiters: AtomicUsize::new(0),
            terminate: AtomicBool::new(false),
            clock: Clock::new(),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            wake: Notify::new(),
            io_thread: OnceLock::new(),
            io_handle: Mutex::new(None),
            updates: RwLock::new(None),
            last_read: AtomicU64::new(0),
            server_start_time: AtomicI64::new(0),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.state() == ConnectionState::Failed
    }

    pub(crate) fn terminating(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_io_thread(&self) {
        let _ = self.io_thread.set(thread::current().id());
    }

    fn on_io_thread(&self) -> bool {
        self.io_thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.outbound_rx.lock().take()
    }

    pub(crate) fn updates_handler(&self) -> Option<UpdatesHandler> {
        self.updates.read().clone()
    }

    /// Error returned to callers once the connection has failed.
    fn failure_error(&self) -> ClientError {
        let reason = match &*self.failure.lock() {
            Some(failure) => failure.reason.clone(),
            None => TERMINATED.to_string(),
        };
        ClientError::ConnectionFailed(reason)
    }

    fn failed_while_connecting(&self) -> Option<String> {
        self.failure
            .lock()
            .as_ref()
            .filter(|f| f.while_connecting)
            .map(|f| f.reason.clone())
    }

    /// Moves the connection to `Failed` and resolves every outstanding call.
    ///
    /// Only the first failure is recorded; later calls are no-ops.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let while_connecting = {
            let mut failure = self.failure.lock();
            let previous = ConnectionState::from_u8(
                self.state.swap(ConnectionState::Failed as u8, Ordering::SeqCst),
            );
            if previous == ConnectionState::Failed {
                return;
            }
            let while_connecting = previous != ConnectionState::Connected;
            *failure = Some(Failure {
                reason: reason.clone(),
                while_connecting,
            });
            while_connecting
        };

        if reason == TERMINATED {
            tracing::info!("Connection to {} terminated", self.config.addr);
        } else if while_connecting {
            tracing::warn!("Connect to {} failed: {}", self.config.addr, reason);
        } else {
            tracing::warn!("Connection to {} failed: {}", self.config.addr, reason);
        }
        self.wake.notify_one();

        let outstanding = self.table.take_all();
        if !outstanding.is_empty() {
            tracing::debug!("Failing {} outstanding calls", outstanding.len());
        }
        for entry in outstanding {
            entry.resolve(Err(ClientError::ConnectionFailed(reason.clone())));
        }
    }

    /// Spawns the I/O thread on first use.
    fn ensure_started(self: &Arc<Self>) {
        if self.state() != ConnectionState::Init {
            return;
        }
        if self
            .state
            .compare_exchange(
                ConnectionState::Init as u8,
                ConnectionState::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        tracing::info!("Connecting to {}", self.config.addr);
        match io::spawn(self.clone()) {
            Ok(handle) => *self.io_handle.lock() = Some(handle),
            Err(e) => self.fail(format!("failed to spawn I/O thread: {}", e)),
        }
    }

    /// Registers a call and queues its frame.
    ///
    /// Either returns `Ok` and the completion is invoked exactly once later,
    /// or returns `Err` and the completion is never invoked.
    pub(crate) fn dispatch<F>(
        self: &Arc<Self>,
        command: CmdCode,
        timeout: Duration,
        args: &Args,
        completion: F,
    ) -> Result<(), ClientError>
    where
        F: for<'a> FnOnce(Result<Answer<'a>, ClientError>) + Send + 'static,
    {
        self.ensure_started();
        if self.is_failed() {
            return Err(self.failure_error());
        }
        if self.terminating() {
            return Err(ClientError::ConnectionFailed(TERMINATED.to_string()));
        }

        let seq = self.next_seq_after_login();
        let exec_timeout_ms = i64::try_from(duration_ms_ceil(timeout)).unwrap_or(i64::MAX);
        let frame = Encoder::encode_call(command, seq, args, exec_timeout_ms)?.freeze();
        let deadline = self.clock.deadline_after(timeout);

        let completion: Completion = Box::new(completion);
        if self.table.claim(seq, command, deadline, completion).is_err() {
            tracing::debug!("Call seq={} cmd={} rejected: completion slot busy", seq, command);
            return Err(ClientError::Busy {
                capacity: self.table.capacity(),
            });
        }

        tracing::debug!(
            "Call seq={} cmd={} ({} bytes, timeout={:?})",
            seq,
            command,
            frame.len(),
            timeout
        );

        if self.is_failed() || self.outbound.send(frame).is_err() {
            // Reclaim the slot unless the failure cascade already resolved it.
            if self.table.take(seq).is_some() {
                return Err(self.failure_error());
            }
        }
        Ok(())
    }

    fn next_seq_after_login(&self) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq != LOGIN_SEQ {
                return seq;
            }
        }
    }

    /// Arms the login call and returns the frame to write first.
    pub(crate) fn prepare_login(&self, deadline: u64) -> Result<Bytes, ClientError> {
        let args = cproto_protocol::args![
            self.config.user.as_str(),
            self.config.password.as_str(),
            self.config.database.as_str()
        ];
        let frame = Encoder::encode_call(CmdCode::Login, LOGIN_SEQ, &args, 0)?.freeze();
        *self.login.lock() = Some(deadline);
        tracing::debug!(
            "Login seq={} user={:?} database={:?}",
            LOGIN_SEQ,
            self.config.user,
            self.config.database
        );
        Ok(frame)
    }

    /// Returns whether `seq` answers the login call still in flight.
    pub(crate) fn take_login(&self, seq: u32) -> bool {
        seq == LOGIN_SEQ && self.login.lock().take().is_some()
    }

    pub(crate) fn on_login(&self, result: Result<Answer<'_>, ClientError>) {
        match result.and_then(|answer| answer.args(0)) {
            Ok(args) => {
                if let Some(start) = args.get(1).and_then(|v| v.as_i64()) {
                    self.server_start_time.store(start, Ordering::Relaxed);
                }
                if self
                    .state
                    .compare_exchange(
                        ConnectionState::Connecting as u8,
                        ConnectionState::Connected as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    tracing::info!("Connected to {}", self.config.addr);
                }
            }
            Err(ClientError::Timeout) => self.fail("login timeout"),
            Err(ClientError::ConnectionFailed(_)) => {}
            Err(e) => self.fail(format!("login failed: {}", e)),
        }
    }

    /// Resolves every call whose deadline has passed with `Timeout`.
    pub(crate) fn sweep_deadlines(&self) {
        let now = self.clock.now();
        let login_expired = {
            let mut login = self.login.lock();
            match *login {
                Some(deadline) if deadline != 0 && now >= deadline => login.take().is_some(),
                _ => false,
            }
        };
        if login_expired {
            self.on_login(Err(ClientError::Timeout));
        }

        for entry in self.table.take_expired(now) {
            tracing::debug!("Call seq={} cmd={} timed out", entry.seq, entry.command);
            entry.resolve(Err(ClientError::Timeout));
        }
    }

    /// Sends a ping when nothing was read during the last interval.
    pub(crate) fn keep_alive(self: &Arc<Self>) {
        if self.terminating() || self.state() != ConnectionState::Connected {
            return;
        }
        let interval = self.config.keep_alive_interval;
        let idle = self
            .clock
            .now()
            .saturating_sub(self.last_read.load(Ordering::Relaxed));
        if idle < duration_ms_ceil(interval) {
            return;
        }

        tracing::debug!("Connection idle for {}ms, sending keep-alive ping", idle);
        let weak = Arc::downgrade(self);
        let sent = self.dispatch(CmdCode::Ping, interval, &Args::new(), move |result| {
            if let Err(ClientError::Timeout) = result {
                if let Some(shared) = weak.upgrade() {
                    shared.fail("keep-alive ping timeout");
                }
            }
        });
        if let Err(e) = sent {
            tracing::debug!("Keep-alive ping not sent: {}", e);
        }
    }
}

/// Per-call rendezvous for synchronous callers.
struct Waiter {
    result: Mutex<Option<Result<Answer<'static>, ClientError>>>,
    ready: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<Answer<'static>, ClientError>) {
        *self.result.lock() = Some(result);
        self.ready.notify_one();
    }

    fn wait(&self) -> Result<Answer<'static>, ClientError> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            self.ready.wait(&mut guard);
        }
    }
}

struct WaiterCount<'a>(&'a AtomicUsize);

impl<'a> WaiterCount<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for WaiterCount<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection to a cproto server.
///
/// The connection is established lazily on the first call (or by
/// [`Connection::connect`]) and is never re-established after it fails.
/// Dropping it terminates the connection and joins its I/O thread.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Starts connecting and waits for the login handshake to complete.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let timeout = self.shared.config.request_timeout;
        match self.call(CmdCode::Ping, timeout, &Args::new()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_connection_failure() => match self.shared.failed_while_connecting() {
                Some(reason) => Err(ClientError::ConnectFailed(reason)),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reason of the failure, once the connection is `Failed`.
    pub fn last_error(&self) -> Option<String> {
        self.shared.failure.lock().as_ref().map(|f| f.reason.clone())
    }

    /// Issues a call and returns immediately.
    ///
    /// On `Ok`, `completion` is invoked exactly once, normally on the I/O
    /// thread, with a payload borrowed from the receive buffer. On `Err` it
    /// is never invoked. A zero `timeout` means no deadline.
    pub fn call_async<F>(
        &self,
        command: CmdCode,
        timeout: Duration,
        args: &Args,
        completion: F,
    ) -> Result<(), ClientError>
    where
        F: for<'a> FnOnce(Result<Answer<'a>, ClientError>) + Send + 'static,
    {
        self.shared.dispatch(command, timeout, args, completion)
    }

    /// Issues a call and blocks the current thread until it resolves.
    ///
    /// Must not be called from the connection's I/O thread (for example from
    /// inside a completion); doing so returns [`ClientError::IoThreadCall`].
    pub fn call_sync(
        &self,
        command: CmdCode,
        timeout: Duration,
        args: &Args,
    ) -> Result<Answer<'static>, ClientError> {
        if self.shared.on_io_thread() {
            return Err(ClientError::IoThreadCall);
        }

        let _waiting = WaiterCount::enter(&self.shared.pending_waiters);
        let waiter = Arc::new(Waiter::new());
        let notify = waiter.clone();
        self.shared.dispatch(command, timeout, args, move |result| {
            notify.complete(result.map(Answer::into_owned));
        })?;
        waiter.wait()
    }

    /// Issues a call and awaits its answer.
    pub async fn call(
        &self,
        command: CmdCode,
        timeout: Duration,
        args: &Args,
    ) -> Result<Answer<'static>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.shared.dispatch(command, timeout, args, move |result| {
            let _ = tx.send(result.map(Answer::into_owned));
        })?;
        rx.await
            .map_err(|_| ClientError::ConnectionFailed("completion dropped".to_string()))?
    }

    /// Installs the handler for server-pushed `Updates` frames.
    ///
    /// The handler runs on the I/O thread.
    pub fn set_updates_handler<F>(&self, handler: F)
    where
        F: for<'a> Fn(Result<Answer<'a>, ClientError>) + Send + Sync + 'static,
    {
        *self.shared.updates.write() = Some(Arc::new(handler));
    }

    /// Fails the connection and every outstanding call.
    pub fn terminate(&self) {
        let shared = &self.shared;
        if shared.terminate.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Terminating connection to {}", shared.config.addr);
        if shared.state() == ConnectionState::Init {
            shared.fail(TERMINATED);
        }
        shared.wake.notify_one();
    }

    /// Number of calls currently holding a completion slot.
    pub fn pending_calls(&self) -> usize {
        self.shared.table.in_use()
    }

    /// Number of threads blocked in [`Connection::call_sync`].
    pub fn pending_waiters(&self) -> usize {
        self.shared.pending_waiters.load(Ordering::SeqCst)
    }

    /// Milliseconds since the connection was created.
    pub fn now(&self) -> u64 {
        self.shared.clock.now()
    }

    /// Server start timestamp reported by the login reply, if any.
    pub fn server_start_time(&self) -> Option<i64> {
        match self.shared.server_start_time.load(Ordering::Relaxed) {
            0 => None,
            start => Some(start),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.terminate();
        let handle = self.shared.io_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.shared.config.addr)
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
