//! The connection multiplexer (§4.G): owns the socket, runs the auth
//! handshake, then drives a single dispatcher task that demultiplexes
//! method-returns to waiting callers and signals to registered handlers.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::address::{self, Address};
use crate::error::{Error, ErrorKind, Result};
use crate::matchrule::MatchRule;
use crate::message::{Message, MessageKind};
use crate::sasl::{AuthMachine, AuthOutcome, External, Mechanism};
use crate::transport::{Transport, UnixTransport};
use crate::value::Value;

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

const ORG_FREEDESKTOP_DBUS: &str = "org.freedesktop.DBus";
const ORG_FREEDESKTOP_DBUS_PATH: &str = "/org/freedesktop/DBus";

/// A signal handler registered via [`Bus::add_signal_handler`].
struct SignalHandlerEntry {
    rule: MatchRule,
    callback: Box<dyn Fn(&Message) + Send + Sync>,
}

struct Inner {
    write: AsyncMutex<OwnedWriteHalf>,
    serial: AtomicU32,
    waiters: StdMutex<HashMap<u32, oneshot::Sender<Message>>>,
    handlers: StdMutex<Vec<Arc<SignalHandlerEntry>>>,
    unique_name: StdMutex<Option<String>>,
    guid: StdMutex<Option<String>>,
    closed: AtomicBool,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn next_serial(&self) -> NonZeroU32 {
        loop {
            let value = self.serial.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

            if let Some(serial) = NonZeroU32::new(value) {
                return serial;
            }
        }
    }

    fn fail_all_waiters(&self) {
        // Dropping each sender wakes its `call()` with a `RecvError`, which
        // is mapped to `connection-closed` (§7).
        self.waiters.lock().unwrap().clear();
    }
}

/// Awaits a pending call's reply, evicting its waiter-table entry if this
/// future is dropped before the reply arrives (§5's cancellation model: a
/// cancelled call is "marked cancelled and removed", not left to leak until
/// a reply the caller will never see shows up).
struct PendingReply<'a> {
    inner: &'a Inner,
    serial: u32,
    rx: oneshot::Receiver<Message>,
}

impl Future for PendingReply<'_> {
    type Output = Result<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| Error::new(ErrorKind::ConnectionClosed)))
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if self.rx.try_recv().is_err() {
            if self.inner.waiters.lock().unwrap().remove(&self.serial).is_some() {
                tracing::debug!(serial = self.serial, "pending call dropped, waiter evicted");
            }
        }
    }
}

/// A connection to the bus: the multiplexer described in §4.G.
///
/// `Bus` is a cheap, `Clone`-able handle; cloning shares the same
/// underlying socket, serial counter, waiter table and dispatcher task.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl Bus {
    /// This connection's broker-assigned unique name, granted by `Hello`
    /// during [`BusBuilder::connect`].
    pub fn unique_name(&self) -> Option<String> {
        self.inner.unique_name.lock().unwrap().clone()
    }

    /// The handshake GUID reported by the broker in the SASL `OK <guid>`
    /// line, kept for diagnostics.
    pub fn guid(&self) -> Option<String> {
        self.inner.guid.lock().unwrap().clone()
    }

    /// Send a method call and wait for its reply.
    ///
    /// Returns the decoded body of the matching `method_return`, or
    /// [`Error::as_error_reply`] if the broker (or the method's
    /// implementation) replied with an error message carrying this call's
    /// reply-serial.
    pub async fn call(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        destination: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let message = Message::method_call(path, member)
            .with_interface(interface)
            .with_destination(destination)
            .with_body(args);

        let reply = self.send_and_wait(message).await?;

        match reply.kind() {
            MessageKind::MethodReturn { .. } => Ok(reply.body().to_vec()),
            MessageKind::Error { error_name, .. } => Err(Error::new(ErrorKind::ErrorReply {
                name: error_name.clone(),
                body: Value::Struct(reply.body().to_vec()),
            })),
            // The dispatcher only ever completes a waiter with a
            // method-return or error carrying this call's reply-serial.
            _ => unreachable!("dispatcher only delivers replies to waiters"),
        }
    }

    async fn send_and_wait(&self, message: Message) -> Result<Message> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        let serial = self.inner.next_serial();
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().unwrap().insert(serial.get(), tx);

        if let Err(err) = self.write_message(&message, serial).await {
            self.inner.waiters.lock().unwrap().remove(&serial.get());
            return Err(err);
        }

        PendingReply {
            inner: &self.inner,
            serial: serial.get(),
            rx,
        }
        .await
    }

    /// Emit a signal; no reply is expected or possible.
    pub async fn emit_signal(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        let message = Message::signal(path, member)
            .with_interface(interface)
            .with_no_reply_expected()
            .with_body(args);
        self.send_no_reply(message).await
    }

    /// Send a method call that does not expect a reply.
    pub async fn send_method_call_no_reply(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        destination: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<()> {
        let message = Message::method_call(path, member)
            .with_interface(interface)
            .with_destination(destination)
            .with_no_reply_expected()
            .with_body(args);
        self.send_no_reply(message).await
    }

    async fn send_no_reply(&self, message: Message) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        let serial = self.inner.next_serial();
        self.write_message(&message, serial).await
    }

    async fn write_message(&self, message: &Message, serial: NonZeroU32) -> Result<()> {
        let bytes = message.encode(serial)?;
        let mut write = self.inner.write.lock().await;
        write.write_all(&bytes).await?;
        Ok(())
    }

    /// Register a callback for signals matching `rule`, and install the
    /// rule with the broker via `AddMatch`.
    pub async fn add_signal_handler<F>(&self, rule: MatchRule, callback: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().unwrap().push(Arc::new(SignalHandlerEntry {
            rule: rule.clone(),
            callback: Box::new(callback),
        }));

        self.call(
            ORG_FREEDESKTOP_DBUS_PATH,
            ORG_FREEDESKTOP_DBUS,
            "AddMatch",
            ORG_FREEDESKTOP_DBUS,
            vec![Value::String(rule.to_string())],
        )
        .await?;

        Ok(())
    }

    /// Close the connection: the dispatcher task is stopped, every
    /// outstanding waiter is failed with `connection-closed`, and further
    /// sends fail immediately.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        if let Some(handle) = self.inner.dispatcher.lock().unwrap().take() {
            handle.abort();
        }

        self.inner.fail_all_waiters();
    }
}

/// Which mechanisms to offer during the SASL handshake; defaults to
/// `EXTERNAL` authenticating as the current process's user id.
fn default_mechanisms() -> Vec<Box<dyn Mechanism>> {
    #[cfg(all(unix, feature = "libc"))]
    {
        vec![Box::new(External::from_current_user())]
    }

    #[cfg(not(all(unix, feature = "libc")))]
    {
        Vec::new()
    }
}

enum BusKind {
    Session,
    System,
    Address(String),
}

/// Configures and opens a [`Bus`] connection (§6's `open_session()` /
/// `open_system()` constructors).
pub struct BusBuilder {
    kind: BusKind,
    mechanisms: Option<Vec<Box<dyn Mechanism>>>,
    transport: Box<dyn Transport>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self {
            kind: BusKind::Session,
            mechanisms: None,
            transport: Box::new(UnixTransport),
        }
    }

    /// Connect to the session bus, resolving its address from
    /// `DBUS_SESSION_BUS_ADDRESS`.
    pub fn session_bus(mut self) -> Self {
        self.kind = BusKind::Session;
        self
    }

    /// Connect to the system bus, resolving its address from
    /// `DBUS_SYSTEM_BUS_ADDRESS` or falling back to the canonical system
    /// socket path.
    pub fn system_bus(mut self) -> Self {
        self.kind = BusKind::System;
        self
    }

    /// Connect to an explicit address, bypassing environment discovery.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.kind = BusKind::Address(address.into());
        self
    }

    /// Override the auth mechanisms tried during the handshake. Defaults to
    /// a single `EXTERNAL` mechanism authenticating as the current uid.
    pub fn mechanisms(mut self, mechanisms: Vec<Box<dyn Mechanism>>) -> Self {
        self.mechanisms = Some(mechanisms);
        self
    }

    /// Override how the underlying byte stream is established. Defaults to
    /// [`UnixTransport`].
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Establish the connection: dial the transport, run the SASL
    /// handshake, start the dispatcher, then call `Hello` and store the
    /// returned unique name.
    pub async fn connect(self) -> Result<Bus> {
        let address = self.resolve_address()?;
        let parsed = address::parse(&address)?;

        tracing::debug!(address = %address, "connecting to bus");

        let stream = self.transport.connect(&parsed).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mechanisms = self.mechanisms.unwrap_or_else(default_mechanisms);
        let guid = run_auth(&mut reader, &mut write_half, mechanisms).await?;

        tracing::debug!(?guid, "sasl handshake complete");

        let inner = Arc::new(Inner {
            write: AsyncMutex::new(write_half),
            serial: AtomicU32::new(0),
            waiters: StdMutex::new(HashMap::new()),
            handlers: StdMutex::new(Vec::new()),
            unique_name: StdMutex::new(None),
            guid: StdMutex::new(guid),
            closed: AtomicBool::new(false),
            dispatcher: StdMutex::new(None),
        });

        let dispatcher_inner = Arc::clone(&inner);
        let handle = tokio::spawn(run_dispatcher(reader, dispatcher_inner));
        *inner.dispatcher.lock().unwrap() = Some(handle);

        let bus = Bus { inner };

        let hello = bus
            .call(
                ORG_FREEDESKTOP_DBUS_PATH,
                ORG_FREEDESKTOP_DBUS,
                "Hello",
                ORG_FREEDESKTOP_DBUS,
                Vec::new(),
            )
            .await?;

        if let Some(Value::String(name)) = hello.into_iter().next() {
            tracing::debug!(unique_name = %name, "hello complete");
            *bus.inner.unique_name.lock().unwrap() = Some(name);
        }

        Ok(bus)
    }

    fn resolve_address(&self) -> Result<String> {
        match &self.kind {
            BusKind::Address(address) => Ok(address.clone()),
            BusKind::Session => env::var(ENV_SESSION_BUS).map_err(|_| Error::new(ErrorKind::MissingBus)),
            BusKind::System => Ok(env::var(ENV_SYSTEM_BUS).unwrap_or_else(|_| DEFAULT_SYSTEM_BUS.to_owned())),
        }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the SASL handshake (§4.D) to completion, returning the broker's
/// handshake GUID if one was reported.
async fn run_auth(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    mechanisms: Vec<Box<dyn Mechanism>>,
) -> Result<Option<String>> {
    let mut machine = AuthMachine::new(mechanisms);

    let initial = machine.start()?;
    writer.write_all(&initial).await?;
    writer.write_all(b"\r\n").await?;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;

        if n == 0 {
            return Err(Error::new(ErrorKind::AuthFailed));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        tracing::trace!(line = %trimmed, "sasl <-");

        let guid = trimmed
            .strip_prefix("OK ")
            .map(|rest| rest.trim().to_owned());

        match machine.receive_line(trimmed)? {
            AuthOutcome::Continue(out) => {
                writer.write_all(&out).await?;
                writer.write_all(b"\r\n").await?;
            }
            AuthOutcome::Begin(out) => {
                writer.write_all(&out).await?;
                writer.write_all(b"\r\n").await?;
                return Ok(guid);
            }
        }
    }
}

/// The single dispatcher task (§4.G, §5): owns the read side exclusively,
/// repeatedly parsing and dispatching one message at a time.
async fn run_dispatcher(mut reader: BufReader<OwnedReadHalf>, inner: Arc<Inner>) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match take_message(&buf) {
            TakeMessage::NeedMoreBytes => match reader.read(&mut chunk).await {
                Ok(0) => {
                    tracing::debug!("connection closed by peer");
                    break;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(error) => {
                    tracing::warn!(%error, "transport read failed");
                    break;
                }
            },
            TakeMessage::Message(message, consumed) => {
                buf.drain(0..consumed);
                dispatch(&inner, message);
            }
            // §7: a malformed message body is dropped and logged, not fatal
            // to the connection — the frame's total length is already known
            // from its prefix, so the buffer can still be resynced past it.
            TakeMessage::BodyError(error, consumed) => {
                tracing::warn!(%error, "dropping malformed message");
                buf.drain(0..consumed);
            }
            // A `decode_prefix` failure means even the frame's length is
            // unknown, so there is no way to resync the buffer; this is
            // fatal per §7's "repeated framing corruption" carve-out.
            TakeMessage::PrefixError(error) => {
                tracing::warn!(%error, "malformed frame prefix, closing connection");
                break;
            }
        }
    }

    inner.closed.store(true, Ordering::SeqCst);
    inner.fail_all_waiters();
}

/// The outcome of attempting to parse one message from the dispatcher's
/// read buffer.
enum TakeMessage {
    /// The buffer doesn't yet hold a complete frame; read more bytes.
    NeedMoreBytes,
    /// A complete message was parsed; `usize` is how many bytes to drain.
    Message(Message, usize),
    /// The frame's body failed to decode, but its length (and thus how many
    /// bytes to drain to resync) is known.
    BodyError(Error, usize),
    /// The frame's fixed prefix failed to parse; its length is unknown, so
    /// the connection cannot be resynced.
    PrefixError(Error),
}

fn take_message(buf: &[u8]) -> TakeMessage {
    let prefix = match Message::decode_prefix(buf) {
        Ok(prefix) => prefix,
        Err(error) if is_short_buffer(&error) => return TakeMessage::NeedMoreBytes,
        Err(error) => return TakeMessage::PrefixError(error),
    };

    if buf.len() < prefix.total_len {
        return TakeMessage::NeedMoreBytes;
    }

    match Message::decode(buf, &prefix) {
        Ok(message) => TakeMessage::Message(message, prefix.total_len),
        Err(error) => TakeMessage::BodyError(error, prefix.total_len),
    }
}

fn is_short_buffer(error: &Error) -> bool {
    matches!(error.kind(), ErrorKind::ShortBuffer)
}

fn dispatch(inner: &Arc<Inner>, message: Message) {
    match message.kind() {
        MessageKind::MethodReturn { reply_serial } | MessageKind::Error { reply_serial, .. } => {
            let waiter = inner.waiters.lock().unwrap().remove(&reply_serial.get());

            match waiter {
                Some(tx) => {
                    // The receiver may already be gone if the call was
                    // cancelled (§5); the reply is then discarded silently.
                    let _ = tx.send(message);
                }
                None => tracing::debug!(serial = reply_serial.get(), "discarding reply with no waiter"),
            }
        }
        MessageKind::Signal { .. } => {
            let handlers = inner.handlers.lock().unwrap().clone();

            for handler in handlers {
                if !handler.rule.matches(&message) {
                    continue;
                }

                // A handler panic must not take down the dispatcher (§7).
                if std::panic::catch_unwind(AssertUnwindSafe(|| (handler.callback)(&message))).is_err() {
                    tracing::warn!("signal handler panicked");
                }
            }
        }
        MessageKind::MethodCall { .. } => {
            tracing::trace!("ignoring inbound method call; server-side dispatch is out of scope");
        }
    }
}
