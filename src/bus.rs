//! `Bus`: the cheap-clone public handle to a connection.

use crate::address::Address;
use crate::auth::{self, Mechanism};
use crate::conn_state::ConnState;
use crate::error::{Error, Result};
use crate::match_rule::MatchRule;
use crate::message::{HeaderField, HeaderFields, Message, MessageFlag, MessageFlags, MessageType};
use crate::names::validate_object_path;
use crate::raw::ByteOrder;
use crate::registry::{MethodHandler, SignalHandler};
use crate::router::{reply_fields, signature_of, Router};
use crate::signature::Signature;
use crate::transport::{TcpSocket, Transport, UnixSocket};
use crate::value::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const DBUS_DESTINATION: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

struct BusInner {
    address: String,
    conn_state: Arc<ConnState>,
    router: Arc<Router>,
    transport: Transport,
}

/// A connection to a message bus. Cheap to clone: all clones share the same
/// underlying transport and dispatch tables.
#[derive(Clone)]
pub struct Bus(Arc<BusInner>);

impl Bus {
    /// Connect to `system`, `session`, `starter`, or a raw D-Bus address
    /// string, then send `Hello` and store the assigned unique name.
    pub fn connect(address: &str) -> Result<Self> {
        let candidates = Address::resolve(address)?;
        if candidates.is_empty() {
            return Err(Error::Address(format!("no addresses to try for {address:?}")));
        }

        let mut last_err = None;
        for candidate in candidates {
            match Self::connect_one(address, &candidate) {
                Ok(bus) => return Ok(bus),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.expect("at least one candidate was tried"))
    }

    fn connect_one(raw_address: &str, candidate: &Address) -> Result<Self> {
        let (socket, negotiate_fds): (Box<dyn crate::transport::Socket>, bool) = match candidate {
            Address::Unix { path, abstract_name } => {
                let sock = if let Some(path) = path {
                    UnixSocket::connect(std::path::Path::new(path))?
                } else if let Some(name) = abstract_name {
                    UnixSocket::connect_abstract(name.as_bytes())?
                } else {
                    return Err(Error::Address("unix address missing path or abstract".into()));
                };
                (Box::new(sock), true)
            }
            Address::Tcp { host, port } => (Box::new(TcpSocket::connect(host, *port)?), false),
            Address::NonceTcp { host, port, noncefile } => {
                let nonce_bytes = std::fs::read(noncefile)
                    .map_err(|e| Error::Address(format!("cannot read noncefile {noncefile:?}: {e}")))?;
                let mut nonce = [0u8; 16];
                let n = nonce_bytes.len().min(16);
                nonce[..n].copy_from_slice(&nonce_bytes[..n]);
                (Box::new(TcpSocket::connect_nonce(host, *port, &nonce)?), false)
            }
        };

        let mechanism = match candidate {
            Address::Unix { .. } => Mechanism::External,
            _ => Mechanism::DBusCookieSha1,
        };
        let auth_result = auth::authenticate(&*socket, mechanism, negotiate_fds)?;

        let conn_state = Arc::new(ConnState::default());
        conn_state.set_connected(true);
        conn_state
            .unix_fds_enabled
            .store(auth_result.unix_fds_enabled, Ordering::Release);
        *conn_state.guid.lock().expect("conn state lock poisoned") = auth_result.guid;

        let (router, out_rx) = Router::new(conn_state.clone());
        let transport = Transport::new(socket, conn_state.clone());

        let bus = Bus(Arc::new(BusInner {
            address: raw_address.to_string(),
            conn_state,
            router,
            transport,
        }));

        bus.0.transport.start_loops(bus.0.router.clone(), out_rx, bus.clone());

        let hello_reply = bus.method_call_with_timeout(
            DBUS_PATH,
            Some(DBUS_INTERFACE),
            "Hello",
            Some(DBUS_DESTINATION),
            Vec::new(),
            Some(Duration::from_secs(25)),
        )?;
        let unique_name = match hello_reply.into_iter().next() {
            Some(Value::Str(name)) => name,
            _ => return Err(Error::Message("Hello reply did not contain a unique name".into())),
        };
        *bus.0.conn_state.unique_name.lock().expect("conn state lock poisoned") = Some(unique_name);

        Ok(bus)
    }

    pub fn address(&self) -> &str {
        &self.0.address
    }

    pub fn connected(&self) -> bool {
        self.0.conn_state.is_connected()
    }

    pub fn unique_name(&self) -> Option<String> {
        self.0.conn_state.unique_name.lock().expect("conn state lock poisoned").clone()
    }

    pub fn guid(&self) -> Option<String> {
        self.0.conn_state.guid.lock().expect("conn state lock poisoned").clone()
    }

    pub fn unix_fds_enabled(&self) -> bool {
        self.0.conn_state.unix_fds_enabled.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<Error> {
        self.0.conn_state.error()
    }

    /// Shut the transport down. Forbidden to call twice or to reconnect
    /// afterward: a disconnected `Bus` is permanently dead.
    pub fn disconnect(&self) {
        self.0.transport.disconnect();
    }

    /// Block until both loop threads exit (after a disconnect).
    pub fn block(&self, timeout: Option<Duration>) {
        self.0.transport.block(timeout);
    }

    fn check_connected(&self) -> Result<()> {
        if !self.0.conn_state.is_connected() {
            return Err(self
                .0
                .conn_state
                .error()
                .unwrap_or_else(|| Error::Transport("not connected".into())));
        }
        Ok(())
    }

    /// Call a remote method and wait (optionally bounded by `timeout`) for
    /// its reply. `None` timeout waits forever.
    pub fn method_call_with_timeout(
        &self,
        path: &str,
        interface: Option<&str>,
        member: &str,
        destination: Option<&str>,
        body: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>> {
        self.check_connected()?;
        validate_object_path(path)?;

        let mut fields = HeaderFields::new();
        fields.insert(HeaderField::Path, Value::ObjectPath(path.to_string()));
        fields.insert(HeaderField::Member, Value::Str(member.to_string()));
        if let Some(iface) = interface {
            fields.insert(HeaderField::Interface, Value::Str(iface.to_string()));
        }
        if let Some(dest) = destination {
            fields.insert(HeaderField::Destination, Value::Str(dest.to_string()));
        }

        let signature = signature_of(&body);
        let msg = Message::new(
            ByteOrder::NATIVE,
            MessageType::MethodCall,
            MessageFlags::empty(),
            fields,
            signature,
            body,
        )?;

        self.0
            .router
            .outgoing(&msg, timeout)?
            .ok_or_else(|| Error::Message("method call did not expect a reply but was awaited".into()))
    }

    /// `method_call_with_timeout` with a 25-second default timeout, matching
    /// the bus daemon's own default method-call timeout.
    pub fn method_call(
        &self,
        path: &str,
        interface: Option<&str>,
        member: &str,
        destination: Option<&str>,
        body: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.method_call_with_timeout(path, interface, member, destination, body, Some(Duration::from_secs(25)))
    }

    /// Send a METHOD_CALL with `NoReplyExpected` set and no correlation wait.
    pub fn call_no_reply(
        &self,
        path: &str,
        interface: Option<&str>,
        member: &str,
        destination: Option<&str>,
        body: Vec<Value>,
    ) -> Result<()> {
        self.check_connected()?;
        validate_object_path(path)?;

        let mut fields = HeaderFields::new();
        fields.insert(HeaderField::Path, Value::ObjectPath(path.to_string()));
        fields.insert(HeaderField::Member, Value::Str(member.to_string()));
        if let Some(iface) = interface {
            fields.insert(HeaderField::Interface, Value::Str(iface.to_string()));
        }
        if let Some(dest) = destination {
            fields.insert(HeaderField::Destination, Value::Str(dest.to_string()));
        }

        let signature = signature_of(&body);
        let msg = Message::new(
            ByteOrder::NATIVE,
            MessageType::MethodCall,
            MessageFlag::NoReplyExpected.into(),
            fields,
            signature,
            body,
        )?;
        self.0.router.outgoing(&msg, None)?;
        Ok(())
    }

    /// Reply to `original` (a METHOD_CALL) with a METHOD_RETURN carrying `body`.
    pub fn method_return(&self, original: &Message, body: Vec<Value>) -> Result<()> {
        let fields = reply_fields(original.serial(), original.sender().as_deref(), self.unique_name().as_deref());
        let signature = signature_of(&body);
        let msg = Message::new(
            ByteOrder::NATIVE,
            MessageType::MethodReturn,
            MessageFlags::empty(),
            fields,
            signature,
            body,
        )?;
        self.0.router.outgoing(&msg, None)?;
        Ok(())
    }

    /// Reply to `original` with an ERROR message.
    pub fn send_error(&self, original: &Message, error_name: &str, args: Vec<Value>) -> Result<()> {
        let mut fields = reply_fields(original.serial(), original.sender().as_deref(), self.unique_name().as_deref());
        fields.insert(HeaderField::ErrorName, Value::Str(error_name.to_string()));
        let signature = signature_of(&args);
        let msg = Message::new(
            ByteOrder::NATIVE,
            MessageType::Error,
            MessageFlags::empty(),
            fields,
            signature,
            args,
        )?;
        self.0.router.outgoing(&msg, None)?;
        Ok(())
    }

    /// Emit a SIGNAL from `path`/`interface`/`member`.
    pub fn emit_signal(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        destination: Option<&str>,
        body: Vec<Value>,
    ) -> Result<()> {
        self.check_connected()?;
        validate_object_path(path)?;

        let mut fields = HeaderFields::new();
        fields.insert(HeaderField::Path, Value::ObjectPath(path.to_string()));
        fields.insert(HeaderField::Interface, Value::Str(interface.to_string()));
        fields.insert(HeaderField::Member, Value::Str(member.to_string()));
        if let Some(dest) = destination {
            fields.insert(HeaderField::Destination, Value::Str(dest.to_string()));
        }

        let signature = signature_of(&body);
        let msg = Message::new(
            ByteOrder::NATIVE,
            MessageType::Signal,
            MessageFlags::empty(),
            fields,
            signature,
            body,
        )?;
        self.0.router.outgoing(&msg, None)?;
        Ok(())
    }

    /// Register a signal handler for `rule`, sending `AddMatch` to the bus
    /// daemon. If `AddMatch` fails, the local registration is rolled back.
    pub fn register_signal(&self, rule: MatchRule, handler: SignalHandler) -> Result<u64> {
        let id = self.0.router.signals.add(rule.clone(), handler)?;
        if let Err(e) = self.method_call(DBUS_PATH, Some(DBUS_INTERFACE), "AddMatch", Some(DBUS_DESTINATION), vec![Value::Str(rule.to_match_string())]) {
            self.0.router.signals.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Unregister a signal handler previously returned by `register_signal`,
    /// sending `RemoveMatch` for its rule.
    pub fn unregister_signal(&self, id: u64) -> Result<()> {
        if let Some(rule) = self.0.router.signals.remove(id) {
            self.method_call(
                DBUS_PATH,
                Some(DBUS_INTERFACE),
                "RemoveMatch",
                Some(DBUS_DESTINATION),
                vec![Value::Str(rule.to_match_string())],
            )?;
        }
        Ok(())
    }

    /// Register a method handler for `(path, interface, member)`, optionally
    /// validating the inbound body against `expected_signature`.
    pub fn register_method(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        expected_signature: Option<Signature>,
        handler: MethodHandler,
    ) -> Result<u64> {
        validate_object_path(path)?;
        self.0.router.methods.add(path, interface, member, handler, expected_signature)
    }

    pub fn unregister_method(&self, id: u64) -> bool {
        self.0.router.methods.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_connected_reports_disconnected_error() {
        let conn_state = Arc::new(ConnState::default());
        conn_state.set_connected(false);
        conn_state.set_error(Error::Transport("socket closed".into()));
        let (router, _out_rx) = Router::new(conn_state.clone());
        let transport = Transport::new(Box::new(NullSocket), conn_state.clone());
        let bus = Bus(Arc::new(BusInner {
            address: "unix:path=/tmp/nonexistent".into(),
            conn_state,
            router,
            transport,
        }));
        let err = bus.check_connected().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    struct NullSocket;
    impl crate::transport::Socket for NullSocket {
        fn try_clone_boxed(&self) -> std::io::Result<Box<dyn crate::transport::Socket>> {
            Ok(Box::new(NullSocket))
        }
        fn peek(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn recv(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn recv_with_fds(&self, _buf: &mut [u8], _max_fds: usize) -> std::io::Result<(usize, Vec<std::os::unix::io::RawFd>)> {
            Ok((0, Vec::new()))
        }
        fn send(&self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn send_with_fds(&self, _buf: &[u8], _fds: &[std::os::unix::io::RawFd]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn shutdown(&self) -> std::io::Result<()> {
            Ok(())
        }
        fn supports_fd_passing(&self) -> bool {
            false
        }
    }
}
