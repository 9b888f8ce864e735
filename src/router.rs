//! Central dispatcher: outbound serialization/reply-correlation and inbound
//! dispatch to reply-waiters, method handlers, and signal handlers.

use crate::bus::Bus;
use crate::conn_state::ConnState;
use crate::error::{Error, Result};
use crate::message::{HeaderField, HeaderFields, Message, MessageType};
use crate::registry::{Methods, Signals};
use crate::signature::Signature;
use crate::value::Value;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// `(bytes, fds)` to write, or `None` as the sentinel that tells the send
/// loop to stop.
pub type OutgoingFrame = Option<(Vec<u8>, Vec<RawFd>)>;

struct ReplyTable {
    lock: Mutex<HashMap<u32, Option<Message>>>,
    cv: Condvar,
}

pub struct Router {
    replies: ReplyTable,
    out_tx: Sender<OutgoingFrame>,
    conn_state: Arc<ConnState>,
    pub signals: Signals,
    pub methods: Methods,
}

impl Router {
    pub fn new(conn_state: Arc<ConnState>) -> (Arc<Router>, Receiver<OutgoingFrame>) {
        let (out_tx, out_rx) = std::sync::mpsc::channel();
        let router = Router {
            replies: ReplyTable {
                lock: Mutex::new(HashMap::new()),
                cv: Condvar::new(),
            },
            out_tx,
            conn_state,
            signals: Signals::new(),
            methods: Methods::new(),
        };
        (Arc::new(router), out_rx)
    }

    /// Serialize and enqueue `msg`. If it expects a reply, block until it
    /// arrives, the timeout elapses, or the bus disconnects.
    pub fn outgoing(&self, msg: &Message, timeout: Option<Duration>) -> Result<Option<Vec<Value>>> {
        let (bytes, fds) = msg.to_bytes()?;
        if !fds.is_empty() && !self.conn_state.unix_fds_enabled.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::Transport(
                "unix file descriptor passing was not negotiated for this connection".into(),
            ));
        }

        let _ = self.out_tx.send(Some((bytes, fds)));

        if !msg.reply_expected() {
            return Ok(None);
        }

        let serial = msg.serial();
        {
            let mut replies = self.replies.lock.lock().expect("reply table lock poisoned");
            replies.insert(serial, None);
        }

        let guard = self.replies.lock.lock().expect("reply table lock poisoned");
        let still_waiting = |replies: &mut HashMap<u32, Option<Message>>| {
            replies.get(&serial).map(|v| v.is_none()).unwrap_or(false)
                && self.conn_state.is_connected()
        };

        let (mut guard, timed_out) = match timeout {
            Some(t) => {
                let (g, result) = self
                    .replies
                    .cv
                    .wait_timeout_while(guard, t, still_waiting)
                    .expect("reply table lock poisoned");
                (g, result.timed_out())
            }
            None => (
                self.replies
                    .cv
                    .wait_while(guard, still_waiting)
                    .expect("reply table lock poisoned"),
                false,
            ),
        };

        if !self.conn_state.is_connected() {
            guard.remove(&serial);
            drop(guard);
            let err = self
                .conn_state
                .error()
                .unwrap_or_else(|| Error::Transport("disconnected".into()));
            return Err(err);
        }

        if timed_out {
            guard.remove(&serial);
            drop(guard);
            return Err(Error::Transport(format!(
                "Timeout: {:.6} secs.",
                timeout.unwrap().as_secs_f64()
            )));
        }

        let reply = guard
            .remove(&serial)
            .flatten()
            .expect("condvar woke with slot still empty");
        drop(guard);
        let reply = reply.raise_on_error()?;
        Ok(Some(reply.into_body()))
    }

    /// Dispatch an inbound message, or `None` as the disconnect sentinel.
    pub fn incoming(&self, msg: Option<Message>, bus: &Bus) {
        let Some(msg) = msg else {
            let _ = self.out_tx.send(None);
            let _guard = self.replies.lock.lock().expect("reply table lock poisoned");
            self.replies.cv.notify_all();
            return;
        };

        match msg.message_type() {
            MessageType::Invalid => {}
            MessageType::MethodReturn | MessageType::Error => {
                if let Some(serial) = msg.reply_serial() {
                    let mut replies = self.replies.lock.lock().expect("reply table lock poisoned");
                    if replies.contains_key(&serial) {
                        replies.insert(serial, Some(msg));
                        self.replies.cv.notify_all();
                    }
                }
            }
            MessageType::MethodCall => self.dispatch_method_call(msg, bus),
            MessageType::Signal => {
                let info = msg.info();
                for handler in self.signals.matching(&info, bus.unique_name().as_deref()) {
                    handler(&info);
                }
            }
        }
    }

    fn dispatch_method_call(&self, msg: Message, bus: &Bus) {
        let info = msg.info();
        let path = info.path.clone().unwrap_or_default();
        let interface = info.interface.clone();
        let member = info.member.clone().unwrap_or_default();

        let found = self.methods.find(&path, interface.as_deref(), &member);
        let (handler, expected_sig) = match found {
            Some(found) => found,
            None => {
                self.reply_with_error(
                    &msg,
                    "org.freedesktop.DBus.Error.UnknownMethod",
                    format!("No such method {member} on {path}"),
                    bus,
                );
                return;
            }
        };

        if let Some(expected) = &expected_sig {
            if expected.as_str() != msg.signature().as_str() {
                self.reply_with_error(
                    &msg,
                    "org.freedesktop.DBus.Error.InvalidArgs",
                    format!(
                        "expected signature {:?}, got {:?}",
                        expected.as_str(),
                        msg.signature().as_str()
                    ),
                    bus,
                );
                return;
            }
        }

        match handler(bus, &info) {
            Ok(body) if info.no_reply_expected => {
                let _ = body;
            }
            Ok(body) => {
                if let Err(e) = bus.method_return(&msg, body) {
                    tracing::warn!(error = %e, "failed to send method return");
                }
            }
            Err(Error::DBus { name, args }) => {
                if let Err(e) = bus.send_error(&msg, &name, args) {
                    tracing::warn!(error = %e, "failed to send error reply");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "method handler failed");
            }
        }
    }

    fn reply_with_error(&self, msg: &Message, name: &str, text: String, bus: &Bus) {
        let args = vec![Value::Str(text)];
        if let Err(e) = bus.send_error(msg, name, args) {
            tracing::warn!(error = %e, "failed to send error reply");
        }
    }
}

/// Build the header fields for a METHOD_RETURN/ERROR/SIGNAL reply. Shared by
/// `Bus` so the router and the facade agree on field shape.
pub fn reply_fields(reply_serial: u32, destination: Option<&str>, sender: Option<&str>) -> HeaderFields {
    let mut fields = HeaderFields::new();
    fields.insert(HeaderField::ReplySerial, Value::U32(reply_serial));
    if let Some(d) = destination {
        fields.insert(HeaderField::Destination, Value::Str(d.to_string()));
    }
    if let Some(s) = sender {
        fields.insert(HeaderField::Sender, Value::Str(s.to_string()));
    }
    fields
}

pub fn signature_of(body: &[Value]) -> Signature {
    if body.is_empty() {
        return Signature::empty();
    }
    let text: String = body.iter().map(value_signature_char).collect();
    Signature::parse(&text).expect("values must describe a valid signature")
}

fn value_signature_char(value: &Value) -> String {
    match value {
        Value::Byte(_) => "y".into(),
        Value::Bool(_) => "b".into(),
        Value::I16(_) => "n".into(),
        Value::U16(_) => "q".into(),
        Value::I32(_) => "i".into(),
        Value::U32(_) => "u".into(),
        Value::I64(_) => "x".into(),
        Value::U64(_) => "t".into(),
        Value::F64(_) => "d".into(),
        Value::Fd(_) => "h".into(),
        Value::Str(_) => "s".into(),
        Value::ObjectPath(_) => "o".into(),
        Value::Signature(_) => "g".into(),
        Value::Variant(_) => "v".into(),
        Value::Array(items) => match items.first() {
            Some(item) => format!("a{}", value_signature_char(item)),
            None => "av".into(),
        },
        Value::Struct(fields) => {
            let inner: String = fields.iter().map(value_signature_char).collect();
            format!("({inner})")
        }
        Value::Dict(entries) => match entries.first() {
            Some((k, v)) => format!("a{{{}{}}}", value_signature_char(k), value_signature_char(v)),
            None => "a{sv}".into(),
        },
    }
}
