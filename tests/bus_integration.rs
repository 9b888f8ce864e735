//! End-to-end tests against a minimal hand-scripted fake bus daemon speaking
//! over a real `AF_UNIX` socket: the `Hello` handshake, a method-call
//! timeout, automatic `UnknownMethod` replies, and signal dispatch.

#![cfg(unix)]

use corebus::{
    Bus, ByteOrder, Error, HeaderField, MatchRule, Message, MessageFlags, MessageType, Signature,
    SignalHandler, Value,
};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Framed {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl Framed {
    fn fill(&mut self, n: usize) {
        while self.buf.len() < n {
            let mut chunk = [0u8; 4096];
            let read = self.stream.read(&mut chunk).expect("fake server read failed");
            assert!(read > 0, "peer closed unexpectedly");
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        self.fill(n);
        self.buf.drain(..n).collect()
    }

    fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = self.buf.drain(..pos + 2).collect();
                return String::from_utf8_lossy(&line[..line.len() - 2]).to_string();
            }
            let mut chunk = [0u8; 256];
            let read = self.stream.read(&mut chunk).expect("fake server read failed");
            assert!(read > 0, "peer closed unexpectedly");
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("fake server write failed");
    }

    fn write_line(&mut self, line: &str) {
        self.write_all(line.as_bytes());
        self.write_all(b"\r\n");
    }

    fn read_message(&mut self) -> Message {
        let head = self.take(16);
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&head);
        let (total, _fields) = Message::peek_sizes(&arr).expect("malformed header from client");
        let mut full = head;
        full.extend(self.take(total as usize - 16));
        Message::from_bytes(&full, Vec::new()).expect("malformed message from client")
    }

    fn write_message(&mut self, msg: &Message) {
        let (bytes, _fds) = msg.to_bytes().expect("failed to serialize fake server message");
        self.write_all(&bytes);
    }
}

fn make_method_return(reply_serial: u32, signature: Signature, body: Vec<Value>) -> Message {
    let mut fields = BTreeMap::new();
    fields.insert(HeaderField::ReplySerial, Value::U32(reply_serial));
    Message::new(ByteOrder::NATIVE, MessageType::MethodReturn, MessageFlags::empty(), fields, signature, body)
        .unwrap()
}

fn make_method_call(path: &str, interface: &str, member: &str, body: Vec<Value>) -> Message {
    let mut fields = BTreeMap::new();
    fields.insert(HeaderField::Path, Value::ObjectPath(path.into()));
    fields.insert(HeaderField::Interface, Value::Str(interface.into()));
    fields.insert(HeaderField::Member, Value::Str(member.into()));
    Message::new(ByteOrder::NATIVE, MessageType::MethodCall, MessageFlags::empty(), fields, Signature::empty(), body)
        .unwrap()
}

fn make_signal(path: &str, interface: &str, member: &str, body: Vec<Value>) -> Message {
    let mut fields = BTreeMap::new();
    fields.insert(HeaderField::Path, Value::ObjectPath(path.into()));
    fields.insert(HeaderField::Interface, Value::Str(interface.into()));
    fields.insert(HeaderField::Member, Value::Str(member.into()));
    Message::new(ByteOrder::NATIVE, MessageType::Signal, MessageFlags::empty(), fields, Signature::empty(), body)
        .unwrap()
}

/// Plays the bus daemon's side of the handshake plus five scripted steps,
/// in lockstep with what the client under test is expected to do.
fn run_fake_daemon(stream: UnixStream) {
    let mut f = Framed { stream, buf: Vec::new() };

    let _leading_nul = f.take(1);
    let _auth_line = f.read_line();
    f.write_line("OK 1234deadbeef1234deadbeef12345678");
    let nego_line = f.read_line();
    assert_eq!(nego_line, "NEGOTIATE_UNIX_FD");
    f.write_line("ERROR");
    let begin_line = f.read_line();
    assert_eq!(begin_line, "BEGIN");

    let hello = f.read_message();
    assert_eq!(hello.member().as_deref(), Some("Hello"));
    let hello_reply = make_method_return(hello.serial(), Signature::parse("s").unwrap(), vec![Value::Str(":1.42".into())]);
    f.write_message(&hello_reply);

    let add_match = f.read_message();
    assert_eq!(add_match.member().as_deref(), Some("AddMatch"));
    let add_match_reply = make_method_return(add_match.serial(), Signature::empty(), vec![]);
    f.write_message(&add_match_reply);

    let timeout_call = f.read_message();
    assert_eq!(timeout_call.member().as_deref(), Some("NeedsTimeout"));
    // Intentionally never replied, to exercise the client's timeout path.

    let probe = make_method_call("/no/such/object", "test.probe", "DoesNotExist", vec![]);
    let probe_serial = probe.serial();
    f.write_message(&probe);
    let error_reply = f.read_message();
    assert_eq!(error_reply.message_type(), MessageType::Error);
    assert_eq!(error_reply.reply_serial(), Some(probe_serial));
    assert_eq!(
        error_reply.error_name().as_deref(),
        Some("org.freedesktop.DBus.Error.UnknownMethod")
    );

    let signal = make_signal("/test/obj", "test.signals", "Ping", vec![]);
    f.write_message(&signal);
}

#[test]
fn end_to_end_hello_timeout_unknown_method_and_signal() {
    let dir = tempfile::tempdir().unwrap();
    let sock_path = dir.path().join("bus.sock");
    let listener = UnixListener::bind(&sock_path).unwrap();

    let server = std::thread::spawn(move || {
        let (stream, _addr) = listener.accept().unwrap();
        run_fake_daemon(stream);
    });

    let bus = Bus::connect(&format!("unix:path={}", sock_path.display())).unwrap();
    assert_eq!(bus.unique_name().as_deref(), Some(":1.42"));

    let received = Arc::new(Mutex::new(false));
    let received_clone = received.clone();
    let rule = MatchRule::builder()
        .interface("test.signals")
        .unwrap()
        .signal_name("Ping")
        .unwrap()
        .build()
        .unwrap();
    let handler: SignalHandler = Arc::new(move |_info| {
        *received_clone.lock().unwrap() = true;
    });
    bus.register_signal(rule, handler).unwrap();

    let err = bus
        .method_call_with_timeout(
            "/test/obj",
            Some("test.iface"),
            "NeedsTimeout",
            None,
            vec![],
            Some(Duration::from_millis(300)),
        )
        .unwrap_err();
    match err {
        Error::Transport(msg) => assert!(msg.contains("Timeout"), "unexpected message: {msg}"),
        other => panic!("expected a transport timeout error, got {other:?}"),
    }

    server.join().unwrap();
    // Give the recv loop a moment to dispatch the signal the daemon just sent.
    std::thread::sleep(Duration::from_millis(100));
    assert!(*received.lock().unwrap(), "signal handler was not invoked");

    bus.disconnect();
}
