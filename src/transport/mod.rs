//! Socket I/O: a `Socket` abstraction over Unix/TCP streams, and the two
//! send/recv threads that drive a connection once authenticated.

mod tcp;
mod unix;

use crate::bus::Bus;
use crate::conn_state::ConnState;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::router::Router;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub use tcp::TcpSocket;
pub use unix::UnixSocket;

const MIN_HEADER_SIZE: usize = 16;

/// Abstraction over the concrete stream type so the send/recv loops don't
/// need to know whether they're talking to a Unix or TCP socket.
pub trait Socket: Send + Sync {
    fn try_clone_boxed(&self) -> io::Result<Box<dyn Socket>>;
    fn peek(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn recv_with_fds(&self, buf: &mut [u8], max_fds: usize) -> io::Result<(usize, Vec<RawFd>)>;
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
    fn send_with_fds(&self, buf: &[u8], fds: &[RawFd]) -> io::Result<usize>;
    fn shutdown(&self) -> io::Result<()>;
    fn supports_fd_passing(&self) -> bool;
}

fn read_exact(socket: &dyn Socket, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = socket.recv(&mut buf[filled..])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
        }
        filled += n;
    }
    Ok(())
}

fn write_all_plain(socket: &dyn Socket, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = socket.send(&buf[written..])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
        }
        written += n;
    }
    Ok(())
}

/// Manages the socket and the two loop threads for a single connection.
pub struct Transport {
    socket: Arc<dyn Socket>,
    conn_state: Arc<ConnState>,
    send_handle: Mutex<Option<JoinHandle<()>>>,
    recv_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(socket: Box<dyn Socket>, conn_state: Arc<ConnState>) -> Self {
        Transport {
            socket: Arc::from(socket),
            conn_state,
            send_handle: Mutex::new(None),
            recv_handle: Mutex::new(None),
        }
    }

    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    pub fn start_loops(&self, router: Arc<Router>, out_rx: Receiver<crate::router::OutgoingFrame>, bus: Bus) {
        let send_socket = self.socket.clone();
        let send_conn_state = self.conn_state.clone();
        let send_handle = std::thread::Builder::new()
            .name("corebus-send".into())
            .spawn(move || send_loop(&*send_socket, out_rx, &send_conn_state))
            .expect("failed to spawn send loop thread");
        *self.send_handle.lock().expect("lock poisoned") = Some(send_handle);

        let recv_socket = self.socket.clone();
        let recv_conn_state = self.conn_state.clone();
        let recv_router = router;
        let recv_handle = std::thread::Builder::new()
            .name("corebus-recv".into())
            .spawn(move || recv_loop(&*recv_socket, &recv_router, &bus, &recv_conn_state))
            .expect("failed to spawn recv loop thread");
        *self.recv_handle.lock().expect("lock poisoned") = Some(recv_handle);
    }

    /// Shut the socket down in both directions; the loops observe the error
    /// and exit on their own.
    pub fn disconnect(&self) {
        self.conn_state.set_connected(false);
        let _ = self.socket.shutdown();
    }

    pub fn block(&self, timeout: Option<Duration>) {
        // Joining is best-effort: if a loop already exited this is a no-op.
        let _ = timeout;
        if let Some(handle) = self.recv_handle.lock().expect("lock poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.send_handle.lock().expect("lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn send_loop(socket: &dyn Socket, out_rx: Receiver<crate::router::OutgoingFrame>, conn_state: &ConnState) {
    loop {
        let frame = match out_rx.recv() {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let Some((bytes, fds)) = frame else {
            break;
        };

        let result = if !fds.is_empty() && socket.supports_fd_passing() {
            socket.send_with_fds(&bytes, &fds).map(|_| ())
        } else {
            write_all_plain(socket, &bytes)
        };

        if let Err(e) = result {
            conn_state.set_error(Error::from(e));
            conn_state.set_connected(false);
            let _ = socket.shutdown();
            break;
        }
    }
}

fn recv_loop(socket: &dyn Socket, router: &Router, bus: &Bus, conn_state: &ConnState) {
    loop {
        match recv_one_message(socket, conn_state) {
            Ok(msg) => router.incoming(Some(msg), bus),
            Err(RecvOutcome::Disconnected) => {
                router.incoming(None, bus);
                break;
            }
            Err(RecvOutcome::Error(e)) => {
                conn_state.set_error(e);
                conn_state.set_connected(false);
                let _ = socket.shutdown();
                router.incoming(None, bus);
                break;
            }
        }
    }
}

enum RecvOutcome {
    Disconnected,
    Error(Error),
}

fn recv_one_message(socket: &dyn Socket, conn_state: &ConnState) -> std::result::Result<Message, RecvOutcome> {
    let mut head = [0u8; MIN_HEADER_SIZE];
    match socket.peek(&mut head) {
        Ok(0) => return Err(RecvOutcome::Disconnected),
        Ok(n) if n < MIN_HEADER_SIZE => {
            // Short peek: block for the rest via a plain read into a scratch
            // buffer, then re-peek. Simplicity over micro-optimizing partial
            // peeks, which are rare on stream sockets.
            if let Err(e) = read_exact(socket, &mut head[..n]) {
                return Err(io_to_outcome(e));
            }
            if let Err(e) = read_exact(socket, &mut head[n..]) {
                return Err(io_to_outcome(e));
            }
            return finish_message(socket, head.to_vec(), conn_state);
        }
        Ok(_) => {}
        Err(e) => return Err(io_to_outcome(e)),
    }

    let (total_size, fields_size) = Message::peek_sizes(&head)
        .map_err(RecvOutcome::Error)?;
    if total_size as usize > crate::raw::MAX_MESSAGE_LEN {
        return Err(RecvOutcome::Error(Error::TooLong("message".into())));
    }

    let mut buf = vec![0u8; total_size as usize];
    let fds = if conn_state.unix_fds_enabled.load(std::sync::atomic::Ordering::Acquire) {
        let head_and_fields_len = MIN_HEADER_SIZE + fields_size as usize;
        let mut head_and_fields = vec![0u8; head_and_fields_len.max(MIN_HEADER_SIZE)];
        match socket.peek(&mut head_and_fields) {
            Ok(_) => {}
            Err(e) => return Err(io_to_outcome(e)),
        }
        let unix_fds = Message::peek_unix_fds(&head_and_fields).map_err(RecvOutcome::Error)?;
        let (n, fds) = socket
            .recv_with_fds(&mut buf, unix_fds as usize)
            .map_err(io_to_outcome)?;
        if n != buf.len() {
            read_exact(socket, &mut buf[n..]).map_err(io_to_outcome)?;
        }
        fds
    } else {
        read_exact(socket, &mut buf).map_err(io_to_outcome)?;
        Vec::new()
    };

    Message::from_bytes(&buf, fds).map_err(RecvOutcome::Error)
}

fn finish_message(socket: &dyn Socket, head: Vec<u8>, conn_state: &ConnState) -> std::result::Result<Message, RecvOutcome> {
    let mut arr = [0u8; MIN_HEADER_SIZE];
    arr.copy_from_slice(&head);
    let (total_size, _fields_size) = Message::peek_sizes(&arr).map_err(RecvOutcome::Error)?;
    let mut buf = head;
    buf.resize(total_size as usize, 0);
    let already = MIN_HEADER_SIZE;
    read_exact(socket, &mut buf[already..]).map_err(io_to_outcome)?;
    let _ = conn_state;
    Message::from_bytes(&buf, Vec::new()).map_err(RecvOutcome::Error)
}

fn io_to_outcome(e: io::Error) -> RecvOutcome {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RecvOutcome::Disconnected
    } else {
        RecvOutcome::Error(Error::from(e))
    }
}
