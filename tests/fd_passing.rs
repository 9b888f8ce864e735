//! Unix file descriptor passing over a real `AF_UNIX` socket pair, exercising
//! `UnixSocket::{send_with_fds, recv_with_fds}` end to end.

#![cfg(unix)]

use corebus::{Socket, UnixSocket};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream;

#[test]
fn fd_sent_over_socket_is_usable_by_the_receiver() {
    let (client_stream, server_stream) = UnixStream::pair().unwrap();
    let client = UnixSocket::from_stream(client_stream);
    let server = UnixSocket::from_stream(server_stream);

    let mut tmp = tempfile::tempfile().unwrap();
    tmp.write_all(b"hello over an fd").unwrap();
    tmp.flush().unwrap();
    tmp.seek(SeekFrom::Start(0)).unwrap();
    let raw_fd = tmp.into_raw_fd();

    let payload = b"carries one fd";
    client.send_with_fds(payload, &[raw_fd]).unwrap();
    // SCM_RIGHTS doesn't consume the sender's fd; close our copy now that
    // it's been handed to the kernel for delivery.
    drop(unsafe { std::fs::File::from_raw_fd(raw_fd) });

    let mut buf = [0u8; 64];
    let (n, fds) = server.recv_with_fds(&mut buf, 1).unwrap();
    assert_eq!(&buf[..n], payload);
    assert_eq!(fds.len(), 1);

    let mut received = unsafe { std::fs::File::from_raw_fd(fds[0]) };
    let mut contents = String::new();
    received.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "hello over an fd");
}
