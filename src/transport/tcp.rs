//! TCP and nonce-TCP transports. Neither supports FD passing.

use super::Socket;
use std::io;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::RawFd;

pub struct TcpSocket(TcpStream);

impl TcpSocket {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        Ok(TcpSocket(TcpStream::connect((host, port))?))
    }

    /// A nonce-tcp connection additionally writes the 16-byte nonce read
    /// from `noncefile` immediately after connecting.
    pub fn connect_nonce(host: &str, port: u16, nonce: &[u8; 16]) -> io::Result<Self> {
        let mut stream = TcpStream::connect((host, port))?;
        stream.write_all(nonce)?;
        Ok(TcpSocket(stream))
    }
}

impl Socket for TcpSocket {
    fn try_clone_boxed(&self) -> io::Result<Box<dyn Socket>> {
        Ok(Box::new(TcpSocket(self.0.try_clone()?)))
    }

    fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.peek(buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.0).read(buf)
    }

    fn recv_with_fds(&self, _buf: &mut [u8], _max_fds: usize) -> io::Result<(usize, Vec<RawFd>)> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "TCP transports do not support unix fd passing",
        ))
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.0).write(buf)
    }

    fn send_with_fds(&self, _buf: &[u8], _fds: &[RawFd]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "TCP transports do not support unix fd passing",
        ))
    }

    fn shutdown(&self) -> io::Result<()> {
        self.0.shutdown(std::net::Shutdown::Both)
    }

    fn supports_fd_passing(&self) -> bool {
        false
    }
}
