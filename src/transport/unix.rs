//! Unix domain socket transport, with SCM_RIGHTS FD passing.

use super::Socket;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

pub struct UnixSocket(UnixStream);

impl UnixSocket {
    pub fn connect(path: &Path) -> io::Result<Self> {
        Ok(UnixSocket(UnixStream::connect(path)?))
    }

    pub fn connect_abstract(name: &[u8]) -> io::Result<Self> {
        use std::os::linux::net::SocketAddrExt;
        let addr = std::os::unix::net::SocketAddr::from_abstract_name(name)?;
        let stream = UnixStream::connect_addr(&addr)?;
        Ok(UnixSocket(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        UnixSocket(stream)
    }
}

impl Socket for UnixSocket {
    fn try_clone_boxed(&self) -> io::Result<Box<dyn Socket>> {
        Ok(Box::new(UnixSocket(self.0.try_clone()?)))
    }

    fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.peek(buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        (&self.0).read(buf)
    }

    fn recv_with_fds(&self, buf: &mut [u8], max_fds: usize) -> io::Result<(usize, Vec<RawFd>)> {
        use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
        use std::io::IoSliceMut;

        let mut iov = [IoSliceMut::new(buf)];
        // Fixed-size ancillary buffer; `max_fds` is bounded by `MAX_UNIX_FDS`
        // per message in practice, but we only ever see a handful per call.
        let _ = max_fds;
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 32]);

        let msg = recvmsg::<()>(self.0.as_raw_fd(), &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs().map_err(|errno| io::Error::from_raw_os_error(errno as i32))? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for fd in received {
                    // Ownership is transferred to the caller; `OwnedFd` here
                    // is only used to make the transfer explicit.
                    let _owned: OwnedFd = unsafe { OwnedFd::from_raw_fd(fd) };
                    fds.push(std::os::unix::io::IntoRawFd::into_raw_fd(_owned));
                }
            }
        }

        Ok((msg.bytes, fds))
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        (&self.0).write(buf)
    }

    fn send_with_fds(&self, buf: &[u8], fds: &[RawFd]) -> io::Result<usize> {
        use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
        use std::io::IoSlice;

        let iov = [IoSlice::new(buf)];
        let cmsg = [ControlMessage::ScmRights(fds)];
        sendmsg::<()>(self.0.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
    }

    fn shutdown(&self) -> io::Result<()> {
        self.0.shutdown(std::net::Shutdown::Both)
    }

    fn supports_fd_passing(&self) -> bool {
        true
    }
}
