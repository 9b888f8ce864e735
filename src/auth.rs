//! The SASL-ish authentication handshake run once, synchronously, right
//! after the transport socket connects and before the send/recv loops start.

use crate::error::{Error, Result};
use crate::transport::Socket;
use sha1::{Digest, Sha1};
use std::io::{BufRead, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    External,
    DBusCookieSha1,
    Anonymous,
}

pub struct AuthResult {
    pub guid: Option<String>,
    pub unix_fds_enabled: bool,
}

/// Runs the handshake over `socket` and returns the negotiated GUID plus
/// whether `NEGOTIATE_UNIX_FD` succeeded. `negotiate_fds` should be `true`
/// only for Unix socket transports.
pub fn authenticate(socket: &dyn Socket, mechanism: Mechanism, negotiate_fds: bool) -> Result<AuthResult> {
    send_raw(socket, &[0])?; // leading NUL required before the first AUTH command

    match mechanism {
        Mechanism::External => {
            let uid = current_uid_hex();
            write_line(socket, &format!("AUTH EXTERNAL {uid}"))?;
        }
        Mechanism::Anonymous => {
            write_line(socket, "AUTH ANONYMOUS")?;
        }
        Mechanism::DBusCookieSha1 => {
            let uid = current_username();
            write_line(socket, &format!("AUTH DBUS_COOKIE_SHA1 {}", hex::encode(uid.as_bytes())))?;
        }
    }

    let mut reader = SocketLineReader::new(socket);
    let first = reader.read_line()?;
    let guid = if mechanism == Mechanism::DBusCookieSha1 {
        let challenge = first
            .strip_prefix("DATA ")
            .ok_or_else(|| Error::Authentication(format!("unexpected server reply: {first}")))?;
        let response = respond_to_cookie_challenge(challenge)?;
        write_line(socket, &format!("DATA {response}"))?;
        let ok_line = reader.read_line()?;
        parse_ok_line(&ok_line)?
    } else {
        parse_ok_line(&first)?
    };

    let mut unix_fds_enabled = false;
    if negotiate_fds {
        write_line(socket, "NEGOTIATE_UNIX_FD")?;
        let reply = reader.read_line()?;
        unix_fds_enabled = reply.trim() == "AGREE_UNIX_FD";
    }

    write_line(socket, "BEGIN")?;

    Ok(AuthResult {
        guid,
        unix_fds_enabled,
    })
}

fn parse_ok_line(line: &str) -> Result<Option<String>> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("OK") => Ok(parts.next().map(|s| s.to_string())),
        Some("REJECTED") => Err(Error::Authentication(format!(
            "server rejected all offered mechanisms: {line}"
        ))),
        _ => Err(Error::Authentication(format!("unexpected server reply: {line}"))),
    }
}

fn respond_to_cookie_challenge(challenge: &str) -> Result<String> {
    let mut parts = challenge.split(' ');
    let context = parts.next().ok_or_else(|| Error::Authentication("malformed cookie challenge".into()))?;
    let cookie_id = parts.next().ok_or_else(|| Error::Authentication("malformed cookie challenge".into()))?;
    let server_challenge = parts.next().ok_or_else(|| Error::Authentication("malformed cookie challenge".into()))?;

    let cookie = read_cookie(context, cookie_id)?;
    let client_challenge = hex::encode(rand::random::<[u8; 16]>());

    let mut hasher = Sha1::new();
    hasher.update(format!("{server_challenge}:{client_challenge}:{cookie}").as_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(hex::encode(format!("{client_challenge} {digest}")))
}

/// Resolves Open Question (a): home directory via `xdg_home::home_dir()`,
/// matching the teacher crate's own address/auth path resolution rather than
/// reading `$HOME` directly.
fn read_cookie(context: &str, cookie_id: &str) -> Result<String> {
    let home = xdg_home::home_dir().ok_or_else(|| Error::Authentication("could not resolve home directory".into()))?;
    let keyring_dir = home.join(".dbus-keyrings");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = std::fs::metadata(&keyring_dir)
            .map_err(|e| Error::Authentication(format!("cannot stat keyring directory: {e}")))?;
        if meta.permissions().mode() & 0o077 != 0 {
            return Err(Error::Authentication(
                "refusing to use keyring directory with group/other permissions".into(),
            ));
        }
    }

    let path = keyring_dir.join(context);
    let file = std::fs::File::open(&path)
        .map_err(|e| Error::Authentication(format!("cannot open cookie file {path:?}: {e}")))?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::Authentication(e.to_string()))?;
        let mut fields = line.split_whitespace();
        if fields.next() == Some(cookie_id) {
            fields.next(); // creation time, unused
            if let Some(cookie) = fields.next() {
                return Ok(cookie.to_string());
            }
        }
    }
    Err(Error::Authentication(format!("no cookie with id {cookie_id} in {path:?}")))
}

fn current_uid_hex() -> String {
    #[cfg(unix)]
    {
        hex::encode(nix::unistd::Uid::current().to_string())
    }
    #[cfg(not(unix))]
    {
        hex::encode("0")
    }
}

fn current_username() -> String {
    #[cfg(unix)]
    {
        nix::unistd::User::from_uid(nix::unistd::Uid::current())
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_default()
    }
    #[cfg(not(unix))]
    {
        String::new()
    }
}

fn write_line(socket: &dyn Socket, line: &str) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    send_raw(socket, line.as_bytes())?;
    send_raw(socket, b"\r\n")?;
    Ok(())
}

fn send_raw(socket: &dyn Socket, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        let n = socket.send(&bytes[written..])?;
        if n == 0 {
            return Err(Error::Transport("auth handshake write returned 0".into()));
        }
        written += n;
    }
    Ok(())
}

/// Minimal line reader over the blocking `Socket` trait (auth only ever
/// reads CRLF-terminated ASCII lines, so this avoids pulling in a buffered
/// `Read` impl for the whole transport).
struct SocketLineReader<'a> {
    socket: &'a dyn Socket,
    buf: Vec<u8>,
}

impl<'a> SocketLineReader<'a> {
    fn new(socket: &'a dyn Socket) -> Self {
        SocketLineReader { socket, buf: Vec::new() }
    }

    fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.drain(..pos + 2).collect::<Vec<_>>();
                let text = String::from_utf8_lossy(&line[..line.len() - 2]).to_string();
                return Ok(text);
            }
            let mut chunk = [0u8; 256];
            let n = self.socket.recv(&mut chunk)?;
            if n == 0 {
                return Err(Error::Authentication("connection closed during handshake".into()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
