use crate::value::Value;

/// The single error type for every failure this crate can produce.
///
/// Handlers registered with [`crate::Bus::register_method`] return
/// `Result<Vec<Value>, Error>`; an `Err(Error::DBus { .. })` is turned into a
/// wire `ERROR` reply, everything else is logged and swallowed so a buggy
/// handler cannot take down the receive loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("registration error: {0}")]
    Register(String),

    #[error("malformed message: {0}")]
    Message(String),

    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("{0} exceeds the maximum allowed length")]
    TooLong(String),

    #[error("{name}: {args:?}")]
    DBus { name: String, args: Vec<Value> },
}

impl Error {
    pub fn dbus(name: impl Into<String>, args: Vec<Value>) -> Self {
        Error::DBus {
            name: name.into(),
            args,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
