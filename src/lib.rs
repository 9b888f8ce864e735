//! A synchronous D-Bus client library: wire codec, signature parsing, message
//! routing, and a two-thread (send/recv) transport, built on OS threads and
//! blocking I/O rather than an async runtime.

mod address;
mod auth;
mod bus;
mod codec;
mod conn_state;
mod error;
mod fd;
mod match_rule;
mod message;
mod names;
mod raw;
mod registry;
mod router;
mod signature;
mod transport;
mod value;

pub use address::Address;
pub use bus::Bus;
pub use error::{Error, Result};
pub use fd::UnixFd;
pub use match_rule::{MatchRule, MatchRuleBuilder};
pub use message::{HeaderField, Message, MessageFlag, MessageFlags, MessageInfo, MessageType};
pub use names::{BusName, ErrorName, InterfaceName, MemberName, ObjectPath};
pub use raw::ByteOrder;
pub use registry::{MethodHandler, SignalHandler};
pub use signature::{Signature, Type};
pub use transport::{Socket, TcpSocket, UnixSocket};
pub use value::{Value, Variant};
