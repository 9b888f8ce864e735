//! Header-level types: message type, flags, and header field keys.

use enumflags2::{bitflags, BitFlags};
use static_assertions::assert_impl_all;

/// The four D-Bus message types. `Invalid` (0) never appears on the wire as
/// a constructed message but is a legal value to read while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0,
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

assert_impl_all!(MessageType: Send, Sync, Unpin);

impl MessageType {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MessageType::MethodCall,
            2 => MessageType::MethodReturn,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            _ => MessageType::Invalid,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The three header flag bits.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFlag {
    NoReplyExpected = 0x1,
    NoAutoStart = 0x2,
    AllowInteractiveAuthorization = 0x4,
}

pub type MessageFlags = BitFlags<MessageFlag>;

/// Header field keys, `a(yv)` in the wire array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HeaderField {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

assert_impl_all!(HeaderField: Send, Sync, Unpin);

impl HeaderField {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => HeaderField::Path,
            2 => HeaderField::Interface,
            3 => HeaderField::Member,
            4 => HeaderField::ErrorName,
            5 => HeaderField::ReplySerial,
            6 => HeaderField::Destination,
            7 => HeaderField::Sender,
            8 => HeaderField::Signature,
            9 => HeaderField::UnixFds,
            _ => return None,
        })
    }

    /// The required field set for each message type, per the protocol spec.
    pub fn required_for(ty: MessageType) -> &'static [HeaderField] {
        match ty {
            MessageType::MethodCall => &[HeaderField::Path, HeaderField::Member],
            MessageType::MethodReturn => &[HeaderField::ReplySerial],
            MessageType::Error => &[HeaderField::ErrorName, HeaderField::ReplySerial],
            MessageType::Signal => &[HeaderField::Path, HeaderField::Interface, HeaderField::Member],
            MessageType::Invalid => &[],
        }
    }
}
