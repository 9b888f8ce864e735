//! Message header + body, serialization, and the serial allocator.

pub mod header;

pub use header::{HeaderField, MessageFlag, MessageFlags, MessageType};

use crate::codec;
use crate::error::{Error, Result};
use crate::names::{validate_bus_name, validate_error_name, validate_interface_name, validate_member_name, validate_object_path, validate_serial, LOCAL_INTERFACE, LOCAL_PATH};
use crate::raw::{ByteOrder, RawBuffer};
use crate::signature::Signature;
use crate::value::Value;
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

const PROTOCOL_VERSION: u8 = 1;
const MIN_HEADER_SIZE: usize = 16;

static SERIAL_COUNTER: Mutex<u32> = Mutex::new(1);

/// Allocate the next monotonic serial. Thread-safe, process-wide.
pub fn next_serial() -> u32 {
    let mut guard = SERIAL_COUNTER.lock().expect("serial counter lock poisoned");
    let serial = *guard;
    let next = guard.wrapping_add(1);
    *guard = if next == 0 { 1 } else { next };
    serial
}

pub type HeaderFields = BTreeMap<HeaderField, Value>;

/// A snapshot of the parts of an inbound METHOD_CALL/SIGNAL a handler needs,
/// computed once at decode time.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub serial: u32,
    pub args: Vec<Value>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub sender: Option<String>,
    pub destination: Option<String>,
    pub no_reply_expected: bool,
    pub allow_interactive_authorization: bool,
    pub is_signal: bool,
}

#[derive(Debug, Clone)]
pub struct Message {
    byte_order: ByteOrder,
    message_type: MessageType,
    flags: MessageFlags,
    serial: u32,
    fields: HeaderFields,
    signature: Signature,
    body: Vec<Value>,
}

fn field_string(fields: &HeaderFields, key: HeaderField) -> Option<String> {
    match fields.get(&key) {
        Some(Value::Str(s)) | Some(Value::ObjectPath(s)) => Some(s.clone()),
        _ => None,
    }
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        byte_order: ByteOrder,
        message_type: MessageType,
        flags: MessageFlags,
        mut fields: HeaderFields,
        signature: Signature,
        body: Vec<Value>,
    ) -> Result<Self> {
        if body.is_empty() {
            fields.remove(&HeaderField::Signature);
        } else {
            fields.insert(
                HeaderField::Signature,
                Value::Signature(signature.as_str().to_string()),
            );
        }
        fields.remove(&HeaderField::UnixFds);

        check_fields(message_type, &fields)?;

        Ok(Message {
            byte_order,
            message_type,
            flags,
            serial: next_serial(),
            fields,
            signature,
            body,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn fields(&self) -> &HeaderFields {
        &self.fields
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn body(&self) -> &[Value] {
        &self.body
    }

    pub fn into_body(self) -> Vec<Value> {
        self.body
    }

    pub fn reply_expected(&self) -> bool {
        matches!(self.message_type, MessageType::MethodCall)
            && !self.flags.contains(MessageFlag::NoReplyExpected)
    }

    pub fn reply_serial(&self) -> Option<u32> {
        match self.fields.get(&HeaderField::ReplySerial) {
            Some(Value::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<String> {
        field_string(&self.fields, HeaderField::Path)
    }

    pub fn interface(&self) -> Option<String> {
        field_string(&self.fields, HeaderField::Interface)
    }

    pub fn member(&self) -> Option<String> {
        field_string(&self.fields, HeaderField::Member)
    }

    pub fn sender(&self) -> Option<String> {
        field_string(&self.fields, HeaderField::Sender)
    }

    pub fn destination(&self) -> Option<String> {
        field_string(&self.fields, HeaderField::Destination)
    }

    pub fn error_name(&self) -> Option<String> {
        field_string(&self.fields, HeaderField::ErrorName)
    }

    /// If this is an ERROR message, turn it into `Err(Error::DBus{..})`.
    pub fn raise_on_error(self) -> Result<Self> {
        if self.message_type == MessageType::Error {
            let name = self.error_name().unwrap_or_default();
            return Err(Error::DBus {
                name,
                args: self.body,
            });
        }
        Ok(self)
    }

    /// Build a `MessageInfo` snapshot, for METHOD_CALL and SIGNAL messages.
    pub fn info(&self) -> MessageInfo {
        MessageInfo {
            serial: self.serial,
            args: self.body.clone(),
            path: self.path(),
            interface: self.interface(),
            member: self.member(),
            sender: self.sender(),
            destination: self.destination(),
            no_reply_expected: self.flags.contains(MessageFlag::NoReplyExpected),
            allow_interactive_authorization: self
                .flags
                .contains(MessageFlag::AllowInteractiveAuthorization),
            is_signal: self.message_type == MessageType::Signal,
        }
    }

    /// Serialize to `(header ++ body bytes, ordered FD list)`.
    pub fn to_bytes(&self) -> Result<(Vec<u8>, Vec<RawFd>)> {
        let mut body_raw = RawBuffer::new(self.byte_order);
        codec::marshal_all(&mut body_raw, &self.signature, &self.body)?;
        let fds = body_raw.fds().to_vec();
        let body_bytes = body_raw.into_bytes();

        let mut fields = self.fields.clone();
        if !fds.is_empty() {
            fields.insert(HeaderField::UnixFds, Value::U32(fds.len() as u32));
        }

        let mut header = RawBuffer::new(self.byte_order);
        header.write(&[self.byte_order.code()])?;
        header.write(&[self.message_type.code()])?;
        header.write(&[self.flags.bits()])?;
        header.write(&[PROTOCOL_VERSION])?;
        let body_len_pos = header.tell();
        header.write(&[0u8; 4])?;
        header.write(&u32_bytes(self.serial, self.byte_order))?;

        let fields_sig = Signature::parse("a(yv)").expect("static signature");
        let fields_array = fields_to_values(&fields);
        codec::marshal_all(&mut header, &fields_sig, &[fields_array])?;
        header.write_padding(8)?;

        header.set_value(body_len_pos, &u32_bytes(body_bytes.len() as u32, self.byte_order))?;

        let mut out = header.into_bytes();
        out.extend_from_slice(&body_bytes);
        Ok((out, fds))
    }

    /// Peek the first 16 bytes to learn `(total_size, fields_size)` without
    /// materializing the full message.
    pub fn peek_sizes(head: &[u8; MIN_HEADER_SIZE]) -> Result<(u32, u32)> {
        let order = ByteOrder::from_code(head[0])?;
        let mut raw = RawBuffer::from_bytes(head.to_vec(), order);
        raw.seek(4);
        let body_len = read_u32(&mut raw)?;
        raw.seek(12);
        let fields_len = read_u32(&mut raw)?;
        let fields_padded = fields_len as usize + padding_for(4 + 4 + fields_len as usize, 8);
        let total = MIN_HEADER_SIZE as u32 + fields_padded as u32 + body_len;
        Ok((total, fields_len))
    }

    /// Peek `16 + fields_size` bytes to learn the negotiated UNIX_FDS count,
    /// or 0 if absent.
    pub fn peek_unix_fds(head_and_fields: &[u8]) -> Result<u32> {
        let order = ByteOrder::from_code(head_and_fields[0])?;
        let mut raw = RawBuffer::from_bytes(head_and_fields.to_vec(), order);
        raw.seek(MIN_HEADER_SIZE);
        let fields_sig = Signature::parse("a(yv)").expect("static signature");
        let value = codec::unmarshal(&mut raw, &fields_sig.types()[0])?;
        let fields = values_to_fields(&value)?;
        Ok(match fields.get(&HeaderField::UnixFds) {
            Some(Value::U32(n)) => *n,
            _ => 0,
        })
    }

    pub fn from_bytes(bytes: &[u8], fds: Vec<RawFd>) -> Result<Self> {
        if bytes.len() < MIN_HEADER_SIZE {
            return Err(Error::Message("message shorter than minimum header".into()));
        }
        let order = ByteOrder::from_code(bytes[0])?;
        let mut raw = RawBuffer::with_fds(bytes.to_vec(), order, fds);
        raw.read(1)?; // byte-order, already consumed above
        let message_type = MessageType::from_code(raw.read(1)?[0]);
        let flags_byte = raw.read(1)?[0];
        let flags = MessageFlags::from_bits(flags_byte)
            .map_err(|_| Error::Message("invalid header flags".into()))?;
        let protocol = raw.read(1)?[0];
        if protocol != PROTOCOL_VERSION {
            return Err(Error::Message(format!("unsupported protocol version {protocol}")));
        }
        let body_len = read_u32(&mut raw)? as usize;
        let serial = read_u32(&mut raw)?;
        validate_serial(serial)?;

        let fields_sig = Signature::parse("a(yv)").expect("static signature");
        let fields_value = codec::unmarshal(&mut raw, &fields_sig.types()[0])?;
        let fields = values_to_fields(&fields_value)?;

        check_fields(message_type, &fields)?;
        raw.skip_padding(8)?;

        let signature = match fields.get(&HeaderField::Signature) {
            Some(Value::Signature(s)) => Signature::parse(s)?,
            _ => Signature::empty(),
        };

        let body_start = raw.tell();
        let body = codec::unmarshal_all(&mut raw, &signature)?;
        if raw.tell() - body_start != body_len {
            return Err(Error::Message("body length mismatch".into()));
        }
        if raw.tell() != raw.len() {
            return Err(Error::Message("trailing bytes after message body".into()));
        }

        Ok(Message {
            byte_order: order,
            message_type,
            flags,
            serial,
            fields,
            signature,
            body,
        })
    }
}

fn padding_for(pos: usize, align: usize) -> usize {
    let rem = pos % align;
    if rem == 0 {
        0
    } else {
        align - rem
    }
}

fn u32_bytes(v: u32, order: ByteOrder) -> [u8; 4] {
    match order {
        ByteOrder::Little => v.to_le_bytes(),
        ByteOrder::Big => v.to_be_bytes(),
    }
}

fn read_u32(raw: &mut RawBuffer) -> Result<u32> {
    let order = raw.byte_order();
    let bytes = raw.read(4)?;
    let arr: [u8; 4] = bytes.try_into().unwrap();
    Ok(match order {
        ByteOrder::Little => u32::from_le_bytes(arr),
        ByteOrder::Big => u32::from_be_bytes(arr),
    })
}

fn fields_to_values(fields: &HeaderFields) -> Value {
    let items = fields
        .iter()
        .map(|(key, value)| {
            let sig = value_signature(value);
            Value::Struct(vec![
                Value::Byte(key.code()),
                Value::Variant(crate::value::Variant::new(sig, value.clone())),
            ])
        })
        .collect();
    Value::Array(items)
}

fn values_to_fields(value: &Value) -> Result<HeaderFields> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(Error::Message("header fields is not an array".into())),
    };
    let mut fields = HeaderFields::new();
    for item in items {
        let (code, variant) = match item {
            Value::Struct(parts) if parts.len() == 2 => match (&parts[0], &parts[1]) {
                (Value::Byte(code), Value::Variant(v)) => (*code, v),
                _ => return Err(Error::Message("malformed header field entry".into())),
            },
            _ => return Err(Error::Message("malformed header field entry".into())),
        };
        if let Some(key) = HeaderField::from_code(code) {
            fields.insert(key, (*variant.value).clone());
        }
        // Unknown header field codes are ignored, per the protocol.
    }
    Ok(fields)
}

fn value_signature(value: &Value) -> &'static str {
    match value {
        Value::Byte(_) => "y",
        Value::U32(_) => "u",
        Value::Str(_) => "s",
        Value::ObjectPath(_) => "o",
        Value::Signature(_) => "g",
        _ => "v",
    }
}

fn check_fields(message_type: MessageType, fields: &HeaderFields) -> Result<()> {
    for required in HeaderField::required_for(message_type) {
        if !fields.contains_key(required) {
            return Err(Error::Message(format!(
                "{message_type:?} message missing required header field {required:?}"
            )));
        }
    }

    if let Some(Value::ObjectPath(path)) = fields.get(&HeaderField::Path) {
        validate_object_path(path)?;
        if path == LOCAL_PATH {
            return Err(Error::Message(format!("reserved object path: {path:?}")));
        }
    }
    if let Some(Value::Str(iface)) = fields.get(&HeaderField::Interface) {
        validate_interface_name(iface)?;
        if iface == LOCAL_INTERFACE {
            return Err(Error::Message(format!("reserved interface: {iface:?}")));
        }
    }
    if let Some(Value::Str(member)) = fields.get(&HeaderField::Member) {
        validate_member_name(member)?;
    }
    if let Some(Value::Str(name)) = fields.get(&HeaderField::ErrorName) {
        validate_error_name(name)?;
    }
    if let Some(Value::Str(dest)) = fields.get(&HeaderField::Destination) {
        validate_bus_name(dest, true)?;
    }
    if let Some(Value::Str(sender)) = fields.get(&HeaderField::Sender) {
        validate_bus_name(sender, true)?;
    }
    if let Some(Value::U32(serial)) = fields.get(&HeaderField::ReplySerial) {
        validate_serial(*serial)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Value {
        Value::ObjectPath(s.to_string())
    }

    #[test]
    fn method_call_round_trips() {
        let mut fields = HeaderFields::new();
        fields.insert(HeaderField::Path, path("/org/example/Obj"));
        fields.insert(HeaderField::Interface, Value::Str("org.example.Iface".into()));
        fields.insert(HeaderField::Member, Value::Str("DoThing".into()));
        fields.insert(HeaderField::Destination, Value::Str("org.example.Dest".into()));

        let sig = Signature::parse("s").unwrap();
        let msg = Message::new(
            ByteOrder::Little,
            MessageType::MethodCall,
            MessageFlags::empty(),
            fields,
            sig,
            vec![Value::Str("hello".into())],
        )
        .unwrap();

        let (bytes, fds) = msg.to_bytes().unwrap();
        assert!(fds.is_empty());

        let decoded = Message::from_bytes(&bytes, vec![]).unwrap();
        assert_eq!(decoded.member().as_deref(), Some("DoThing"));
        assert_eq!(decoded.body(), &[Value::Str("hello".into())]);
        assert_eq!(decoded.serial(), msg.serial());
    }

    #[test]
    fn rejects_missing_required_field() {
        let fields = HeaderFields::new();
        let sig = Signature::empty();
        let result = Message::new(
            ByteOrder::Little,
            MessageType::MethodCall,
            MessageFlags::empty(),
            fields,
            sig,
            vec![],
        );
        assert!(result.is_err());
    }

    #[test]
    fn method_return_carries_reply_serial() {
        let mut fields = HeaderFields::new();
        fields.insert(HeaderField::ReplySerial, Value::U32(7));
        let msg = Message::new(
            ByteOrder::Little,
            MessageType::MethodReturn,
            MessageFlags::empty(),
            fields,
            Signature::empty(),
            vec![],
        )
        .unwrap();
        assert_eq!(msg.reply_serial(), Some(7));
    }

    #[test]
    fn error_message_raises() {
        let mut fields = HeaderFields::new();
        fields.insert(HeaderField::ReplySerial, Value::U32(7));
        fields.insert(
            HeaderField::ErrorName,
            Value::Str("org.example.Error.Bad".into()),
        );
        let msg = Message::new(
            ByteOrder::Little,
            MessageType::Error,
            MessageFlags::empty(),
            fields,
            Signature::empty(),
            vec![],
        )
        .unwrap();
        let err = msg.raise_on_error().unwrap_err();
        match err {
            Error::DBus { name, .. } => assert_eq!(name, "org.example.Error.Bad"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
