//! Variant nesting depth is capped at 64; marshaling a 65-deep variant chain
//! must fail while 64 succeeds.

use corebus::{ByteOrder, Message, MessageFlags, MessageType, Signature, Value, Variant};
use std::collections::BTreeMap;

fn nested_variant(depth: usize) -> Value {
    let mut value = Value::Byte(1);
    let mut signature = "y".to_string();
    for _ in 0..depth {
        value = Value::Variant(Variant::new(signature.clone(), value));
        signature = "v".to_string();
    }
    value
}

fn variant_message(depth: usize) -> corebus::Result<(Vec<u8>, Vec<std::os::unix::io::RawFd>)> {
    let msg = Message::new(
        ByteOrder::NATIVE,
        MessageType::Signal,
        MessageFlags::empty(),
        {
            let mut fields = BTreeMap::new();
            fields.insert(corebus::HeaderField::Path, Value::ObjectPath("/test".into()));
            fields.insert(corebus::HeaderField::Interface, Value::Str("test.iface".into()));
            fields.insert(corebus::HeaderField::Member, Value::Str("Deep".into()));
            fields
        },
        Signature::parse("v").unwrap(),
        vec![nested_variant(depth)],
    )?;
    msg.to_bytes()
}

#[test]
fn accepts_depth_at_the_limit() {
    assert!(variant_message(64).is_ok());
}

#[test]
fn rejects_depth_past_the_limit() {
    let err = variant_message(65).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("nesting"), "unexpected error: {text}");
}
