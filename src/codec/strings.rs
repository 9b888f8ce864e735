//! Marshal/unmarshal for the string-like basic types (`s o g`).

use crate::error::{Error, Result};
use crate::names::validate_object_path;
use crate::raw::RawBuffer;
use crate::signature::{validate_signature_text, Type};
use crate::value::Value;

use super::fixed::pack_u32_bytes;

fn write_length_prefixed(raw: &mut RawBuffer, len_width: usize, body: &[u8]) -> Result<()> {
    let len_pos = raw.tell();
    raw.write(&vec![0u8; len_width])?;
    raw.write(body)?;
    raw.write(&[0u8])?; // trailing NUL

    let len = body.len() as u32;
    if len_width == 4 {
        let order = raw.byte_order();
        raw.set_value(len_pos, &pack_u32_bytes(len, order))?;
    } else {
        raw.set_value(len_pos, &[len as u8])?;
    }
    Ok(())
}

fn read_length_prefixed(raw: &mut RawBuffer, len_width: usize) -> Result<String> {
    let len = if len_width == 4 {
        let order = raw.byte_order();
        let bytes = raw.read(4)?;
        let arr: [u8; 4] = bytes.try_into().unwrap();
        match order {
            crate::raw::ByteOrder::Little => u32::from_le_bytes(arr),
            crate::raw::ByteOrder::Big => u32::from_be_bytes(arr),
        }
    } else {
        raw.read(1)?[0] as u32
    };
    let body = raw.read(len as usize)?.to_vec();
    let nul = raw.read(1)?;
    if nul != [0] {
        return Err(Error::Message("string is missing its trailing NUL".into()));
    }
    String::from_utf8(body).map_err(|e| Error::Message(format!("invalid utf-8: {e}")))
}

pub fn marshal(raw: &mut RawBuffer, ty: &Type, value: &Value) -> Result<()> {
    match (ty, value) {
        (Type::String, Value::Str(s)) => {
            raw.write_padding(4)?;
            write_length_prefixed(raw, 4, s.as_bytes())
        }
        (Type::ObjectPath, Value::ObjectPath(s)) => {
            validate_object_path(s)?;
            raw.write_padding(4)?;
            write_length_prefixed(raw, 4, s.as_bytes())
        }
        (Type::Signature, Value::Signature(s)) => {
            validate_signature_text(s)?;
            write_length_prefixed(raw, 1, s.as_bytes())
        }
        _ => Err(Error::Message(format!(
            "value does not match string-like type {:?}",
            ty
        ))),
    }
}

pub fn unmarshal(raw: &mut RawBuffer, ty: &Type) -> Result<Value> {
    Ok(match ty {
        Type::String => {
            raw.skip_padding(4)?;
            Value::Str(read_length_prefixed(raw, 4)?)
        }
        Type::ObjectPath => {
            raw.skip_padding(4)?;
            let s = read_length_prefixed(raw, 4)?;
            validate_object_path(&s)?;
            Value::ObjectPath(s)
        }
        Type::Signature => {
            let s = read_length_prefixed(raw, 1)?;
            validate_signature_text(&s)?;
            Value::Signature(s)
        }
        other => return Err(Error::Message(format!("{other:?} is not a string-like type"))),
    })
}
