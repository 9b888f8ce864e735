//! Marshal/unmarshal for the fixed-width basic types (`y b n q i u x t d h`).

use crate::error::{Error, Result};
use crate::raw::{ByteOrder, RawBuffer};
use crate::signature::Type;
use crate::value::Value;

fn pack_u16(v: u16, order: ByteOrder) -> [u8; 2] {
    match order {
        ByteOrder::Little => v.to_le_bytes(),
        ByteOrder::Big => v.to_be_bytes(),
    }
}
fn pack_u32(v: u32, order: ByteOrder) -> [u8; 4] {
    match order {
        ByteOrder::Little => v.to_le_bytes(),
        ByteOrder::Big => v.to_be_bytes(),
    }
}
fn pack_u64(v: u64, order: ByteOrder) -> [u8; 8] {
    match order {
        ByteOrder::Little => v.to_le_bytes(),
        ByteOrder::Big => v.to_be_bytes(),
    }
}

fn unpack_u16(bytes: &[u8], order: ByteOrder) -> u16 {
    let arr: [u8; 2] = bytes.try_into().unwrap();
    match order {
        ByteOrder::Little => u16::from_le_bytes(arr),
        ByteOrder::Big => u16::from_be_bytes(arr),
    }
}
fn unpack_u32(bytes: &[u8], order: ByteOrder) -> u32 {
    let arr: [u8; 4] = bytes.try_into().unwrap();
    match order {
        ByteOrder::Little => u32::from_le_bytes(arr),
        ByteOrder::Big => u32::from_be_bytes(arr),
    }
}
fn unpack_u64(bytes: &[u8], order: ByteOrder) -> u64 {
    let arr: [u8; 8] = bytes.try_into().unwrap();
    match order {
        ByteOrder::Little => u64::from_le_bytes(arr),
        ByteOrder::Big => u64::from_be_bytes(arr),
    }
}

/// Write the fixed-width scalar's bytes for `set_value`-style back-filling
/// (used by the array/string length prefixes).
pub fn pack_u32_bytes(v: u32, order: ByteOrder) -> [u8; 4] {
    pack_u32(v, order)
}

pub fn marshal(raw: &mut RawBuffer, ty: &Type, value: &Value) -> Result<()> {
    raw.write_padding(ty.alignment())?;
    let order = raw.byte_order();
    match (ty, value) {
        (Type::Byte, Value::Byte(v)) => {
            raw.write(&[*v])?;
        }
        (Type::Boolean, Value::Bool(v)) => {
            raw.write(&pack_u32(*v as u32, order))?;
        }
        (Type::Int16, Value::I16(v)) => {
            raw.write(&pack_u16(*v as u16, order))?;
        }
        (Type::Uint16, Value::U16(v)) => {
            raw.write(&pack_u16(*v, order))?;
        }
        (Type::Int32, Value::I32(v)) => {
            raw.write(&pack_u32(*v as u32, order))?;
        }
        (Type::Uint32, Value::U32(v)) => {
            raw.write(&pack_u32(*v, order))?;
        }
        (Type::Int64, Value::I64(v)) => {
            raw.write(&pack_u64(*v as u64, order))?;
        }
        (Type::Uint64, Value::U64(v)) => {
            raw.write(&pack_u64(*v, order))?;
        }
        (Type::Double, Value::F64(v)) => {
            raw.write(&pack_u64(v.to_bits(), order))?;
        }
        (Type::UnixFd, Value::Fd(fd)) => {
            let idx = raw.add_unix_fd(*fd)?;
            raw.write(&pack_u32(idx as u32, order))?;
        }
        _ => {
            return Err(Error::Message(format!(
                "value does not match fixed type {:?}",
                ty
            )))
        }
    }
    Ok(())
}

pub fn unmarshal(raw: &mut RawBuffer, ty: &Type) -> Result<Value> {
    raw.skip_padding(ty.alignment())?;
    let order = raw.byte_order();
    Ok(match ty {
        Type::Byte => Value::Byte(raw.read(1)?[0]),
        Type::Boolean => {
            let v = unpack_u32(raw.read(4)?, order);
            match v {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(Error::Message(format!("invalid boolean value {other}"))),
            }
        }
        Type::Int16 => Value::I16(unpack_u16(raw.read(2)?, order) as i16),
        Type::Uint16 => Value::U16(unpack_u16(raw.read(2)?, order)),
        Type::Int32 => Value::I32(unpack_u32(raw.read(4)?, order) as i32),
        Type::Uint32 => Value::U32(unpack_u32(raw.read(4)?, order)),
        Type::Int64 => Value::I64(unpack_u64(raw.read(8)?, order) as i64),
        Type::Uint64 => Value::U64(unpack_u64(raw.read(8)?, order)),
        Type::Double => Value::F64(f64::from_bits(unpack_u64(raw.read(8)?, order))),
        Type::UnixFd => {
            let idx = unpack_u32(raw.read(4)?, order) as usize;
            Value::Fd(raw.get_unix_fd(idx)?)
        }
        other => return Err(Error::Message(format!("{other:?} is not a fixed type"))),
    })
}
