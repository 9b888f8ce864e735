//! Marshal/unmarshal for the container types: array, struct, dict-entry (as
//! an array element only), and variant.

use crate::error::{Error, Result};
use crate::raw::{RawBuffer, MAX_ARRAY_LEN};
use crate::signature::{Signature, Type};
use crate::value::{Value, Variant};

use super::fixed::pack_u32_bytes;
use super::{marshal, unmarshal};

pub fn marshal_array(raw: &mut RawBuffer, element_ty: &Type, items: &[Value]) -> Result<()> {
    raw.write_padding(4)?;
    let len_pos = raw.tell();
    raw.write(&[0u8; 4])?;
    raw.write_padding(element_ty.alignment())?;
    let start = raw.tell();

    for item in items {
        marshal(raw, element_ty, item)?;
    }

    let len = raw.tell() - start;
    if len > MAX_ARRAY_LEN {
        return Err(Error::TooLong("array".into()));
    }
    let order = raw.byte_order();
    raw.set_value(len_pos, &pack_u32_bytes(len as u32, order))?;
    Ok(())
}

pub fn unmarshal_array(raw: &mut RawBuffer, element_ty: &Type) -> Result<Value> {
    raw.skip_padding(4)?;
    let order = raw.byte_order();
    let len_bytes = raw.read(4)?;
    let arr: [u8; 4] = len_bytes.try_into().unwrap();
    let len = match order {
        crate::raw::ByteOrder::Little => u32::from_le_bytes(arr),
        crate::raw::ByteOrder::Big => u32::from_be_bytes(arr),
    } as usize;
    if len > MAX_ARRAY_LEN {
        return Err(Error::TooLong("array".into()));
    }
    raw.skip_padding(element_ty.alignment())?;
    let start = raw.tell();

    if let Type::DictEntry(key_ty, value_ty) = element_ty {
        let mut entries = Vec::new();
        while raw.tell() - start < len {
            raw.skip_padding(8)?;
            let key = unmarshal(raw, key_ty)?;
            let value = unmarshal(raw, value_ty)?;
            entries.push((key, value));
        }
        if raw.tell() - start != len {
            return Err(Error::Message("array length mismatch".into()));
        }
        return Ok(Value::Dict(entries));
    }

    let mut items = Vec::new();
    while raw.tell() - start < len {
        items.push(unmarshal(raw, element_ty)?);
    }
    if raw.tell() - start != len {
        return Err(Error::Message("array length mismatch".into()));
    }
    Ok(Value::Array(items))
}

pub fn marshal_struct(raw: &mut RawBuffer, field_types: &[Type], fields: &[Value]) -> Result<()> {
    if field_types.len() != fields.len() {
        return Err(Error::Message("struct arity mismatch".into()));
    }
    raw.write_padding(8)?;
    for (ty, value) in field_types.iter().zip(fields) {
        marshal(raw, ty, value)?;
    }
    Ok(())
}

pub fn unmarshal_struct(raw: &mut RawBuffer, field_types: &[Type]) -> Result<Value> {
    raw.skip_padding(8)?;
    let mut fields = Vec::with_capacity(field_types.len());
    for ty in field_types {
        fields.push(unmarshal(raw, ty)?);
    }
    Ok(Value::Struct(fields))
}

pub fn marshal_variant(raw: &mut RawBuffer, variant: &Variant) -> Result<()> {
    let element_ty = Signature::parse_single(&variant.signature)?;
    let mut guard = raw.enter_nesting()?;
    marshal(
        &mut guard,
        &Type::Signature,
        &Value::Signature(variant.signature.clone()),
    )?;
    marshal(&mut guard, &element_ty, &variant.value)?;
    Ok(())
}

pub fn unmarshal_variant(raw: &mut RawBuffer) -> Result<Value> {
    let mut guard = raw.enter_nesting()?;
    let sig_value = super::strings::unmarshal(&mut guard, &Type::Signature)?;
    let sig_text = match sig_value {
        Value::Signature(s) => s,
        _ => unreachable!(),
    };
    let element_ty = Signature::parse_single(&sig_text)?;
    let value = unmarshal(&mut guard, &element_ty)?;
    Ok(Value::Variant(Variant::new(sig_text, value)))
}
