//! Table-driven marshal/unmarshal of D-Bus values against a [`RawBuffer`].
//!
//! Dispatch happens on the [`Type`] tree: fixed-width scalars and
//! string-like types are handled by per-type-code functions (mirroring a
//! lookup table keyed by type code), containers recurse back into this
//! module.

mod container;
mod fixed;
mod strings;

use crate::error::{Error, Result};
use crate::raw::RawBuffer;
use crate::signature::{Signature, Type};
use crate::value::Value;

pub fn marshal(raw: &mut RawBuffer, ty: &Type, value: &Value) -> Result<()> {
    match ty {
        Type::Byte
        | Type::Boolean
        | Type::Int16
        | Type::Uint16
        | Type::Int32
        | Type::Uint32
        | Type::Int64
        | Type::Uint64
        | Type::Double
        | Type::UnixFd => fixed::marshal(raw, ty, value),
        Type::String | Type::ObjectPath | Type::Signature => strings::marshal(raw, ty, value),
        Type::Array(element) => match value {
            Value::Array(items) => container::marshal_array(raw, element, items),
            Value::Dict(entries) => {
                let flat: Vec<Value> = entries
                    .iter()
                    .map(|(k, v)| Value::Struct(vec![k.clone(), v.clone()]))
                    .collect();
                container::marshal_array(raw, element, &flat)
            }
            _ => Err(Error::Message("value is not an array".into())),
        },
        Type::Struct(fields) => match value {
            Value::Struct(items) => container::marshal_struct(raw, fields, items),
            _ => Err(Error::Message("value is not a struct".into())),
        },
        Type::DictEntry(key_ty, value_ty) => match value {
            Value::Struct(items) if items.len() == 2 => {
                container::marshal_struct(raw, &[(**key_ty).clone(), (**value_ty).clone()], items)
            }
            _ => Err(Error::Message("value is not a dict entry".into())),
        },
        Type::Variant => match value {
            Value::Variant(v) => container::marshal_variant(raw, v),
            _ => Err(Error::Message("value is not a variant".into())),
        },
    }
}

pub fn unmarshal(raw: &mut RawBuffer, ty: &Type) -> Result<Value> {
    match ty {
        Type::Byte
        | Type::Boolean
        | Type::Int16
        | Type::Uint16
        | Type::Int32
        | Type::Uint32
        | Type::Int64
        | Type::Uint64
        | Type::Double
        | Type::UnixFd => fixed::unmarshal(raw, ty),
        Type::String | Type::ObjectPath | Type::Signature => strings::unmarshal(raw, ty),
        Type::Array(element) => container::unmarshal_array(raw, element),
        Type::Struct(fields) => container::unmarshal_struct(raw, fields),
        Type::DictEntry(key_ty, value_ty) => {
            let fields = vec![(**key_ty).clone(), (**value_ty).clone()];
            container::unmarshal_struct(raw, &fields)
        }
        Type::Variant => container::unmarshal_variant(raw),
    }
}

pub fn marshal_all(raw: &mut RawBuffer, signature: &Signature, values: &[Value]) -> Result<()> {
    if signature.len() != values.len() {
        return Err(Error::Message(format!(
            "expected {} values for signature {:?}, got {}",
            signature.len(),
            signature.as_str(),
            values.len()
        )));
    }
    for (ty, value) in signature.types().iter().zip(values) {
        marshal(raw, ty, value)?;
    }
    Ok(())
}

pub fn unmarshal_all(raw: &mut RawBuffer, signature: &Signature) -> Result<Vec<Value>> {
    signature.types().iter().map(|ty| unmarshal(raw, ty)).collect()
}
