//! Parsing and validation of D-Bus type-signature strings.

use crate::error::{Error, Result};
use std::collections::VecDeque;

const MAX_SIGNATURE_LEN: usize = 255;
const MAX_NESTING_DEPTH: u32 = 32;

/// One D-Bus complete type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    UnixFd,
    String,
    ObjectPath,
    Signature,
    Variant,
    Array(Box<Type>),
    Struct(Vec<Type>),
    DictEntry(Box<Type>, Box<Type>),
}

impl Type {
    /// Basic types are the only ones legal as a dict-entry key.
    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            Type::Variant | Type::Array(_) | Type::Struct(_) | Type::DictEntry(..)
        )
    }

    pub fn alignment(&self) -> usize {
        match self {
            Type::Byte | Type::Signature => 1,
            Type::Int16 | Type::Uint16 => 2,
            Type::Boolean
            | Type::Int32
            | Type::Uint32
            | Type::UnixFd
            | Type::String
            | Type::ObjectPath
            | Type::Array(_) => 4,
            Type::Int64 | Type::Uint64 | Type::Double | Type::Struct(_) | Type::DictEntry(..) => 8,
            Type::Variant => 1,
        }
    }

    fn code_char(&self) -> char {
        match self {
            Type::Byte => 'y',
            Type::Boolean => 'b',
            Type::Int16 => 'n',
            Type::Uint16 => 'q',
            Type::Int32 => 'i',
            Type::Uint32 => 'u',
            Type::Int64 => 'x',
            Type::Uint64 => 't',
            Type::Double => 'd',
            Type::UnixFd => 'h',
            Type::String => 's',
            Type::ObjectPath => 'o',
            Type::Signature => 'g',
            Type::Variant => 'v',
            Type::Array(_) => 'a',
            Type::Struct(_) => '(',
            Type::DictEntry(..) => '{',
        }
    }

    /// Render the signature substring that would parse back to this type.
    pub fn to_signature_string(&self) -> String {
        match self {
            Type::Array(inner) => format!("a{}", inner.to_signature_string()),
            Type::Struct(fields) => {
                let inner: String = fields.iter().map(Type::to_signature_string).collect();
                format!("({inner})")
            }
            Type::DictEntry(k, v) => {
                format!("{{{}{}}}", k.to_signature_string(), v.to_signature_string())
            }
            other => other.code_char().to_string(),
        }
    }
}

fn basic_type(c: char) -> Option<Type> {
    Some(match c {
        'y' => Type::Byte,
        'b' => Type::Boolean,
        'n' => Type::Int16,
        'q' => Type::Uint16,
        'i' => Type::Int32,
        'u' => Type::Uint32,
        'x' => Type::Int64,
        't' => Type::Uint64,
        'd' => Type::Double,
        'h' => Type::UnixFd,
        's' => Type::String,
        'o' => Type::ObjectPath,
        'g' => Type::Signature,
        _ => return None,
    })
}

/// Validate that `s` is well-formed as a signature string (used for the `g`
/// basic type, where any signature -- including the empty one -- is legal).
pub fn validate_signature_text(s: &str) -> Result<()> {
    Signature::parse(s).map(|_| ())
}

/// A parsed, validated D-Bus signature: an ordered sequence of complete types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    text: String,
    types: Vec<Type>,
}

#[derive(Default)]
struct Counters {
    array: u32,
    structs: u32,
    dict: u32,
}

impl Signature {
    pub fn empty() -> Self {
        Signature {
            text: String::new(),
            types: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.len() > MAX_SIGNATURE_LEN {
            return Err(Error::TooLong("signature".into()));
        }
        let mut tokens: VecDeque<char> = s.chars().collect();
        let mut counters = Counters::default();
        let types = parse_types(&mut tokens, &mut counters, None)?;
        if counters.structs != 0 || counters.dict != 0 {
            return Err(Error::Signature(format!("unclosed container in {s:?}")));
        }
        Ok(Signature {
            text: s.to_string(),
            types,
        })
    }

    /// Parse a signature that must denote exactly one complete type (as used
    /// inside a variant).
    pub fn parse_single(s: &str) -> Result<Type> {
        let sig = Self::parse(s)?;
        let mut types = sig.types;
        if types.len() != 1 {
            return Err(Error::Signature(format!(
                "expected exactly one complete type in {s:?}"
            )));
        }
        Ok(types.remove(0))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn types(&self) -> &[Type] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

fn parse_types(
    tokens: &mut VecDeque<char>,
    counters: &mut Counters,
    container: Option<char>,
) -> Result<Vec<Type>> {
    if counters.array > MAX_NESTING_DEPTH || counters.structs > MAX_NESTING_DEPTH {
        return Err(Error::Signature("nesting depth exceeded".into()));
    }

    let mut list = Vec::new();
    while let Some(token) = tokens.pop_front() {
        match token {
            '(' => {
                counters.structs += 1;
                let inner = parse_types(tokens, counters, Some('r'))?;
                if inner.is_empty() {
                    return Err(Error::Signature("struct must have at least one field".into()));
                }
                list.push(Type::Struct(inner));
            }
            '{' => {
                if container != Some('a') {
                    return Err(Error::Signature("dict entry outside an array".into()));
                }
                counters.dict += 1;
                let mut inner = parse_types(tokens, counters, Some('e'))?;
                if inner.len() != 2 {
                    return Err(Error::Signature("dict entry must have exactly 2 elements".into()));
                }
                if !inner[0].is_basic() {
                    return Err(Error::Signature("dict entry key must be a basic type".into()));
                }
                let value = inner.remove(1);
                let key = inner.remove(0);
                list.push(Type::DictEntry(Box::new(key), Box::new(value)));
            }
            'a' => {
                counters.array += 1;
                let mut inner = parse_types(tokens, counters, Some('a'))?;
                if inner.is_empty() {
                    return Err(Error::Signature("array without element type".into()));
                }
                list.push(Type::Array(Box::new(inner.remove(0))));
            }
            'v' => list.push(Type::Variant),
            ')' if container == Some('r') => {
                counters.structs -= 1;
                break;
            }
            '}' if container == Some('e') => {
                counters.dict -= 1;
                break;
            }
            c => {
                if let Some(t) = basic_type(c) {
                    list.push(t);
                } else {
                    return Err(Error::Signature(format!("unexpected token {c:?}")));
                }
            }
        }

        if container == Some('a') {
            counters.array -= 1;
            break;
        }
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_types() {
        let sig = Signature::parse("ybnqiuxtd").unwrap();
        assert_eq!(sig.len(), 9);
    }

    #[test]
    fn parses_array_of_struct() {
        let sig = Signature::parse("a(si)").unwrap();
        assert_eq!(sig.types()[0], Type::Array(Box::new(Type::Struct(vec![Type::String, Type::Int32]))));
    }

    #[test]
    fn parses_dict() {
        let sig = Signature::parse("a{sv}").unwrap();
        match &sig.types()[0] {
            Type::Array(inner) => assert!(matches!(**inner, Type::DictEntry(..))),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn rejects_bare_array() {
        assert!(Signature::parse("a").is_err());
    }

    #[test]
    fn rejects_bare_struct_open() {
        assert!(Signature::parse("(").is_err());
    }

    #[test]
    fn rejects_dict_outside_array() {
        assert!(Signature::parse("{is}").is_err());
    }

    #[test]
    fn rejects_dict_non_basic_key() {
        assert!(Signature::parse("a{vs}").is_err());
    }

    #[test]
    fn rejects_empty_struct() {
        assert!(Signature::parse("()").is_err());
    }

    #[test]
    fn rejects_too_long() {
        let s = "y".repeat(256);
        assert!(Signature::parse(&s).is_err());
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(Signature::parse("z").is_err());
    }

    #[test]
    fn rejects_deep_array_nesting() {
        let s = "a".repeat(33) + "y";
        assert!(Signature::parse(&s).is_err());
    }

    #[test]
    fn single_accepts_one_complete_type() {
        assert_eq!(Signature::parse_single("i").unwrap(), Type::Int32);
        assert!(Signature::parse_single("ii").is_err());
    }
}
