//! Validated name types and the raw predicate functions behind them.
//!
//! Mirrors the shape of the teacher's separate `zbus_names` crate (one
//! validated newtype per D-Bus name kind), consolidated here since this
//! crate is a single package.

use crate::error::{Error, Result};
use std::fmt;

pub const LOCAL_INTERFACE: &str = "org.freedesktop.DBus.Local";
pub const LOCAL_PATH: &str = "/org/freedesktop/DBus/Local";

const MAX_NAME_LEN: usize = 255;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `/foo/bar` style object path.
pub fn validate_object_path(s: &str) -> Result<()> {
    if s == "/" {
        return Ok(());
    }
    if !s.starts_with('/') || s.ends_with('/') {
        return Err(Error::Validation(format!("invalid object path: {s:?}")));
    }
    if s == LOCAL_PATH {
        return Err(Error::Validation(format!("reserved object path: {s:?}")));
    }
    for element in s[1..].split('/') {
        if element.is_empty() || !element.chars().all(is_name_char) {
            return Err(Error::Validation(format!("invalid object path: {s:?}")));
        }
    }
    Ok(())
}

fn validate_dotted(s: &str, kind: &str, allow_leading_digit: bool) -> Result<()> {
    if s.is_empty() || s.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!("invalid {kind}: {s:?}")));
    }
    let elements: Vec<&str> = s.split('.').collect();
    if elements.len() < 2 {
        return Err(Error::Validation(format!("invalid {kind}: {s:?}")));
    }
    for element in &elements {
        if element.is_empty() || !element.chars().all(is_name_char) {
            return Err(Error::Validation(format!("invalid {kind}: {s:?}")));
        }
        if !allow_leading_digit {
            if let Some(first) = element.chars().next() {
                if first.is_ascii_digit() {
                    return Err(Error::Validation(format!("invalid {kind}: {s:?}")));
                }
            }
        }
    }
    Ok(())
}

pub fn validate_interface_name(s: &str) -> Result<()> {
    validate_dotted(s, "interface name", false)?;
    if s == LOCAL_INTERFACE {
        return Err(Error::Validation(format!("reserved interface: {s:?}")));
    }
    Ok(())
}

pub fn validate_error_name(s: &str) -> Result<()> {
    validate_dotted(s, "error name", false)
}

pub fn validate_member_name(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > MAX_NAME_LEN || s.contains('.') {
        return Err(Error::Validation(format!("invalid member name: {s:?}")));
    }
    if !s.chars().all(is_name_char) {
        return Err(Error::Validation(format!("invalid member name: {s:?}")));
    }
    if s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        return Err(Error::Validation(format!("invalid member name: {s:?}")));
    }
    Ok(())
}

/// `strict = false` relaxes the "must contain a dot" rule, which is useful
/// for validating individual elements or call sites that accept names
/// loosely (matches `dcar.validate.is_bus_name(strict=False)`).
pub fn validate_bus_name(s: &str, strict: bool) -> Result<()> {
    if s.is_empty() || s.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!("invalid bus name: {s:?}")));
    }
    let unique = s.starts_with(':');
    let body = if unique { &s[1..] } else { s };
    let elements: Vec<&str> = body.split('.').collect();
    if strict && !unique && elements.len() < 2 {
        return Err(Error::Validation(format!("invalid bus name: {s:?}")));
    }
    for element in &elements {
        if element.is_empty() {
            return Err(Error::Validation(format!("invalid bus name: {s:?}")));
        }
        if !element
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Validation(format!("invalid bus name: {s:?}")));
        }
        if !unique {
            if let Some(first) = element.chars().next() {
                if first.is_ascii_digit() {
                    return Err(Error::Validation(format!("invalid bus name: {s:?}")));
                }
            }
        }
    }
    Ok(())
}

pub fn validate_serial(serial: u32) -> Result<()> {
    if serial == 0 {
        return Err(Error::Validation("serial must be nonzero".into()));
    }
    Ok(())
}

macro_rules! validated_name {
    ($name:ident, $validator:path) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                $validator(&s)?;
                Ok($name(s))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(s: &str) -> Result<Self> {
                $name::try_from(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_name!(ObjectPath, validate_object_path);
validated_name!(InterfaceName, validate_error_name_passthrough);
validated_name!(MemberName, validate_member_name);
validated_name!(ErrorName, validate_error_name);

// `InterfaceName` and `ErrorName` share the same grammar but are kept as
// distinct types so call sites can't mix them up; this indirection lets the
// macro invocation above read naturally.
fn validate_error_name_passthrough(s: &str) -> Result<()> {
    validate_interface_name(s)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusName(String);

impl BusName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unique(&self) -> bool {
        self.0.starts_with(':')
    }
}

impl TryFrom<String> for BusName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        validate_bus_name(&s, true)?;
        Ok(BusName(s))
    }
}

impl TryFrom<&str> for BusName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        BusName::try_from(s.to_string())
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_boundaries() {
        assert!(validate_object_path("/").is_ok());
        assert!(validate_object_path("//").is_err());
        assert!(validate_object_path("/a/").is_err());
        assert!(validate_object_path("/a/b").is_ok());
        assert!(validate_object_path(LOCAL_PATH).is_err());
    }

    #[test]
    fn interface_name_boundaries() {
        assert!(validate_interface_name("a.b").is_ok());
        assert!(validate_interface_name("a").is_err());
        assert!(validate_interface_name("a.1b").is_err());
        assert!(validate_interface_name(LOCAL_INTERFACE).is_err());
    }

    #[test]
    fn bus_name_boundaries() {
        assert!(validate_bus_name(":1.23", true).is_ok());
        assert!(validate_bus_name(":1", true).is_ok());
        assert!(validate_bus_name("1.2", true).is_err());
        assert!(validate_bus_name("com.example.Foo", true).is_ok());
    }

    #[test]
    fn member_name_boundaries() {
        assert!(validate_member_name("Foo").is_ok());
        assert!(validate_member_name("Foo.Bar").is_err());
        assert!(validate_member_name("1Foo").is_err());
    }
}
