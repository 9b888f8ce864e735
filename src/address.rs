//! D-Bus server address strings: `transport:key=value,key=value;transport:...`

use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Unix { path: Option<String>, abstract_name: Option<String> },
    Tcp { host: String, port: u16 },
    NonceTcp { host: String, port: u16, noncefile: String },
}

impl Address {
    /// Parse a single `;`-separated address string into its entries, in
    /// order; callers try each in turn until one connects.
    pub fn parse_list(s: &str) -> Result<Vec<Address>> {
        s.split(';')
            .filter(|entry| !entry.is_empty())
            .map(Address::parse_entry)
            .collect()
    }

    fn parse_entry(entry: &str) -> Result<Address> {
        let (transport, params) = entry
            .split_once(':')
            .ok_or_else(|| Error::Address(format!("malformed address entry: {entry:?}")))?;
        let params = parse_params(params)?;

        match transport {
            "unix" => Ok(Address::Unix {
                path: params.get("path").cloned(),
                abstract_name: params.get("abstract").cloned(),
            }),
            "tcp" => {
                let host = params
                    .get("host")
                    .cloned()
                    .ok_or_else(|| Error::Address("tcp address missing host".into()))?;
                let port = params
                    .get("port")
                    .ok_or_else(|| Error::Address("tcp address missing port".into()))?
                    .parse()
                    .map_err(|_| Error::Address("tcp address has invalid port".into()))?;
                Ok(Address::Tcp { host, port })
            }
            "nonce-tcp" => {
                let host = params
                    .get("host")
                    .cloned()
                    .ok_or_else(|| Error::Address("nonce-tcp address missing host".into()))?;
                let port = params
                    .get("port")
                    .ok_or_else(|| Error::Address("nonce-tcp address missing port".into()))?
                    .parse()
                    .map_err(|_| Error::Address("nonce-tcp address has invalid port".into()))?;
                let noncefile = params
                    .get("noncefile")
                    .cloned()
                    .ok_or_else(|| Error::Address("nonce-tcp address missing noncefile".into()))?;
                Ok(Address::NonceTcp { host, port, noncefile })
            }
            other => Err(Error::Address(format!("unsupported transport {other:?}"))),
        }
    }

    /// Resolve a well-known bus alias (`system`, `session`, `starter`) or
    /// parse `s` directly if it isn't one of those.
    pub fn resolve(s: &str) -> Result<Vec<Address>> {
        match s {
            "system" => {
                let addr = std::env::var("DBUS_SYSTEM_BUS_ADDRESS")
                    .unwrap_or_else(|_| "unix:path=/var/run/dbus/system_bus_socket".to_string());
                Address::parse_list(&addr)
            }
            "session" => {
                let addr = std::env::var("DBUS_SESSION_BUS_ADDRESS")
                    .map_err(|_| Error::Address("DBUS_SESSION_BUS_ADDRESS is not set".into()))?;
                Address::parse_list(&addr)
            }
            "starter" => {
                let addr = std::env::var("DBUS_STARTER_ADDRESS")
                    .map_err(|_| Error::Address("DBUS_STARTER_ADDRESS is not set".into()))?;
                Address::parse_list(&addr)
            }
            other => Address::parse_list(other),
        }
    }
}

fn parse_params(s: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in s.split(',') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Address(format!("malformed address parameter: {pair:?}")))?;
        map.insert(key.to_string(), percent_decode(value)?);
    }
    Ok(map)
}

fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::Address(format!("malformed percent-encoding in {s:?}")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::Address(format!("malformed percent-encoding in {s:?}")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| Error::Address(format!("invalid utf-8 after decoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path() {
        let addrs = Address::parse_list("unix:path=/tmp/bus").unwrap();
        assert_eq!(
            addrs[0],
            Address::Unix {
                path: Some("/tmp/bus".into()),
                abstract_name: None,
            }
        );
    }

    #[test]
    fn parses_tcp() {
        let addrs = Address::parse_list("tcp:host=localhost,port=1234").unwrap();
        assert_eq!(
            addrs[0],
            Address::Tcp {
                host: "localhost".into(),
                port: 1234,
            }
        );
    }

    #[test]
    fn percent_decodes_values() {
        let addrs = Address::parse_list("unix:path=/tmp/my%20bus").unwrap();
        assert_eq!(
            addrs[0],
            Address::Unix {
                path: Some("/tmp/my bus".into()),
                abstract_name: None,
            }
        );
    }

    #[test]
    fn rejects_unsupported_transport() {
        assert!(Address::parse_list("vsock:cid=1,port=2").is_err());
    }
}
