//! Bus address parsing (§6): `unix:path=...` and `unix:abstract=...,guid=...`
//! strings as found in `DBUS_SESSION_BUS_ADDRESS` and friends.
//!
//! Only the first `transport:key=value,...` segment is parsed; concrete
//! socket creation is left to [`crate::transport`].

use crate::error::{Error, ErrorKind, Result};

/// A parsed bus address: which unix socket to dial and how to find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A filesystem-path unix domain socket, e.g. `unix:path=/run/dbus/system_bus_socket`.
    Path(String),
    /// A Linux abstract-namespace unix domain socket, e.g.
    /// `unix:abstract=/tmp/dbus-xyz,guid=...`. The `guid` key, if present, is
    /// carried along for diagnostics but otherwise unused by the core.
    Abstract { name: String, guid: Option<String> },
}

/// Parse a single D-Bus address string.
///
/// Only the first address in a `;`-separated list is considered, which
/// matches this crate's single-transport scope (§6).
pub fn parse(address: &str) -> Result<Address> {
    let first = address.split(';').next().unwrap_or_default();

    let Some(rest) = first.strip_prefix("unix:") else {
        return Err(invalid_address(address, "only `unix:` transports are supported"));
    };

    let mut path = None;
    let mut abstract_name = None;
    let mut guid = None;

    for pair in rest.split(',') {
        if pair.is_empty() {
            continue;
        }

        let Some((key, value)) = pair.split_once('=') else {
            return Err(invalid_address(address, "expected `key=value` pairs"));
        };

        match key {
            "path" => path = Some(unescape(value)),
            "abstract" => abstract_name = Some(unescape(value)),
            "guid" => guid = Some(value.to_owned()),
            _ => {}
        }
    }

    match (path, abstract_name) {
        (Some(path), None) => Ok(Address::Path(path)),
        (None, Some(name)) => Ok(Address::Abstract { name, guid }),
        (None, None) => Err(invalid_address(address, "missing `path=` or `abstract=` key")),
        (Some(_), Some(_)) => Err(invalid_address(
            address,
            "cannot specify both `path=` and `abstract=`",
        )),
    }
}

/// D-Bus addresses percent-escape characters outside an allowed set; we only
/// need to unescape `%XX` since paths in practice rarely use anything else.
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(((hi << 4) | lo) as char);
                i += 3;
                continue;
            }
        }

        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn invalid_address(address: &str, why: &str) -> Error {
    Error::new(ErrorKind::InvalidAddress(format!("{address}: {why}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_address() {
        let addr = parse("unix:path=/var/run/dbus/system_bus_socket").unwrap();
        assert_eq!(addr, Address::Path("/var/run/dbus/system_bus_socket".to_owned()));
    }

    #[test]
    fn parses_abstract_address_with_guid() {
        let addr = parse("unix:abstract=/tmp/dbus-abcd1234,guid=deadbeef").unwrap();
        assert_eq!(
            addr,
            Address::Abstract {
                name: "/tmp/dbus-abcd1234".to_owned(),
                guid: Some("deadbeef".to_owned()),
            }
        );
    }

    #[test]
    fn only_first_of_multiple_addresses_is_used() {
        let addr = parse("unix:path=/a;unix:path=/b").unwrap();
        assert_eq!(addr, Address::Path("/a".to_owned()));
    }

    #[test]
    fn rejects_non_unix_transport() {
        assert!(parse("tcp:host=localhost,port=1234").is_err());
    }

    #[test]
    fn rejects_missing_key() {
        assert!(parse("unix:guid=deadbeef").is_err());
    }

    #[test]
    fn unescapes_percent_encoded_paths() {
        let addr = parse("unix:path=/tmp/has%20space").unwrap();
        assert_eq!(addr, Address::Path("/tmp/has space".to_owned()));
    }
}
