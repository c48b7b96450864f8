//! Argument grammar shared by [`crate::Connector::new`] and
//! [`crate::Accepter::new`]: a vector of `key=value` or bare-key strings.
//!
//! Parsing is strict — an unrecognized key aborts construction with
//! [`TcpError::InvalidArgument`] rather than being silently ignored, so a
//! typo in a key never degrades into unexpectedly-default behavior.

use std::net::SocketAddr;

use crate::error::{Result, TcpError};

/// A single `key=value` (or bare `key`) argument, as handed to
/// [`parse_client_args`] or [`parse_accepter_args`].
#[derive(Debug, Clone)]
pub struct Arg(pub String);

impl Arg {
    pub fn new(s: impl Into<String>) -> Arg {
        Arg(s.into())
    }

    fn split(&self) -> (&str, Option<&str>) {
        match self.0.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (self.0.as_str(), None),
        }
    }
}

/// Arguments recognized by [`crate::Connector::new`].
#[derive(Debug, Clone, Default)]
pub struct ClientArgs {
    pub readbuf: Option<usize>,
    pub laddr: Option<SocketAddr>,
    pub nodelay: Option<bool>,
}

/// Arguments recognized by [`crate::Accepter::new`].
#[derive(Debug, Clone, Default)]
pub struct AccepterArgs {
    pub readbuf: Option<usize>,
    pub nodelay: Option<bool>,
}

pub fn parse_client_args(args: &[Arg]) -> Result<ClientArgs> {
    let mut out = ClientArgs::default();
    for arg in args {
        let (key, value) = arg.split();
        match key {
            "readbuf" => out.readbuf = Some(parse_size(key, value)?),
            "laddr" => out.laddr = Some(parse_addr(key, value)?),
            "nodelay" => out.nodelay = Some(parse_bool(key, value)?),
            other => return Err(unrecognized(other)),
        }
    }
    Ok(out)
}

pub fn parse_accepter_args(args: &[Arg]) -> Result<AccepterArgs> {
    let mut out = AccepterArgs::default();
    for arg in args {
        let (key, value) = arg.split();
        match key {
            "readbuf" => out.readbuf = Some(parse_size(key, value)?),
            "nodelay" => out.nodelay = Some(parse_bool(key, value)?),
            other => return Err(unrecognized(other)),
        }
    }
    Ok(out)
}

fn unrecognized(key: &str) -> TcpError {
    TcpError::InvalidArgument(format!("unrecognized argument: {key}"))
}

fn parse_size(key: &str, value: Option<&str>) -> Result<usize> {
    let value = value.ok_or_else(|| {
        TcpError::InvalidArgument(format!("argument {key} requires a value"))
    })?;
    value
        .parse()
        .map_err(|_| TcpError::InvalidArgument(format!("invalid size for {key}: {value}")))
}

fn parse_addr(key: &str, value: Option<&str>) -> Result<SocketAddr> {
    let value = value.ok_or_else(|| {
        TcpError::InvalidArgument(format!("argument {key} requires a value"))
    })?;
    value
        .parse()
        .map_err(|_| TcpError::InvalidArgument(format!("invalid address for {key}: {value}")))
}

/// Bare `nodelay` means `true`; `nodelay=<anything parseable as an unsigned
/// integer>` treats nonzero as `true`, matching the `NODELAY.set` control
/// encoding in [`crate::sockopt`].
fn parse_bool(key: &str, value: Option<&str>) -> Result<bool> {
    match value {
        None => Ok(true),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(value) => {
            let n = parse_unsigned(value).ok_or_else(|| {
                TcpError::InvalidArgument(format!("invalid boolean for {key}: {value}"))
            })?;
            Ok(n != 0)
        }
    }
}

/// Parses a decimal/hex/octal/binary unsigned integer, base autodetected
/// from a `0x`/`0o`/`0b` prefix — the same encoding `NODELAY.set` accepts on
/// the wire (see [`crate::sockopt::control_set_nodelay`]).
pub fn parse_unsigned(value: &str) -> Option<u64> {
    let (radix, digits) = if let Some(rest) = value.strip_prefix("0x").or(value.strip_prefix("0X"))
    {
        (16, rest)
    } else if let Some(rest) = value.strip_prefix("0o").or(value.strip_prefix("0O")) {
        (8, rest)
    } else if let Some(rest) = value.strip_prefix("0b").or(value.strip_prefix("0B")) {
        (2, rest)
    } else {
        (10, value)
    };
    u64::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_rejected() {
        let err = parse_client_args(&[Arg::new("bogus=1")]).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }

    #[test]
    fn bare_nodelay_is_true() {
        let parsed = parse_client_args(&[Arg::new("nodelay")]).unwrap();
        assert_eq!(parsed.nodelay, Some(true));
    }

    #[test]
    fn laddr_parses_socket_addr() {
        let parsed = parse_client_args(&[Arg::new("laddr=127.0.0.1:0")]).unwrap();
        assert_eq!(parsed.laddr, Some("127.0.0.1:0".parse().unwrap()));
    }

    #[test]
    fn readbuf_requires_value() {
        let err = parse_client_args(&[Arg::new("readbuf")]).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }

    #[test]
    fn accepter_rejects_laddr() {
        let err = parse_accepter_args(&[Arg::new("laddr=127.0.0.1:0")]).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }

    #[test]
    fn hex_nodelay_value() {
        let parsed = parse_client_args(&[Arg::new("nodelay=0x1")]).unwrap();
        assert_eq!(parsed.nodelay, Some(true));
    }
}
