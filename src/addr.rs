//! Owned, immutable address lists.
//!
//! The original C API hands this module an externally-owned, iterable list
//! of raw sockaddr bytes and guarantees each entry fits in generic sockaddr
//! storage. In Rust, [`std::net::SocketAddr`] already carries that guarantee
//! in its type, so the only place [`TcpError::TooBig`] can still fire is the
//! raw-bytes constructor ([`AddressList::from_raw`]), which exists for
//! callers sitting on an FFI boundary (e.g. a `getaddrinfo`-shaped resolver)
//! rather than `std::net`.

use std::mem::size_of;
use std::net::SocketAddr;

use crate::error::{Result, TcpError};

/// Matches the platform's `sockaddr_storage` size, the largest sockaddr the
/// original API ever hands across its boundary.
const GENERIC_SOCKADDR_STORAGE_SIZE: usize = 128;

/// A deep-owned, non-empty list of resolved socket addresses, tried in order
/// by [`crate::Connector`] and bound in full by [`crate::Accepter`].
#[derive(Debug, Clone)]
pub struct AddressList {
    addrs: Vec<SocketAddr>,
}

impl AddressList {
    /// Wraps a non-empty `Vec<SocketAddr>`. Panics if `addrs` is empty: the
    /// original API guarantees a non-empty list is passed in, and every
    /// caller in this crate already holds that guarantee before reaching
    /// here.
    pub fn new(addrs: Vec<SocketAddr>) -> AddressList {
        assert!(!addrs.is_empty(), "AddressList must not be empty");
        AddressList { addrs }
    }

    /// Builds an `AddressList` from raw sockaddr-shaped byte slices,
    /// rejecting any entry larger than generic sockaddr storage with
    /// [`TcpError::TooBig`].
    pub fn from_raw(entries: &[(&[u8], std::net::SocketAddr)]) -> Result<AddressList> {
        if entries.is_empty() {
            return Err(TcpError::InvalidArgument(
                "address list must not be empty".into(),
            ));
        }
        let mut addrs = Vec::with_capacity(entries.len());
        for (raw, parsed) in entries {
            if raw.len() > GENERIC_SOCKADDR_STORAGE_SIZE {
                return Err(TcpError::TooBig);
            }
            addrs.push(*parsed);
        }
        Ok(AddressList { addrs })
    }

    pub fn single(addr: SocketAddr) -> AddressList {
        AddressList { addrs: vec![addr] }
    }

    pub fn first(&self) -> SocketAddr {
        self.addrs[0]
    }

    pub fn get(&self, index: usize) -> Option<SocketAddr> {
        self.addrs.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addrs.iter().copied()
    }
}

impl From<SocketAddr> for AddressList {
    fn from(addr: SocketAddr) -> AddressList {
        AddressList::single(addr)
    }
}

const _: () = assert!(size_of::<SocketAddr>() <= GENERIC_SOCKADDR_STORAGE_SIZE * 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_is_head() {
        let list = AddressList::new(vec![
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        ]);
        assert_eq!(list.first(), "127.0.0.1:1".parse().unwrap());
        assert_eq!(list.get(1), Some("127.0.0.1:2".parse().unwrap()));
        assert_eq!(list.get(2), None);
    }

    #[test]
    fn from_raw_rejects_oversized_entry() {
        let big = vec![0u8; GENERIC_SOCKADDR_STORAGE_SIZE + 1];
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = AddressList::from_raw(&[(&big, addr)]).unwrap_err();
        assert!(matches!(err, TcpError::TooBig));
    }

    #[test]
    #[should_panic]
    fn new_rejects_empty() {
        AddressList::new(vec![]);
    }
}
