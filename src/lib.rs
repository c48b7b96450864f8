//! Non-blocking TCP client connector and accepter, built on top of an
//! external fd reactor (`mio`) rather than owning an event loop itself.
//!
//! Two endpoint kinds are provided:
//!
//! - [`Connector`] walks a candidate address list until one connects,
//!   mirroring the way a DNS-resolved hostname commonly yields several
//!   addresses worth trying in order.
//! - [`Accepter`] binds one or more local addresses and hands each accepted
//!   connection to an [`AccepterHandler`] as a [`ServerEndpoint`].
//!
//! Both implement [`SocketOps`], the shared read/write/control surface;
//! [`Connector`] additionally implements [`ClientOps`], the open-sequence
//! state machine a caller drives from its poll loop.

mod accepter;
mod addr;
mod args;
mod client;
mod config;
mod error;
mod sockopt;
mod vtable;

pub use accepter::{Accepter, ServerEndpoint};
pub use addr::AddressList;
pub use args::Arg;
pub use client::Connector;
pub use config::TcpConfig;
pub use error::{Result, TcpError};
pub use vtable::{AccepterHandler, CheckOutcome, ClientOps, IoRecord, OpenOutcome, SocketOps};

/// Parses `addr_str` as a single destination and returns a ready-to-open
/// [`Connector`] (§4.2 "String-to-endpoint helper"). `args` follows the
/// grammar documented on [`Connector::new`].
pub fn str_to_connector(addr_str: &str, args: &[Arg], config: &TcpConfig) -> Result<Connector> {
    let addr: std::net::SocketAddr = addr_str
        .parse()
        .map_err(|_| TcpError::InvalidArgument(format!("not a TCP address: {addr_str}")))?;
    Connector::new(AddressList::single(addr), args, config)
}

/// Parses a comma-separated list of addresses and returns an [`Accepter`]
/// that has not yet been started (§4.3 "String-to-endpoint helper"). Call
/// [`Accepter::startup`] to bind and begin accepting.
pub fn str_to_accepter(
    addr_list: &str,
    args: &[Arg],
    config: &TcpConfig,
    handler: Box<dyn AccepterHandler>,
) -> Result<Accepter> {
    let mut addrs = Vec::new();
    for part in addr_list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let addr: std::net::SocketAddr = part
            .parse()
            .map_err(|_| TcpError::InvalidArgument(format!("not a TCP address: {part}")))?;
        addrs.push(addr);
    }
    if addrs.is_empty() {
        return Err(TcpError::InvalidArgument(
            "address list must not be empty".into(),
        ));
    }
    Accepter::new(AddressList::new(addrs), args, config, handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_to_connector_rejects_garbage() {
        let config = TcpConfig::default();
        let err = str_to_connector("not-an-address", &[], &config).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }

    #[test]
    fn str_to_accepter_parses_multiple_addresses() {
        struct NullHandler;
        impl AccepterHandler for NullHandler {
            fn new_connection(&self, _endpoint: ServerEndpoint) {}
        }

        let config = TcpConfig::default();
        let accepter = str_to_accepter(
            "127.0.0.1:0, [::1]:0",
            &[],
            &config,
            Box::new(NullHandler),
        )
        .unwrap();
        assert_eq!(accepter.readbuf(), config.readbuf);
    }

    #[test]
    fn str_to_accepter_rejects_empty_list() {
        struct NullHandler;
        impl AccepterHandler for NullHandler {
            fn new_connection(&self, _endpoint: ServerEndpoint) {}
        }

        let config = TcpConfig::default();
        let err = str_to_accepter("", &[], &config, Box::new(NullHandler)).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }
}
