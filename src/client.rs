//! The client connector: a non-blocking state machine that walks a list of
//! candidate addresses (§4.2).

use std::io::{self, Read, Write};
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use log::{debug, trace};
use mio::event::Source;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::addr::AddressList;
use crate::args::{parse_client_args, Arg};
use crate::config::TcpConfig;
use crate::error::{Result, TcpError};
use crate::sockopt;
use crate::vtable::{CheckOutcome, ClientOps, IoRecord, OpenOutcome, SocketOps};

/// A client endpoint: owns the candidate address list and the socket of the
/// candidate currently being tried or already connected (§3 `ClientState`).
pub struct Connector {
    addrs: AddressList,
    local_bind: Option<AddressList>,
    nodelay: bool,
    readbuf: usize,
    current: Option<usize>,
    remote_cached: Option<SocketAddr>,
    last_err: Option<io::Error>,
    stream: Option<mio::net::TcpStream>,
}

impl Connector {
    /// Deep-copies `addrs` and parses `args` against `config`'s defaults
    /// (§4.2 "Construction"). Does not itself start connecting; call
    /// [`Connector::sub_open`] for that.
    pub fn new(addrs: AddressList, args: &[Arg], config: &TcpConfig) -> Result<Connector> {
        let parsed = parse_client_args(args)?;
        Ok(Connector {
            addrs,
            local_bind: parsed.laddr.map(AddressList::single),
            nodelay: parsed.nodelay.unwrap_or(config.nodelay),
            readbuf: parsed.readbuf.unwrap_or(config.readbuf),
            current: None,
            remote_cached: None,
            last_err: None,
            stream: None,
        })
    }

    /// Convenience constructor for a single destination address.
    pub fn connect_to(addr: SocketAddr, config: &TcpConfig) -> Result<Connector> {
        Connector::new(AddressList::single(addr), &[], config)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_cached
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn readbuf(&self) -> usize {
        self.readbuf
    }

    /// Attempts every remaining candidate starting at `index`, stopping at
    /// the first that connects synchronously, goes in-progress, or (once
    /// every candidate is exhausted) fails terminally.
    fn attempt_from(&mut self, mut index: usize) -> Result<OpenOutcome> {
        loop {
            let Some(addr) = self.addrs.get(index) else {
                return Err(self
                    .last_err
                    .take()
                    .map(TcpError::Io)
                    .unwrap_or(TcpError::InvalidArgument(
                        "no candidate addresses".into(),
                    )));
            };

            match self.try_connect(addr) {
                Ok((stream, true)) => {
                    self.stream = Some(stream);
                    self.current = Some(index);
                    self.remote_cached = Some(addr);
                    trace!("tcp connector: connected synchronously to {addr}");
                    return Ok(OpenOutcome::Ready);
                }
                Ok((stream, false)) => {
                    self.stream = Some(stream);
                    self.current = Some(index);
                    trace!("tcp connector: connect in progress to {addr}");
                    return Ok(OpenOutcome::InProgress);
                }
                Err(err) => {
                    debug!("tcp connector: candidate {addr} failed: {err}");
                    self.last_err = Some(err);
                    index += 1;
                }
            }
        }
    }

    /// Creates, configures, and non-blockingly connects a fresh socket to
    /// `addr`. Returns `(stream, true)` on synchronous success, `(stream,
    /// false)` when the connect is in progress, or the OS error for any
    /// other synchronous failure.
    fn try_connect(&self, addr: SocketAddr) -> io::Result<(mio::net::TcpStream, bool)> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        let local_bind = self.local_bind.as_ref().map(AddressList::first);
        sockopt::configure(&socket, self.nodelay, local_bind).map_err(io::Error::from)?;

        match socket.connect(&addr.into()) {
            Ok(()) => {
                let stream = to_mio_stream(socket);
                Ok((stream, true))
            }
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {
                let stream = to_mio_stream(socket);
                Ok((stream, false))
            }
            Err(err) => Err(err),
        }
    }

    fn stream(&self) -> Result<&mio::net::TcpStream> {
        self.stream
            .as_ref()
            .ok_or(TcpError::Busy)
    }

    fn stream_mut(&mut self) -> Result<&mut mio::net::TcpStream> {
        self.stream
            .as_mut()
            .ok_or(TcpError::Busy)
    }
}

#[cfg(unix)]
fn to_mio_stream(socket: Socket) -> mio::net::TcpStream {
    use std::os::unix::io::FromRawFd;
    let std_stream: std::net::TcpStream = socket.into();
    unsafe { mio::net::TcpStream::from_raw_fd(std_stream.into_raw_fd()) }
}

impl ClientOps for Connector {
    fn sub_open(&mut self) -> Result<OpenOutcome> {
        self.attempt_from(0)
    }

    fn check_open(&mut self) -> Result<CheckOutcome> {
        let index = self.current.ok_or(TcpError::Busy)?;
        let addr = self.addrs.get(index).ok_or(TcpError::Busy)?;
        let err = self
            .stream()?
            .take_error()?;
        match err {
            None => {
                self.remote_cached = Some(addr);
                Ok(CheckOutcome::Connected)
            }
            Some(err) => {
                self.last_err = Some(io::Error::from_raw_os_error(
                    err.raw_os_error().unwrap_or(libc::ECONNREFUSED),
                ));
                Ok(CheckOutcome::Pending(err))
            }
        }
    }

    fn retry_open(&mut self) -> Result<OpenOutcome> {
        let next = self.current.map(|i| i + 1).unwrap_or(0);
        self.attempt_from(next)
    }
}

impl SocketOps for Connector {
    fn write(&mut self, record: &IoRecord) -> Result<usize> {
        let urgent = sockopt::parse_write_aux(&record.aux)?;
        if urgent {
            #[cfg(unix)]
            {
                let fd = self.stream()?.as_raw_fd();
                return sockopt::with_borrowed_fd(fd, |s| sockopt::send(s, &record.data, true));
            }
            #[cfg(not(unix))]
            return Err(TcpError::Unsupported("oob send".into()));
        }
        Ok(self.stream_mut()?.write(&record.data)?)
    }

    fn except_ready(&mut self) -> Result<IoRecord> {
        #[cfg(unix)]
        {
            let mut buf = [0u8; 1];
            let fd = self.stream()?.as_raw_fd();
            let n = sockopt::with_borrowed_fd(fd, |s| sockopt::recv_oob(s, &mut buf))?;
            Ok(IoRecord::oob(buf[..n].to_vec()))
        }
        #[cfg(not(unix))]
        Err(TcpError::Unsupported("oob recv".into()))
    }

    fn control_get(&self, option: &str) -> Result<String> {
        let fd = self.stream()?.as_raw_fd();
        sockopt::with_borrowed_fd(fd, |s| sockopt::control_get(s, option))
    }

    fn control_set(&mut self, option: &str, value: &str) -> Result<()> {
        if option == sockopt::NODELAY {
            self.nodelay = crate::args::parse_unsigned(value).unwrap_or(0) != 0;
        }
        let fd = self.stream()?.as_raw_fd();
        sockopt::with_borrowed_fd(fd, |s| sockopt::control_set(s, option, value))
    }

    fn raddr_to_str(&self) -> Result<String> {
        Ok(self
            .remote_cached
            .ok_or(TcpError::Busy)?
            .to_string())
    }

    fn get_raddr(&self) -> Result<SocketAddr> {
        self.remote_cached.ok_or(TcpError::Busy)
    }
}

impl Source for Connector {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream_mut()
            .map_err(io::Error::from)?
            .register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.stream_mut()
            .map_err(io::Error::from)?
            .reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream_mut().map_err(io::Error::from)?.deregister(registry)
    }
}

impl Read for Connector {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_mut().map_err(io::Error::from)?.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_argument() {
        let config = TcpConfig::default();
        let addrs = AddressList::single("127.0.0.1:0".parse().unwrap());
        let err = Connector::new(addrs, &[Arg::new("bogus=1")], &config).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }

    #[test]
    fn nodelay_defaults_from_config() {
        let mut config = TcpConfig::default();
        config.nodelay = true;
        let addrs = AddressList::single("127.0.0.1:0".parse().unwrap());
        let connector = Connector::new(addrs, &[], &config).unwrap();
        assert!(connector.nodelay);
    }
}
