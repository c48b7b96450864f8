//! The listening endpoint: binds one or more local sockets, accepts inbound
//! connections, and hands each off to the application as a new client-shaped
//! endpoint (§4.3).
//!
//! Lifecycle and refcounting are modeled the way §9 "Refcount with
//! asynchronous teardown" recommends: shared ownership via [`Arc`], with one
//! strong reference per held [`Accepter`] handle plus one per pending
//! accepted endpoint. There is no hand-written "drop under lock and free at
//! zero" helper — `Arc`'s own `Drop` already gives us that, and
//! `Drop for AccepterShared` below force-closes the listen sockets if the
//! last strong reference disappears while still set up, rather than the
//! accepter relying on a self-held reference to stay alive.

use std::io::{self, Read as _};
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::{Arc, Mutex};

use log::{debug, error, trace};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::addr::AddressList;
use crate::args::{parse_accepter_args, parse_client_args, Arg};
use crate::client::Connector;
use crate::config::TcpConfig;
use crate::error::{Result, TcpError};
use crate::sockopt;
use crate::vtable::{AccepterHandler, IoRecord, SocketOps};

/// A listening socket bound and owned by an [`Accepter`], paired with the
/// `Token` it was registered under.
struct ListenSocket {
    listener: mio::net::TcpListener,
    token: Token,
}

/// Everything the accepter's lock protects (§3 `AccepterState`).
struct AccepterGuts {
    listen: Option<Vec<ListenSocket>>,
    setup: bool,
    enabled: bool,
    in_shutdown: bool,
    nr_accept_close_waiting: usize,
    shutdown_done: Option<Box<dyn FnOnce() + Send>>,
}

struct AccepterShared {
    addrs: AddressList,
    readbuf: usize,
    nodelay: bool,
    listen_backlog: i32,
    handler: Box<dyn AccepterHandler>,
    guts: Mutex<AccepterGuts>,
}

impl Drop for AccepterShared {
    /// The last strong reference to a still-`setup` accepter going away
    /// (the application dropped its handle, or a pending `ServerEndpoint`
    /// was the final holder) must not leak the listen fds. Run the same
    /// teardown `disable` would, minus the `Registry::deregister` call —
    /// there is no `Registry` to reach here, but closing the listener fd is
    /// enough: a closed fd is dropped from any `epoll`/`kqueue` instance
    /// that held it.
    fn drop(&mut self) {
        let mut guts = self.guts.lock().unwrap();
        if guts.setup {
            if let Some(listen) = guts.listen.take() {
                debug!(
                    "tcp accepter: dropped while still set up, force-closing {} listening socket(s)",
                    listen.len()
                );
            }
            guts.setup = false;
            guts.enabled = false;
        }
    }
}

/// A listening endpoint (§2 item 3, §4.3).
///
/// Cloning an `Accepter` shares the same underlying state (and the same
/// `Arc` strong count); there is exactly one [`Accepter`] per application
/// handle, but [`ServerEndpoint`] values hold their own internal clone while
/// their open sequence is pending.
#[derive(Clone)]
pub struct Accepter {
    shared: Arc<AccepterShared>,
}

/// A freshly accepted connection, already configured, not yet handed to the
/// application (§4.3 step 5, "Server open completion").
pub struct ServerEndpoint {
    socket: Socket,
    peer: SocketAddr,
    nodelay: bool,
    stream: Option<mio::net::TcpStream>,
    /// The pending-endpoint reference (§3 `refcount`, "+1 per pending
    /// accepted endpoint"). Dropped once the caller finishes the open
    /// sequence, via [`ServerEndpoint::open_done`] or simply dropping the
    /// value.
    _pending_ref: Arc<AccepterShared>,
    reliable: bool,
}

impl Accepter {
    /// Deep-copies `addrs`, parses `args` against `config`'s defaults, and
    /// allocates the accepter in its initial (`setup = false`) state (§4.3
    /// "Construction"). `handler` receives `new_connection` events and may
    /// optionally gate accepted peers via `check_access`.
    pub fn new(
        addrs: AddressList,
        args: &[Arg],
        config: &TcpConfig,
        handler: Box<dyn AccepterHandler>,
    ) -> Result<Accepter> {
        let parsed = parse_accepter_args(args)?;
        let shared = Arc::new(AccepterShared {
            addrs,
            readbuf: parsed.readbuf.unwrap_or(config.readbuf),
            nodelay: parsed.nodelay.unwrap_or(config.nodelay),
            listen_backlog: config.listen_backlog,
            handler,
            guts: Mutex::new(AccepterGuts {
                listen: None,
                setup: false,
                enabled: false,
                in_shutdown: false,
                nr_accept_close_waiting: 0,
                shutdown_done: None,
            }),
        });
        Ok(Accepter { shared })
    }

    pub fn readbuf(&self) -> usize {
        self.shared.readbuf
    }

    pub fn nodelay(&self) -> bool {
        self.shared.nodelay
    }

    /// Binds every address in the accepter's list, registers each listen fd
    /// with `registry`, and starts delivering `new_connection` events.
    ///
    /// Fails with [`TcpError::Busy`] if already set up or shutting down
    /// (§4.3 `startup`). Binds all requested sockets or none — a failure
    /// partway through unwinds every socket already bound in this call.
    pub fn startup(&self, registry: &Registry) -> Result<()> {
        let mut guts = self.shared.guts.lock().unwrap();
        if guts.setup || guts.in_shutdown {
            return Err(TcpError::Busy);
        }

        let mut listen = Vec::with_capacity(self.shared.addrs.len());
        for (i, addr) in self.shared.addrs.iter().enumerate() {
            match bind_listener(addr, self.shared.listen_backlog) {
                Ok(mut listener) => {
                    let token = Token(listener_token_base(self) + i);
                    if let Err(err) =
                        registry.register(&mut listener, token, Interest::READABLE)
                    {
                        for mut entry in listen {
                            let _ = registry.deregister(&mut entry.listener);
                        }
                        return Err(err.into());
                    }
                    listen.push(ListenSocket { listener, token });
                }
                Err(err) => {
                    for mut entry in listen {
                        let _ = registry.deregister(&mut entry.listener);
                    }
                    return Err(err.into());
                }
            }
        }

        debug!(
            "tcp accepter: startup bound {} listening socket(s)",
            listen.len()
        );
        guts.listen = Some(listen);
        guts.setup = true;
        guts.enabled = true;
        guts.shutdown_done = None;
        Ok(())
    }

    /// Returns the actual bound address of every listening socket, in the
    /// same order as the address list passed to [`Accepter::new`]. Useful
    /// after binding to port `0` to discover the OS-assigned port.
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        let guts = self.shared.guts.lock().unwrap();
        let listen = guts.listen.as_ref().ok_or(TcpError::Busy)?;
        listen
            .iter()
            .map(|entry| entry.listener.local_addr().map_err(TcpError::from))
            .collect()
    }

    /// Looks up which listening socket (if any) owns `token`, for dispatch
    /// from the application's poll loop.
    pub fn owns_token(&self, token: Token) -> bool {
        let guts = self.shared.guts.lock().unwrap();
        guts.listen
            .as_ref()
            .map(|l| l.iter().any(|e| e.token == token))
            .unwrap_or(false)
    }

    /// Runs the accept handler for the listening socket registered under
    /// `token` (§4.3 "Accept handler"). Call this once per readable event
    /// the application's poll loop observes for a listen token.
    pub fn accept_ready(&self, token: Token) {
        loop {
            let accepted = {
                let guts = self.shared.guts.lock().unwrap();
                let Some(listen) = guts.listen.as_ref() else {
                    return;
                };
                let Some(entry) = listen.iter().find(|e| e.token == token) else {
                    return;
                };
                entry.listener.accept()
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    error!("tcp accepter: accept failed: {err}");
                    return;
                }
            };

            if let Some(reason) = self.shared.handler.check_access(peer) {
                #[cfg(unix)]
                {
                    use std::io::Write as _;
                    let mut stream = stream;
                    let _ = stream.write_all(reason.as_bytes());
                }
                trace!("tcp accepter: rejected {peer}: {reason}");
                continue;
            }

            let socket = to_socket2(stream);
            if let Err(err) = sockopt::configure(&socket, self.shared.nodelay, None) {
                error!("tcp accepter: failed to configure accepted socket: {err}");
                continue;
            }

            let endpoint = ServerEndpoint {
                socket,
                peer,
                nodelay: self.shared.nodelay,
                stream: None,
                _pending_ref: self.shared.clone(),
                reliable: true,
            };

            self.shared.handler.new_connection(endpoint);
        }
    }

    /// Requests an asynchronous shutdown: deregisters and closes every
    /// listen fd, then invokes `done` (§4.3 `shutdown`). Fails with
    /// [`TcpError::Busy`] if not currently set up.
    pub fn shutdown(&self, registry: &Registry, done: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut guts = self.shared.guts.lock().unwrap();
        if !guts.setup {
            return Err(TcpError::Busy);
        }
        let listen = guts.listen.take().unwrap_or_default();
        guts.in_shutdown = true;
        guts.setup = false;
        guts.enabled = false;
        guts.nr_accept_close_waiting = listen.len();
        guts.shutdown_done = Some(Box::new(done));
        drop(guts);

        for mut entry in listen {
            let _ = registry.deregister(&mut entry.listener);
            self.fd_cleared();
        }
        Ok(())
    }

    /// Acknowledges that one listen fd's handler-clear has completed
    /// (§4.3 `fd_cleared`). In this implementation `deregister` is
    /// synchronous, so `shutdown` calls this inline for every fd it
    /// deregisters; the bookkeeping is identical to a framework where the
    /// acknowledgement genuinely arrives later.
    fn fd_cleared(&self) {
        let done = {
            let mut guts = self.shared.guts.lock().unwrap();
            guts.nr_accept_close_waiting = guts.nr_accept_close_waiting.saturating_sub(1);
            if guts.nr_accept_close_waiting == 0 {
                guts.in_shutdown = false;
                guts.shutdown_done.take()
            } else {
                None
            }
        };
        if let Some(done) = done {
            done();
        }
    }

    /// Enables or disables accept-handler dispatch without tearing down the
    /// listen sockets (§4.3 `set_accept_callback_enable`). A repeated call
    /// with the same value is a no-op.
    pub fn set_accept_callback_enable(&self, registry: &Registry, enable: bool) -> Result<()> {
        let mut guts = self.shared.guts.lock().unwrap();
        if guts.enabled == enable {
            return Ok(());
        }
        if let Some(listen) = guts.listen.as_mut() {
            for entry in listen.iter_mut() {
                let interests = if enable {
                    Interest::READABLE
                } else {
                    // mio has no "parked" interest; approximate disablement
                    // by reregistering with writable-only interest, which no
                    // listening socket will ever satisfy.
                    Interest::WRITABLE
                };
                registry.reregister(&mut entry.listener, entry.token, interests)?;
            }
        }
        guts.enabled = enable;
        Ok(())
    }

    /// Forceful, synchronous teardown: closes every listen fd directly and
    /// never invokes a shutdown completion callback (§4.3 `disable`). Only
    /// legal when the caller does not need shutdown notification.
    pub fn disable(&self, registry: &Registry) {
        let mut guts = self.shared.guts.lock().unwrap();
        guts.in_shutdown = false;
        guts.shutdown_done = None;
        if let Some(listen) = guts.listen.take() {
            for mut entry in listen {
                let _ = registry.deregister(&mut entry.listener);
            }
        }
        guts.setup = false;
        guts.enabled = false;
    }

    /// Parses `addr_str` — an address, optionally followed by its own
    /// `,key=value` argument list — and builds a [`Connector`] that inherits
    /// this accepter's `readbuf`/`nodelay` defaults (§4.3 "String-to-endpoint
    /// helper").
    ///
    /// `nodelay` is inherited from the accepter unless `addr_str`'s own
    /// argument list explicitly supplies `nodelay`, in which case that
    /// explicit value wins — see the Open Question resolution in
    /// `SPEC_FULL.md` §9 (the source's equivalent helper checked the wrong
    /// argument slot here).
    pub fn str_to_connector(&self, addr_str: &str, config: &TcpConfig) -> Result<Connector> {
        let mut parts = addr_str.split(',');
        let host = parts
            .next()
            .ok_or_else(|| TcpError::InvalidArgument("empty address string".into()))?;
        let addr: SocketAddr = host
            .parse()
            .map_err(|_| TcpError::InvalidArgument(format!("not a TCP address: {host}")))?;
        let child_args: Vec<Arg> = parts.map(Arg::new).collect();
        let child_parsed = parse_client_args(&child_args)?;

        let mut args = child_args;
        if child_parsed.readbuf.is_none() && self.shared.readbuf != config.readbuf {
            args.push(Arg::new(format!("readbuf={}", self.shared.readbuf)));
        }
        if child_parsed.nodelay.is_none() && self.shared.nodelay {
            args.push(Arg::new("nodelay"));
        }

        Connector::new(AddressList::single(addr), &args, config)
    }
}

impl ServerEndpoint {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Registers the accepted connection's fd with `registry` under the
    /// server vtable (no open-related slots — the fd is already connected)
    /// and returns the live stream for subsequent I/O.
    pub fn register(&mut self, registry: &Registry, token: Token) -> Result<()> {
        let stream = self.stream_or_init()?;
        registry.register(stream, token, Interest::READABLE)?;
        Ok(())
    }

    #[cfg(unix)]
    fn stream_or_init(&mut self) -> Result<&mut mio::net::TcpStream> {
        if self.stream.is_none() {
            let fd = self.socket.as_raw_fd();
            // `self.socket` keeps owning the fd; `mio::net::TcpStream` gets
            // its own handle to the same fd via `dup`, so both can be
            // dropped independently without a double-close.
            let dup_fd = unsafe { libc::dup(fd) };
            if dup_fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            self.stream = Some(unsafe { mio::net::TcpStream::from_raw_fd(dup_fd) });
        }
        Ok(self.stream.as_mut().expect("stream initialized above"))
    }

    #[cfg(not(unix))]
    fn stream_or_init(&mut self) -> Result<&mut mio::net::TcpStream> {
        Err(TcpError::Unsupported("tcp accepter on non-unix".into()))
    }

    /// Called by the higher stream stack once its open sequence for this
    /// endpoint has finished (§4.3 "Server open completion"). This drives
    /// the upward `new_connection`/failure split; the accepter's
    /// pending-endpoint reference is released when `self` is dropped
    /// regardless of which branch runs.
    pub fn open_done(self, err: Option<io::Error>) {
        if let Some(err) = err {
            error!("tcp accepter: server open failed for {}: {err}", self.peer);
        }
    }
}

impl SocketOps for ServerEndpoint {
    fn write(&mut self, record: &IoRecord) -> Result<usize> {
        let urgent = sockopt::parse_write_aux(&record.aux)?;
        sockopt::send(&self.socket, &record.data, urgent)
    }

    fn except_ready(&mut self) -> Result<IoRecord> {
        let mut buf = [0u8; 1];
        let n = sockopt::recv_oob(&self.socket, &mut buf)?;
        Ok(IoRecord::oob(buf[..n].to_vec()))
    }

    fn control_get(&self, option: &str) -> Result<String> {
        sockopt::control_get(&self.socket, option)
    }

    fn control_set(&mut self, option: &str, value: &str) -> Result<()> {
        if option == sockopt::NODELAY {
            self.nodelay = crate::args::parse_unsigned(value).unwrap_or(0) != 0;
        }
        sockopt::control_set(&self.socket, option, value)
    }

    fn raddr_to_str(&self) -> Result<String> {
        Ok(self.peer.to_string())
    }

    fn get_raddr(&self) -> Result<SocketAddr> {
        Ok(self.peer)
    }
}

impl std::io::Read for ServerEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_or_init()
            .map_err(io::Error::from)?
            .read(buf)
    }
}

#[cfg(unix)]
fn to_socket2(stream: mio::net::TcpStream) -> Socket {
    let fd = stream.into_raw_fd();
    unsafe { Socket::from_raw_fd(fd) }
}

#[cfg(unix)]
fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<mio::net::TcpListener> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    let fd = socket.into_raw_fd();
    Ok(unsafe { mio::net::TcpListener::from_raw_fd(fd) })
}

#[cfg(not(unix))]
fn bind_listener(_addr: SocketAddr, _backlog: i32) -> io::Result<mio::net::TcpListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "tcp accepter is only implemented for unix targets",
    ))
}

/// Distinguishes `Token`s handed to different accepters sharing one
/// `Registry`: offsets each accepter's listen-socket tokens by a value
/// derived from its shared state's address, which is stable for the
/// accepter's lifetime and distinct across accepters.
fn listener_token_base(accepter: &Accepter) -> usize {
    Arc::as_ptr(&accepter.shared) as usize
}
