//! The capability traits this module plugs into the surrounding stream-I/O
//! stack with (§6, §9 "Vtable dispatch").
//!
//! The C source dispatches through function-pointer tables; here that
//! becomes ordinary trait methods. `free` has no method of its own — it is
//! `Drop`.

use std::net::SocketAddr;

use crate::error::Result;

/// One inbound or outbound record, carrying the auxiliary tags the original
/// API attaches to a read or write (currently only `"oob"`, see
/// [`crate::sockopt::OOB_TAG`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRecord {
    pub data: Vec<u8>,
    pub aux: Vec<String>,
}

impl IoRecord {
    pub fn plain(data: Vec<u8>) -> IoRecord {
        IoRecord { data, aux: Vec::new() }
    }

    pub fn oob(data: Vec<u8>) -> IoRecord {
        IoRecord {
            data,
            aux: vec![crate::sockopt::OOB_TAG.to_string()],
        }
    }

    pub fn is_oob(&self) -> bool {
        self.aux
            .iter()
            .any(|t| t.eq_ignore_ascii_case(crate::sockopt::OOB_TAG))
    }
}

/// Result of a single [`crate::Connector::try_open`] attempt (§4.2).
pub enum OpenOutcome {
    /// The peer connected synchronously.
    Ready,
    /// Non-blocking `connect` is in progress; caller should wait for
    /// writable/except readiness.
    InProgress,
}

/// Outcome of asking the framework for [`crate::Connector::check_open`].
pub enum CheckOutcome {
    /// `SO_ERROR` was zero; the connection is established.
    Connected,
    /// `SO_ERROR` was non-zero; the pending error is recorded as `last_err`
    /// and the framework should call [`crate::Connector::retry_open`].
    Pending(std::io::Error),
}

/// The subset of the vtable specific to the client connector: the
/// open-related slots (§6, §9 "Dual vtable"). `ServerEndpoint` never
/// implements this trait — the fd is already connected.
pub trait ClientOps {
    fn sub_open(&mut self) -> Result<OpenOutcome>;
    fn check_open(&mut self) -> Result<CheckOutcome>;
    fn retry_open(&mut self) -> Result<OpenOutcome>;
}

/// The base vtable shared by client and server endpoints (§9 "Dual
/// vtable"): option control, OOB, remote-address queries, and writes.
pub trait SocketOps {
    fn write(&mut self, record: &IoRecord) -> Result<usize>;
    fn except_ready(&mut self) -> Result<IoRecord>;
    fn control_get(&self, option: &str) -> Result<String>;
    fn control_set(&mut self, option: &str, value: &str) -> Result<()>;
    fn raddr_to_str(&self) -> Result<String>;
    fn get_raddr(&self) -> Result<SocketAddr>;
}

/// Upward hooks the accepter calls into the surrounding stream-I/O stack
/// (§4.3, §6 "Upward events produced"). Implemented by whatever owns the
/// public endpoint object; this crate only ever calls these methods, it
/// never implements them.
pub trait AccepterHandler: Send + Sync {
    /// A server endpoint finished its open sequence successfully.
    fn new_connection(&self, endpoint: crate::accepter::ServerEndpoint);

    /// Optional host-access check run against a freshly accepted fd, before
    /// any further setup. Returning `Some(reason)` writes `reason` to the fd
    /// best-effort and closes it without constructing an endpoint.
    fn check_access(&self, _peer: SocketAddr) -> Option<String> {
        None
    }
}
