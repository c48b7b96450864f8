/// Ambient defaults shared by every [`crate::Connector`] and [`crate::Accepter`]
/// an application constructs.
///
/// Per-endpoint arguments (see [`crate::args`]) override these on a
/// case-by-case basis; a value here is only used when the argument list is
/// silent about it.
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    /// Read-buffer size reported to the fd framework for a new endpoint,
    /// absent an explicit `readbuf` argument.
    pub readbuf: usize,
    /// Whether `TCP_NODELAY` is enabled by default.
    pub nodelay: bool,
    /// Backlog passed to `listen(2)` when an accepter binds its sockets.
    pub listen_backlog: i32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            readbuf: 4096,
            nodelay: false,
            listen_backlog: 128,
        }
    }
}
