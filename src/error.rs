use std::io;

/// Errors produced while constructing or driving a [`crate::Connector`] or
/// [`crate::Accepter`].
///
/// `Io` preserves the originating [`io::Error`] (and with it the raw OS error
/// code, via [`io::Error::raw_os_error`]) rather than collapsing it into a
/// bare integer, so logging and tests can round-trip it losslessly.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("address entry exceeds generic sockaddr storage")]
    TooBig,

    #[error("operation invalid in current lifecycle state")]
    Busy,

    #[error("unsupported control: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TcpError>;

impl TcpError {
    /// The raw OS error code, if this is an [`TcpError::Io`] variant backed
    /// by one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TcpError::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

impl From<TcpError> for io::Error {
    fn from(err: TcpError) -> io::Error {
        match err {
            TcpError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
