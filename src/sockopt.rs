//! Socket setup and the uniform option/OOB control surface (§4.1).
//!
//! `configure` is the one entry point every newly created socket — client or
//! server side — passes through before it is handed to the reactor.

use std::net::SocketAddr;

use socket2::Socket;

use crate::error::{Result, TcpError};

/// Puts `socket` into non-blocking mode, enables `SO_KEEPALIVE` and
/// `SO_REUSEADDR`, applies `TCP_NODELAY` if requested, and binds to
/// `local_bind` if given — in that order, stopping at the first failure.
pub fn configure(socket: &Socket, nodelay: bool, local_bind: Option<SocketAddr>) -> Result<()> {
    socket.set_nonblocking(true)?;
    socket.set_keepalive(true)?;
    socket.set_reuse_address(true)?;
    if nodelay {
        socket.set_nodelay(true)?;
    }
    if let Some(addr) = local_bind {
        socket.bind(&addr.into())?;
    }
    Ok(())
}

/// The one control recognized by this module (§4.1, §6); all others are
/// `Unsupported`.
pub const NODELAY: &str = "NODELAY";

pub fn control_get(socket: &Socket, option: &str) -> Result<String> {
    match option {
        NODELAY => Ok((socket.nodelay()? as u32).to_string()),
        other => Err(TcpError::Unsupported(other.to_string())),
    }
}

pub fn control_set(socket: &Socket, option: &str, value: &str) -> Result<()> {
    match option {
        NODELAY => {
            let n = crate::args::parse_unsigned(value).ok_or_else(|| {
                TcpError::InvalidArgument(format!("invalid value for {NODELAY}: {value}"))
            })?;
            socket.set_nodelay(n != 0)?;
            Ok(())
        }
        other => Err(TcpError::Unsupported(other.to_string())),
    }
}

/// Temporarily views a fd this crate does not own as a [`Socket`] for the
/// duration of `f`, without taking ownership — the real owner (an
/// `mio::net::TcpStream`/`TcpListener`) still closes the fd on its own
/// schedule. Used wherever a control/OOB operation needs the `socket2`
/// surface on a fd that a `mio` type already owns.
#[cfg(unix)]
pub fn with_borrowed_fd<T>(
    fd: std::os::unix::io::RawFd,
    f: impl FnOnce(&Socket) -> Result<T>,
) -> Result<T> {
    use std::os::unix::io::FromRawFd;

    let socket = unsafe { Socket::from_raw_fd(fd) };
    let result = f(&socket);
    std::mem::forget(socket);
    result
}

/// Auxiliary tag that marks a write as urgent (`MSG_OOB`) or an inbound
/// record as having arrived out-of-band.
pub const OOB_TAG: &str = "oob";

/// Validates a write's auxiliary tag vector, returning whether the send
/// should be marked urgent. Any tag other than a case-insensitive `"oob"`
/// aborts the write with `InvalidArgument` before any bytes are sent.
pub fn parse_write_aux(aux: &[String]) -> Result<bool> {
    let mut oob = false;
    for tag in aux {
        if tag.eq_ignore_ascii_case(OOB_TAG) {
            oob = true;
        } else {
            return Err(TcpError::InvalidArgument(format!(
                "unrecognized aux tag: {tag}"
            )));
        }
    }
    Ok(oob)
}

/// Sends `buf` on `socket`, setting `MSG_OOB` when `urgent` is set. Returns
/// the number of bytes actually written.
#[cfg(unix)]
pub fn send(socket: &Socket, buf: &[u8], urgent: bool) -> Result<usize> {
    use std::os::unix::io::AsRawFd;

    let flags = if urgent { libc::MSG_OOB } else { 0 };
    let fd = socket.as_raw_fd();
    let n = unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            flags,
        )
    };
    if n < 0 {
        Err(std::io::Error::last_os_error().into())
    } else {
        Ok(n as usize)
    }
}

/// Issues a single urgent-flagged receive (`MSG_OOB`), as called from the
/// except-ready path (§4.1, §6).
#[cfg(unix)]
pub fn recv_oob(socket: &Socket, buf: &mut [u8]) -> Result<usize> {
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    let n = unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::MSG_OOB,
        )
    };
    if n < 0 {
        Err(std::io::Error::last_os_error().into())
    } else {
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_aux_tag_rejected() {
        let err = parse_write_aux(&["bogus".to_string()]).unwrap_err();
        assert!(matches!(err, TcpError::InvalidArgument(_)));
    }

    #[test]
    fn oob_tag_case_insensitive() {
        assert!(parse_write_aux(&["OoB".to_string()]).unwrap());
        assert!(!parse_write_aux(&[]).unwrap());
    }

    #[test]
    fn unknown_control_is_unsupported() {
        let socket = Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap();
        let err = control_get(&socket, "TTL").unwrap_err();
        assert!(matches!(err, TcpError::Unsupported(_)));
    }

    #[test]
    fn nodelay_round_trips() {
        let socket = Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap();
        control_set(&socket, NODELAY, "1").unwrap();
        assert_eq!(control_get(&socket, NODELAY).unwrap(), "1");
        control_set(&socket, NODELAY, "0").unwrap();
        assert_eq!(control_get(&socket, NODELAY).unwrap(), "0");
    }
}
