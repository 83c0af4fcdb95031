use ferrous_dot_domain::{DotError, DotServer};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) const KEEPALIVE_IDLE: Duration = Duration::from_secs(15);
pub(crate) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);
pub(crate) const KEEPALIVE_PROBES: u32 = 5;

/// Opens a non-blocking TCP socket to `server` and starts connecting.
///
/// The connection is usually still in progress on return; the caller waits
/// for writability before handshaking.
pub(crate) fn start_connect(server: &DotServer) -> Result<std::net::TcpStream, DotError> {
    let socket_error = |reason: String| DotError::Socket {
        server: server.to_string(),
        reason,
    };

    let socket = Socket::new(
        Domain::for_address(server.addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(|e| socket_error(format!("socket: {}", e)))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| socket_error(format!("O_NONBLOCK: {}", e)))?;

    if let Some(mark) = server.mark {
        socket
            .set_mark(mark)
            .map_err(|e| socket_error(format!("SO_MARK: {}", e)))?;
    }

    if server.tcp_fast_open {
        match enable_fast_open(&socket) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::ENOPROTOOPT) => {
                debug!(server = %server, "TCP Fast Open not supported by the kernel");
            }
            Err(e) => return Err(socket_error(format!("TCP_FASTOPEN_CONNECT: {}", e))),
        }
    }

    if let Err(e) = enable_keepalive(&socket) {
        warn!(server = %server, error = %e, "Failed to enable TCP keepalive");
    }

    match socket.connect(&server.addr.into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => {
            return Err(DotError::Connect {
                server: server.to_string(),
                reason: e.to_string(),
            })
        }
    }

    Ok(socket.into())
}

fn enable_keepalive(socket: &Socket) -> io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL)
        .with_retries(KEEPALIVE_PROBES);
    socket.set_tcp_keepalive(&keepalive)
}

/// socket2 has no `TCP_FASTOPEN_CONNECT`.
fn enable_fast_open(socket: &Socket) -> io::Result<()> {
    set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN_CONNECT, 1)
}

fn set_int_option(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
