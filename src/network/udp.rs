//! UDP socket setup
//!
//! Sockets are created through socket2 so the OS buffers can be enlarged
//! before binding. A burst of chunks from one frame easily overflows the
//! default receive buffer.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::error::NetworkError;

pub use std::net::UdpSocket;

/// Create and bind a UDP socket.
///
/// Buffer sizes of 0 keep the OS default. Failing to resize a buffer is
/// logged, not fatal.
pub fn create_socket(
    bind_addr: SocketAddr,
    send_buffer_size: usize,
    recv_buffer_size: usize,
    read_timeout: Option<Duration>,
) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if send_buffer_size > 0 {
        if let Err(e) = socket.set_send_buffer_size(send_buffer_size) {
            tracing::warn!("Could not set send buffer size to {}: {}", send_buffer_size, e);
        }
    }
    if recv_buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
            tracing::warn!("Could not set receive buffer size to {}: {}", recv_buffer_size, e);
        }
    }

    socket
        .set_read_timeout(read_timeout)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    Ok(socket.into())
}

/// Socket for sending to `destination`, bound to an ephemeral port of the
/// matching address family
pub fn sender_socket(destination: SocketAddr, send_buffer_size: usize) -> Result<UdpSocket, NetworkError> {
    let bind_addr: SocketAddr = if destination.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    create_socket(bind_addr, send_buffer_size, 0, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_datagram() {
        let receiver = create_socket(
            "127.0.0.1:0".parse().unwrap(),
            0,
            1 << 20,
            Some(Duration::from_millis(500)),
        )
        .unwrap();
        let destination = receiver.local_addr().unwrap();

        let sender = sender_socket(destination, 1 << 20).unwrap();
        sender.send_to(b"chunk", destination).unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"chunk");
    }

    #[test]
    fn test_read_timeout_applies() {
        let socket = create_socket(
            "127.0.0.1:0".parse().unwrap(),
            0,
            0,
            Some(Duration::from_millis(10)),
        )
        .unwrap();
        let mut buf = [0u8; 4];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }
}
