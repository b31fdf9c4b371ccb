//! Network subsystem for UDP frame transport

pub mod udp;
pub mod sender;
pub mod receiver;

pub use udp::{UdpSocket, create_socket, sender_socket};
pub use sender::{TransportHandle, TransportLoop};
pub use receiver::FrameReceiver;
