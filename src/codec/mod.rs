//! Frame chunking
//!
//! The packetizer splits encoded frames into datagram-sized chunks on the
//! sender; the reassembler puts them back together on the receiver.

pub mod packetizer;
pub mod reassembler;

pub use packetizer::Packetizer;
pub use reassembler::{Reassembler, ReassemblyStats};
