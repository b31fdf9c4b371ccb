//! Control plane: start/stop gate, TCP command server and client

pub mod client;
pub mod gate;
pub mod server;

pub use client::ControlClient;
pub use gate::{ControlGate, SharedControlGate};
pub use server::ControlServer;
