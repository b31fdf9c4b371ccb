//! Web UI module

pub mod server;
pub mod handlers;

pub use server::{AppRole, AppState, WebServer};
