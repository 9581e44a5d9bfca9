//! Transports to the remote end.

pub mod server;

pub use server::ServerSession;
