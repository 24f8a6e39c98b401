/// Blocking CoAP client
pub mod client;

/// Blocking CoAP server
pub mod server;

pub use client::Client;
pub use server::Server;
