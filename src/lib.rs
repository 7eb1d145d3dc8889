// ABOUTME: Chat relay protocol engine — wire codec, connection I/O, client and server engines
// ABOUTME: Re-exports the public API surface consumed by the chatrelay-server/chatrelay-client binaries

pub mod allocator;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod heartbeat;
pub mod packet;
pub mod server;

pub use client::{ClientError, ClientEvent, ClientHandle};
pub use config::{ClientConfig, ServerConfig};
pub use connection::ConnectionError;
pub use packet::{CodecError, Packet, PacketKind};
pub use server::{Server, ServerError, ServerHandle};

/// Error returned by the crate's binaries, covering every layer below it.
///
/// Individual library APIs return their own specific error enum (`ClientError`,
/// `ServerError`); this boxed alias exists for `main` functions that only need to
/// report a failure and exit, not match on its cause.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
