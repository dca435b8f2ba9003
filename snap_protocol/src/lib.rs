//! # Snap Protocol
//!
//! Client side of the snapcast binary stream protocol.
//!
//! This crate provides:
//! - The fixed 26 byte message header and the typed message payloads
//! - A framed transport that keeps the stream aligned on frame boundaries
//! - A blocking TCP client for the handshake and the receive side
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use snap_protocol::{Hello, Message, SnapClient, DEFAULT_PORT, PROTOCOL_VERSION};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SnapClient::connect("127.0.0.1", DEFAULT_PORT, None)?;
//!
//! client.send_hello(&Hello {
//!     arch: std::env::consts::ARCH.to_string(),
//!     client_name: "example".to_string(),
//!     host_name: "localhost".to_string(),
//!     id: std::process::id().to_string(),
//!     instance: 1,
//!     mac: None,
//!     os: std::env::consts::OS.to_string(),
//!     snap_stream_protocol_version: PROTOCOL_VERSION,
//!     version: "0.1.0".to_string(),
//! })?;
//!
//! for _ in 0..10 {
//!     match client.read_message()? {
//!         Message::WireChunk(chunk) => println!("Received {} bytes", chunk.payload.len()),
//!         other => println!("Received message type {}", other.msg_type()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use client::{ShutdownHandle, SnapClient, DEFAULT_PORT};
pub use protocol::{
    CodecHeader, Hello, Message, MessageHeader, MessageType, ProtocolError, ServerSettings,
    WireChunk, HEADER_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
pub use transport::Connection;
