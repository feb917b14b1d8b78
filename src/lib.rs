//! # SLOW Transport
//!
//! Client-side implementation of the SLOW reliable-messaging protocol
//! over UDP. SLOW layers sessions, ordered acknowledgment and
//! fragmentation on top of plain datagrams:
//!
//! - **Sessions**: a three-way CONNECT handshake assigns a UUID session
//!   and a zero-way REVIVE resumes a torn-down session with data in the
//!   very first packet
//! - **Reliability**: cumulative ACKs, a peer-advertised flow-control
//!   window and deadline-driven retransmission
//! - **Fragmentation**: payloads above 1440 bytes are split into
//!   offset-numbered fragments and reassembled in order on receipt
//!
//! ## Modules
//!
//! - [`core`]: constants and the error taxonomy
//! - [`wire`]: the 32-byte header codec and packet classification
//! - [`session`]: the session lifecycle state machine
//! - [`engine`]: sliding-window send engine, fragment reassembly and
//!   the I/O-free protocol endpoint
//! - [`client`]: the async [`SlowClient`] over a UDP socket
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use slow_transport::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> SlowResult<()> {
//!     let (client, mut messages) = SlowClient::connect("central.example.org").await?;
//!
//!     client.send(b"hello").await?;
//!     if let Some(reply) = messages.recv().await {
//!         println!("central says: {} bytes", reply.len());
//!     }
//!
//!     client.disconnect().await?;
//!     client.revive(b"back again").await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod core;
pub mod engine;
pub mod session;
pub mod wire;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{ClientConfig, MessageReceiver, SlowClient, SlowClientBuilder};
    pub use crate::core::{SlowError, SlowResult, TimedOutOp};
    pub use crate::session::SessionPhase;
    pub use crate::wire::{PacketFlags, SessionId};
}

pub use client::{ClientConfig, MessageReceiver, SlowClient, SlowClientBuilder};
pub use crate::core::{SlowError, SlowResult};
pub use session::SessionPhase;
pub use wire::SessionId;
