//! Async client API: socket plumbing and the [`SlowClient`] facade.

mod client;
mod socket;

pub use client::{ClientConfig, MessageReceiver, SlowClient, SlowClientBuilder};
pub use socket::SlowSocket;
