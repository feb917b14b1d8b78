//! Async UDP adapter for the SLOW client.
//!
//! Owns the datagram socket and hostname resolution. The protocol core
//! never touches this directly; it only sees raw byte buffers and a
//! peer address.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, UdpSocket};

use crate::core::constants::{DEFAULT_PORT, MAX_DATAGRAM};
use crate::core::{SlowError, SlowResult};

/// Async UDP socket wrapper for SLOW datagrams.
#[derive(Debug, Clone)]
pub struct SlowSocket {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl SlowSocket {
    /// Resolve a central's hostname, using [`DEFAULT_PORT`] when the
    /// input carries no port.
    pub async fn resolve(host: &str) -> SlowResult<SocketAddr> {
        let target = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{DEFAULT_PORT}")
        };
        lookup_host(target)
            .await
            .map_err(SlowError::Transport)?
            .next()
            .ok_or_else(|| SlowError::Resolve(host.to_string()))
    }

    /// Bind an ephemeral local socket directed at `peer`.
    pub async fn open(peer: SocketAddr) -> SlowResult<Self> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal address")
        } else {
            "[::]:0".parse().expect("literal address")
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            peer,
        })
    }

    /// Resolve `host` and open a socket toward it.
    pub async fn connect(host: &str) -> SlowResult<Self> {
        let peer = Self::resolve(host).await?;
        Self::open(peer).await
    }

    /// The central's address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send one datagram to the central.
    pub async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send_to(datagram, self.peer).await
    }

    /// Receive one datagram into `buf`, returning its length and origin.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    /// A receive buffer sized for the largest legal datagram.
    pub fn recv_buffer() -> Vec<u8> {
        vec![0u8; MAX_DATAGRAM]
    }
}
