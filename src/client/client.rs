//! High-level async SLOW client.
//!
//! [`SlowClient`] wraps a [`SessionEndpoint`] behind one mutex and runs
//! a dedicated receiving task: the task decodes every inbound datagram,
//! dispatches it into the endpoint and wakes blocked callers through a
//! shared [`Notify`]. Reassembled messages reach the application over an
//! mpsc channel.
//!
//! Every wait follows the same discipline: register on the notifier
//! first, then check the condition under the lock, then await. Waits
//! re-check their condition after every wake, so spurious wakeups are
//! harmless.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant as TokioInstant};
use tracing::{debug, trace, warn};

use crate::core::constants::{
    DEFAULT_LOCAL_WINDOW, DISCONNECT_MAX_TRIES, MAX_ATTEMPTS, REPLY_TIMEOUT, RETRANSMIT_TIMEOUT,
};
use crate::core::{SlowError, SlowResult, TimedOutOp};
use crate::engine::{SendEngine, SessionEndpoint};
use crate::session::{Session, SessionPhase};
use crate::wire::{Packet, SessionId};

use super::socket::SlowSocket;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Receive window advertised to the central.
    pub local_window: u16,
    /// Wait budget for connect, disconnect and revive replies.
    pub reply_timeout: Duration,
    /// Per-attempt retransmission deadline for data packets.
    pub retransmit_timeout: Duration,
    /// Transmission attempts per data packet.
    pub max_attempts: u32,
    /// Attempts awaiting the teardown ACK.
    pub disconnect_max_tries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_window: DEFAULT_LOCAL_WINDOW,
            reply_timeout: REPLY_TIMEOUT,
            retransmit_timeout: RETRANSMIT_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
            disconnect_max_tries: DISCONNECT_MAX_TRIES,
        }
    }
}

/// Builder for a [`SlowClient`].
#[derive(Debug, Default)]
pub struct SlowClientBuilder {
    config: ClientConfig,
}

impl SlowClientBuilder {
    /// Start from the protocol defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a custom receive window.
    pub fn local_window(mut self, window: u16) -> Self {
        self.config.local_window = window;
        self
    }

    /// Set the handshake/teardown reply budget.
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = timeout;
        self
    }

    /// Set the per-attempt retransmission deadline.
    pub fn retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.config.retransmit_timeout = timeout;
        self
    }

    /// Set the per-packet attempt ceiling.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Resolve `host`, open the socket and run the CONNECT handshake.
    pub async fn connect(self, host: &str) -> SlowResult<(SlowClient, MessageReceiver)> {
        SlowClient::connect_with(self.config, host).await
    }
}

/// Receiving half: messages the central delivered to this client.
///
/// The channel is unbounded: once a message is reassembled the protocol
/// has accepted it, so it is never discarded for a slow reader.
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MessageReceiver {
    /// Next reassembled message, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// State shared between the caller side and the receiving task.
struct Shared {
    socket: SlowSocket,
    endpoint: Mutex<SessionEndpoint>,
    /// Signaled after every dispatched packet.
    changed: Notify,
    delivery_tx: mpsc::UnboundedSender<Vec<u8>>,
    config: ClientConfig,
}

/// A SLOW protocol client over one UDP socket.
pub struct SlowClient {
    shared: Arc<Shared>,
    recv_task: JoinHandle<()>,
}

impl SlowClient {
    /// Connect to a central with the default configuration.
    ///
    /// Returns the client and the receiver for delivered messages.
    pub async fn connect(host: &str) -> SlowResult<(Self, MessageReceiver)> {
        Self::connect_with(ClientConfig::default(), host).await
    }

    /// Connect with explicit configuration.
    pub async fn connect_with(
        config: ClientConfig,
        host: &str,
    ) -> SlowResult<(Self, MessageReceiver)> {
        let socket = SlowSocket::connect(host).await?;
        debug!(peer = %socket.peer(), "socket open");

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let endpoint = SessionEndpoint::with_parts(
            Session::with_local_window(config.local_window),
            SendEngine::with_policy(config.retransmit_timeout, config.max_attempts),
        );
        let shared = Arc::new(Shared {
            socket,
            endpoint: Mutex::new(endpoint),
            changed: Notify::new(),
            delivery_tx,
            config,
        });

        let recv_task = tokio::spawn(receive_loop(Arc::clone(&shared)));
        let client = Self { shared, recv_task };

        client.run_connect().await?;
        Ok((client, MessageReceiver { rx: delivery_rx }))
    }

    /// The central's address.
    pub fn peer(&self) -> std::net::SocketAddr {
        self.shared.socket.peer()
    }

    /// Current session phase.
    pub async fn phase(&self) -> SessionPhase {
        self.shared.endpoint.lock().await.session().phase()
    }

    /// Central-assigned session identifier.
    pub async fn session_id(&self) -> SessionId {
        self.shared.endpoint.lock().await.session().sid()
    }

    /// Whether a torn-down session is retained for revival.
    pub async fn can_revive(&self) -> bool {
        self.shared.endpoint.lock().await.session().can_revive()
    }

    /// Whether transmitted data still awaits acknowledgment.
    pub async fn has_unacked_data(&self) -> bool {
        self.shared.endpoint.lock().await.has_unacked_data()
    }

    /// Send one application payload reliably.
    ///
    /// Fragments as needed, blocks for window space, retransmits on the
    /// per-attempt deadline and returns once every chunk is
    /// acknowledged. Fails without touching the network when the
    /// session is not established.
    pub async fn send(&self, payload: &[u8]) -> SlowResult<()> {
        let chunks = SendEngine::fragment(payload)?;
        let fid = {
            let mut endpoint = self.shared.endpoint.lock().await;
            if !endpoint.session().is_established() {
                return Err(SlowError::NotEstablished(endpoint.session().phase()));
            }
            endpoint.allocate_fid()
        };
        self.transmit_chunks(&chunks, fid, 0).await?;
        self.drive_until_acked().await
    }

    /// Gracefully tear the session down, retaining it for revival.
    ///
    /// Retries the teardown packet up to the configured budget; on
    /// exhaustion the active flag still drops (best effort) and the
    /// failure is reported.
    pub async fn disconnect(&self) -> SlowResult<()> {
        let datagram = self.shared.endpoint.lock().await.disconnect_datagram()?;

        for attempt in 1..=self.shared.config.disconnect_max_tries {
            self.shared.socket.send(&datagram).await?;
            trace!(attempt, "teardown sent");

            if self
                .await_phase(self.shared.config.reply_timeout, |phase| {
                    phase == SessionPhase::Disconnected
                })
                .await
            {
                return Ok(());
            }
        }

        warn!("teardown unacknowledged, dropping the session anyway");
        self.shared.endpoint.lock().await.force_disconnect();
        Err(SlowError::Timeout(TimedOutOp::Disconnect))
    }

    /// Revive the retained session, carrying `payload` as the first
    /// data transmission (zero-way reconnect).
    pub async fn revive(&self, payload: &[u8]) -> SlowResult<()> {
        let chunks = SendEngine::fragment(payload)?;
        let more = chunks.len() > 1;

        let (datagram, seq, fid) = self
            .shared
            .endpoint
            .lock()
            .await
            .revive_datagram(chunks[0].clone(), more)?;
        self.shared.socket.send(&datagram).await?;
        trace!(seq, "revive sent");

        // A verdict moves the phase off Reviving either way.
        self.await_phase(self.shared.config.reply_timeout, |phase| {
            phase != SessionPhase::Reviving
        })
        .await;

        {
            let mut endpoint = self.shared.endpoint.lock().await;
            match endpoint.session().phase() {
                SessionPhase::Established => {}
                SessionPhase::Disconnected => {
                    return Err(SlowError::Rejected(TimedOutOp::Revive))
                }
                _ => {
                    endpoint.abort_revive();
                    return Err(SlowError::Timeout(TimedOutOp::Revive));
                }
            }
        }

        // The revive datagram carried fragment 0 of `fid`; any remaining
        // chunks continue that message.
        if chunks.len() > 1 {
            self.transmit_chunks(&chunks[1..], fid, 1).await?;
            self.drive_until_acked().await?;
        }
        Ok(())
    }

    /// Run the CONNECT handshake after the receive task is up.
    async fn run_connect(&self) -> SlowResult<()> {
        let datagram = self.shared.endpoint.lock().await.connect_datagram()?;
        self.shared.socket.send(&datagram).await?;
        trace!("connect sent");

        self.await_phase(self.shared.config.reply_timeout, |phase| {
            phase != SessionPhase::Connecting
        })
        .await;

        let mut endpoint = self.shared.endpoint.lock().await;
        match endpoint.session().phase() {
            SessionPhase::Established => Ok(()),
            SessionPhase::Idle => Err(SlowError::Rejected(TimedOutOp::Connect)),
            _ => {
                endpoint.abort_connect();
                Err(SlowError::Timeout(TimedOutOp::Connect))
            }
        }
    }

    /// Wait up to `budget` for the session phase to satisfy `done`.
    /// Returns whether the condition was met within the budget.
    async fn await_phase(&self, budget: Duration, done: impl Fn(SessionPhase) -> bool) -> bool {
        let deadline = TokioInstant::now() + budget;
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a dispatch between the check
            // and the await cannot be missed.
            notified.as_mut().enable();

            if done(self.shared.endpoint.lock().await.session().phase()) {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                // Last look: the wake may have raced the deadline.
                return done(self.shared.endpoint.lock().await.session().phase());
            }
        }
    }

    /// Transmit chunks of one message in order, gating each on window
    /// space and driving retransmissions while blocked.
    async fn transmit_chunks(&self, chunks: &[Bytes], fid: u8, first_fo: u8) -> SlowResult<()> {
        let last_index = chunks.len().saturating_sub(1);
        for (index, chunk) in chunks.iter().enumerate() {
            let fo = first_fo + index as u8;
            let more = index < last_index;
            loop {
                let notified = self.shared.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let deadline;
                {
                    let mut endpoint = self.shared.endpoint.lock().await;
                    if !endpoint.session().is_established() {
                        return Err(SlowError::NotEstablished(endpoint.session().phase()));
                    }
                    if endpoint.fits_window(chunk.len()) {
                        let (datagram, _) = endpoint.data_datagram(chunk.clone(), fid, fo, more)?;
                        drop(endpoint);
                        self.shared.socket.send(&datagram).await?;
                        break;
                    }
                    // A chunk larger than the whole window with nothing
                    // in flight can never fit.
                    let window = endpoint.session().remote_window();
                    if endpoint.send_engine().bytes_in_flight() == 0
                        && chunk.len() > window as usize
                    {
                        return Err(SlowError::WindowExhausted {
                            needed: chunk.len(),
                            window,
                        });
                    }
                    deadline = endpoint.send_engine().next_deadline();
                }
                self.wait_or_retransmit(notified, deadline).await?;
            }
        }
        Ok(())
    }

    /// Block until every pending packet is acknowledged, retransmitting
    /// on deadline expiry.
    async fn drive_until_acked(&self) -> SlowResult<()> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let endpoint = self.shared.endpoint.lock().await;
                if !endpoint.has_unacked_data() {
                    return Ok(());
                }
                endpoint.send_engine().next_deadline()
            };
            self.wait_or_retransmit(notified, deadline).await?;
        }
    }

    /// Await the next dispatch or the earliest retransmission deadline,
    /// whichever comes first; on deadline expiry resend every due
    /// packet.
    async fn wait_or_retransmit(
        &self,
        notified: Pin<&mut Notified<'_>>,
        deadline: Option<Instant>,
    ) -> SlowResult<()> {
        match deadline {
            Some(deadline) => {
                if timeout_at(TokioInstant::from_std(deadline), notified)
                    .await
                    .is_err()
                {
                    let due = {
                        let mut endpoint = self.shared.endpoint.lock().await;
                        endpoint
                            .send_engine_mut()
                            .due_retransmissions_at(Instant::now())?
                    };
                    for datagram in due {
                        self.shared.socket.send(&datagram).await?;
                    }
                }
            }
            None => notified.await,
        }
        Ok(())
    }
}

impl Drop for SlowClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// The dedicated receiving task: decode, dispatch, notify.
async fn receive_loop(shared: Arc<Shared>) {
    let mut buf = SlowSocket::recv_buffer();
    loop {
        let (len, from) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) => {
                warn!(%error, "receive loop stopped");
                return;
            }
        };
        if from != shared.socket.peer() {
            trace!(%from, "datagram from unknown peer dropped");
            continue;
        }

        // A malformed datagram is indistinguishable from a lost one.
        let Some(packet) = Packet::decode(Bytes::copy_from_slice(&buf[..len])) else {
            trace!(len, "malformed datagram dropped");
            continue;
        };

        let dispatch = shared.endpoint.lock().await.on_packet(packet);
        if let Some(message) = dispatch.delivered {
            if shared.delivery_tx.send(message).is_err() {
                trace!("message receiver dropped, delivery discarded");
            }
        }
        shared.changed.notify_waiters();
    }
}
