//! Synchronous protocol endpoint.
//!
//! [`SessionEndpoint`] combines the session state machine, the send
//! engine and the reassembly engine behind two surfaces: builders that
//! produce outbound datagrams, and [`SessionEndpoint::on_packet`], the
//! single entry point for every decoded inbound packet. It performs no
//! I/O and takes no locks; the async client wraps one endpoint in a
//! mutex and drives it from the caller side and from the receive task.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::core::{SlowError, SlowResult};
use crate::engine::reassembly::{FragmentResult, ReassemblyEngine};
use crate::engine::send::SendEngine;
use crate::session::{Session, SessionPhase};
use crate::wire::{Packet, PacketFlags, PacketHeader, PacketKind};

/// What one inbound packet changed; the client uses this to wake
/// waiters and forward deliveries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// The lifecycle phase moved (handshake verdict, teardown ACK);
    /// blocked connect/disconnect/revive calls should re-check.
    pub phase_changed: bool,
    /// The unacked set or remote window changed; blocked senders should
    /// re-check.
    pub window_updated: bool,
    /// A fully reassembled message for the application.
    pub delivered: Option<Vec<u8>>,
}

/// The SLOW client's protocol core, free of I/O.
#[derive(Debug, Default)]
pub struct SessionEndpoint {
    session: Session,
    send: SendEngine,
    reassembly: ReassemblyEngine,
    /// Sequence number of an outstanding revive request.
    revive_seq: Option<u32>,
    /// A teardown ACK is being awaited.
    awaiting_disconnect: bool,
}

impl SessionEndpoint {
    /// Create an idle endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint around a caller-provided session value.
    pub fn with_session(session: Session) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    /// Create an endpoint from a session and a configured send engine.
    pub fn with_parts(session: Session, send: SendEngine) -> Self {
        Self {
            session,
            send,
            ..Default::default()
        }
    }

    /// The session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The send engine state.
    pub fn send_engine(&self) -> &SendEngine {
        &self.send
    }

    /// Mutable send engine access for the retransmission driver.
    pub fn send_engine_mut(&mut self) -> &mut SendEngine {
        &mut self.send
    }

    /// Whether transmitted data still awaits acknowledgment.
    pub fn has_unacked_data(&self) -> bool {
        self.send.has_unacked_data()
    }

    /// Whether a chunk of `len` payload bytes fits the remote window
    /// right now.
    pub fn fits_window(&self, len: usize) -> bool {
        self.send.fits_window(len, self.session.remote_window())
    }

    /// Allocate a fragment identifier for one outbound message.
    pub fn allocate_fid(&mut self) -> u8 {
        self.send.allocate_fid()
    }

    // =========================================================================
    // Outbound builders
    // =========================================================================

    /// Build the CONNECT datagram (nil session, sequence 0).
    pub fn connect_datagram(&mut self) -> SlowResult<Bytes> {
        match self.session.phase() {
            SessionPhase::Idle => {}
            phase => return Err(SlowError::AlreadyConnected(phase)),
        }
        let header = self.session.begin_connect();
        Ok(Packet::control(header).encode())
    }

    /// Abandon a pending CONNECT after rejection or timeout.
    pub fn abort_connect(&mut self) {
        self.session.fail_connect();
    }

    /// Build the teardown datagram and start awaiting its ACK.
    pub fn disconnect_datagram(&mut self) -> SlowResult<Bytes> {
        if !self.session.is_established() {
            return Err(SlowError::NotEstablished(self.session.phase()));
        }
        let header = self.session.disconnect_header();
        self.awaiting_disconnect = true;
        Ok(Packet::control(header).encode())
    }

    /// Drop the active flag without a confirmed teardown (retry budget
    /// spent). The session stays retained for revival.
    pub fn force_disconnect(&mut self) {
        self.awaiting_disconnect = false;
        self.session.mark_disconnected();
    }

    /// Build the zero-way revive datagram carrying the first data chunk.
    ///
    /// Returns the datagram, the sequence the central must acknowledge,
    /// and the fragment identifier remaining chunks continue with. The
    /// chunk is not entered into the unacked set; the ACK+ACCEPT verdict
    /// is its delivery confirmation.
    pub fn revive_datagram(&mut self, chunk: Bytes, more: bool) -> SlowResult<(Bytes, u32, u8)> {
        if !self.session.can_revive() {
            return Err(SlowError::NoSessionToRevive);
        }
        let fid = self.send.allocate_fid();
        let header = self
            .session
            .begin_revive(more, fid)
            .ok_or(SlowError::NoSessionToRevive)?;
        self.revive_seq = Some(header.seq);
        let datagram = Packet {
            header,
            payload: chunk,
        }
        .encode();
        Ok((datagram, header.seq, fid))
    }

    /// Abandon a pending revive after rejection or timeout.
    pub fn abort_revive(&mut self) {
        self.revive_seq = None;
        self.session.fail_revive();
    }

    /// Build one data datagram, assign its sequence at transmit time and
    /// enter it into the unacked set.
    ///
    /// The caller must have confirmed window room via
    /// [`Self::fits_window`].
    pub fn data_datagram(
        &mut self,
        chunk: Bytes,
        fid: u8,
        fo: u8,
        more: bool,
    ) -> SlowResult<(Bytes, u32)> {
        if !self.session.is_established() {
            return Err(SlowError::NotEstablished(self.session.phase()));
        }
        let flags = if more {
            PacketFlags::MORE_FRAGMENTS
        } else {
            PacketFlags::NONE
        };
        let header = self.session.outbound_header(flags, fid, fo);
        let len = chunk.len();
        let datagram = Packet {
            header,
            payload: chunk,
        }
        .encode();
        self.send.register(header.seq, len, datagram.clone());
        trace!(seq = header.seq, len, fid, fo, more, "data out");
        Ok((datagram, header.seq))
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    /// Process one decoded inbound packet.
    pub fn on_packet(&mut self, packet: Packet) -> Dispatch {
        let header = packet.header;
        match self.session.phase() {
            SessionPhase::Connecting => self.on_connect_reply(&header),
            SessionPhase::Reviving => self.on_revive_reply(&header),
            SessionPhase::Established => self.on_established(packet),
            SessionPhase::Idle | SessionPhase::Disconnected => {
                trace!(seq = header.seq, "packet ignored outside a session");
                Dispatch::default()
            }
        }
    }

    /// Setup verdict while connecting: any non-zero-sequence packet is
    /// the central's reply; a reply that fails the acceptance rules is a
    /// rejection and returns the session to idle.
    fn on_connect_reply(&mut self, header: &PacketHeader) -> Dispatch {
        if header.seq == 0 {
            return Dispatch::default();
        }
        if self.session.accept_connect_reply(header) {
            debug!(sid = %self.session.sid(), window = header.window, "session established");
        } else {
            debug!("connect rejected by the central");
            self.session.fail_connect();
        }
        Dispatch {
            phase_changed: true,
            ..Default::default()
        }
    }

    /// Revive verdict: checked against the retained identity and the
    /// revived sequence; failure leaves the session disconnected but
    /// retained.
    fn on_revive_reply(&mut self, header: &PacketHeader) -> Dispatch {
        if header.seq == 0 {
            return Dispatch::default();
        }
        let Some(sent_seq) = self.revive_seq.take() else {
            return Dispatch::default();
        };
        if self.session.accept_revive_reply(header, sent_seq) {
            // Stale bookkeeping from before the teardown must not leak
            // into the new established period.
            self.send.reset();
            self.reassembly.reset();
            debug!(sid = %self.session.sid(), "session revived");
        } else {
            debug!("revive rejected by the central");
            self.session.fail_revive();
        }
        Dispatch {
            phase_changed: true,
            ..Default::default()
        }
    }

    fn on_established(&mut self, packet: Packet) -> Dispatch {
        let header = packet.header;
        let mut out = Dispatch::default();

        let carries_ack = match PacketKind::of(&header) {
            PacketKind::Ack => true,
            PacketKind::Setup { acked } => acked,
            PacketKind::Data => false,
            kind @ (PacketKind::Connect | PacketKind::Disconnect | PacketKind::Revive) => {
                // Requests only a central would serve; a client drops them.
                trace!(?kind, seq = header.seq, "unexpected request packet dropped");
                return out;
            }
        };

        self.session.record_peer(&header);

        if carries_ack && self.send.is_current_ack(header.ack) {
            self.send.on_cumulative_ack(header.ack);
            self.session.set_remote_window(header.window);
            out.window_updated = true;

            if self.awaiting_disconnect {
                self.awaiting_disconnect = false;
                self.session.mark_disconnected();
                out.phase_changed = true;
                debug!("teardown acknowledged");
                return out;
            }
        }

        if !packet.payload.is_empty() {
            let more = header.flags.contains(PacketFlags::MORE_FRAGMENTS);
            match self
                .reassembly
                .on_fragment(header.fid, header.fo, packet.payload, more)
            {
                FragmentResult::Complete(message) => {
                    debug!(len = message.len(), fid = header.fid, "message delivered");
                    out.delivered = Some(message);
                }
                FragmentResult::Incomplete => {}
            }
        }

        out
    }
}
