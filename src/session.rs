//! Session state and lifecycle.
//!
//! A [`Session`] is an explicit value owned by the caller (the async
//! client keeps one behind its lock); nothing here is global. It holds
//! the identity, counters and retained header that every outbound packet
//! and every handshake decision derives from. The state machine:
//!
//! ```text
//! Idle -> Connecting -> Established -> Disconnected -> Reviving -> Established
//! ```
//!
//! There is no terminal phase; a client may reconnect or revive
//! indefinitely.

use crate::core::constants::DEFAULT_LOCAL_WINDOW;
use crate::wire::{PacketFlags, PacketHeader, SessionId};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session, nothing retained.
    Idle,
    /// CONNECT sent, waiting for the setup reply.
    Connecting,
    /// Session live, data transfer allowed.
    Established,
    /// Torn down gracefully; session retained for revival.
    Disconnected,
    /// REVIVE sent, waiting for the central's verdict.
    Reviving,
}

/// Per-connection state: identity, counters and the retained header.
#[derive(Debug, Clone)]
pub struct Session {
    /// Central-assigned identifier; nil until the handshake completes.
    sid: SessionId,
    phase: SessionPhase,
    /// Next sequence number to assign; strictly increasing across every
    /// transmitted packet, control packets included.
    next_seq: u32,
    /// Highest sequence number seen from the central.
    last_central_seq: u32,
    /// Bytes the central is currently willing to buffer.
    remote_window: u16,
    /// Window we advertise on our own packets.
    local_window: u16,
    /// Most recent accepted header; echoed on outbound packets and the
    /// basis for a revive request after disconnect.
    last_accepted: Option<PacketHeader>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an idle session.
    pub fn new() -> Self {
        Self::with_local_window(DEFAULT_LOCAL_WINDOW)
    }

    /// Create an idle session advertising a custom local window.
    pub fn with_local_window(local_window: u16) -> Self {
        Self {
            sid: SessionId::NIL,
            phase: SessionPhase::Idle,
            next_seq: 0,
            last_central_seq: 0,
            remote_window: 0,
            local_window,
            last_accepted: None,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether data transfer is currently allowed.
    pub fn is_established(&self) -> bool {
        self.phase == SessionPhase::Established
    }

    /// The session identifier (nil before the handshake completes).
    pub fn sid(&self) -> SessionId {
        self.sid
    }

    /// Bytes the central will currently buffer.
    pub fn remote_window(&self) -> u16 {
        self.remote_window
    }

    /// The window we advertise.
    pub fn local_window(&self) -> u16 {
        self.local_window
    }

    /// Highest sequence number seen from the central.
    pub fn last_central_seq(&self) -> u32 {
        self.last_central_seq
    }

    /// Whether a torn-down session is retained and can be revived.
    pub fn can_revive(&self) -> bool {
        self.phase == SessionPhase::Disconnected && self.last_accepted.is_some()
    }

    /// Take the next outbound sequence number.
    ///
    /// Called at transmit time, never at payload-construction time, so
    /// interleaved sends keep a single global ordering.
    pub fn assign_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Peek at the next sequence number without consuming it.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Build the initial CONNECT header and move to `Connecting`.
    pub fn begin_connect(&mut self) -> PacketHeader {
        debug_assert_eq!(self.phase, SessionPhase::Idle);
        self.phase = SessionPhase::Connecting;
        PacketHeader {
            sid: SessionId::NIL,
            flags: PacketFlags::CONNECT,
            seq: self.assign_seq(),
            window: self.local_window,
            ..Default::default()
        }
    }

    /// Judge a setup reply to our CONNECT.
    ///
    /// Accepts iff the reply acknowledges sequence 0 and carries ACCEPT;
    /// on acceptance adopts the central's identifier and window, resets
    /// `next_seq` to `peer_seq + 1` and becomes `Established`.
    pub fn accept_connect_reply(&mut self, reply: &PacketHeader) -> bool {
        if reply.ack != 0 || !reply.flags.contains(PacketFlags::ACCEPT) {
            return false;
        }
        self.sid = reply.sid;
        self.remote_window = reply.window;
        self.last_central_seq = reply.seq;
        self.next_seq = reply.seq.wrapping_add(1);
        self.last_accepted = Some(*reply);
        self.phase = SessionPhase::Established;
        true
    }

    /// Abandon a pending CONNECT (rejection or timeout); back to `Idle`,
    /// nothing retained. A later retry starts a fresh handshake, so the
    /// sequence counter returns to 0.
    pub fn fail_connect(&mut self) {
        self.phase = SessionPhase::Idle;
        self.next_seq = 0;
    }

    /// Build an outbound header for an established session, echoing the
    /// retained identity and the last central sequence.
    pub fn outbound_header(&mut self, flags: PacketFlags, fid: u8, fo: u8) -> PacketHeader {
        let sttl = self.last_accepted.map(|h| h.sttl).unwrap_or(0);
        PacketHeader {
            sid: self.sid,
            sttl,
            flags,
            seq: self.assign_seq(),
            ack: self.last_central_seq,
            window: self.local_window,
            fid,
            fo,
        }
    }

    /// Build the teardown header: CONNECT|REVIVE|ACK with a zero window.
    pub fn disconnect_header(&mut self) -> PacketHeader {
        let mut header = self.outbound_header(
            PacketFlags::CONNECT | PacketFlags::REVIVE | PacketFlags::ACK,
            0,
            0,
        );
        header.window = 0;
        header
    }

    /// Enter `Disconnected`, retaining the session for revival.
    ///
    /// Called on a confirmed teardown and, best-effort, when the ACK
    /// never arrives: the active flag drops either way.
    pub fn mark_disconnected(&mut self) {
        self.phase = SessionPhase::Disconnected;
    }

    /// Build the revive header from the retained session and move to
    /// `Reviving`. The attached payload is fragment 0 of message `fid`.
    /// Returns `None` when there is nothing to revive.
    pub fn begin_revive(&mut self, more_fragments: bool, fid: u8) -> Option<PacketHeader> {
        if !self.can_revive() {
            return None;
        }
        self.phase = SessionPhase::Reviving;
        let mut flags = PacketFlags::REVIVE;
        if more_fragments {
            flags = flags | PacketFlags::MORE_FRAGMENTS;
        }
        Some(self.outbound_header(flags, fid, 0))
    }

    /// Judge the central's reply to a revive with sequence `sent_seq`.
    ///
    /// Success needs ACK and ACCEPT, the retained identifier, and an
    /// acknowledgment of exactly the sequence we revived with.
    pub fn accept_revive_reply(&mut self, reply: &PacketHeader, sent_seq: u32) -> bool {
        let accepted = reply.flags.contains(PacketFlags::ACK | PacketFlags::ACCEPT)
            && reply.sid == self.sid
            && reply.ack == sent_seq;
        if !accepted {
            return false;
        }
        self.remote_window = reply.window;
        self.last_central_seq = reply.seq;
        self.last_accepted = Some(*reply);
        self.phase = SessionPhase::Established;
        true
    }

    /// Revive failed; the session stays retained in `Disconnected`.
    pub fn fail_revive(&mut self) {
        self.phase = SessionPhase::Disconnected;
    }

    /// Record a packet accepted while established: the central's
    /// sequence watermark and the header we echo from now on.
    pub fn record_peer(&mut self, header: &PacketHeader) {
        self.last_central_seq = header.seq;
        self.last_accepted = Some(*header);
    }

    /// Update the remote window from an inbound packet.
    pub fn set_remote_window(&mut self, window: u16) {
        self.remote_window = window;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(byte: u8) -> SessionId {
        SessionId::from_bytes([byte; 16])
    }

    fn setup_reply(assigned: SessionId, seq: u32) -> PacketHeader {
        PacketHeader {
            sid: assigned,
            flags: PacketFlags::ACCEPT,
            seq,
            ack: 0,
            window: 7200,
            ..Default::default()
        }
    }

    /// Drive a session to `Established` the way the client would.
    fn established_session() -> Session {
        let mut session = Session::new();
        session.begin_connect();
        assert!(session.accept_connect_reply(&setup_reply(sid(0xAA), 100)));
        session
    }

    #[test]
    fn test_connect_header_shape() {
        let mut session = Session::new();
        let header = session.begin_connect();

        assert!(header.sid.is_nil());
        assert_eq!(header.seq, 0);
        assert_eq!(header.window, DEFAULT_LOCAL_WINDOW);
        assert!(header.flags.contains(PacketFlags::CONNECT));
        assert_eq!(session.phase(), SessionPhase::Connecting);
    }

    #[test]
    fn test_handshake_acceptance() {
        let session = established_session();

        assert_eq!(session.sid(), sid(0xAA));
        assert_eq!(session.next_seq(), 101);
        assert_eq!(session.last_central_seq(), 100);
        assert_eq!(session.remote_window(), 7200);
        assert!(session.is_established());
    }

    #[test]
    fn test_handshake_rejection_paths() {
        let mut session = Session::new();
        session.begin_connect();

        // Non-zero ack is not a setup reply for us.
        let mut reply = setup_reply(sid(1), 100);
        reply.ack = 7;
        assert!(!session.accept_connect_reply(&reply));

        // Missing ACCEPT means rejection.
        let mut reply = setup_reply(sid(1), 100);
        reply.flags = PacketFlags::NONE;
        assert!(!session.accept_connect_reply(&reply));

        session.fail_connect();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(!session.can_revive());
    }

    #[test]
    fn test_seq_strictly_increases() {
        let mut session = established_session();
        let a = session.outbound_header(PacketFlags::NONE, 0, 0).seq;
        let b = session.disconnect_header().seq;
        let c = session.outbound_header(PacketFlags::NONE, 1, 0).seq;
        assert!(a < b && b < c);
    }

    #[test]
    fn test_outbound_echoes_session() {
        let mut session = established_session();
        let header = session.outbound_header(PacketFlags::NONE, 3, 1);

        assert_eq!(header.sid, sid(0xAA));
        assert_eq!(header.ack, 100);
        assert_eq!(header.window, DEFAULT_LOCAL_WINDOW);
        assert_eq!((header.fid, header.fo), (3, 1));
    }

    #[test]
    fn test_disconnect_header_shape() {
        let mut session = established_session();
        let header = session.disconnect_header();

        assert!(header
            .flags
            .contains(PacketFlags::CONNECT | PacketFlags::REVIVE | PacketFlags::ACK));
        assert_eq!(header.window, 0);
        assert_eq!(header.sid, sid(0xAA));
    }

    #[test]
    fn test_revive_lifecycle() {
        let mut session = established_session();
        session.mark_disconnected();
        assert!(session.can_revive());

        let request = session.begin_revive(false, 2).unwrap();
        assert_eq!(request.fid, 2);
        assert!(request.flags.contains(PacketFlags::REVIVE));
        assert!(!request.flags.contains(PacketFlags::CONNECT));
        assert_eq!(session.phase(), SessionPhase::Reviving);

        let reply = PacketHeader {
            sid: sid(0xAA),
            flags: PacketFlags::ACK | PacketFlags::ACCEPT,
            seq: 200,
            ack: request.seq,
            window: 4321,
            ..Default::default()
        };
        assert!(session.accept_revive_reply(&reply, request.seq));
        assert!(session.is_established());
        assert_eq!(session.remote_window(), 4321);
        assert_eq!(session.last_central_seq(), 200);
    }

    #[test]
    fn test_revive_rejection_keeps_session() {
        let mut session = established_session();
        session.mark_disconnected();
        let request = session.begin_revive(false, 0).unwrap();

        // Wrong session identifier.
        let reply = PacketHeader {
            sid: sid(0xBB),
            flags: PacketFlags::ACK | PacketFlags::ACCEPT,
            ack: request.seq,
            ..Default::default()
        };
        assert!(!session.accept_revive_reply(&reply, request.seq));

        // Wrong acknowledgment number.
        let reply = PacketHeader {
            sid: sid(0xAA),
            flags: PacketFlags::ACK | PacketFlags::ACCEPT,
            ack: request.seq.wrapping_add(1),
            ..Default::default()
        };
        assert!(!session.accept_revive_reply(&reply, request.seq));

        session.fail_revive();
        assert_eq!(session.phase(), SessionPhase::Disconnected);
        assert!(session.can_revive());
    }

    #[test]
    fn test_revive_requires_retained_session() {
        let mut session = Session::new();
        assert!(session.begin_revive(false, 0).is_none());
        session.mark_disconnected();
        // Disconnected but never established: nothing retained.
        assert!(session.begin_revive(false, 0).is_none());
    }

    #[test]
    fn test_reconnect_after_failure_restarts_sequence() {
        let mut session = Session::new();
        session.begin_connect();
        session.fail_connect();

        let header = session.begin_connect();
        assert_eq!(header.seq, 0);
        assert!(header.sid.is_nil());
        assert_eq!(session.phase(), SessionPhase::Connecting);
    }
}
