//! Reliable send engine: fragmentation, the sliding window, and
//! per-packet retransmission state.
//!
//! The engine is a pure state machine; time is injected through the
//! `_at(now)` methods so the window and retry logic are testable without
//! a clock or a socket. The async client drives it from the send path
//! and from the receive task's acknowledgment handling.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use crate::core::constants::{MAX_ATTEMPTS, MAX_FRAGMENTS, MAX_PAYLOAD, RETRANSMIT_TIMEOUT};
use crate::core::{SlowError, SlowResult};

/// One outstanding, unacknowledged packet.
///
/// Retry state is carried here explicitly (attempt count plus deadline)
/// rather than in a loop counter, so the window/retry interaction can be
/// driven and observed step by step.
#[derive(Debug, Clone)]
pub struct PendingTransmission {
    /// Sequence number of the packet.
    pub seq: u32,
    /// Payload bytes counted against the remote window.
    pub payload_len: usize,
    /// The serialized datagram, kept for retransmission.
    pub datagram: Bytes,
    /// Transmission attempts so far (1 after the initial send).
    pub attempts: u32,
    /// When the current attempt times out.
    pub deadline: Instant,
}

/// Sliding-window send state: the unacked set and fragment allocation.
#[derive(Debug)]
pub struct SendEngine {
    /// Unacknowledged packets keyed by sequence number.
    pending: BTreeMap<u32, PendingTransmission>,
    /// Sum of pending payload lengths; always ≤ the remote window.
    bytes_in_flight: usize,
    /// Highest cumulative acknowledgment processed.
    ack_watermark: Option<u32>,
    /// Next fragment identifier to hand out.
    next_fid: u8,
    retransmit_timeout: Duration,
    max_attempts: u32,
}

impl Default for SendEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SendEngine {
    /// Create an engine with the protocol's retry budget.
    pub fn new() -> Self {
        Self::with_policy(RETRANSMIT_TIMEOUT, MAX_ATTEMPTS)
    }

    /// Create an engine with a custom per-attempt timeout and ceiling.
    pub fn with_policy(retransmit_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            pending: BTreeMap::new(),
            bytes_in_flight: 0,
            ack_watermark: None,
            next_fid: 0,
            retransmit_timeout,
            max_attempts,
        }
    }

    /// Sum of in-flight payload bytes.
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    /// Whether any transmitted packet still awaits acknowledgment.
    pub fn has_unacked_data(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of packets awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `seq` has left the unacked set.
    pub fn is_acked(&self, seq: u32) -> bool {
        !self.pending.contains_key(&seq)
    }

    /// Allocate a fresh fragment identifier.
    pub fn allocate_fid(&mut self) -> u8 {
        let fid = self.next_fid;
        self.next_fid = self.next_fid.wrapping_add(1);
        fid
    }

    /// Split a payload into ordered chunks of at most [`MAX_PAYLOAD`]
    /// bytes. An empty payload yields a single empty chunk.
    ///
    /// Fails when the message would need more fragments than the 8-bit
    /// offset can address.
    pub fn fragment(payload: &[u8]) -> SlowResult<Vec<Bytes>> {
        if payload.len() > MAX_FRAGMENTS * MAX_PAYLOAD {
            return Err(SlowError::PayloadTooLarge(payload.len()));
        }
        if payload.len() <= MAX_PAYLOAD {
            return Ok(vec![Bytes::copy_from_slice(payload)]);
        }
        Ok(payload
            .chunks(MAX_PAYLOAD)
            .map(Bytes::copy_from_slice)
            .collect())
    }

    /// Whether a chunk of `payload_len` bytes fits the window right now.
    pub fn fits_window(&self, payload_len: usize, remote_window: u16) -> bool {
        self.bytes_in_flight + payload_len <= remote_window as usize
    }

    /// Record a freshly transmitted packet.
    pub fn register(&mut self, seq: u32, payload_len: usize, datagram: Bytes) {
        self.register_at(seq, payload_len, datagram, Instant::now());
    }

    /// Record a transmission with an injected send time.
    pub fn register_at(&mut self, seq: u32, payload_len: usize, datagram: Bytes, now: Instant) {
        self.bytes_in_flight += payload_len;
        self.pending.insert(
            seq,
            PendingTransmission {
                seq,
                payload_len,
                datagram,
                attempts: 1,
                deadline: now + self.retransmit_timeout,
            },
        );
    }

    /// Whether `ack` advances (or matches) the cumulative watermark.
    pub fn is_current_ack(&self, ack: u32) -> bool {
        self.ack_watermark.map_or(true, |mark| ack >= mark)
    }

    /// Apply a cumulative acknowledgment: every pending packet with
    /// sequence ≤ `ack` is confirmed delivered and removed. Returns the
    /// number of packets cleared.
    pub fn on_cumulative_ack(&mut self, ack: u32) -> usize {
        let confirmed: Vec<u32> = self.pending.range(..=ack).map(|(seq, _)| *seq).collect();
        for seq in &confirmed {
            if let Some(entry) = self.pending.remove(seq) {
                self.bytes_in_flight -= entry.payload_len;
            }
        }
        self.ack_watermark = Some(self.ack_watermark.map_or(ack, |mark| mark.max(ack)));
        if !confirmed.is_empty() {
            trace!(ack, cleared = confirmed.len(), "cumulative ack");
        }
        confirmed.len()
    }

    /// Earliest retransmission deadline among pending packets.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Collect the datagrams whose deadline has passed, bumping their
    /// attempt counts and re-arming their deadlines.
    ///
    /// Fails with [`SlowError::RetriesExhausted`] once any packet has
    /// used up its attempt budget; the abandoned packet leaves the
    /// unacked set and the caller stops sending remaining chunks.
    pub fn due_retransmissions_at(&mut self, now: Instant) -> SlowResult<Vec<Bytes>> {
        // Exhaustion is checked before anything is mutated: a failing
        // call must not charge attempts for datagrams it never returns.
        let exhausted = self
            .pending
            .values()
            .find(|entry| entry.deadline <= now && entry.attempts >= self.max_attempts)
            .map(|entry| (entry.seq, entry.attempts));
        if let Some((seq, attempts)) = exhausted {
            if let Some(entry) = self.pending.remove(&seq) {
                self.bytes_in_flight -= entry.payload_len;
            }
            return Err(SlowError::RetriesExhausted { seq, attempts });
        }

        let mut due = Vec::new();
        for entry in self.pending.values_mut() {
            if entry.deadline > now {
                continue;
            }
            entry.attempts += 1;
            entry.deadline = now + self.retransmit_timeout;
            trace!(seq = entry.seq, attempt = entry.attempts, "retransmit due");
            due.push(entry.datagram.clone());
        }
        Ok(due)
    }

    /// Drop every pending packet and reset the watermark. Used when a
    /// revive re-establishes the session: stale bookkeeping from before
    /// the teardown must not leak into the new established period.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.bytes_in_flight = 0;
        self.ack_watermark = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[test]
    fn test_fragment_small_payload() {
        let chunks = SendEngine::fragment(&[7u8; 45]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 45);
    }

    #[test]
    fn test_fragment_empty_payload() {
        let chunks = SendEngine::fragment(&[]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_fragment_exact_boundary() {
        let chunks = SendEngine::fragment(&vec![0u8; MAX_PAYLOAD]).unwrap();
        assert_eq!(chunks.len(), 1);

        let chunks = SendEngine::fragment(&vec![0u8; MAX_PAYLOAD + 1]).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), MAX_PAYLOAD);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn test_fragment_2017_bytes() {
        // The 2017-byte message splits 1440 + 577.
        let payload: Vec<u8> = (0..2017).map(|i| i as u8).collect();
        let chunks = SendEngine::fragment(&payload).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 1440);
        assert_eq!(chunks[1].len(), 577);

        let rejoined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn test_fragment_too_large() {
        let payload = vec![0u8; MAX_FRAGMENTS * MAX_PAYLOAD + 1];
        assert!(matches!(
            SendEngine::fragment(&payload),
            Err(SlowError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_fid_allocation_wraps() {
        let mut engine = SendEngine::new();
        for expected in 0u8..=255 {
            assert_eq!(engine.allocate_fid(), expected);
        }
        assert_eq!(engine.allocate_fid(), 0);
    }

    #[test]
    fn test_window_gate() {
        let mut engine = SendEngine::new();
        assert!(engine.fits_window(1440, 7200));

        for seq in 0..5 {
            engine.register(seq, 1440, datagram(1472));
        }
        assert_eq!(engine.bytes_in_flight(), 7200);
        assert!(!engine.fits_window(1, 7200));
        assert!(engine.fits_window(0, 7200));
    }

    #[test]
    fn test_cumulative_ack_boundary() {
        let mut engine = SendEngine::new();
        for seq in [101u32, 102, 103, 104] {
            engine.register(seq, 100, datagram(132));
        }

        // Ack for 103 clears 101..=103 and nothing above.
        assert_eq!(engine.on_cumulative_ack(103), 3);
        assert!(engine.is_acked(101));
        assert!(engine.is_acked(103));
        assert!(!engine.is_acked(104));
        assert_eq!(engine.bytes_in_flight(), 100);

        assert_eq!(engine.on_cumulative_ack(104), 1);
        assert!(!engine.has_unacked_data());
        assert_eq!(engine.bytes_in_flight(), 0);
    }

    #[test]
    fn test_ack_watermark() {
        let mut engine = SendEngine::new();
        assert!(engine.is_current_ack(0));

        engine.on_cumulative_ack(50);
        assert!(engine.is_current_ack(50));
        assert!(engine.is_current_ack(51));
        assert!(!engine.is_current_ack(49));
    }

    #[test]
    fn test_retransmission_deadlines() {
        let timeout = Duration::from_millis(100);
        let mut engine = SendEngine::with_policy(timeout, 3);
        let start = Instant::now();

        engine.register_at(10, 50, datagram(82), start);

        // Nothing due before the deadline.
        let due = engine
            .due_retransmissions_at(start + Duration::from_millis(50))
            .unwrap();
        assert!(due.is_empty());

        // First retransmission.
        let due = engine.due_retransmissions_at(start + timeout).unwrap();
        assert_eq!(due.len(), 1);

        // Deadline re-armed: not due again immediately.
        let due = engine
            .due_retransmissions_at(start + timeout + Duration::from_millis(1))
            .unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn test_retries_exhausted() {
        let timeout = Duration::from_millis(100);
        let mut engine = SendEngine::with_policy(timeout, 2);
        let start = Instant::now();

        engine.register_at(10, 50, datagram(82), start);

        // Attempt 2 of 2.
        let due = engine.due_retransmissions_at(start + timeout).unwrap();
        assert_eq!(due.len(), 1);

        // Budget spent: the next expiry fails the send and drops the
        // abandoned packet from the unacked set.
        let result = engine.due_retransmissions_at(start + timeout * 2);
        assert!(matches!(
            result,
            Err(SlowError::RetriesExhausted { seq: 10, attempts: 2 })
        ));
        assert!(!engine.has_unacked_data());
        assert_eq!(engine.bytes_in_flight(), 0);
    }

    /// A call that fails with exhaustion must not charge attempts to the
    /// other due packets, whose datagrams it never returns.
    #[test]
    fn test_exhaustion_leaves_other_packets_unharmed() {
        let timeout = Duration::from_millis(100);
        let mut engine = SendEngine::with_policy(timeout, 2);
        let start = Instant::now();

        // seq 5 burns its budget; seq 3 joins one timeout later.
        engine.register_at(5, 50, datagram(82), start);
        let due = engine.due_retransmissions_at(start + timeout).unwrap();
        assert_eq!(due.len(), 1);
        engine.register_at(3, 50, datagram(82), start + timeout);

        let result = engine.due_retransmissions_at(start + timeout * 2);
        assert!(matches!(
            result,
            Err(SlowError::RetriesExhausted { seq: 5, attempts: 2 })
        ));

        // seq 3 is still pending, still due, and on attempt 2 not 3.
        let due = engine.due_retransmissions_at(start + timeout * 2).unwrap();
        assert_eq!(due.len(), 1);
        assert!(engine.has_unacked_data());
        let result = engine.due_retransmissions_at(start + timeout * 3);
        assert!(matches!(
            result,
            Err(SlowError::RetriesExhausted { seq: 3, attempts: 2 })
        ));
    }

    #[test]
    fn test_ack_before_deadline_clears_retry() {
        let timeout = Duration::from_millis(100);
        let mut engine = SendEngine::with_policy(timeout, 1);
        let start = Instant::now();

        engine.register_at(10, 50, datagram(82), start);
        engine.on_cumulative_ack(10);

        // Acked packets never come due.
        let due = engine.due_retransmissions_at(start + timeout * 10).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn test_reset_clears_stale_state() {
        let mut engine = SendEngine::new();
        engine.register(5, 100, datagram(132));
        engine.on_cumulative_ack(3);

        engine.reset();
        assert!(!engine.has_unacked_data());
        assert_eq!(engine.bytes_in_flight(), 0);
        assert!(engine.is_current_ack(0));
    }

    /// Property: random sends and random cumulative acks never push
    /// bytes-in-flight past the remote window.
    #[test]
    fn test_window_invariant_random_driving() {
        // Small deterministic LCG; no external randomness in tests.
        let mut state: u64 = 0x5EED_CAFE;
        let mut next = move |bound: u64| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 33) % bound
        };

        let window: u16 = 7200;
        let mut engine = SendEngine::new();
        let mut seq: u32 = 0;
        let mut highest_sent: u32 = 0;

        for _ in 0..10_000 {
            if next(2) == 0 {
                let len = next(MAX_PAYLOAD as u64 + 1) as usize;
                if engine.fits_window(len, window) {
                    engine.register(seq, len, datagram(len + 32));
                    highest_sent = seq;
                    seq += 1;
                }
            } else if highest_sent > 0 {
                let ack = next(highest_sent as u64 + 1) as u32;
                if engine.is_current_ack(ack) {
                    engine.on_cumulative_ack(ack);
                }
            }
            assert!(engine.bytes_in_flight() <= window as usize);
        }
    }
}
