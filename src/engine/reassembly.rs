//! Fragment reassembly.
//!
//! Buffers arrive keyed by fragment identifier; the terminal fragment
//! (the one without MORE_FRAGMENTS) fixes the expected count at
//! `offset + 1` and completes the message.
//!
//! Known limitation: completion is inferred from the terminal offset
//! and the count of stored fragments. A lost non-terminal fragment
//! stalls its buffer indefinitely; the sender's retransmission path is
//! what recovers it, and [`ReassemblyEngine::reset`] discards stalled
//! buffers on session changes.

use std::collections::HashMap;

use bytes::Bytes;

/// Outcome of storing one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentResult {
    /// More fragments are still expected.
    Incomplete,
    /// The terminal fragment arrived; the joined message is returned and
    /// the buffer discarded.
    Complete(Vec<u8>),
}

/// Per-identifier assembly state.
#[derive(Debug, Default)]
struct FragmentBuffer {
    /// Payload bytes by fragment offset; duplicates overwrite.
    by_offset: HashMap<u8, Bytes>,
    /// Expected fragment count, known once the terminal fragment lands.
    expected: Option<usize>,
}

impl FragmentBuffer {
    fn store(&mut self, offset: u8, payload: Bytes, terminal: bool) {
        self.by_offset.insert(offset, payload);
        if terminal {
            self.expected = Some(offset as usize + 1);
        }
    }

    fn is_complete(&self) -> bool {
        self.expected.map_or(false, |n| self.by_offset.len() >= n)
    }

    fn join(self) -> Vec<u8> {
        let expected = self.expected.unwrap_or(0);
        let mut message = Vec::new();
        for offset in 0..expected {
            if let Some(part) = self.by_offset.get(&(offset as u8)) {
                message.extend_from_slice(part);
            }
        }
        message
    }
}

/// Reassembles fragmented messages, one lazy buffer per identifier.
#[derive(Debug, Default)]
pub struct ReassemblyEngine {
    buffers: HashMap<u8, FragmentBuffer>,
}

impl ReassemblyEngine {
    /// Create an engine with no buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one fragment. `more` mirrors the MORE_FRAGMENTS flag; a
    /// clear flag marks the terminal fragment and may complete the
    /// message.
    pub fn on_fragment(&mut self, fid: u8, offset: u8, payload: Bytes, more: bool) -> FragmentResult {
        let buffer = self.buffers.entry(fid).or_default();
        buffer.store(offset, payload, !more);

        if buffer.is_complete() {
            let buffer = self.buffers.remove(&fid).unwrap_or_default();
            FragmentResult::Complete(buffer.join())
        } else {
            FragmentResult::Incomplete
        }
    }

    /// Number of messages currently being assembled.
    pub fn pending_messages(&self) -> usize {
        self.buffers.len()
    }

    /// Drop every buffer. Fragment state never survives a session
    /// change.
    pub fn reset(&mut self) {
        self.buffers.clear();
    }
}
