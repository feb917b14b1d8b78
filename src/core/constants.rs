//! Protocol constants for the SLOW wire format and client timing.
//!
//! The wire-layout values are fixed by the protocol and MUST NOT be
//! changed; both peers depend on them byte for byte.

use std::time::Duration;

// =============================================================================
// WIRE LAYOUT
// =============================================================================

/// Fixed packet header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Maximum payload bytes carried by one packet.
pub const MAX_PAYLOAD: usize = 1440;

/// Maximum datagram size (header + payload).
pub const MAX_DATAGRAM: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Session identifier size in bytes (128-bit token).
pub const SESSION_ID_SIZE: usize = 16;

/// Number of bits the sttl field occupies in the packed sttl/flags word.
pub const STTL_BITS: u32 = 27;

/// Mask selecting the 5 flag bits (low bits of the sttl/flags word).
pub const FLAGS_MASK: u32 = 0x1F;

// =============================================================================
// FLAG BITS (low 5 bits of the sttl/flags word)
// =============================================================================

/// Connection request / teardown marker.
pub const FLAG_CONNECT: u32 = 1 << 4;

/// Session revival (zero-way reconnect); combined with CONNECT for teardown.
pub const FLAG_REVIVE: u32 = 1 << 3;

/// Acknowledgment number is significant.
pub const FLAG_ACK: u32 = 1 << 2;

/// Accept (set) or reject (clear) on setup replies.
pub const FLAG_ACCEPT: u32 = 1 << 1;

/// More fragments of the same message follow.
pub const FLAG_MORE_FRAGMENTS: u32 = 1 << 0;

// =============================================================================
// ENDPOINT DEFAULTS
// =============================================================================

/// Protocol-fixed remote port of a SLOW central.
pub const DEFAULT_PORT: u16 = 7033;

/// Default locally advertised receive window (five full payloads).
pub const DEFAULT_LOCAL_WINDOW: u16 = (5 * MAX_PAYLOAD) as u16;

// =============================================================================
// TIMING AND RETRY BUDGETS
// =============================================================================

/// Wait budget for a handshake, disconnect or revive reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-attempt retransmission deadline for an unacknowledged packet.
pub const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Transmission attempts per packet before a send is failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// Attempts awaiting the ACK reply to a disconnect.
pub const DISCONNECT_MAX_TRIES: u32 = 3;

/// Largest fragment count for one message (fragment offset is a u8).
pub const MAX_FRAGMENTS: usize = 256;
