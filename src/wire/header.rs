//! SLOW packet header codec.
//!
//! Wire format (little-endian multi-byte integers):
//! ```text
//! +0   Session identifier (16 bytes)
//! +16  sttl (27 high bits) | flags (5 low bits)  (4 bytes)
//! +20  Sequence number (4 bytes)
//! +24  Acknowledgment number (4 bytes)
//! +28  Advertised window (2 bytes)
//! +30  Fragment identifier (1 byte)
//! +31  Fragment offset (1 byte)
//! +32  Payload (0..=1440 bytes)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::constants::{
    FLAGS_MASK, FLAG_ACCEPT, FLAG_ACK, FLAG_CONNECT, FLAG_MORE_FRAGMENTS, FLAG_REVIVE,
    HEADER_SIZE, MAX_PAYLOAD, SESSION_ID_SIZE,
};

/// 128-bit opaque session token assigned by the central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// The all-zero identifier, meaning "no session yet". Only ever
    /// sent in the initial CONNECT packet.
    pub const NIL: SessionId = SessionId([0u8; SESSION_ID_SIZE]);

    /// Build an identifier from raw bytes.
    pub const fn from_bytes(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw byte view.
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }

    /// Whether this is the nil identifier.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The 5-bit flag set packed into the low bits of the sttl/flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u32);

impl PacketFlags {
    /// No flags set (plain data packet).
    pub const NONE: PacketFlags = PacketFlags(0);
    /// CONNECT flag.
    pub const CONNECT: PacketFlags = PacketFlags(FLAG_CONNECT);
    /// REVIVE flag.
    pub const REVIVE: PacketFlags = PacketFlags(FLAG_REVIVE);
    /// ACK flag.
    pub const ACK: PacketFlags = PacketFlags(FLAG_ACK);
    /// ACCEPT flag.
    pub const ACCEPT: PacketFlags = PacketFlags(FLAG_ACCEPT);
    /// MORE_FRAGMENTS flag.
    pub const MORE_FRAGMENTS: PacketFlags = PacketFlags(FLAG_MORE_FRAGMENTS);

    /// Build from the raw 5-bit value; out-of-range bits are masked off.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & FLAGS_MASK)
    }

    /// Raw 5-bit value.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set here.
    pub const fn contains(&self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

/// Fixed 32-byte SLOW packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Session identifier (nil before the central assigns one).
    pub sid: SessionId,
    /// Session time-to-live hint, 27 bits.
    pub sttl: u32,
    /// Flag set, 5 bits.
    pub flags: PacketFlags,
    /// Sequence number.
    pub seq: u32,
    /// Acknowledgment number.
    pub ack: u32,
    /// Advertised window in bytes.
    pub window: u16,
    /// Fragment identifier grouping chunks of one message.
    pub fid: u8,
    /// Fragment offset within the message.
    pub fo: u8,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            sid: SessionId::NIL,
            sttl: 0,
            flags: PacketFlags::NONE,
            seq: 0,
            ack: 0,
            window: 0,
            fid: 0,
            fo: 0,
        }
    }
}

impl PacketHeader {
    /// Header size in bytes.
    pub const SIZE: usize = HEADER_SIZE;

    /// Encode into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.sid.as_bytes());
        buf.put_u32_le((self.sttl << 5) | self.flags.bits());
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.ack);
        buf.put_u16_le(self.window);
        buf.put_u8(self.fid);
        buf.put_u8(self.fo);
    }

    /// Decode from a buffer. Returns `None` if fewer than
    /// [`Self::SIZE`] bytes are available.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        let mut sid = [0u8; SESSION_ID_SIZE];
        buf.copy_to_slice(&mut sid);
        let packed = buf.get_u32_le();

        Some(Self {
            sid: SessionId::from_bytes(sid),
            sttl: packed >> 5,
            flags: PacketFlags::from_bits(packed),
            seq: buf.get_u32_le(),
            ack: buf.get_u32_le(),
            window: buf.get_u16_le(),
            fid: buf.get_u8(),
            fo: buf.get_u8(),
        })
    }
}

/// A decoded packet: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload bytes, at most [`MAX_PAYLOAD`].
    pub payload: Bytes,
}

impl Packet {
    /// A packet with no payload.
    pub fn control(header: PacketHeader) -> Self {
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    /// Serialize into one datagram buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PacketHeader::SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a received datagram.
    ///
    /// Returns `None` for undersized input or an oversized payload;
    /// the caller drops such datagrams as if they were lost.
    pub fn decode(mut datagram: Bytes) -> Option<Self> {
        let header = PacketHeader::decode(&mut datagram)?;
        if datagram.len() > MAX_PAYLOAD {
            return None;
        }
        Some(Self {
            header,
            payload: datagram,
        })
    }
}
