//! SLOW wire format: the fixed 32-byte header codec and the tagged
//! classification of the 5-bit flag field.

mod classify;
mod header;

pub use classify::PacketKind;
pub use header::{Packet, PacketFlags, PacketHeader, SessionId};
