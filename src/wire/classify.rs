//! Packet role classification.
//!
//! The 5-bit flag field acts as a tagged union of packet roles. Decoding
//! it into [`PacketKind`] once, at the wire boundary, keeps the receive
//! dispatch exhaustive instead of scattering bit tests through handlers.

use super::header::{PacketFlags, PacketHeader};

/// The role a packet plays, derived from its flag combination.
///
/// MORE_FRAGMENTS is orthogonal to the role and is read separately via
/// [`PacketHeader::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Connection request (CONNECT without REVIVE).
    Connect,
    /// Session teardown request (CONNECT together with REVIVE).
    Disconnect,
    /// Zero-way revival request (REVIVE alone).
    Revive,
    /// Setup reply carrying the central's verdict (ACCEPT bit present).
    Setup {
        /// Whether the reply also acknowledges a sequence number.
        acked: bool,
    },
    /// Pure acknowledgment (ACK without ACCEPT).
    Ack,
    /// Plain data packet, no control flags.
    Data,
}

impl PacketKind {
    /// Classify a header by its control flags.
    pub fn of(header: &PacketHeader) -> Self {
        let flags = header.flags;
        let connect = flags.contains(PacketFlags::CONNECT);
        let revive = flags.contains(PacketFlags::REVIVE);

        if connect && revive {
            PacketKind::Disconnect
        } else if connect {
            PacketKind::Connect
        } else if revive {
            PacketKind::Revive
        } else if flags.contains(PacketFlags::ACCEPT) {
            PacketKind::Setup {
                acked: flags.contains(PacketFlags::ACK),
            }
        } else if flags.contains(PacketFlags::ACK) {
            PacketKind::Ack
        } else {
            PacketKind::Data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(flags: PacketFlags) -> PacketHeader {
        PacketHeader {
            flags,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_connect() {
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::CONNECT)),
            PacketKind::Connect
        );
    }

    #[test]
    fn test_classify_disconnect_variants() {
        // Both teardown encodings seen on the wire classify the same way.
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::CONNECT | PacketFlags::REVIVE)),
            PacketKind::Disconnect
        );
        assert_eq!(
            PacketKind::of(&header_with(
                PacketFlags::CONNECT | PacketFlags::REVIVE | PacketFlags::ACK
            )),
            PacketKind::Disconnect
        );
    }

    #[test]
    fn test_classify_revive() {
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::REVIVE)),
            PacketKind::Revive
        );
        // Revive first-fragment may also carry MORE_FRAGMENTS.
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::REVIVE | PacketFlags::MORE_FRAGMENTS)),
            PacketKind::Revive
        );
    }

    #[test]
    fn test_classify_setup() {
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::ACCEPT)),
            PacketKind::Setup { acked: false }
        );
        // Revive acceptance carries ACK alongside ACCEPT.
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::ACCEPT | PacketFlags::ACK)),
            PacketKind::Setup { acked: true }
        );
    }

    #[test]
    fn test_classify_ack_and_data() {
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::ACK)),
            PacketKind::Ack
        );
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::NONE)),
            PacketKind::Data
        );
        assert_eq!(
            PacketKind::of(&header_with(PacketFlags::MORE_FRAGMENTS)),
            PacketKind::Data
        );
    }
}
