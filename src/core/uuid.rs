//! A UUID (See Core Spec 5.3 Vol 1E 2.9.1. Basic Types)

use std::fmt;

/// A UUID (See Core Spec 5.3 Vol 1E 2.9.1. Basic Types)
///
/// The backing storage is BIG-ENDIAN, so a short UUID promoted onto the
/// Bluetooth base UUID reads naturally in its canonical textual form.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Uuid([u8; 16]);

const BASE_UUID: u128 = 0x00000000_0000_1000_8000_0080_5F9B_34FB;

impl Uuid {
    /// Constructor promoting a 16-bit or 32-bit assigned number onto the
    /// Bluetooth base UUID.
    pub const fn new(val: u32) -> Self {
        Self((BASE_UUID + ((val as u128) << 96)).to_be_bytes())
    }

    /// Constructor from a full 128-bit UUID in little-endian byte order
    /// (the order 128-bit UUIDs travel on the wire).
    pub fn from_le_bytes(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// The UUID in little-endian byte order.
    pub fn le_bytes(&self) -> [u8; 16] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// If this UUID is a 16-bit assigned number on the base UUID, return it.
    pub fn as_u16(&self) -> Option<u16> {
        let backing = u128::from_be_bytes(self.0);
        if backing & ((1u128 << 96) - 1) == BASE_UUID {
            u16::try_from(backing >> 96).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(short) = self.as_u16() {
            write!(f, "Uuid(0x{short:04X})")
        } else {
            write!(f, "Uuid({self})")
        }
    }
}
