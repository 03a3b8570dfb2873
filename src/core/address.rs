//! The device identity address, persisted across restarts so the peripheral
//! keeps a stable static-random address and bonded centrals can find it again.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

/// A 6-byte device address, stored most-significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Generate a fresh static-random address (top two bits of the most
    /// significant byte set, per Core Spec 5.3 Vol 6B 1.3.2.1).
    pub fn generate() -> Self {
        let mut bytes = rand::random::<[u8; 6]>();
        bytes[0] |= 0xC0;
        Self(bytes)
    }

    /// Load the identity from `path`, or generate a new one and best-effort
    /// persist it. A failed write is logged and the in-memory identity is
    /// still used for this session.
    pub fn load_or_generate(path: &Path) -> Self {
        match Self::load(path) {
            Ok(addr) => {
                info!("using persisted device address {addr}");
                addr
            }
            Err(e) => {
                let addr = Self::generate();
                info!("generated new device address {addr} ({e})");
                if let Err(e) = fs::write(path, addr.0) {
                    warn!("failed to persist device address to {}: {e}", path.display());
                }
                addr
            }
        }
    }

    fn load(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let bytes: [u8; 6] = bytes[..]
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "identity file is not 6 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceAddress({self})")
    }
}
