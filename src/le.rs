//! Device address types.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Bluetooth device address ([Vol 6] Part B, Section 1.3).
#[allow(clippy::exhaustive_enums)]
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub enum Addr {
    Public(RawAddr),
    Random(RawAddr),
}

impl Addr {
    /// Constructs a peer address from type and raw components. Returns
    /// [`None`] for an unknown address type.
    #[inline]
    #[must_use]
    pub const fn peer(typ: u8, raw: RawAddr) -> Option<Self> {
        // [Vol 4] Part E, Sections 7.7.65.1 and 7.7.65.10
        match typ {
            // Public Device Address or Public Identity Address
            0x00 | 0x02 => Some(Self::Public(raw)),
            // Random Device Address or Random (Static) Identity Address
            0x01 | 0x03 => Some(Self::Random(raw)),
            _ => None,
        }
    }

    /// Returns the raw 48-bit address.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> RawAddr {
        match self {
            Self::Public(addr) | Self::Random(addr) => addr,
        }
    }
}

impl Default for Addr {
    #[inline]
    fn default() -> Self {
        Self::Public(RawAddr::default())
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Public(ref raw) => write!(f, "{raw} (public)"),
            Self::Random(ref raw) => write!(f, "{raw} (random)"),
        }
    }
}

/// 48-bit untyped device address stored in little-endian byte order.
#[derive(
    Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct RawAddr([u8; 6]);

impl RawAddr {
    /// Creates an address from little-endian bytes.
    #[inline(always)]
    #[must_use]
    pub const fn from_le_bytes(v: [u8; 6]) -> Self {
        Self(v)
    }

    /// Returns the address as little-endian bytes.
    #[inline(always)]
    #[must_use]
    pub const fn as_le_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns the 24-bit organizationally unique identifier, which is the
    /// most significant half of a public address.
    #[inline]
    #[must_use]
    pub const fn oui(&self) -> [u8; 3] {
        [self.0[5], self.0[4], self.0[3]]
    }
}

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for RawAddr {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // [Vol 3] Part C, Section 3.2.1.3
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl Display for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for RawAddr {
    type Err = ();

    /// Parses the `XX:XX:XX:XX:XX:XX` format, most significant byte first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut v = [0; 6];
        let mut it = s.split(':');
        for b in v.iter_mut().rev() {
            let p = it.next().ok_or(())?;
            if p.len() != 2 {
                return Err(());
            }
            *b = u8::from_str_radix(p, 16).map_err(|_| ())?;
        }
        it.next().map_or(Ok(Self(v)), |_| Err(()))
    }
}
