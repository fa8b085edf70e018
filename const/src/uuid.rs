use std::fmt::{Debug, Display, Formatter};
use std::num::{NonZeroU128, NonZeroU16};
use std::str::FromStr;

use num_enum::TryFromPrimitive;
use structbuf::Packer;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID ([Vol 3] Part B, Section 2.5.1). Shorter forms
/// are stored as 128-bit values using the Bluetooth base UUID.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a `u128`.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns the UUID type. Returns [`UuidType::NonSig`] for UUIDs that are
    /// not 16-bit SIG UUIDs.
    #[inline]
    #[must_use]
    pub fn typ(self) -> UuidType {
        self.as_uuid16().map_or(UuidType::NonSig, Uuid16::typ)
    }

    /// Returns the [`Uuid16`] representation or [`None`] if the UUID is not a
    /// 16-bit SIG UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid16(self) -> Option<Uuid16> {
        self.as_u16().and_then(Uuid16::new)
    }

    /// Returns the 16-bit value of a SIG UUID. Include declaration values
    /// carry the service UUID only in this form.
    #[inline]
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }
}

impl Debug for Uuid {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            return write!(f, "{v:#06X}");
        }
        let v = self.0.get();
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            (v & ((1 << 48) - 1)) as u64
        )
    }
}

impl Display for Uuid {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.typ() {
            UuidType::NonSig => Debug::fmt(self, f),
            typ => Debug::fmt(&typ, f),
        }
    }
}

impl FromStr for Uuid {
    type Err = ();

    /// Parses a 16-bit (`180F`), 32-bit, or dashed 128-bit UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x").trim_start_matches("0X");
        let v = match s.len() {
            4 => u16::from_str_radix(s, 16).ok().and_then(Uuid16::new).map(Uuid16::as_uuid),
            8 => (u32::from_str_radix(s, 16).ok())
                .and_then(|v| Self::new(u128::from(v) << SHIFT | BASE)),
            32 | 36 => {
                let hex: String = s.chars().filter(|&c| c != '-').collect();
                (hex.len() == 32)
                    .then(|| u128::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(Self::new)
            }
            _ => None,
        };
        v.ok_or(())
    }
}

/// Stored as a 32-digit hex string because not every serde format supports
/// 128-bit integers.
impl serde::Serialize for Uuid {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&format_args!("{:032X}", self.0.get()))
    }
}

impl<'de> serde::Deserialize<'de> for Uuid {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(d)?;
        (u128::from_str_radix(&s, 16).ok())
            .and_then(Self::new)
            .ok_or_else(|| D::Error::custom(format_args!("invalid UUID {s:?}")))
    }
}

/// 16-bit Bluetooth SIG UUID.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid16(NonZeroU16);

impl Uuid16 {
    /// Creates a 16-bit SIG UUID from a `u16`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        match NonZeroU16::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns the UUID type based on the assigned number range.
    #[must_use]
    pub fn typ(self) -> UuidType {
        use UuidType::*;
        fn is<T: TryFromPrimitive<Primitive = u16>>(u: u16, f: impl FnOnce(T) -> UuidType) -> UuidType {
            T::try_from_primitive(u).map_or(Unknown(u), f)
        }
        let u = self.0.get();
        match u >> 8 {
            0x00 | 0x01 => Protocol(u),
            0x10..=0x14 => is(u, ServiceClass),
            0x18 => is(u, Service),
            0x28 => is(u, Declaration),
            0x29 => is(u, Descriptor),
            0x2A | 0x2B => is(u, Characteristic),
            _ => Unknown(u),
        }
    }

    /// Returns the 128-bit UUID representation.
    #[inline]
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        let v = (self.0.get() as u128) << SHIFT | BASE;
        // SAFETY: BASE is non-zero
        Uuid(unsafe { NonZeroU128::new_unchecked(v) })
    }
}

impl Debug for Uuid16 {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0.get())
    }
}

impl Display for Uuid16 {
    #[inline(always)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.typ(), f)
    }
}

impl From<Uuid16> for u16 {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.0.get()
    }
}

/// Assigned number category of a 16-bit UUID.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum UuidType {
    Protocol(u16),
    ServiceClass(ServiceClass),
    Service(Service),
    Declaration(Declaration),
    Descriptor(Descriptor),
    Characteristic(Characteristic),
    Unknown(u16),
    NonSig,
}

impl Debug for UuidType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use UuidType::*;
        match *self {
            Protocol(u) => (f.debug_tuple("Protocol").field(&format_args!("{u:#06X}"))).finish(),
            ServiceClass(ref u) => f.debug_tuple("ServiceClass").field(u).finish(),
            Service(ref u) => f.debug_tuple("Service").field(u).finish(),
            Declaration(ref u) => f.debug_tuple("Declaration").field(u).finish(),
            Descriptor(ref u) => f.debug_tuple("Descriptor").field(u).finish(),
            Characteristic(ref u) => f.debug_tuple("Characteristic").field(u).finish(),
            Unknown(u) => (f.debug_tuple("Unknown").field(&format_args!("{u:#06X}"))).finish(),
            NonSig => f.write_str("NonSig"),
        }
    }
}

/// Packer extension functions.
pub trait UuidPacker {
    /// Writes either a 16- or a 128-bit UUID, as used in attribute values.
    fn uuid(&mut self, u: Uuid);
}

impl UuidPacker for Packer<'_> {
    #[inline]
    fn uuid(&mut self, u: Uuid) {
        match u.as_u16() {
            Some(v) => self.u16(v),
            None => self.u128(u.0.get()),
        };
    }
}

/// Creates an assigned 16-bit SIG UUID from a non-zero `u16`.
#[inline]
#[must_use]
const fn uuid16(v: u16) -> Uuid16 {
    // SAFETY: All crate uses guarantee that v != 0
    Uuid16(unsafe { NonZeroU16::new_unchecked(v) })
}

/// Defines a 16-bit UUID enum and its conversions.
macro_rules! uuid16_enum {
    (
        $(#[$outer:meta])*
        $vis:vis enum $typ:ident {
            $($item:ident = $uuid:literal,)+
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, ::num_enum::TryFromPrimitive)]
        #[cfg_attr(test, derive(enum_iterator::Sequence))]
        #[non_exhaustive]
        #[repr(u16)]
        $vis enum $typ {
            $($item = $uuid,)+
        }

        impl $typ {
            ::paste::paste! {$(
                pub const [<$item:snake:upper>]: $crate::Uuid16 = uuid16(Self::$item as _);
            )+}

            /// Returns the `Uuid` representation of the variant.
            #[inline]
            #[must_use]
            pub const fn uuid(self) -> $crate::Uuid {
                uuid16(self as _).as_uuid()
            }
        }

        impl ::core::fmt::Display for $typ {
            #[inline(always)]
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Debug::fmt(self, f)
            }
        }

        impl ::core::cmp::PartialEq<$crate::Uuid> for $typ {
            #[inline(always)]
            fn eq(&self, rhs: &$crate::Uuid) -> bool {
                self.uuid() == *rhs
            }
        }

        impl ::core::cmp::PartialEq<$typ> for $crate::Uuid {
            #[inline(always)]
            fn eq(&self, rhs: &$typ) -> bool {
                *self == rhs.uuid()
            }
        }
    }
}

include!("uuid16.rs");
