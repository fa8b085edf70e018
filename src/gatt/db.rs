use std::fmt::{Display, Formatter};

use structbuf::{Pack, Packer, StructBuf};
use tracing::info;

pub use builder::*;

use crate::att::{Handle, HandleRange};
use crate::gap::{Characteristic as Char, Declaration, Descriptor as Desc, Service as Svc};
use crate::gap::{Uuid, Uuid16, UuidPacker, UuidType};

use super::{ExtProp, Prop};

mod builder;

/// Discovered GATT server database. Services are sorted by handle and do not
/// overlap. The only way to construct a non-empty database is with
/// [`DatabaseBuilder`] or by deserializing a previously saved copy, which is
/// checked by the same builder.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "Saved")]
#[must_use]
pub struct Database {
    services: Vec<Service>,
}

/// Deserialized database before validation.
#[derive(serde::Deserialize)]
struct Saved {
    services: Vec<Service>,
}

impl TryFrom<Saved> for Database {
    type Error = super::Error;

    #[inline]
    fn try_from(v: Saved) -> Result<Self, Self::Error> {
        DatabaseBuilder::rebuild(&v.services)
    }
}

/// Primary or secondary service ([Vol 3] Part G, Section 3.1).
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
pub struct Service {
    /// Service declaration handle.
    pub handle: Handle,
    /// Last handle of the service group.
    pub end_handle: Handle,
    pub uuid: Uuid,
    pub is_primary: bool,
    /// Include declarations in handle order.
    pub included_services: Vec<IncludedService>,
    /// Characteristics in handle order.
    pub characteristics: Vec<Characteristic>,
}

/// Include declaration ([Vol 3] Part G, Section 3.2). This is a reference to
/// another service by its handle range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
pub struct IncludedService {
    /// Include declaration handle.
    pub handle: Handle,
    /// Included service UUID.
    pub uuid: Uuid,
    pub start_handle: Handle,
    pub end_handle: Handle,
}

/// Characteristic definition ([Vol 3] Part G, Section 3.3).
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
pub struct Characteristic {
    pub declaration_handle: Handle,
    pub value_handle: Handle,
    pub uuid: Uuid,
    pub properties: Prop,
    /// Descriptors in handle order.
    pub descriptors: Vec<Descriptor>,
}

/// Characteristic descriptor ([Vol 3] Part G, Section 3.3.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
pub struct Descriptor {
    pub handle: Handle,
    pub uuid: Uuid,
    /// Characteristic Extended Properties value, if this is the Extended
    /// Properties descriptor and its value was read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_props: Option<ExtProp>,
}

/// Flattened database element returned by [`Database::view`].
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Element {
    Service {
        range: HandleRange,
        uuid: Uuid,
        is_primary: bool,
    },
    IncludedService {
        handle: Handle,
        range: HandleRange,
        uuid: Uuid,
    },
    Characteristic {
        declaration_handle: Handle,
        value_handle: Handle,
        uuid: Uuid,
        properties: Prop,
        ext_props: ExtProp,
    },
    Descriptor {
        handle: Handle,
        uuid: Uuid,
    },
}

impl Element {
    /// Returns the attribute handle of the element. This is the value handle
    /// for characteristics.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        match *self {
            Self::Service { range, .. } => range.start(),
            Self::IncludedService { handle, .. } | Self::Descriptor { handle, .. } => handle,
            Self::Characteristic { value_handle, .. } => value_handle,
        }
    }

    /// Returns the element UUID.
    #[inline]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        match *self {
            Self::Service { uuid, .. }
            | Self::IncludedService { uuid, .. }
            | Self::Characteristic { uuid, .. }
            | Self::Descriptor { uuid, .. } => uuid,
        }
    }
}

impl Database {
    /// Returns whether the database has no services.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Returns all services in handle order.
    #[inline(always)]
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Returns services with the specified UUID or all services if `uuid` is
    /// [`None`].
    pub fn search(&self, uuid: Option<Uuid>) -> impl Iterator<Item = &Service> {
        (self.services.iter()).filter(move |s| uuid.map_or(true, |u| s.uuid == u))
    }

    /// Returns the service containing the specified handle.
    #[must_use]
    pub fn find_service(&self, hdl: Handle) -> Option<&Service> {
        let i = self.services.partition_point(|s| s.end_handle < hdl);
        (self.services.get(i)).filter(|s| s.handle <= hdl)
    }

    /// Returns the characteristic with the specified value handle.
    #[must_use]
    pub fn characteristic(&self, value_hdl: Handle) -> Option<&Characteristic> {
        (self.find_service(value_hdl)?.characteristics.iter())
            .find(|c| c.value_handle == value_hdl)
    }

    /// Returns the descriptor with the specified handle.
    #[must_use]
    pub fn descriptor(&self, hdl: Handle) -> Option<&Descriptor> {
        self.owning_characteristic(hdl)?
            .descriptors
            .iter()
            .find(|d| d.handle == hdl)
    }

    /// Returns the characteristic that owns the specified value or descriptor
    /// handle.
    #[must_use]
    pub fn owning_characteristic(&self, hdl: Handle) -> Option<&Characteristic> {
        let s = self.find_service(hdl)?;
        let i = (s.characteristics).partition_point(|c| c.declaration_handle < hdl);
        let c = s.characteristics.get(i.checked_sub(1)?)?;
        (c.value_handle == hdl || c.descriptors.iter().any(|d| d.handle == hdl)).then_some(c)
    }

    /// Returns whether the Generic Attribute service contains the Database Hash
    /// characteristic ([Vol 3] Part G, Section 7.3).
    #[must_use]
    pub fn has_database_hash(&self) -> bool {
        (self.services.iter())
            .filter(|s| s.uuid == Svc::GenericAttribute)
            .flat_map(|s| s.characteristics.iter())
            .any(|c| c.uuid == Char::DatabaseHash)
    }

    /// Returns services overlapping the handle range as a flat list of elements
    /// in handle order. Each overlapping service is returned in full.
    #[must_use]
    pub fn view(&self, hdls: HandleRange) -> Vec<Element> {
        let mut v = Vec::new();
        for s in self.services.iter().filter(|s| s.range().overlaps(hdls)) {
            v.push(Element::Service {
                range: s.range(),
                uuid: s.uuid,
                is_primary: s.is_primary,
            });
            let mut incs = s.included_services.iter().peekable();
            for c in &s.characteristics {
                while let Some(inc) = incs.next_if(|i| i.handle < c.declaration_handle) {
                    v.push(inc.element());
                }
                v.push(Element::Characteristic {
                    declaration_handle: c.declaration_handle,
                    value_handle: c.value_handle,
                    uuid: c.uuid,
                    properties: c.properties,
                    ext_props: c.ext_props().unwrap_or_default(),
                });
                v.extend(c.descriptors.iter().map(|d| Element::Descriptor {
                    handle: d.handle,
                    uuid: d.uuid,
                }));
            }
            v.extend(incs.map(IncludedService::element));
        }
        v
    }

    /// Returns the database hash ([Vol 3] Part G, Section 7.3.1). Extended
    /// Properties is the only descriptor with a hashed value, which is zero
    /// until it is read.
    #[must_use]
    pub fn hash(&self) -> u128 {
        use Desc::*;
        fn val(f: impl FnOnce(&mut Packer)) -> StructBuf {
            // Longest value is the characteristic declaration
            let mut b = StructBuf::new(1 + 2 + 16);
            f(&mut b.append());
            b
        }
        let mut attrs: Vec<(Handle, Uuid16, StructBuf)> = Vec::new();
        for s in &self.services {
            let typ = if s.is_primary {
                Declaration::PRIMARY_SERVICE
            } else {
                Declaration::SECONDARY_SERVICE
            };
            attrs.push((s.handle, typ, val(|v| v.uuid(s.uuid))));
            for inc in &s.included_services {
                let v = val(|v| {
                    v.u16(inc.start_handle).u16(inc.end_handle);
                    if let Some(u) = inc.uuid.as_u16() {
                        v.u16(u);
                    }
                });
                attrs.push((inc.handle, Declaration::INCLUDE, v));
            }
            for c in &s.characteristics {
                let v = val(|v| v.u8(c.properties.bits()).u16(c.value_handle).uuid(c.uuid));
                attrs.push((c.declaration_handle, Declaration::CHARACTERISTIC, v));
                for d in &c.descriptors {
                    let Some(typ) = d.uuid.as_uuid16() else { continue };
                    let v = match typ.typ() {
                        UuidType::Descriptor(CharacteristicExtendedProperties) => {
                            val(|v| {
                                v.u16(d.ext_props.unwrap_or_default().bits());
                            })
                        }
                        UuidType::Descriptor(
                            CharacteristicUserDescription
                            | ClientCharacteristicConfiguration
                            | ServerCharacteristicConfiguration
                            | CharacteristicPresentationFormat
                            | CharacteristicAggregateFormat,
                        ) => val(|_| {}),
                        _ => continue,
                    };
                    attrs.push((d.handle, typ, v));
                }
            }
        }
        attrs.sort_by_key(|&(hdl, ..)| hdl);
        let mut m = gattcache_crypto::AesCmac::db_hash();
        for (hdl, typ, val) in &attrs {
            m.update(u16::from(*hdl).to_le_bytes())
                .update(u16::from(*typ).to_le_bytes())
                .update(&**val);
        }
        m.finalize()
    }

    /// Logs database contents.
    pub fn dump(&self) {
        info!("GATT database:");
        for line in self.to_string().lines() {
            info!("{line}");
        }
    }

    /// Creates a database from services that are already sorted and
    /// non-overlapping.
    #[inline(always)]
    pub(super) const fn from_services(services: Vec<Service>) -> Self {
        Self { services }
    }
}

impl Display for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for s in &self.services {
            let sec = if s.is_primary { "" } else { "(Secondary) " };
            match s.uuid.typ() {
                UuidType::Service(t) => writeln!(f, "[{}] {sec}{t} <{}>", s.handle, s.uuid)?,
                _ => writeln!(f, "[{}] {sec}Service <{}>", s.handle, s.uuid)?,
            }
            for inc in &s.included_services {
                writeln!(
                    f,
                    "[{}] |__ [Include {}..={} <{}>]",
                    inc.handle, inc.start_handle, inc.end_handle, inc.uuid
                )?;
            }
            for (i, c) in s.characteristics.iter().enumerate() {
                let cont = if i + 1 < s.characteristics.len() { '|' } else { ' ' };
                match c.uuid.typ() {
                    UuidType::Characteristic(t) => {
                        writeln!(f, "[{}] |__ {t} <{}>", c.declaration_handle, c.uuid)?;
                    }
                    _ => writeln!(f, "[{}] |__ Characteristic <{}>", c.declaration_handle, c.uuid)?,
                }
                writeln!(f, "[{}] {cont}   |__ [Value {:?}]", c.value_handle, c.properties)?;
                for d in &c.descriptors {
                    match (d.uuid.typ(), d.ext_props) {
                        (_, Some(p)) => writeln!(f, "[{}] {cont}   |__ {p:?}", d.handle)?,
                        (UuidType::Descriptor(t), None) => {
                            writeln!(f, "[{}] {cont}   |__ {t} <{}>", d.handle, d.uuid)?;
                        }
                        _ => writeln!(f, "[{}] {cont}   |__ Descriptor <{}>", d.handle, d.uuid)?,
                    }
                }
            }
        }
        Ok(())
    }
}

impl Service {
    /// Returns the service handle range.
    #[inline]
    pub const fn range(&self) -> HandleRange {
        HandleRange::new(self.handle, self.end_handle)
    }
}

impl IncludedService {
    /// Returns the handle range of the included service.
    #[inline]
    pub const fn range(&self) -> HandleRange {
        HandleRange::new(self.start_handle, self.end_handle)
    }

    #[inline]
    const fn element(&self) -> Element {
        Element::IncludedService {
            handle: self.handle,
            range: self.range(),
            uuid: self.uuid,
        }
    }
}

impl Characteristic {
    /// Returns the Characteristic Extended Properties value, if known.
    #[must_use]
    pub fn ext_props(&self) -> Option<ExtProp> {
        self.descriptors.iter().find_map(|d| d.ext_props)
    }
}

#[cfg(test)]
mod tests;
