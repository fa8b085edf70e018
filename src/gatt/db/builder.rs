use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use tracing::{trace, warn};

use crate::att::{Handle, HandleRange};
use crate::gap::{Descriptor as Desc, Uuid};
use crate::gatt::{Error, ExtProp, Prop, Result};

use super::*;

/// Incremental database builder used during service discovery. Discovery
/// results may arrive in any handle order and adding the same item twice has
/// no effect, which allows a discovery phase to be retried.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[must_use]
pub struct DatabaseBuilder {
    services: Vec<Service>,
    /// Services that still need included service, characteristic, and
    /// descriptor discovery.
    to_explore: BTreeSet<HandleRange>,
    /// Service currently being explored.
    current: Option<HandleRange>,
    /// Declaration handle of the last characteristic returned by
    /// `next_descriptor_range_to_explore`.
    pending_char: Option<Handle>,
    /// Extended Properties descriptors that have not been read yet.
    descs_to_read: Vec<Handle>,
}

impl DatabaseBuilder {
    /// Creates an empty builder.
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether any services were added.
    #[inline(always)]
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.services.is_empty()
    }

    /// Adds a service and queues it for exploration. Adding a service with an
    /// existing handle range has no effect. A service that overlaps another
    /// one is rejected.
    pub fn add_service(
        &mut self,
        start: Handle,
        end: Handle,
        uuid: Uuid,
        is_primary: bool,
    ) -> Result<()> {
        if end < start {
            return Err(Error::Inconsistent(format!(
                "service {uuid} has invalid range {start}..={end}"
            )));
        }
        let r = HandleRange::new(start, end);
        let i = self.services.partition_point(|s| s.end_handle < start);
        if let Some(s) = self.services.get(i) {
            if s.range() == r {
                trace!("Duplicate service {r}");
                return Ok(());
            }
            if s.range().overlaps(r) {
                return Err(Error::Inconsistent(format!(
                    "service {uuid} at {r} overlaps {} at {}",
                    s.uuid,
                    s.range()
                )));
            }
        }
        self.services.insert(
            i,
            Service {
                handle: start,
                end_handle: end,
                uuid,
                is_primary,
                included_services: Vec::new(),
                characteristics: Vec::new(),
            },
        );
        self.to_explore.insert(r);
        Ok(())
    }

    /// Adds an include declaration to the service containing `hdl`. If the
    /// included service is not known yet, it is added as a secondary service.
    pub fn add_included_service(
        &mut self,
        hdl: Handle,
        uuid: Uuid,
        start: Handle,
        end: Handle,
    ) -> Result<()> {
        let Some(i) = self.service_index(hdl) else {
            return Err(Error::Inconsistent(format!(
                "include {hdl} for {uuid} has no owning service"
            )));
        };
        if end < start {
            return Err(Error::Inconsistent(format!(
                "include {hdl} has invalid range {start}..={end}"
            )));
        }
        let s = &mut self.services[i];
        let j = s.included_services.partition_point(|inc| inc.handle < hdl);
        if s.included_services.get(j).map_or(true, |inc| inc.handle != hdl) {
            s.included_services.insert(
                j,
                IncludedService {
                    handle: hdl,
                    uuid,
                    start_handle: start,
                    end_handle: end,
                },
            );
        }
        if self.service_index(start).is_none() {
            self.add_service(start, end, uuid, false)?;
        }
        Ok(())
    }

    /// Adds a characteristic to the service containing its declaration.
    pub fn add_characteristic(
        &mut self,
        decl: Handle,
        val: Handle,
        uuid: Uuid,
        props: Prop,
    ) -> Result<()> {
        let Some(i) = self.service_index(decl) else {
            return Err(Error::Inconsistent(format!(
                "characteristic {uuid} at {decl} has no owning service"
            )));
        };
        let s = &mut self.services[i];
        if val <= decl || s.end_handle < val {
            return Err(Error::Inconsistent(format!(
                "characteristic {uuid} at {decl} has invalid value handle {val}"
            )));
        }
        let j = (s.characteristics).partition_point(|c| c.declaration_handle < decl);
        match s.characteristics.get(j) {
            Some(c) if c.declaration_handle == decl => trace!("Duplicate characteristic {decl}"),
            _ => s.characteristics.insert(
                j,
                Characteristic {
                    declaration_handle: decl,
                    value_handle: val,
                    uuid,
                    properties: props,
                    descriptors: Vec::new(),
                },
            ),
        }
        Ok(())
    }

    /// Adds a descriptor to the last characteristic declared before `hdl`.
    /// Extended Properties descriptors are queued for reading.
    pub fn add_descriptor(&mut self, hdl: Handle, uuid: Uuid) -> Result<()> {
        let Some(i) = self.service_index(hdl) else {
            return Err(Error::Inconsistent(format!(
                "descriptor {uuid} at {hdl} has no owning service"
            )));
        };
        let s = &mut self.services[i];
        let j = (s.characteristics).partition_point(|c| c.declaration_handle < hdl);
        let Some(c) = j.checked_sub(1).and_then(|j| s.characteristics.get_mut(j)) else {
            return Err(Error::Inconsistent(format!(
                "descriptor {uuid} at {hdl} has no owning characteristic"
            )));
        };
        if hdl <= c.value_handle {
            return Err(Error::Inconsistent(format!(
                "descriptor {uuid} at {hdl} overlaps characteristic value {}",
                c.value_handle
            )));
        }
        let k = c.descriptors.partition_point(|d| d.handle < hdl);
        if c.descriptors.get(k).map_or(false, |d| d.handle == hdl) {
            trace!("Duplicate descriptor {hdl}");
            return Ok(());
        }
        c.descriptors.insert(
            k,
            Descriptor {
                handle: hdl,
                uuid,
                ext_props: None,
            },
        );
        if uuid == Desc::CharacteristicExtendedProperties {
            let k = self.descs_to_read.partition_point(|&h| h < hdl);
            self.descs_to_read.insert(k, hdl);
        }
        Ok(())
    }

    /// Selects the next service with the lowest handle for exploration.
    /// Returns `false` when all services were explored.
    pub fn start_next_service_exploration(&mut self) -> bool {
        let next = self.to_explore.iter().next().copied();
        self.current = next;
        self.pending_char = None;
        next.map_or(false, |r| self.to_explore.remove(&r))
    }

    /// Returns the handle range of the service being explored.
    #[inline(always)]
    #[must_use]
    pub const fn currently_explored_service(&self) -> Option<HandleRange> {
        self.current
    }

    /// Returns the next handle range between a characteristic value and the
    /// next characteristic declaration (or service end) that may contain
    /// descriptors. Empty ranges are skipped. Returns [`None`] after the last
    /// characteristic of the current service.
    pub fn next_descriptor_range_to_explore(&mut self) -> Option<HandleRange> {
        let cur = self.current?;
        let pending = self.pending_char;
        let s = self.services.iter().find(|s| s.range() == cur)?;
        let mut it = (s.characteristics.iter())
            .skip_while(|c| pending.map_or(false, |p| c.declaration_handle <= p))
            .peekable();
        while let Some(c) = it.next() {
            self.pending_char = Some(c.declaration_handle);
            let end = it
                .peek()
                .map_or(Some(s.end_handle), |n| n.declaration_handle.prev());
            let (Some(start), Some(end)) = (c.value_handle.next(), end) else {
                continue;
            };
            if start <= end {
                return Some(HandleRange::new(start, end));
            }
        }
        self.pending_char = Some(Handle::MAX);
        None
    }

    /// Returns Extended Properties descriptor handles that still need to be
    /// read, in handle order.
    #[inline(always)]
    #[must_use]
    pub fn descriptor_handles_to_read(&self) -> &[Handle] {
        &self.descs_to_read
    }

    /// Sets Extended Properties values for the first `vals.len()` descriptors
    /// returned by `descriptor_handles_to_read`. An empty slice or more values
    /// than descriptors clears the list and returns `false`.
    pub fn set_value_of_descriptors(&mut self, vals: &[u16]) -> bool {
        if vals.is_empty() || vals.len() > self.descs_to_read.len() {
            warn!(
                "Got {} Extended Properties values for {} descriptors",
                vals.len(),
                self.descs_to_read.len()
            );
            self.descs_to_read.clear();
            return false;
        }
        let done: Vec<Handle> = self.descs_to_read.drain(..vals.len()).collect();
        for (hdl, &v) in done.into_iter().zip(vals) {
            match self.descriptor_mut(hdl) {
                Some(d) => d.ext_props = Some(ExtProp::from_bits_retain(v)),
                None => warn!("Extended Properties descriptor {hdl} disappeared"),
            }
        }
        true
    }

    /// Rebuilds a saved database, applying the same consistency checks as
    /// discovery.
    pub(super) fn rebuild(services: &[Service]) -> Result<Database> {
        let mut b = Self::new();
        for s in services {
            b.add_service(s.handle, s.end_handle, s.uuid, s.is_primary)?;
        }
        for s in services {
            for inc in &s.included_services {
                b.add_included_service(inc.handle, inc.uuid, inc.start_handle, inc.end_handle)?;
            }
            for c in &s.characteristics {
                b.add_characteristic(c.declaration_handle, c.value_handle, c.uuid, c.properties)?;
            }
        }
        // Descriptors are attached to the closest preceding characteristic, so
        // all characteristics must exist first
        for d in services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .flat_map(|c| c.descriptors.iter())
        {
            b.add_descriptor(d.handle, d.uuid)?;
            if let (Some(p), Some(v)) = (d.ext_props, b.descriptor_mut(d.handle)) {
                v.ext_props = Some(p);
            }
        }
        if b.services.len() != services.len() {
            return Err(Error::Inconsistent(format!(
                "saved database has {} services, but {} are distinct",
                services.len(),
                b.services.len()
            )));
        }
        Ok(b.build())
    }

    /// Returns the finished database.
    #[inline]
    pub fn build(self) -> Database {
        Database::from_services(self.services)
    }

    /// Returns the index of the service containing the specified handle.
    fn service_index(&self, hdl: Handle) -> Option<usize> {
        let i = self.services.partition_point(|s| s.end_handle < hdl);
        (self.services.get(i)).and_then(|s| (s.handle <= hdl).then_some(i))
    }

    /// Returns the descriptor with the specified handle.
    fn descriptor_mut(&mut self, hdl: Handle) -> Option<&mut Descriptor> {
        let i = self.service_index(hdl)?;
        (self.services[i].characteristics.iter_mut())
            .flat_map(|c| c.descriptors.iter_mut())
            .find(|d| d.handle == hdl)
    }
}

impl Display for DatabaseBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Services to explore: [")?;
        for (i, r) in self.to_explore.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{r}")?;
        }
        writeln!(f, "]")?;
        match self.current {
            Some(r) => writeln!(f, "Exploring: {r}")?,
            None => writeln!(f, "Exploring: none")?,
        }
        write!(f, "Descriptors to read: [")?;
        for (i, h) in self.descs_to_read.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{h}")?;
        }
        writeln!(f, "]")?;
        for s in &self.services {
            let sec = if s.is_primary { "" } else { "(Secondary) " };
            writeln!(
                f,
                "{sec}Service {} <{}>: {} includes, {} characteristics",
                s.range(),
                s.uuid,
                s.included_services.len(),
                s.characteristics.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::gap::{Characteristic as Char, Service as Svc};

    use super::*;

    fn h(v: u16) -> Handle {
        Handle::new(v).unwrap()
    }

    fn u(v: u16) -> Uuid {
        crate::gap::Uuid16::new(v).unwrap().as_uuid()
    }

    #[test]
    fn idempotent_add() {
        let mut a = DatabaseBuilder::new();
        a.add_service(h(1), h(5), Svc::GenericAccess.uuid(), true).unwrap();
        let mut b = a.clone();
        b.add_service(h(1), h(5), Svc::GenericAccess.uuid(), true).unwrap();
        assert_eq!(a, b);

        a.add_characteristic(h(2), h(3), Char::DeviceName.uuid(), Prop::READ).unwrap();
        let mut b = a.clone();
        b.add_characteristic(h(2), h(3), Char::DeviceName.uuid(), Prop::READ).unwrap();
        assert_eq!(a, b);

        a.add_descriptor(h(4), Desc::CharacteristicExtendedProperties.uuid()).unwrap();
        let mut b = a.clone();
        b.add_descriptor(h(4), Desc::CharacteristicExtendedProperties.uuid()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.descriptor_handles_to_read(), &[h(4)]);
    }

    #[test]
    fn overlapping_service() {
        let mut b = DatabaseBuilder::new();
        b.add_service(h(1), h(5), u(0x1800), true).unwrap();
        assert!(matches!(
            b.add_service(h(5), h(9), u(0x1801), true),
            Err(Error::Inconsistent(_))
        ));
        assert!(b.add_service(h(5), h(4), u(0x1801), true).is_err());
        assert_eq!(b.build().services().len(), 1);
    }

    #[test]
    fn exploration_order() {
        let mut b = DatabaseBuilder::new();
        assert!(!b.in_progress());
        b.add_service(h(20), h(29), u(0x180F), true).unwrap();
        b.add_service(h(1), h(9), u(0x1800), true).unwrap();
        b.add_service(h(10), h(19), u(0x1801), true).unwrap();
        assert!(b.in_progress());
        let mut seen = Vec::new();
        while b.start_next_service_exploration() {
            seen.push(b.currently_explored_service().unwrap().start());
        }
        assert_eq!(seen, [h(1), h(10), h(20)]);
        assert!(!b.start_next_service_exploration());
        assert!(!b.start_next_service_exploration());
        assert_eq!(b.currently_explored_service(), None);
    }

    #[test]
    fn dangling_include() {
        let mut b = DatabaseBuilder::new();
        b.add_service(h(1), h(5), u(0x1800), true).unwrap();
        assert!(matches!(
            b.add_included_service(h(7), u(0x180F), h(20), h(22)),
            Err(Error::Inconsistent(_))
        ));
        let db = b.build();
        assert_eq!(db.services().len(), 1);
        assert!(db.services()[0].included_services.is_empty());
    }

    #[test]
    fn include_adds_secondary() {
        let mut b = DatabaseBuilder::new();
        b.add_service(h(1), h(5), u(0x1808), true).unwrap();
        assert!(b.start_next_service_exploration());
        b.add_included_service(h(2), u(0x180F), h(20), h(22)).unwrap();
        b.add_included_service(h(2), u(0x180F), h(20), h(22)).unwrap();
        assert!(b.start_next_service_exploration());
        assert_eq!(
            b.currently_explored_service(),
            HandleRange::try_new(20, 22)
        );
        let db = b.build();
        assert_eq!(db.services().len(), 2);
        assert_eq!(db.services()[0].included_services.len(), 1);
        assert!(!db.services()[1].is_primary);
    }

    #[test]
    fn descriptor_ranges() {
        let mut b = DatabaseBuilder::new();
        b.add_service(h(1), h(12), u(0x180D), true).unwrap();
        // Out of order delivery
        b.add_characteristic(h(6), h(7), u(0x2A38), Prop::READ).unwrap();
        b.add_characteristic(h(2), h(3), u(0x2A37), Prop::NOTIFY).unwrap();
        b.add_characteristic(h(4), h(5), u(0x2A39), Prop::WRITE).unwrap();
        assert!(b.start_next_service_exploration());
        // Values at 0x0003 and 0x0005 are followed by the next declaration
        assert_eq!(b.next_descriptor_range_to_explore(), HandleRange::try_new(8, 12));
        assert_eq!(b.next_descriptor_range_to_explore(), None);
        assert_eq!(b.next_descriptor_range_to_explore(), None);

        assert!(b.add_descriptor(h(7), u(0x2902)).is_err());
        b.add_descriptor(h(9), u(0x2902)).unwrap();
        b.add_descriptor(h(8), u(0x2900)).unwrap();
        let db = b.build();
        let c = db.characteristic(h(7)).unwrap();
        let hdls: Vec<_> = c.descriptors.iter().map(|d| d.handle).collect();
        assert_eq!(hdls, [h(8), h(9)]);
    }

    #[test]
    fn descriptor_values() {
        let mut b = DatabaseBuilder::new();
        b.add_service(h(1), h(20), u(0x1808), true).unwrap();
        for (decl, ext) in [(2, 4), (5, 7), (8, 10)] {
            (b.add_characteristic(h(decl), h(decl + 1), u(0x2A18), Prop::READ | Prop::EXT_PROPS))
                .unwrap();
            b.add_descriptor(h(ext), u(0x2900)).unwrap();
        }
        assert_eq!(b.descriptor_handles_to_read(), &[h(4), h(7), h(10)]);
        assert!(b.set_value_of_descriptors(&[0x0001, 0x0003]));
        assert_eq!(b.descriptor_handles_to_read(), &[h(10)]);
        assert!(b.set_value_of_descriptors(&[0x0002]));
        assert!(b.descriptor_handles_to_read().is_empty());
        let db = b.build();
        assert_eq!(db.descriptor(h(4)).unwrap().ext_props, Some(ExtProp::RELIABLE_WRITE));
        assert_eq!(db.characteristic(h(9)).unwrap().ext_props(), Some(ExtProp::WRITABLE_AUX));
    }

    #[test]
    fn descriptor_value_mismatch() {
        let mut b = DatabaseBuilder::new();
        b.add_service(h(1), h(5), u(0x1808), true).unwrap();
        b.add_characteristic(h(2), h(3), u(0x2A18), Prop::EXT_PROPS).unwrap();
        b.add_descriptor(h(4), u(0x2900)).unwrap();
        assert!(!b.set_value_of_descriptors(&[1, 2]));
        assert!(b.descriptor_handles_to_read().is_empty());
        assert!(!b.set_value_of_descriptors(&[]));
        assert_eq!(b.build().descriptor(h(4)).unwrap().ext_props, None);
    }
}
