//! Service Discovery Protocol records used to find GATT services over BR/EDR
//! ([Vol 3] Part B and [Vol 3] Part G, Section 4.4.1).

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::att::{Handle, HandleRange};
use crate::gap::{Uuid, Uuid16};

/// ServiceClassIDList attribute ([Vol 3] Part B, Section 5.1.2).
pub const ATTR_ID_SERVICE_CLASS_ID_LIST: u16 = 0x0001;
/// ProtocolDescriptorList attribute ([Vol 3] Part B, Section 5.1.5).
pub const ATTR_ID_PROTOCOL_DESC_LIST: u16 = 0x0004;

/// Attributes requested when searching for GATT services.
pub const GATT_SEARCH_ATTRS: [u16; 2] = [ATTR_ID_SERVICE_CLASS_ID_LIST, ATTR_ID_PROTOCOL_DESC_LIST];

/// Protocol descriptor list element.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct ProtocolElem {
    /// Protocol UUID.
    pub uuid: Uuid,
    /// Protocol-specific parameters. For ATT, these are the start and end
    /// handles of the service.
    pub params: SmallVec<[u16; 2]>,
}

impl ProtocolElem {
    /// Creates a new protocol descriptor.
    #[inline]
    #[must_use]
    pub fn new(uuid: Uuid, params: &[u16]) -> Self {
        Self {
            uuid,
            params: SmallVec::from_slice(params),
        }
    }
}

/// Service record returned by a service search attribute request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ServiceRecord {
    /// ServiceClassIDList attribute value.
    pub service_classes: Vec<Uuid>,
    /// ProtocolDescriptorList attribute value.
    pub protocols: Vec<ProtocolElem>,
}

impl ServiceRecord {
    /// Creates a new service record.
    #[inline]
    #[must_use]
    pub fn new(service_classes: Vec<Uuid>, protocols: Vec<ProtocolElem>) -> Self {
        Self {
            service_classes,
            protocols,
        }
    }

    /// Returns the UUID and handle range of a GATT service exposed over
    /// BR/EDR. Records without a service class, an ATT protocol descriptor,
    /// or a valid handle range are ignored.
    #[must_use]
    pub fn att_service(&self) -> Option<(Uuid, HandleRange)> {
        let Some(&uuid) = self.service_classes.first() else {
            trace!("Ignoring SDP record without a service class");
            return None;
        };
        let pe = (self.protocols.iter()).find(|pe| pe.uuid == Uuid16::ATT.as_uuid())?;
        let (&start, &end) = (pe.params.first()?, pe.params.get(1)?);
        let r = Handle::new(start)
            .zip(Handle::new(end))
            .filter(|&(s, e)| s <= e)
            .map(|(s, e)| HandleRange::new(s, e));
        if r.is_none() {
            warn!("Invalid ATT handle range {start:#06X}..={end:#06X} for {uuid}");
        }
        Some((uuid, r?))
    }
}
