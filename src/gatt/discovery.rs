use std::sync::Arc;

use smallvec::SmallVec;
use structbuf::Unpack;
use tracing::{debug, error, info, trace, warn};

use crate::att::{Handle, HandleRange};
use crate::gap::{Characteristic as Char, Uuid, Uuid16};
use crate::le::Addr;
use crate::sdp::{ServiceRecord, GATT_SEARCH_ATTRS};

use super::*;

/// Discovery state of a server block.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum State {
    #[default]
    Idle,
    ReadingHashPreDiscovery,
    DiscoveringServices,
    DiscoveringIncludedServices,
    DiscoveringCharacteristics,
    DiscoveringDescriptors,
    ReadingExtendedProperties,
    ReadingHashForServiceChanged,
    /// Last discovery finished with the specified status.
    Complete(Result<()>),
}

impl State {
    /// Returns whether discovery is in progress.
    #[inline]
    #[must_use]
    pub const fn in_flight(&self) -> bool {
        !matches!(*self, Self::Idle | Self::Complete(_))
    }

    /// Returns whether the state expects discovery procedure results.
    #[inline]
    const fn discovering(&self) -> bool {
        matches!(
            *self,
            Self::DiscoveringServices
                | Self::DiscoveringIncludedServices
                | Self::DiscoveringCharacteristics
                | Self::DiscoveringDescriptors
        )
    }
}

/// Discovery procedure ([Vol 3] Part G, Sections 4.4-4.7).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    PrimaryServices,
    IncludedServices,
    Characteristics,
    Descriptors,
}

/// Single result of a discovery procedure.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiscoveryResult {
    Service {
        start: Handle,
        end: Handle,
        uuid: Uuid,
    },
    IncludedService {
        handle: Handle,
        uuid: Uuid,
        start: Handle,
        end: Handle,
    },
    Characteristic {
        decl: Handle,
        value: Handle,
        uuid: Uuid,
        props: Prop,
    },
    Descriptor {
        handle: Handle,
        uuid: Uuid,
    },
}

/// Transport event delivered to the discovery driver.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Event {
    Result(DiscoveryResult),
    DiscoveryComplete {
        phase: Phase,
        status: std::result::Result<(), TransportError>,
    },
    SdpComplete(std::result::Result<Vec<ServiceRecord>, TransportError>),
    ReadComplete(std::result::Result<Vec<u8>, TransportError>),
}

/// Request emitted by the discovery driver.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Action {
    DiscoverPrimaryServices(HandleRange),
    DiscoverIncludedServices(HandleRange),
    DiscoverCharacteristics(HandleRange),
    DiscoverDescriptors(HandleRange),
    ReadByHandle(Handle),
    ReadByType(HandleRange, Uuid),
    ReadMultiple(SmallVec<[Handle; 10]>),
    SdpSearch {
        peer: Addr,
        uuid: Uuid,
        attrs: [u16; 2],
    },
    /// Discovery finished. Waiting connections must be notified.
    Complete(Result<()>),
}

impl Action {
    /// Returns the discovery procedure of the request, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        Some(match *self {
            Self::DiscoverPrimaryServices(_) => Phase::PrimaryServices,
            Self::DiscoverIncludedServices(_) => Phase::IncludedServices,
            Self::DiscoverCharacteristics(_) => Phase::Characteristics,
            Self::DiscoverDescriptors(_) => Phase::Descriptors,
            _ => return None,
        })
    }

    /// Returns the event that reports an immediate failure to issue this
    /// request.
    #[must_use]
    pub(crate) fn failed(&self, e: TransportError) -> Option<Event> {
        if let Some(phase) = self.phase() {
            return Some(Event::DiscoveryComplete {
                phase,
                status: Err(e),
            });
        }
        match *self {
            Self::ReadByHandle(_) | Self::ReadByType(..) | Self::ReadMultiple(_) => {
                Some(Event::ReadComplete(Err(e)))
            }
            Self::SdpSearch { .. } => Some(Event::SdpComplete(Err(e))),
            _ => None,
        }
    }
}

/// Discovery state machine operating on the blocks of the connection that
/// drives discovery. Transitions are synchronous and all I/O is returned as
/// [`Action`]s.
#[derive(Debug)]
pub(crate) struct Driver<'a> {
    pub conn: &'a mut ClientConnectionBlock,
    pub srv: &'a mut ServerCacheBlock,
    pub store: &'a dyn CacheStore,
    pub cfg: &'a Config,
}

impl Driver<'_> {
    /// Starts discovery. If the peer may support robust caching, the Database
    /// Hash is read first. Otherwise, a bonded peer's database is loaded from
    /// the identity cache unless `svc_chg` is set.
    pub fn start(&mut self, svc_chg: bool) -> Vec<Action> {
        self.srv.driver = Some(self.conn.id);
        self.conn.status = None;
        let rc = robust_caching_support(self.cfg, &self.srv.db, self.srv.lmp_version, self.srv.addr);
        debug!("Starting discovery of {} ({rc:?})", self.srv.addr);
        if rc.read_hash() {
            let (state, req) = if svc_chg {
                (State::ReadingHashForServiceChanged, Request::ReadHashForServiceChanged)
            } else {
                (State::ReadingHashPreDiscovery, Request::ReadHash)
            };
            self.srv.state = state;
            self.conn.request = req;
            return self.issue(Action::ReadByType(HandleRange::ALL, Char::DatabaseHash.uuid()));
        }
        if !svc_chg && self.srv.bonded {
            if !self.srv.db.is_empty() {
                debug!("Using cached database of {}", self.srv.addr);
                return self.complete(Ok(()));
            }
            if self.load_by_identity() {
                return self.complete(Ok(()));
            }
        }
        self.start_full()
    }

    /// Starts full discovery, bypassing the cache.
    pub fn start_full(&mut self) -> Vec<Action> {
        self.srv.driver = Some(self.conn.id);
        self.srv.pending = Some(DatabaseBuilder::new());
        self.srv.state = State::DiscoveringServices;
        self.conn.request = Request::None;
        info!("Discovering services of {}", self.srv.addr);
        match self.conn.transport {
            Transport::Le => self.issue(Action::DiscoverPrimaryServices(HandleRange::ALL)),
            Transport::BrEdr => self.issue(Action::SdpSearch {
                peer: self.srv.addr,
                uuid: Uuid16::ATT.as_uuid(),
                attrs: GATT_SEARCH_ATTRS,
            }),
        }
    }

    /// Handles a transport event.
    pub fn handle(&mut self, ev: Event) -> Vec<Action> {
        match ev {
            Event::Result(r) => {
                self.on_result(r);
                Vec::new()
            }
            Event::DiscoveryComplete { phase, status } => self.on_discovery_complete(phase, status),
            Event::SdpComplete(r) => self.on_sdp_complete(r),
            Event::ReadComplete(r) => match self.conn.request {
                Request::ReadHash | Request::ReadHashForServiceChanged => self.on_hash(r),
                Request::ReadExtProps(n) => self.on_ext_props(r, n),
                Request::None => {
                    trace!("Ignoring unexpected read response on {}", self.conn.id);
                    Vec::new()
                }
            },
        }
    }

    fn on_result(&mut self, r: DiscoveryResult) {
        if !self.srv.state.discovering() {
            trace!("Ignoring {r:?} in {:?} state", self.srv.state);
            return;
        }
        let Some(b) = self.srv.pending.as_mut() else {
            return;
        };
        let res = match r {
            DiscoveryResult::Service { start, end, uuid } => b.add_service(start, end, uuid, true),
            DiscoveryResult::IncludedService {
                handle,
                uuid,
                start,
                end,
            } => b.add_included_service(handle, uuid, start, end),
            DiscoveryResult::Characteristic {
                decl,
                value,
                uuid,
                props,
            } => b.add_characteristic(decl, value, uuid, props),
            DiscoveryResult::Descriptor { handle, uuid } => b.add_descriptor(handle, uuid),
        };
        if let Err(e) = res {
            warn!("Ignoring result from {}: {e}", self.srv.addr);
        }
    }

    fn on_discovery_complete(
        &mut self,
        phase: Phase,
        status: std::result::Result<(), TransportError>,
    ) -> Vec<Action> {
        if self.srv.pending.is_none() || !self.srv.state.discovering() {
            trace!("Ignoring {phase:?} completion in {:?} state", self.srv.state);
            return Vec::new();
        }
        // Procedures are sequential, so only the outstanding one can complete
        if self.srv.outstanding.as_ref().and_then(Action::phase) != Some(phase) {
            warn!(
                "Ignoring {phase:?} completion from {} while waiting for {:?}",
                self.srv.addr, self.srv.outstanding
            );
            return Vec::new();
        }
        if let Err(e) = status {
            return self.on_error(e);
        }
        match phase {
            Phase::PrimaryServices => self.explore_next_service(),
            Phase::IncludedServices => {
                let Some(r) = self.builder().and_then(|b| b.currently_explored_service()) else {
                    return self.explore_next_service();
                };
                self.srv.state = State::DiscoveringCharacteristics;
                self.issue(Action::DiscoverCharacteristics(r))
            }
            Phase::Characteristics | Phase::Descriptors => self.explore_descriptors(),
        }
    }

    fn on_sdp_complete(
        &mut self,
        r: std::result::Result<Vec<ServiceRecord>, TransportError>,
    ) -> Vec<Action> {
        if self.srv.pending.is_none() || self.srv.state != State::DiscoveringServices {
            trace!("Ignoring SDP completion in {:?} state", self.srv.state);
            return Vec::new();
        }
        let recs = match r {
            Ok(recs) => recs,
            Err(e) => return self.on_error(e),
        };
        if let Some(b) = self.srv.pending.as_mut() {
            for (uuid, r) in recs.iter().filter_map(ServiceRecord::att_service) {
                debug!("Found ATT service {uuid} at {r}");
                if let Err(e) = b.add_service(r.start(), r.end(), uuid, true) {
                    warn!("Ignoring SDP record from {}: {e}", self.srv.addr);
                }
            }
        }
        self.explore_next_service()
    }

    /// Moves to the next unexplored service or reads Extended Properties
    /// descriptors when all services were explored.
    fn explore_next_service(&mut self) -> Vec<Action> {
        let Some(b) = self.srv.pending.as_mut() else {
            return Vec::new();
        };
        if b.start_next_service_exploration() {
            if let Some(r) = b.currently_explored_service() {
                trace!("Exploring service {r}");
                self.srv.state = State::DiscoveringIncludedServices;
                return self.issue(Action::DiscoverIncludedServices(r));
            }
        }
        let descs = b.descriptor_handles_to_read();
        let Some(&first) = descs.first() else {
            return self.finish();
        };
        self.srv.state = State::ReadingExtendedProperties;
        let n = descs.len().min(self.cfg.max_read_multiple);
        if self.srv.read_multiple_not_supported || n <= 1 {
            self.conn.request = Request::ReadExtProps(1);
            return self.issue(Action::ReadByHandle(first));
        }
        let hdls = SmallVec::from_slice(&descs[..n]);
        self.conn.request = Request::ReadExtProps(n);
        self.issue(Action::ReadMultiple(hdls))
    }

    /// Discovers descriptors of the next characteristic in the current
    /// service.
    fn explore_descriptors(&mut self) -> Vec<Action> {
        self.srv.state = State::DiscoveringDescriptors;
        let next = (self.srv.pending.as_mut())
            .and_then(DatabaseBuilder::next_descriptor_range_to_explore);
        match next {
            Some(r) => self.issue(Action::DiscoverDescriptors(r)),
            None => self.explore_next_service(),
        }
    }

    fn on_ext_props(
        &mut self,
        r: std::result::Result<Vec<u8>, TransportError>,
        n: usize,
    ) -> Vec<Action> {
        self.conn.request = Request::None;
        if self.srv.state != State::ReadingExtendedProperties {
            return Vec::new();
        }
        let v = match r {
            Ok(v) => v,
            Err(e) if e.is_not_supported() && !self.srv.read_multiple_not_supported => {
                warn!(
                    "{} on {}, using single reads",
                    Error::Unsupported("Read Multiple Variable"),
                    self.srv.addr
                );
                self.srv.read_multiple_not_supported = true;
                return self.explore_next_service();
            }
            Err(e) => return self.on_error(e),
        };
        if v.len() != 2 * n {
            error!(
                "Invalid Extended Properties response length: {} (expected {})",
                v.len(),
                2 * n
            );
            return self.on_error(TransportError::Malformed);
        }
        let v = v.as_slice();
        let mut p = v.unpack();
        let vals: SmallVec<[u16; 10]> = (0..n).map(|_| p.u16()).collect();
        if let Some(b) = self.srv.pending.as_mut() {
            if !b.set_value_of_descriptors(&vals) {
                warn!("Discarded Extended Properties of {}", self.srv.addr);
            }
        }
        self.explore_next_service()
    }

    fn on_hash(&mut self, r: std::result::Result<Vec<u8>, TransportError>) -> Vec<Action> {
        let svc_chg = self.conn.request == Request::ReadHashForServiceChanged;
        self.conn.request = Request::None;
        let remote = match r {
            Ok(v) => match <[u8; 16]>::try_from(v.as_slice()) {
                Ok(b) => u128::from_le_bytes(b),
                Err(_) => {
                    warn!("Invalid {} length: {}", Char::DatabaseHash, v.len());
                    return self.start_full();
                }
            },
            Err(e) => {
                debug!("{} read failed: {e}", Char::DatabaseHash);
                if !svc_chg && self.srv.bonded && self.load_by_identity() {
                    return self.complete(Ok(()));
                }
                return self.start_full();
            }
        };
        if !self.srv.db.is_empty() && self.srv.db.hash() == remote {
            info!("Database of {} is up to date ({remote:032X})", self.srv.addr);
            return self.complete(Ok(()));
        }
        match self.store.load_by_hash(remote).filter(|db| !db.is_empty()) {
            Some(db) => {
                info!("Using cached database {remote:032X} for {}", self.srv.addr);
                self.srv.db = Arc::new(db);
                if self.srv.bonded && !self.store.link_identity_to_hash(self.srv.addr, remote) {
                    warn!("{}", Error::Storage(format!("failed to link {}", self.srv.addr)));
                }
                self.complete(Ok(()))
            }
            None => self.start_full(),
        }
    }

    /// Handles a failed procedure. Database Out Of Sync restarts discovery
    /// up to the configured number of times.
    fn on_error(&mut self, e: TransportError) -> Vec<Action> {
        self.srv.pending = None;
        if !e.is_out_of_sync() {
            error!("Discovery of {} failed: {e}", self.srv.addr);
            return self.complete(Err(Error::Transport(e)));
        }
        if self.srv.retry < self.cfg.retry_limit {
            self.srv.retry += 1;
            warn!(
                "Database of {} changed during discovery, restarting ({}/{})",
                self.srv.addr, self.srv.retry, self.cfg.retry_limit
            );
            return self.start_full();
        }
        let attempts = self.srv.retry.saturating_add(1);
        error!("Database of {} is out of sync after {attempts} attempts", self.srv.addr);
        self.complete(Err(Error::DatabaseOutOfSync(attempts)))
    }

    /// Builds and persists the discovered database.
    fn finish(&mut self) -> Vec<Action> {
        let Some(b) = self.srv.pending.take() else {
            return Vec::new();
        };
        let db = b.build();
        let addr = self.srv.addr;
        info!("Discovered {} services of {addr}", db.services().len());
        if self.cfg.robust_caching {
            let hash = db.hash();
            if self.store.save_by_hash(hash, &db) {
                if self.srv.bonded && !self.store.link_identity_to_hash(addr, hash) {
                    warn!("{}", Error::Storage(format!("failed to link {addr}")));
                }
                self.store.evict(self.cfg.max_hash_entries);
            } else {
                warn!("{}", Error::Storage(format!("failed to save {hash:032X}")));
            }
        } else if self.srv.bonded && !self.store.save_by_identity(addr, &db) {
            warn!("{}", Error::Storage(format!("failed to save {addr}")));
        }
        self.srv.db = Arc::new(db);
        self.complete(Ok(()))
    }

    fn complete(&mut self, status: Result<()>) -> Vec<Action> {
        self.srv.state = State::Complete(status.clone());
        self.srv.pending = None;
        self.srv.outstanding = None;
        self.srv.driver = None;
        self.srv.retry = 0;
        self.conn.request = Request::None;
        self.conn.status = Some(status.clone());
        vec![Action::Complete(status)]
    }

    fn issue(&mut self, a: Action) -> Vec<Action> {
        self.srv.outstanding = Some(a.clone());
        vec![a]
    }

    fn load_by_identity(&mut self) -> bool {
        match self.store.load_by_identity(self.srv.addr).filter(|db| !db.is_empty()) {
            Some(db) => {
                info!("Loaded cached database of {}", self.srv.addr);
                self.srv.db = Arc::new(db);
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    fn builder(&self) -> Option<&DatabaseBuilder> {
        self.srv.pending.as_ref()
    }
}

#[cfg(test)]
mod tests;
