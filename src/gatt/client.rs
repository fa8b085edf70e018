use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::att::{Handle, HandleRange};
use crate::gap::Uuid;
use crate::le::Addr;

use super::*;

/// Result of issuing a transport request. An error means that the request
/// was not sent and no completion event will follow.
pub type IssueResult = std::result::Result<(), TransportError>;

/// ATT and SDP procedures used by discovery. Results are delivered
/// asynchronously via [`Client::handle_event`].
pub trait TransportAdapter: Debug + Send + Sync {
    /// Discover All Primary Services ([Vol 3] Part G, Section 4.4.1).
    fn discover_primary_services(&self, conn: ConnId, hdls: HandleRange) -> IssueResult;

    /// Find Included Services ([Vol 3] Part G, Section 4.5.1).
    fn discover_included_services(&self, conn: ConnId, hdls: HandleRange) -> IssueResult;

    /// Discover All Characteristics of a Service ([Vol 3] Part G, Section
    /// 4.6.1).
    fn discover_characteristics(&self, conn: ConnId, hdls: HandleRange) -> IssueResult;

    /// Discover All Characteristic Descriptors ([Vol 3] Part G, Section
    /// 4.7.1).
    fn discover_descriptors(&self, conn: ConnId, hdls: HandleRange) -> IssueResult;

    /// Read Characteristic Value or Descriptor ([Vol 3] Part G, Section
    /// 4.8.1).
    fn read_by_handle(&self, conn: ConnId, hdl: Handle) -> IssueResult;

    /// Read Using Characteristic UUID ([Vol 3] Part G, Section 4.8.2).
    fn read_by_type(&self, conn: ConnId, hdls: HandleRange, uuid: Uuid) -> IssueResult;

    /// Read Multiple Variable Length Characteristic Values ([Vol 3] Part G,
    /// Section 4.8.5). Values of 2-byte descriptors are concatenated.
    fn read_multiple(&self, conn: ConnId, hdls: &[Handle]) -> IssueResult;

    /// SDP service search attribute request ([Vol 3] Part B, Section 4.7).
    fn service_search_attribute_request(&self, peer: Addr, uuid: Uuid, attrs: &[u16]) -> IssueResult;
}

/// Receiver of discovery completion notifications.
pub trait Profile: Debug + Send + Sync {
    /// Called once for each connection that requested discovery.
    fn on_discovery_complete(&self, conn: ConnId, status: Result<()>);
}

/// GATT client discovery engine. All operations are synchronous and must be
/// called from a single task. See [`spawn`] for an asynchronous wrapper.
#[derive(Debug)]
pub struct Client {
    reg: ConnectionRegistry,
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn TransportAdapter>,
    profile: Arc<dyn Profile>,
    cfg: Config,
}

impl Client {
    /// Creates a new client.
    #[must_use]
    pub fn new(
        cfg: Config,
        store: Arc<dyn CacheStore>,
        transport: Arc<dyn TransportAdapter>,
        profile: Arc<dyn Profile>,
    ) -> Self {
        Self {
            reg: ConnectionRegistry::new(),
            store,
            transport,
            profile,
            cfg,
        }
    }

    /// Returns the client configuration.
    #[inline(always)]
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.cfg
    }

    /// Returns the connection registry.
    #[inline(always)]
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.reg
    }

    /// Registers a new connection.
    pub fn open(&mut self, id: ConnId, peer: Peer) -> bool {
        self.reg.open(id, peer)
    }

    /// Closes a connection. Discovery driven by this connection continues on
    /// another connection to the same peer or is abandoned.
    pub fn close(&mut self, id: ConnId) -> Result<()> {
        let (waiting, reissue) = match self.reg.close(id).ok_or(Error::UnknownConn(id))? {
            Closed::Detached { waiting } | Closed::Abandoned { waiting } => (waiting, None),
            Closed::Transferred {
                waiting,
                to,
                outstanding,
            } => (waiting, outstanding.map(|a| (to, a))),
        };
        if waiting {
            (self.profile).on_discovery_complete(id, Err(TransportError::Disconnected.into()));
        }
        if let Some((to, a)) = reissue {
            debug!("Re-issuing {a:?} on {to}");
            self.run(to, vec![a]);
        }
        Ok(())
    }

    /// Requests discovery on a connection. If discovery for the same peer is
    /// already in progress, the connection is notified when it completes.
    pub fn request_discovery(&mut self, id: ConnId) -> Result<()> {
        self.start(id, false, false)
    }

    /// Handles a Service Changed indication. The Database Hash is read again
    /// and the identity cache is not used.
    pub fn service_changed(&mut self, id: ConnId) -> Result<()> {
        self.start(id, true, false)
    }

    /// Drops the cached database of the connected peer and runs full
    /// discovery.
    pub fn refresh(&mut self, id: ConnId) -> Result<()> {
        let (_, srv) = self.reg.blocks_mut(id).ok_or(Error::UnknownConn(id))?;
        debug!("Refreshing database of {}", srv.addr);
        srv.db = Arc::default();
        self.store.remove(srv.addr);
        self.start(id, true, true)
    }

    /// Handles a transport event for the connection.
    pub fn handle_event(&mut self, id: ConnId, ev: Event) -> Result<()> {
        let (_, srv) = self.reg.blocks_mut(id).ok_or(Error::UnknownConn(id))?;
        if srv.driver != Some(id) {
            trace!("Ignoring {ev:?} on {id}");
            return Ok(());
        }
        let actions = self.driver(id).map(|mut d| d.handle(ev)).unwrap_or_default();
        self.run(id, actions);
        Ok(())
    }

    /// Returns the cached database of the connected peer.
    #[must_use]
    pub fn database(&self, id: ConnId) -> Option<Arc<Database>> {
        self.reg.database(id)
    }

    /// Returns cached services overlapping the handle range. The result is
    /// empty while discovery is in progress.
    #[must_use]
    pub fn services_view(&self, id: ConnId, hdls: HandleRange) -> Vec<Element> {
        self.reg.services_view(id, hdls)
    }

    /// Returns cached services with the specified UUID or all services if
    /// `uuid` is `None`.
    #[must_use]
    pub fn search_services(&self, id: ConnId, uuid: Option<Uuid>) -> Vec<Service> {
        self.reg.database(id).map_or_else(Vec::new, |db| db.search(uuid).cloned().collect())
    }

    /// Returns the cached characteristic with the specified value handle.
    #[must_use]
    pub fn characteristic(&self, id: ConnId, hdl: Handle) -> Option<Characteristic> {
        self.reg.characteristic(id, hdl).cloned()
    }

    /// Returns the cached descriptor with the specified handle.
    #[must_use]
    pub fn descriptor(&self, id: ConnId, hdl: Handle) -> Option<Descriptor> {
        self.reg.descriptor(id, hdl).cloned()
    }

    /// Returns the cached characteristic that owns a value or descriptor
    /// handle.
    #[must_use]
    pub fn owning_characteristic(&self, id: ConnId, hdl: Handle) -> Option<Characteristic> {
        self.reg.owning_characteristic(id, hdl).cloned()
    }

    fn start(&mut self, id: ConnId, svc_chg: bool, full: bool) -> Result<()> {
        let (conn, srv) = self.reg.blocks_mut(id).ok_or(Error::UnknownConn(id))?;
        conn.waiting = true;
        if srv.in_flight() {
            debug!("Discovery of {} is already in progress", srv.addr);
            let next = match (svc_chg, full) {
                (_, true) => Some(Rerun::Full),
                (true, false) => Some(Rerun::ServiceChanged),
                (false, false) => None,
            };
            srv.rerun = srv.rerun.max(next);
            return Ok(());
        }
        let actions = self.driver(id).map_or_else(Vec::new, |mut d| {
            if full {
                d.start_full()
            } else {
                d.start(svc_chg)
            }
        });
        self.run(id, actions);
        Ok(())
    }

    fn driver(&mut self, id: ConnId) -> Option<Driver<'_>> {
        let (conn, srv) = self.reg.blocks_mut(id)?;
        Some(Driver {
            conn,
            srv,
            store: &*self.store,
            cfg: &self.cfg,
        })
    }

    /// Issues driver actions until discovery waits for a transport event or
    /// completes.
    fn run(&mut self, id: ConnId, actions: Vec<Action>) {
        let mut q = VecDeque::from(actions);
        while let Some(a) = q.pop_front() {
            let r = match a {
                Action::DiscoverPrimaryServices(r) => self.transport.discover_primary_services(id, r),
                Action::DiscoverIncludedServices(r) => self.transport.discover_included_services(id, r),
                Action::DiscoverCharacteristics(r) => self.transport.discover_characteristics(id, r),
                Action::DiscoverDescriptors(r) => self.transport.discover_descriptors(id, r),
                Action::ReadByHandle(h) => self.transport.read_by_handle(id, h),
                Action::ReadByType(r, uuid) => self.transport.read_by_type(id, r, uuid),
                Action::ReadMultiple(ref hdls) => self.transport.read_multiple(id, hdls),
                Action::SdpSearch { peer, uuid, ref attrs } => {
                    self.transport.service_search_attribute_request(peer, uuid, attrs)
                }
                Action::Complete(status) => {
                    self.notify(id, &status);
                    continue;
                }
            };
            let Err(e) = r else { continue };
            warn!("Failed to issue {a:?} on {id}: {e}");
            if let Some(ev) = a.failed(e) {
                q.extend(self.driver(id).map(|mut d| d.handle(ev)).unwrap_or_default());
            }
        }
    }

    /// Notifies all waiting connections to the peer and starts any discovery
    /// requested while the last one was in progress.
    fn notify(&mut self, id: ConnId, status: &Result<()>) {
        let Some(srv) = self.reg.find_server(id) else {
            return;
        };
        let conns: Vec<ConnId> = srv.conns().to_vec();
        let rerun = self.reg.blocks_mut(id).and_then(|(_, s)| s.rerun.take());
        let mut waiting = Vec::with_capacity(conns.len());
        for c in conns {
            if let Some(cb) = self.reg.conn_mut(c) {
                if cb.waiting && rerun.is_none() {
                    cb.waiting = false;
                    cb.status = Some(status.clone());
                    waiting.push(c);
                }
            }
        }
        for c in waiting {
            self.profile.on_discovery_complete(c, status.clone());
        }
        if let Some(rerun) = rerun {
            debug!("Restarting discovery on {id} ({rerun:?})");
            let actions = self.driver(id).map_or_else(Vec::new, |mut d| match rerun {
                Rerun::ServiceChanged => d.start(true),
                Rerun::Full => d.start_full(),
            });
            self.run(id, actions);
        }
    }
}
