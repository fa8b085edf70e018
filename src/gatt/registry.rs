use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::att::{Handle, HandleRange};
use crate::le::Addr;

use super::*;

/// Opaque connection identifier assigned by the transport.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConnId(pub u16);

impl Display for ConnId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// Server block identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub(crate) struct ServerId(u32);

/// Physical transport of a connection.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Transport {
    /// LE transport using ATT primary service discovery.
    #[default]
    Le,
    /// BR/EDR transport using SDP to find ATT services.
    BrEdr,
}

/// Peer information provided when a connection is opened.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Peer {
    /// Identity address of the peer.
    pub addr: Addr,
    pub transport: Transport,
    /// Whether the peer is bonded (trusted).
    pub bonded: bool,
    /// Peer LMP version, if known.
    pub lmp_version: Option<u8>,
}

impl Peer {
    /// Creates peer information for an unbonded LE peer with unknown version.
    #[inline]
    #[must_use]
    pub const fn new(addr: Addr) -> Self {
        Self {
            addr,
            transport: Transport::Le,
            bonded: false,
            lmp_version: None,
        }
    }

    /// Sets the transport type.
    #[inline]
    #[must_use]
    pub const fn transport(mut self, t: Transport) -> Self {
        self.transport = t;
        self
    }

    /// Sets the bonded flag.
    #[inline]
    #[must_use]
    pub const fn bonded(mut self, bonded: bool) -> Self {
        self.bonded = bonded;
        self
    }

    /// Sets the peer LMP version.
    #[inline]
    #[must_use]
    pub const fn lmp_version(mut self, v: u8) -> Self {
        self.lmp_version = Some(v);
        self
    }
}

/// Read request outstanding on a connection during discovery.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Request {
    #[default]
    None,
    /// Read of `n` Extended Properties descriptors.
    ReadExtProps(usize),
    /// Database Hash read before discovery.
    ReadHash,
    /// Database Hash read after a Service Changed indication.
    ReadHashForServiceChanged,
}

/// Discovery requested while another discovery of the same peer was in
/// progress.
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Rerun {
    /// Service Changed indication. The Database Hash is read again.
    ServiceChanged,
    /// Refresh. Full discovery runs without consulting the cache.
    Full,
}

/// Per-connection state.
#[derive(Debug)]
#[non_exhaustive]
pub struct ClientConnectionBlock {
    pub id: ConnId,
    pub(crate) server: ServerId,
    pub transport: Transport,
    /// Outstanding discovery read.
    pub request: Request,
    /// Status of the last discovery requested on this connection.
    pub status: Option<Result<()>>,
    /// Whether this connection is waiting for discovery completion.
    pub(crate) waiting: bool,
}

/// Per-peer cache state shared by all connections to the same peer.
#[derive(Debug)]
#[non_exhaustive]
pub struct ServerCacheBlock {
    pub addr: Addr,
    /// Last completed database.
    pub db: Arc<Database>,
    pub state: State,
    /// Database under construction.
    pub(crate) pending: Option<DatabaseBuilder>,
    pub read_multiple_not_supported: bool,
    /// Number of discovery restarts caused by Database Out Of Sync errors.
    pub retry: u8,
    pub bonded: bool,
    pub lmp_version: Option<u8>,
    /// Attached connections in open order.
    pub(crate) conns: SmallVec<[ConnId; 2]>,
    /// Connection that issues discovery requests.
    pub(crate) driver: Option<ConnId>,
    /// Last transport request issued by the driver.
    pub(crate) outstanding: Option<Action>,
    /// Discovery to run after the current one completes.
    pub(crate) rerun: Option<Rerun>,
}

impl ServerCacheBlock {
    fn new(addr: Addr) -> Self {
        Self {
            addr,
            db: Arc::default(),
            state: State::Idle,
            pending: None,
            read_multiple_not_supported: false,
            retry: 0,
            bonded: false,
            lmp_version: None,
            conns: SmallVec::new(),
            driver: None,
            outstanding: None,
            rerun: None,
        }
    }

    /// Returns whether discovery is in progress.
    #[inline]
    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.state.in_flight()
    }

    /// Returns the connections attached to this server.
    #[inline(always)]
    #[must_use]
    pub fn conns(&self) -> &[ConnId] {
        &self.conns
    }
}

/// Result of closing a connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Closed {
    /// Connection was not driving discovery.
    Detached { waiting: bool },
    /// Discovery was moved to another connection, which must re-issue the
    /// outstanding request.
    Transferred {
        waiting: bool,
        to: ConnId,
        outstanding: Option<Action>,
    },
    /// Discovery of the last connection was abandoned.
    Abandoned { waiting: bool },
}

/// Maps connection identifiers to connection and server blocks. A server block
/// exists while the peer has at least one open connection. The cache store
/// keeps the database across reconnections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: HashMap<ConnId, ClientConnectionBlock>,
    servers: HashMap<ServerId, ServerCacheBlock>,
    by_addr: HashMap<Addr, ServerId>,
    next_server: u32,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection. Returns `false` if the identifier is
    /// already in use.
    pub fn open(&mut self, id: ConnId, peer: Peer) -> bool {
        if self.conns.contains_key(&id) {
            warn!("Connection {id} is already open");
            return false;
        }
        let sid = match self.by_addr.get(&peer.addr) {
            Some(&sid) => sid,
            None => {
                let sid = ServerId(self.next_server);
                self.next_server = self.next_server.wrapping_add(1);
                self.by_addr.insert(peer.addr, sid);
                self.servers.insert(sid, ServerCacheBlock::new(peer.addr));
                sid
            }
        };
        let Some(srv) = self.servers.get_mut(&sid) else {
            return false;
        };
        srv.bonded = peer.bonded;
        if peer.lmp_version.is_some() {
            srv.lmp_version = peer.lmp_version;
        }
        srv.conns.push(id);
        self.conns.insert(
            id,
            ClientConnectionBlock {
                id,
                server: sid,
                transport: peer.transport,
                request: Request::None,
                status: None,
                waiting: false,
            },
        );
        debug!("Opened connection {id} to {}", peer.addr);
        true
    }

    /// Removes a connection and detaches it from its server block. Discovery
    /// driven by this connection is moved to another connection to the same
    /// peer or abandoned if there are none. The server block is released with
    /// the last connection.
    pub(crate) fn close(&mut self, id: ConnId) -> Option<Closed> {
        let conn = self.conns.remove(&id)?;
        let srv = self.servers.get_mut(&conn.server)?;
        srv.conns.retain(|&mut c| c != id);
        let waiting = conn.waiting;
        let closed = if srv.driver != Some(id) {
            Closed::Detached { waiting }
        } else if let Some(&to) = srv.conns.first() {
            debug!("Moving discovery of {} from {id} to {to}", srv.addr);
            srv.driver = Some(to);
            if let Some(next) = self.conns.get_mut(&to) {
                next.request = conn.request;
            }
            return Some(Closed::Transferred {
                waiting,
                to,
                outstanding: srv.outstanding.clone(),
            });
        } else {
            debug!("Abandoning discovery of {}", srv.addr);
            Closed::Abandoned { waiting }
        };
        if srv.conns.is_empty() {
            let addr = srv.addr;
            debug!("Releasing server block of {addr}");
            self.servers.remove(&conn.server);
            self.by_addr.remove(&addr);
        }
        Some(closed)
    }

    /// Returns the connection block.
    #[inline]
    #[must_use]
    pub fn find(&self, id: ConnId) -> Option<&ClientConnectionBlock> {
        self.conns.get(&id)
    }

    /// Returns the server block of a connection.
    #[inline]
    #[must_use]
    pub fn find_server(&self, id: ConnId) -> Option<&ServerCacheBlock> {
        self.servers.get(&self.conns.get(&id)?.server)
    }

    /// Returns the server block of a connected peer.
    #[inline]
    #[must_use]
    pub fn find_server_by_addr(&self, addr: Addr) -> Option<&ServerCacheBlock> {
        self.servers.get(self.by_addr.get(&addr)?)
    }

    /// Returns mutable connection and server blocks.
    pub(crate) fn blocks_mut(
        &mut self,
        id: ConnId,
    ) -> Option<(&mut ClientConnectionBlock, &mut ServerCacheBlock)> {
        let conn = self.conns.get_mut(&id)?;
        let srv = self.servers.get_mut(&conn.server)?;
        Some((conn, srv))
    }

    /// Returns a mutable connection block.
    pub(crate) fn conn_mut(&mut self, id: ConnId) -> Option<&mut ClientConnectionBlock> {
        self.conns.get_mut(&id)
    }

    /// Returns the last completed database for a connection.
    #[inline]
    #[must_use]
    pub fn database(&self, id: ConnId) -> Option<Arc<Database>> {
        self.find_server(id).map(|s| Arc::clone(&s.db))
    }

    /// Returns cached services overlapping the handle range as flat elements.
    /// The result is empty while discovery is in progress.
    #[must_use]
    pub fn services_view(&self, id: ConnId, hdls: HandleRange) -> Vec<Element> {
        match self.find_server(id) {
            Some(s) if !s.in_flight() => s.db.view(hdls),
            _ => Vec::new(),
        }
    }

    /// Returns the cached characteristic with the specified value handle.
    #[must_use]
    pub fn characteristic(&self, id: ConnId, hdl: Handle) -> Option<&Characteristic> {
        self.find_server(id)?.db.characteristic(hdl)
    }

    /// Returns the cached descriptor with the specified handle.
    #[must_use]
    pub fn descriptor(&self, id: ConnId, hdl: Handle) -> Option<&Descriptor> {
        self.find_server(id)?.db.descriptor(hdl)
    }

    /// Returns the cached characteristic that owns a value or descriptor
    /// handle.
    #[must_use]
    pub fn owning_characteristic(&self, id: ConnId, hdl: Handle) -> Option<&Characteristic> {
        self.find_server(id)?.db.owning_characteristic(hdl)
    }
}
