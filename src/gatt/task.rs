use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::att::HandleRange;
use crate::gap::Uuid;

use super::*;

/// Client task request.
#[derive(Debug)]
enum Msg {
    Open(ConnId, Peer, oneshot::Sender<bool>),
    Close(ConnId, oneshot::Sender<Result<()>>),
    Discover(ConnId, oneshot::Sender<Result<()>>),
    ServiceChanged(ConnId, oneshot::Sender<Result<()>>),
    Refresh(ConnId, oneshot::Sender<Result<()>>),
    Event(ConnId, Event),
    View(ConnId, HandleRange, oneshot::Sender<Vec<Element>>),
    Search(ConnId, Option<Uuid>, oneshot::Sender<Vec<Service>>),
    Database(ConnId, oneshot::Sender<Option<Arc<Database>>>),
}

/// Handle to a [`Client`] running on its own task. Transport events may be
/// delivered from any task via [`ClientHandle::event`].
#[derive(Clone, Debug)]
pub struct ClientHandle(mpsc::UnboundedSender<Msg>);

/// Spawns a task that owns the client and processes requests in order. The
/// task terminates when all handles are dropped.
#[must_use]
pub fn spawn(c: Client) -> (ClientHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientHandle(tx), tokio::spawn(run(c, rx)))
}

async fn run(mut c: Client, mut rx: mpsc::UnboundedReceiver<Msg>) {
    while let Some(m) = rx.recv().await {
        // Send errors mean that the caller is no longer waiting
        match m {
            Msg::Open(id, peer, tx) => drop(tx.send(c.open(id, peer))),
            Msg::Close(id, tx) => drop(tx.send(c.close(id))),
            Msg::Discover(id, tx) => drop(tx.send(c.request_discovery(id))),
            Msg::ServiceChanged(id, tx) => drop(tx.send(c.service_changed(id))),
            Msg::Refresh(id, tx) => drop(tx.send(c.refresh(id))),
            Msg::Event(id, ev) => {
                if let Err(e) = c.handle_event(id, ev) {
                    debug!("Dropped event: {e}");
                }
            }
            Msg::View(id, hdls, tx) => drop(tx.send(c.services_view(id, hdls))),
            Msg::Search(id, uuid, tx) => drop(tx.send(c.search_services(id, uuid))),
            Msg::Database(id, tx) => drop(tx.send(c.database(id))),
        }
    }
    debug!("Client task terminated");
}

impl ClientHandle {
    /// Registers a new connection.
    pub async fn open(&self, id: ConnId, peer: Peer) -> Result<bool> {
        self.call(|tx| Msg::Open(id, peer, tx)).await
    }

    /// Closes a connection.
    pub async fn close(&self, id: ConnId) -> Result<()> {
        self.call(|tx| Msg::Close(id, tx)).await?
    }

    /// Requests discovery. Completion is reported via
    /// [`Profile::on_discovery_complete`].
    pub async fn request_discovery(&self, id: ConnId) -> Result<()> {
        self.call(|tx| Msg::Discover(id, tx)).await?
    }

    /// Handles a Service Changed indication.
    pub async fn service_changed(&self, id: ConnId) -> Result<()> {
        self.call(|tx| Msg::ServiceChanged(id, tx)).await?
    }

    /// Drops the cached database and runs full discovery.
    pub async fn refresh(&self, id: ConnId) -> Result<()> {
        self.call(|tx| Msg::Refresh(id, tx)).await?
    }

    /// Delivers a transport event without waiting for it to be processed.
    pub fn event(&self, id: ConnId, ev: Event) -> Result<()> {
        self.0.send(Msg::Event(id, ev)).map_err(|_| Error::Closed)
    }

    /// Returns cached services overlapping the handle range.
    pub async fn services_view(&self, id: ConnId, hdls: HandleRange) -> Result<Vec<Element>> {
        self.call(|tx| Msg::View(id, hdls, tx)).await
    }

    /// Returns cached services with the specified UUID.
    pub async fn search_services(&self, id: ConnId, uuid: Option<Uuid>) -> Result<Vec<Service>> {
        self.call(|tx| Msg::Search(id, uuid, tx)).await
    }

    /// Returns the cached database.
    pub async fn database(&self, id: ConnId) -> Result<Option<Arc<Database>>> {
        self.call(|tx| Msg::Database(id, tx)).await
    }

    async fn call<T>(&self, f: impl FnOnce(oneshot::Sender<T>) -> Msg) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.0.send(f(tx)).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}
