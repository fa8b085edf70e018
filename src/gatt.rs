//! Generic Attribute Profile client discovery and cache ([Vol 3] Part G).

pub use {
    client::*, config::*, consts::*, db::*, discovery::*, registry::*, store::*, support::*,
    task::*,
};

use crate::att::ErrorCode;

mod client;
mod config;
mod consts;
mod db;
mod discovery;
mod registry;
mod store;
mod support;
mod task;

/// Error type returned by the GATT client.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("database out of sync after {0} discovery attempts")]
    DatabaseOutOfSync(u8),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("inconsistent discovery result: {0}")]
    Inconsistent(String),
    #[error("cache storage failure: {0}")]
    Storage(String),
    #[error("unknown connection {0}")]
    UnknownConn(ConnId),
    #[error("client task terminated")]
    Closed,
}

/// Common GATT client result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Completion status of a transport procedure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("ATT procedure failed with {0}")]
    Att(ErrorCode),
    #[error("SDP search failed with status {0:#06X}")]
    Sdp(u16),
    #[error("connection terminated")]
    Disconnected,
    #[error("malformed response")]
    Malformed,
    #[error("request could not be issued")]
    NotIssued,
}

impl TransportError {
    /// Returns whether the server reported that the client's view of the
    /// database is stale ([Vol 3] Part G, Section 2.5.2.1).
    #[inline]
    #[must_use]
    pub const fn is_out_of_sync(self) -> bool {
        matches!(self, Self::Att(ErrorCode::DatabaseOutOfSync))
    }

    /// Returns whether the server does not support the request.
    #[inline]
    #[must_use]
    pub const fn is_not_supported(self) -> bool {
        matches!(self, Self::Att(ErrorCode::RequestNotSupported))
    }
}
