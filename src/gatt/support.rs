use tracing::{debug, warn};

use crate::gap::{Characteristic, Service};
use crate::le::Addr;

use super::{Config, Database};

/// Peer support for robust caching ([Vol 3] Part G, Section 2.5.2.1).
#[allow(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RobustCaching {
    /// The peer exposes the Database Hash characteristic.
    Supported,
    /// The peer is known not to support it or the feature is disabled.
    Unsupported,
    /// Support can only be determined by reading the Database Hash.
    Unknown,
}

impl RobustCaching {
    /// Returns whether the Database Hash should be read before discovery.
    #[inline]
    #[must_use]
    pub const fn read_hash(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Classifies robust caching support of a peer from the last discovered
/// database, its LMP version ([Assigned Numbers] Section 2.1), and its
/// address. An unknown LMP version is treated as the lowest one.
#[must_use]
pub fn robust_caching_support(
    cfg: &Config,
    db: &Database,
    lmp_version: Option<u8>,
    addr: Addr,
) -> RobustCaching {
    if !cfg.robust_caching {
        debug!("Robust caching is disabled");
        return RobustCaching::Unsupported;
    }
    if !db.is_empty() {
        // A server that adds the characteristic later will also indicate
        // Service Changed, so there is no need to probe for it.
        return if db.has_database_hash() {
            debug!("{} has {}", Service::GenericAttribute, Characteristic::DatabaseHash);
            RobustCaching::Supported
        } else {
            debug!("{} has no {}", Service::GenericAttribute, Characteristic::DatabaseHash);
            RobustCaching::Unsupported
        };
    }
    let lmp = lmp_version.unwrap_or_else(|| {
        warn!("Unknown LMP version for {addr}");
        0
    });
    if lmp < cfg.min_lmp_version {
        warn!("{addr} LMP version {lmp:#04X} does not support robust caching");
        return RobustCaching::Unsupported;
    }
    if lmp < cfg.interop_lmp_version && cfg.interop_ouis.contains(&addr.raw().oui()) {
        warn!("{addr} LMP version {lmp:#04X} is on the robust caching interop list");
        return RobustCaching::Unsupported;
    }
    RobustCaching::Unknown
}
