use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::le::Addr;

use super::Database;

/// Persistent storage for discovered databases. Databases are saved either by
/// peer identity or by their hash, and an identity may be linked to a hash so
/// that peers with identical databases share one copy.
///
/// Save and link operations return `false` on failure. Failures are not
/// propagated to the discovery procedure because they only degrade caching.
pub trait CacheStore: Debug + Send + Sync {
    /// Loads the database saved for or linked to the specified peer.
    #[must_use]
    fn load_by_identity(&self, peer: Addr) -> Option<Database>;

    /// Saves the database for the specified peer, replacing any link.
    fn save_by_identity(&self, peer: Addr, db: &Database) -> bool;

    /// Loads the database with the specified hash.
    #[must_use]
    fn load_by_hash(&self, hash: u128) -> Option<Database>;

    /// Saves a database under its hash.
    fn save_by_hash(&self, hash: u128, db: &Database) -> bool;

    /// Makes `load_by_identity(peer)` return the database saved under `hash`.
    fn link_identity_to_hash(&self, peer: Addr, hash: u128) -> bool;

    /// Removes the database or link of the specified peer.
    fn remove(&self, peer: Addr);

    /// Removes all saved data.
    fn clear(&self);

    /// Removes the oldest hash-keyed databases that are not linked to any peer
    /// until at most `max` remain.
    fn evict(&self, max: usize);
}

/// Identity-keyed entry.
#[derive(Clone, Debug)]
enum Entry {
    Db(Database),
    Link(u128),
}

/// In-memory [`CacheStore`] that does not survive process restarts.
#[derive(Debug, Default)]
pub struct MemStore(Mutex<Mem>);

#[derive(Debug, Default)]
struct Mem {
    ids: HashMap<Addr, Entry>,
    /// Hash-keyed databases with their insertion sequence number.
    hashes: HashMap<u128, (u64, Database)>,
    seq: u64,
}

impl MemStore {
    /// Creates an empty store.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemStore {
    fn load_by_identity(&self, peer: Addr) -> Option<Database> {
        let m = self.0.lock();
        match *m.ids.get(&peer)? {
            Entry::Db(ref db) => Some(db.clone()),
            Entry::Link(hash) => m.hashes.get(&hash).map(|(_, db)| db.clone()),
        }
    }

    fn save_by_identity(&self, peer: Addr, db: &Database) -> bool {
        trace!("Saving database for {peer}");
        self.0.lock().ids.insert(peer, Entry::Db(db.clone()));
        true
    }

    fn load_by_hash(&self, hash: u128) -> Option<Database> {
        (self.0.lock().hashes.get(&hash)).map(|(_, db)| db.clone())
    }

    fn save_by_hash(&self, hash: u128, db: &Database) -> bool {
        trace!("Saving database {hash:032X}");
        let mut m = self.0.lock();
        m.seq += 1;
        let seq = m.seq;
        m.hashes.insert(hash, (seq, db.clone()));
        true
    }

    fn link_identity_to_hash(&self, peer: Addr, hash: u128) -> bool {
        let mut m = self.0.lock();
        if !m.hashes.contains_key(&hash) {
            debug!("Cannot link {peer} to missing database {hash:032X}");
            return false;
        }
        m.ids.insert(peer, Entry::Link(hash));
        true
    }

    fn remove(&self, peer: Addr) {
        self.0.lock().ids.remove(&peer);
    }

    fn clear(&self) {
        let mut m = self.0.lock();
        m.ids.clear();
        m.hashes.clear();
    }

    fn evict(&self, max: usize) {
        let mut m = self.0.lock();
        if m.hashes.len() <= max {
            return;
        }
        let linked: Vec<u128> = (m.ids.values())
            .filter_map(|e| match *e {
                Entry::Link(h) => Some(h),
                Entry::Db(_) => None,
            })
            .collect();
        let mut old: Vec<(u64, u128)> = (m.hashes.iter())
            .filter(|&(h, _)| !linked.contains(h))
            .map(|(&h, &(seq, _))| (seq, h))
            .collect();
        old.sort_unstable();
        let n = m.hashes.len() - max;
        for (_, h) in old.into_iter().take(n) {
            debug!("Evicting database {h:032X}");
            m.hashes.remove(&h);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::att::Handle;
    use crate::gap::Service;
    use crate::gatt::DatabaseBuilder;
    use crate::le::RawAddr;

    use super::*;

    const PEER: Addr = Addr::Public(RawAddr::from_le_bytes([0x55, 0x44, 0x33, 0x22, 0x11, 0x00]));

    fn db(end: u16) -> Database {
        let h = |v| Handle::new(v).unwrap();
        let mut b = DatabaseBuilder::new();
        (b.add_service(h(1), h(end), Service::Battery.uuid(), true)).unwrap();
        b.build()
    }

    #[test]
    fn hash_round_trip() {
        let s = MemStore::new();
        let d = db(5);
        assert!(s.save_by_hash(d.hash(), &d));
        assert_eq!(s.load_by_hash(d.hash()).unwrap().hash(), d.hash());
        assert!(s.load_by_hash(!d.hash()).is_none());
    }

    #[test]
    fn identity_link() {
        let s = MemStore::new();
        let (a, b) = (db(5), db(6));
        assert!(s.load_by_identity(PEER).is_none());
        assert!(!s.link_identity_to_hash(PEER, a.hash()));

        assert!(s.save_by_identity(PEER, &a));
        assert_eq!(s.load_by_identity(PEER), Some(a));

        assert!(s.save_by_hash(b.hash(), &b));
        assert!(s.link_identity_to_hash(PEER, b.hash()));
        assert_eq!(s.load_by_identity(PEER), Some(b.clone()));

        s.remove(PEER);
        assert!(s.load_by_identity(PEER).is_none());
        assert_eq!(s.load_by_hash(b.hash()), Some(b));
        s.clear();
        assert!(s.load_by_hash(db(6).hash()).is_none());
    }

    #[test]
    fn evict() {
        let s = MemStore::new();
        let v: Vec<_> = (2..=6).map(db).collect();
        for d in &v {
            assert!(s.save_by_hash(d.hash(), d));
        }
        assert!(s.link_identity_to_hash(PEER, v[0].hash()));
        s.evict(3);
        assert!(s.load_by_hash(v[0].hash()).is_some());
        assert!(s.load_by_hash(v[1].hash()).is_none());
        assert!(s.load_by_hash(v[2].hash()).is_none());
        assert!(s.load_by_hash(v[3].hash()).is_some());
        assert!(s.load_by_hash(v[4].hash()).is_some());
        s.evict(0);
        assert!(s.load_by_identity(PEER).is_some());
        assert!(s.load_by_hash(v[4].hash()).is_none());
    }
}
