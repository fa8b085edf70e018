//! File system storage backend.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use std::{fs, io};

use tracing::{debug, error, warn};

use crate::gatt::{CacheStore, Config, Database};
use crate::le::Addr;

/// GATT client database store in a file system directory. Each peer identity
/// and each database hash is stored in its own file.
#[derive(Clone, Debug)]
pub struct DirStore(Dir);

impl DirStore {
    const NAME: &'static str = "gattc";

    /// Creates or opens a database store in the specified root directory.
    #[inline(always)]
    #[must_use]
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self(Dir::open(root, Self::NAME))
    }

    /// Creates or opens a database store in the current user's local data
    /// directory. Returns `None` if the directory cannot be determined.
    #[must_use]
    pub fn per_user(app: impl AsRef<Path>) -> Option<Self> {
        Dir::per_user(app, Self::NAME).map(Self)
    }

    /// Returns the store directory.
    #[inline(always)]
    #[must_use]
    pub fn path(&self) -> &Path {
        &(self.0).0
    }

    /// Returns the hashes of all stored databases.
    #[must_use]
    pub fn hashes(&self) -> Vec<u128> {
        self.0.files(Hash::PREFIX).into_iter().map(|(h, _)| h).collect()
    }
}

/// Identity file contents.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
enum Entry {
    Link { link: String },
    Db(Database),
}

impl CacheStore for DirStore {
    fn load_by_identity(&self, peer: Addr) -> Option<Database> {
        match self.0.load(&Identity(peer))? {
            Entry::Db(db) => Some(db),
            Entry::Link { link } => match u128::from_str_radix(&link, 16) {
                Ok(hash) => self.load_by_hash(hash),
                Err(e) => {
                    error!("Invalid database link for {peer}: {link} ({e})");
                    None
                }
            },
        }
    }

    #[inline]
    fn save_by_identity(&self, peer: Addr, db: &Database) -> bool {
        self.0.save(&Identity(peer), &Entry::Db(db.clone()))
    }

    #[inline]
    fn load_by_hash(&self, hash: u128) -> Option<Database> {
        self.0.load(&Hash(hash))
    }

    #[inline]
    fn save_by_hash(&self, hash: u128, db: &Database) -> bool {
        self.0.save(&Hash(hash), db)
    }

    fn link_identity_to_hash(&self, peer: Addr, hash: u128) -> bool {
        if !self.0.path(&Hash(hash)).exists() {
            debug!("Cannot link {peer} to missing database {hash:032X}");
            return false;
        }
        let link = format!("{hash:032X}");
        self.0.save(&Identity(peer), &Entry::Link { link })
    }

    #[inline]
    fn remove(&self, peer: Addr) {
        self.0.remove(&Identity(peer));
    }

    #[inline]
    fn clear(&self) {
        self.0.clear();
    }

    fn evict(&self, max: usize) {
        let mut old = self.0.files(Hash::PREFIX);
        if old.len() <= max {
            return;
        }
        let mut linked = Vec::new();
        for p in self.0.identity_files() {
            if let Some(Entry::Link { link }) = self.0.load_path(&p) {
                linked.extend(u128::from_str_radix(&link, 16).ok());
            }
        }
        let n = old.len() - max;
        old.retain(|(h, _)| !linked.contains(h));
        old.sort_unstable_by_key(|&(_, t)| t);
        for (h, _) in old.into_iter().take(n) {
            debug!("Evicting database {h:032X}");
            self.0.remove(&Hash(h));
        }
    }
}

/// Loads client configuration from a JSON file.
#[must_use]
pub fn load_config(path: impl AsRef<Path>) -> Option<Config> {
    let path = path.as_ref();
    let s = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to read: {} ({e})", path.display());
            return None;
        }
    };
    serde_json::from_str(&s)
        .map_err(|e| error!("Invalid configuration: {} ({e})", path.display()))
        .ok()
}

/// Store file name.
trait FileName {
    fn file_name(&self) -> String;
}

/// Identity file name.
struct Identity(Addr);

impl FileName for Identity {
    fn file_name(&self) -> String {
        let typ = match self.0 {
            Addr::Public(_) => 'P',
            Addr::Random(_) => 'R',
        };
        let raw = self.0.raw();
        let raw = raw.as_le_bytes();
        format!(
            "{typ}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            raw[5], raw[4], raw[3], raw[2], raw[1], raw[0]
        )
    }
}

/// Hash file name.
struct Hash(u128);

impl Hash {
    const PREFIX: &'static str = "H-";
}

impl FileName for Hash {
    fn file_name(&self) -> String {
        format!("{}{:032X}", Self::PREFIX, self.0)
    }
}

/// Database in a file system directory.
#[derive(Clone, Debug)]
#[repr(transparent)]
struct Dir(PathBuf);

impl Dir {
    /// Creates or opens a database store in the specified root directory.
    #[inline(always)]
    #[must_use]
    fn open(root: impl AsRef<Path>, name: impl AsRef<Path>) -> Self {
        Self(root.as_ref().join(name))
    }

    /// Creates or opens a database store in the current user's local data
    /// directory.
    #[must_use]
    fn per_user(app: impl AsRef<Path>, name: impl AsRef<Path>) -> Option<Self> {
        let Some(dir) = dirs::data_local_dir() else {
            error!("User data directory not available");
            return None;
        };
        Some(Self(dir.join(app.as_ref()).join(name)))
    }

    /// Saves data to the file system.
    fn save(&self, f: &impl FileName, v: &impl serde::ser::Serialize) -> bool {
        let s = match serde_json::to_string_pretty(v) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to serialize {} ({e})", f.file_name());
                return false;
            }
        };
        if let Err(e) = fs::create_dir_all(&self.0) {
            warn!(
                "Failed to create database directory: {} ({e})",
                self.0.display()
            );
        }
        // Write to a temporary file first so that readers never see a
        // partially written database
        let path = self.path(f);
        let tmp = path.with_extension("tmp");
        match fs::write(&tmp, s).and_then(|_| fs::rename(&tmp, &path)) {
            Ok(_) => {
                debug!("Wrote: {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to write: {} ({e})", path.display());
                false
            }
        }
    }

    /// Loads data from the file system.
    #[inline]
    fn load<T: serde::de::DeserializeOwned>(&self, f: &impl FileName) -> Option<T> {
        self.load_path(&self.path(f))
    }

    fn load_path<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let s = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => return None,
            Err(e) => {
                error!("Failed to read: {} ({e})", path.display());
                return None;
            }
        };
        serde_json::from_str(&s)
            .map_err(|e| error!("Invalid file contents: {} ({e})", path.display()))
            .ok()
    }

    /// Removes data from the file system.
    fn remove(&self, f: &impl FileName) {
        let path = self.path(f);
        match fs::remove_file(&path) {
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => {}
            Err(e) => error!("Failed to remove: {} ({e})", path.display()),
        }
    }

    /// Removes all data from the file system.
    fn clear(&self) {
        match fs::remove_dir_all(&self.0) {
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => {}
            Err(e) => error!("Failed to remove: {} ({e})", self.0.display()),
        }
    }

    /// Returns hashes and modification times of hash files.
    fn files(&self, prefix: &str) -> Vec<(u128, SystemTime)> {
        let mut v = Vec::new();
        for e in self.entries() {
            let name = e.file_name();
            let Some(hex) = name.to_str().and_then(|s| s.strip_prefix(prefix)) else {
                continue;
            };
            let Ok(h) = u128::from_str_radix(hex, 16) else {
                continue;
            };
            let t = e.metadata().and_then(|m| m.modified());
            v.push((h, t.unwrap_or(SystemTime::UNIX_EPOCH)));
        }
        v
    }

    /// Returns the paths of all identity files.
    fn identity_files(&self) -> Vec<PathBuf> {
        (self.entries().into_iter())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_str().unwrap_or_default();
                name.len() == 14 && (name.starts_with("P-") || name.starts_with("R-"))
            })
            .map(|e| e.path())
            .collect()
    }

    fn entries(&self) -> Vec<fs::DirEntry> {
        match fs::read_dir(&self.0) {
            Ok(it) => it.filter_map(std::result::Result::ok).collect(),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Vec::new(),
            Err(e) => {
                error!("Failed to read: {} ({e})", self.0.display());
                Vec::new()
            }
        }
    }

    /// Returns the file path for the specified name.
    #[inline]
    fn path(&self, f: &impl FileName) -> PathBuf {
        self.0.join(f.file_name())
    }
}
