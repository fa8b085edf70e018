/// GATT client cache configuration.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
#[serde(default)]
pub struct Config {
    /// Enables Database Hash based cache validation.
    pub robust_caching: bool,
    /// Number of times discovery is restarted after a Database Out Of Sync
    /// error before giving up.
    pub retry_limit: u8,
    /// Maximum number of handles in one Read Multiple request.
    pub max_read_multiple: usize,
    /// Peers with a lower LMP version are assumed not to support robust
    /// caching.
    pub min_lmp_version: u8,
    /// Peers with a lower LMP version whose address prefix is listed in
    /// `interop_ouis` are assumed not to support robust caching.
    pub interop_lmp_version: u8,
    /// Organizationally unique identifiers of peers with broken Database Hash
    /// support.
    pub interop_ouis: Vec<[u8; 3]>,
    /// Maximum number of hash-keyed databases kept by a store.
    pub max_hash_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robust_caching: true,
            retry_limit: 2,
            max_read_multiple: 10,
            // Bluetooth 5.1
            min_lmp_version: 0x0A,
            // Bluetooth 5.3
            interop_lmp_version: 0x0C,
            interop_ouis: Vec::new(),
            max_hash_entries: 40,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial() {
        let c: Config = serde_json::from_str(r#"{"retry_limit": 5, "interop_ouis": [[0, 17, 34]]}"#)
            .unwrap();
        assert_eq!(c.retry_limit, 5);
        assert_eq!(c.interop_ouis, [[0x00, 0x11, 0x22]]);
        assert!(c.robust_caching);
        assert_eq!(c.max_read_multiple, 10);
    }
}
