//! Store configuration.

/// Configuration for opening a [`MetadataStore`](crate::MetadataStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Number of journal records after which the journal is compacted
    /// into a single snapshot (0 = never compact automatically).
    pub compact_after: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            compact_after: 1024,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_after(mut self, records: u64) -> Self {
        self.compact_after = records;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.compact_after, 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .compact_after(8);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.compact_after, 8);
    }
}
