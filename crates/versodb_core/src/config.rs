//! Store configuration.

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the store already exists.
    pub error_if_exists: bool,

    /// Whether to sync the ledger on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Sections added to the record file per grow when the free pool is empty.
    pub grow_sections: u32,

    /// Format version to use for new stores.
    pub format_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
            grow_sections: 8,
            format_version: 1,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the store exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to sync the ledger on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets how many sections are added per record-file grow.
    #[must_use]
    pub const fn grow_sections(mut self, count: u32) -> Self {
        self.grow_sections = count;
        self
    }

    /// Sets the format version stamped into new stores.
    #[must_use]
    pub const fn format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }
}
