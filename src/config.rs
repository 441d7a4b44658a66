use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Summary store settings (node level)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Documents kept in the summary read cache; 0 disables the cache
    pub cache_max_docs: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            cache_max_docs: 1024,
        }
    }
}

/// Text index settings (node level)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub lowercase: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            min_token_length: 1,
            max_token_length: 64,
        }
    }
}

/// Flush aggressiveness profiles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushProfile {
    /// Flush every target after each batch; shortest replay
    Eager,
    Balanced,
    /// Let change logs grow; cheapest feed
    Lazy,
}

impl FlushProfile {
    /// Unflushed bytes at which a target is picked by `flush_if_needed`
    pub fn flush_threshold_bytes(&self) -> u64 {
        match self {
            FlushProfile::Eager => 0,
            FlushProfile::Balanced => 4 * 1024 * 1024,
            FlushProfile::Lazy => 64 * 1024 * 1024,
        }
    }
}

/// Configuration for one document database
#[derive(Clone, Debug)]
pub struct DocDbConfig {
    pub name: String,
    pub data_dir: PathBuf,
    pub distribution_key: u32,
    /// Whether destructive cleanup (tlog prune, history wipe) is permitted
    pub allow_prune: bool,
    /// Threads used for parallel sub-database initialization and flush
    pub worker_threads: usize,
    pub flush_profile: FlushProfile,
    pub summary: SummaryConfig,
    pub index: IndexConfig,
    /// Name of the index manager factory the ready sub-database uses
    pub index_factory: String,
    /// Run reprocessing on a background worker after startup
    pub background_reprocessing: bool,
}

impl Default for DocDbConfig {
    fn default() -> Self {
        Self {
            name: "docdb".to_string(),
            data_dir: PathBuf::from("./data"),
            distribution_key: 0,
            allow_prune: true,
            worker_threads: num_cpus::get(),
            flush_profile: FlushProfile::Balanced,
            summary: SummaryConfig::default(),
            index: IndexConfig::default(),
            index_factory: "memory".to_string(),
            background_reprocessing: true,
        }
    }
}

impl DocDbConfig {
    /// Create a new document database configuration
    pub fn new(name: impl Into<String>, data_dir: PathBuf, distribution_key: u32) -> Self {
        Self {
            name: name.into(),
            data_dir,
            distribution_key,
            ..Default::default()
        }
    }

    pub fn with_allow_prune(mut self, allow: bool) -> Self {
        self.allow_prune = allow;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_flush_profile(mut self, profile: FlushProfile) -> Self {
        self.flush_profile = profile;
        self
    }

    pub fn with_summary(mut self, summary: SummaryConfig) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn with_index_factory(mut self, name: impl Into<String>) -> Self {
        self.index_factory = name.into();
        self
    }

    pub fn with_background_reprocessing(mut self, enabled: bool) -> Self {
        self.background_reprocessing = enabled;
        self
    }

    /// Directory holding this document database
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }

    /// Directory of the transaction log
    pub fn tlog_dir(&self) -> PathBuf {
        self.db_dir().join("tlog")
    }
}
