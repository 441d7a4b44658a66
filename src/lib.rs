pub mod attribute;
pub mod config;
pub mod docdb;
pub mod error;
pub mod feed;
pub mod flush;
pub mod index;
pub mod metastore;
pub mod models;
pub mod owner;
pub mod persistence;
pub mod reconfig;
pub mod reprocessing;
pub mod retriever;
pub mod schema;
pub mod search;
pub mod serial;
pub mod subdb;
pub mod summary;
pub mod tlog;
pub mod util;

pub use config::{DocDbConfig, FlushProfile, IndexConfig, SummaryConfig};
pub use docdb::{DocDbState, DocumentDb, FlushReport, ReconfigOutcome};
pub use error::{DocDbError, Result};
pub use feed::{FeedOutcome, PruneOutcome, ReplayStats};
pub use models::*;
pub use reconfig::ConfigSnapshot;
pub use schema::{DataType, FieldSpec, Schema};
pub use serial::SerialNum;
pub use subdb::{DocumentSubDb, SubDbType, WipeOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
