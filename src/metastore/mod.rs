//! Document meta store: per sub-database mapping from document id to local
//! id (lid) plus bookkeeping metadata.
//!
//! Lids are dense small integers starting at 1 and are reused after removes.
//! Lid 0 is never handed out.

mod store;

pub use store::{DocumentMetaStoreContext, Lid, MetaEntry, MetaOp, MetaStoreState};
