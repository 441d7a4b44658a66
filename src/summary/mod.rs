//! Document summary store: stored documents, summary field selection and
//! a small read cache.

mod manager;

pub use manager::{LoggedSummaryManager, SummaryAdapter, SummaryManager, SummaryOp, SummaryState};
