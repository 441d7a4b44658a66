//! Read side of a sub-database: search views, sessions and matching
//! statistics.

mod session;
mod stats;
mod view;

pub use session::{SearchSession, SessionId, SessionManager};
pub use stats::{MatchingStats, MatchingStatsRegistry, SearchableStats};
pub use view::{SearchView, SearchViewParts};
