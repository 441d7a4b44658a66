use dashmap::DashMap;

/// Query counters for one rank profile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchingStats {
    pub queries: u64,
    pub docs_matched: u64,
}

impl MatchingStats {
    pub fn add_query(&mut self, matched: u64) {
        self.queries += 1;
        self.docs_matched += matched;
    }

    pub fn merge(&mut self, other: &MatchingStats) {
        self.queries += other.queries;
        self.docs_matched += other.docs_matched;
    }

    pub fn avg_hits(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.docs_matched as f64 / self.queries as f64
        }
    }
}

/// Matching statistics per rank profile, shared by every search view of a
/// sub-database so counters survive view swaps
#[derive(Debug, Default)]
pub struct MatchingStatsRegistry {
    profiles: DashMap<String, MatchingStats>,
}

impl MatchingStatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, rank_profile: &str, matched: u64) {
        self.profiles
            .entry(rank_profile.to_string())
            .or_default()
            .add_query(matched);
    }

    /// Counters for `rank_profile`; zeros when it has never been queried
    pub fn get(&self, rank_profile: &str) -> MatchingStats {
        self.profiles
            .get(rank_profile)
            .map(|s| *s)
            .unwrap_or_default()
    }
}

/// Size statistics of a sub-database's searchable data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchableStats {
    pub memory_usage: usize,
    pub docs_in_memory: usize,
    pub size_on_disk: u64,
}
