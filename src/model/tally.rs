use serde::{Deserialize, Serialize};

use super::CandidateId;

/// One row of a ranked tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 1-based position after sorting.
    pub position: usize,
    /// `position` as an English ordinal, e.g. "2nd".
    pub label: String,
    pub candidate_id: CandidateId,
    pub name: String,
    pub party: String,
    pub logo_url: Option<String>,
    pub vote_count: u64,
    /// Shares its count with a neighbour; the order between them means nothing.
    pub tied: bool,
    /// The count may still change.
    pub live: bool,
}
