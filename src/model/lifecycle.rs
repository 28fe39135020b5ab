use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Our local classification of where the current election is in its lifecycle.
/// This never lives on the ledger; it is recomputed from every status read.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing is running; the last finished election (if any) is in history.
    #[default]
    NoElection,
    /// Open and before its deadline.
    Active,
    /// Past its deadline but still flagged active by the ledger.
    Expired,
    /// A finalizing write has been issued; waiting for the ledger to close it.
    Finalizing,
    /// Closed on the ledger; waiting for its final record.
    Finalized,
}

impl LifecycleState {
    /// Are vote counts for this election still provisional?
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Expired | Self::Finalizing)
    }

    pub fn accepts_votes(self) -> bool {
        self == Self::Active
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoElection => "no election",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Finalizing => "finalizing",
            Self::Finalized => "finalized",
        };
        write!(f, "{name}")
    }
}
