use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::ledger::{LedgerClient, LedgerError};
use crate::model::{ElectionId, ElectionRecord};

/// Finalized election records keyed by id.
#[derive(Debug, Default, Clone)]
pub struct HistoryCache {
    records: BTreeMap<ElectionId, ElectionRecord>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch ids `1..=getTotalElections()` one after another.
    ///
    /// Only ids up to `finished_through` are stored. The ledger allocates a
    /// record as soon as an election starts, so anything above that bound
    /// may be a placeholder for a running election, including one started
    /// after `finished_through` was read.
    /// Returns how many records were stored. A failed read aborts the
    /// refresh but keeps whatever was stored before it.
    pub async fn refresh(
        &mut self,
        ledger: &dyn LedgerClient,
        finished_through: ElectionId,
    ) -> Result<usize, LedgerError> {
        let total = ledger.total_elections().await?;
        if total > finished_through {
            trace!("Skipping elections after {finished_through}, not finished");
        }
        let mut stored = 0;
        for id in 1..=total.min(finished_through) {
            match ledger.election_history(id).await? {
                Some(record) if record.id == id => {
                    self.records.insert(id, record);
                    stored += 1;
                }
                Some(record) => warn!("History slot {id} holds record {}, skipping", record.id),
                None => debug!("No history record for election {id}"),
            }
        }
        Ok(stored)
    }

    /// Store one record, replacing any previous copy. The sentinel id is refused.
    pub fn insert(&mut self, record: ElectionRecord) -> bool {
        if record.id == 0 {
            return false;
        }
        self.records.insert(record.id, record);
        true
    }

    pub fn get(&self, id: ElectionId) -> Option<&ElectionRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: ElectionId) -> bool {
        self.records.contains_key(&id)
    }

    /// The most recently finished election.
    pub fn latest(&self) -> Option<&ElectionRecord> {
        self.records.values().next_back()
    }

    /// Most recent first.
    pub fn records(&self) -> Vec<ElectionRecord> {
        self.records.values().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
