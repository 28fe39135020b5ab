//! Turns raw status reads into a [`LifecycleState`].
//!
//! The reconciler is a pure state machine: it performs no I/O and never looks
//! at the clock itself. Side effects it wants performed come back as
//! [`Effect`]s, and every effect is emitted at most once per election id no
//! matter how often the same status is observed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::model::{ElectionId, LifecycleState, StatusSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// The election is past its deadline and needs a finalizing write.
    Finalize(ElectionId),
    /// The election closed on the ledger; its record should be fetched and
    /// handed to history.
    FetchRecord(ElectionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub state: LifecycleState,
    pub election_id: Option<ElectionId>,
    pub effects: Vec<Effect>,
    /// The read was older than something already observed and was ignored.
    pub discarded: bool,
}

#[derive(Debug, Default)]
pub struct LifecycleReconciler {
    state: LifecycleState,
    election_id: Option<ElectionId>,
    highest_seen: ElectionId,
    /// Deadline of the election being tracked.
    end_time: Option<DateTime<Utc>>,
    /// Every election up to this id has its record in history.
    closed_through: ElectionId,
    finalize_signalled: HashSet<ElectionId>,
    finalize_claimed: HashSet<ElectionId>,
}

impl LifecycleReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    /// An expired election whose finalizing write nobody has claimed yet.
    pub fn pending_finalize(&self) -> Option<ElectionId> {
        match (self.state, self.election_id) {
            (LifecycleState::Expired, Some(id)) if !self.finalize_claimed.contains(&id) => Some(id),
            _ => None,
        }
    }

    fn current(&self, effects: Vec<Effect>, discarded: bool) -> Reconciliation {
        Reconciliation {
            state: self.state,
            election_id: self.election_id,
            effects,
            discarded,
        }
    }

    fn transition(&mut self, state: LifecycleState, election_id: Option<ElectionId>) {
        if self.state != state || self.election_id != election_id {
            match election_id {
                Some(id) => info!("Election {id}: {} -> {state}", self.state),
                None => info!("Lifecycle: {} -> {state}", self.state),
            }
        }
        self.state = state;
        self.election_id = election_id;
    }

    /// Feed one status read, taken at `now`.
    pub fn observe(&mut self, snapshot: &StatusSnapshot, now: DateTime<Utc>) -> Reconciliation {
        let id = snapshot.election_id;
        let status = &snapshot.status;

        if id < self.highest_seen || (status.is_active && id <= self.closed_through) {
            debug!(
                "Ignoring out-of-order status for election {id} (seen {}, closed through {})",
                self.highest_seen, self.closed_through
            );
            return self.current(Vec::new(), true);
        }
        self.highest_seen = id;

        let mut effects = Vec::new();
        if status.is_active {
            let state = if self.finalize_claimed.contains(&id) {
                LifecycleState::Finalizing
            } else if status.deadline_passed(now) {
                if self.finalize_signalled.insert(id) {
                    effects.push(Effect::Finalize(id));
                }
                LifecycleState::Expired
            } else {
                LifecycleState::Active
            };
            self.end_time = Some(status.end_time);
            self.transition(state, Some(id));
        } else if id > self.closed_through {
            // Closed on the ledger but its record has not reached history.
            // This also covers elections that ended while nobody was watching.
            if id > 0 {
                effects.push(Effect::FetchRecord(id));
                self.transition(LifecycleState::Finalized, Some(id));
            } else {
                self.transition(LifecycleState::NoElection, None);
            }
        } else {
            self.transition(LifecycleState::NoElection, None);
        }
        self.current(effects, false)
    }

    /// Claim the finalizing write for `id`. Returns false if the election is
    /// not awaiting one or somebody already claimed it.
    pub fn claim_finalize(&mut self, id: ElectionId) -> bool {
        let claimable = self.election_id == Some(id)
            && matches!(self.state, LifecycleState::Active | LifecycleState::Expired);
        if !claimable || !self.finalize_claimed.insert(id) {
            return false;
        }
        // A claim implies the signal, so a later expiry does not signal again.
        self.finalize_signalled.insert(id);
        self.transition(LifecycleState::Finalizing, Some(id));
        true
    }

    /// Give up a claim whose write did not take effect on the ledger.
    pub fn release_finalize(&mut self, id: ElectionId, now: DateTime<Utc>) {
        if self.finalize_claimed.remove(&id)
            && self.election_id == Some(id)
            && self.state == LifecycleState::Finalizing
        {
            let expired = self.end_time.map_or(true, |end_time| now > end_time);
            let state = if expired {
                LifecycleState::Expired
            } else {
                LifecycleState::Active
            };
            self.transition(state, Some(id));
        }
    }

    /// The record for `id` is in history; get ready for the next election.
    pub fn record_stored(&mut self, id: ElectionId) {
        let closed = self.closed_through.max(id);
        self.closed_through = closed;
        self.finalize_signalled.retain(|&other| other > closed);
        self.finalize_claimed.retain(|&other| other > closed);
        if self.election_id.map_or(false, |current| current <= id) {
            self.transition(LifecycleState::NoElection, None);
        }
    }
}
