//! The election lifecycle and live-tally sync engine.
//!
//! Each piece here owns one concern: [`poller`] guards individual ledger
//! reads, [`reconciler`] classifies the lifecycle, [`tally`] ranks counts,
//! [`voter_choice`] works out ballots from the vote log and [`history`] keeps
//! finished elections. [`Engine`] runs them on a schedule and publishes the
//! combined [`ReadModel`](crate::model::ReadModel).

mod engine;
pub mod history;
pub mod poller;
pub mod reconciler;
pub mod tally;
pub mod voter_choice;

pub use engine::{
    ActionError, Engine, EngineSettings, CHOICE_TASK, HISTORY_TASK, STATUS_TASK, TALLY_TASK,
    VOTER_TASK,
};
