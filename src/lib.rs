#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate ledger_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, EngineFairing, LedgerFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod sync;

pub fn build() -> Rocket<Build> {
    with_routes(rocket::build())
        .attach(ConfigFairing)
        .attach(LedgerFairing)
        .attach(EngineFairing)
}

fn with_routes(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", api::routes()).attach(LoggerFairing)
}

/// Serve an engine that has already been built, skipping the config and
/// ledger fairings.
#[cfg(test)]
pub(crate) fn rocket_for_engine(engine: sync::Engine) -> Rocket<Build> {
    with_routes(rocket::build()).manage(engine)
}
