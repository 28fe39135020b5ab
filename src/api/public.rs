use rocket::{serde::json::Json, Route, State};

use super::common::parse_address;
use crate::error::{Error, Result};
use crate::model::{ElectionId, ElectionRecord, HistoricalTally, ReadModel, VoterInfo};
use crate::sync::Engine;

pub fn routes() -> Vec<Route> {
    routes![election, history, historical_election, voter_info]
}

/// The whole read model as of the latest poll.
#[get("/election")]
fn election(engine: &State<Engine>) -> Json<ReadModel> {
    Json(engine.read_model())
}

#[get("/election/history")]
fn history(engine: &State<Engine>) -> Json<Vec<ElectionRecord>> {
    Json(engine.history())
}

#[get("/election/history/<election_id>")]
fn historical_election(
    election_id: ElectionId,
    engine: &State<Engine>,
) -> Result<Json<HistoricalTally>> {
    engine
        .historical_tally(election_id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("Finished election with ID '{election_id}'")))
}

/// Read straight from the ledger rather than from the last poll.
#[get("/voters/<address>")]
async fn voter_info(address: &str, engine: &State<Engine>) -> Result<Json<VoterInfo>> {
    let address = parse_address(address)?;
    Ok(Json(engine.voter_info(address).await?))
}
