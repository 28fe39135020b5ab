//! Canonical encoding and decoding for the election contract.
//!
//! Every tuple layout the contract returns is decoded in exactly one place,
//! field by field and by name, so index drift between call sites cannot happen.

use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};
use ethabi::{Contract, Event, Function, Log, Token, Uint};

use super::{LedgerError, LedgerWrite};
use crate::model::{
    Address, Candidate, CandidateResult, ElectionRecord, ElectionStatus, VoteCastEvent,
};

/// The subset of the contract interface we talk to.
const CONTRACT_ABI: &str = include_str!("election_abi.json");

/// The parsed contract interface.
#[derive(Debug, Clone)]
pub struct ElectionAbi {
    contract: Contract,
}

impl ElectionAbi {
    pub fn load() -> Result<Self, LedgerError> {
        let contract = Contract::load(CONTRACT_ABI.as_bytes())?;
        Ok(Self { contract })
    }

    pub fn function(&self, name: &str) -> Result<&Function, LedgerError> {
        Ok(self.contract.function(name)?)
    }

    pub fn vote_cast(&self) -> Result<&Event, LedgerError> {
        Ok(self.contract.event("VoteCast")?)
    }
}

/// Sequential reader over the tokens of one returned tuple.
struct Fields {
    tuple: &'static str,
    tokens: std::vec::IntoIter<Token>,
}

impl Fields {
    fn new(tuple: &'static str, tokens: Vec<Token>, arity: usize) -> Result<Self, LedgerError> {
        if tokens.len() != arity {
            return Err(LedgerError::Malformed(format!(
                "{tuple}: expected {arity} fields, got {}",
                tokens.len()
            )));
        }
        Ok(Self {
            tuple,
            tokens: tokens.into_iter(),
        })
    }

    fn malformed(&self, field: &str, problem: impl Display) -> LedgerError {
        LedgerError::Malformed(format!("{}.{field}: {problem}", self.tuple))
    }

    fn next(&mut self, field: &str) -> Result<Token, LedgerError> {
        let token = self.tokens.next();
        token.ok_or_else(|| self.malformed(field, "missing"))
    }

    fn uint(&mut self, field: &str) -> Result<u64, LedgerError> {
        match self.next(field)? {
            Token::Uint(value) => to_u64(value).ok_or_else(|| self.malformed(field, "out of range")),
            other => Err(self.malformed(field, format!("expected uint, got {other:?}"))),
        }
    }

    fn timestamp(&mut self, field: &str) -> Result<DateTime<Utc>, LedgerError> {
        let seconds = self.uint(field)?;
        i64::try_from(seconds)
            .ok()
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
            .ok_or_else(|| self.malformed(field, "not a valid timestamp"))
    }

    fn boolean(&mut self, field: &str) -> Result<bool, LedgerError> {
        match self.next(field)? {
            Token::Bool(value) => Ok(value),
            other => Err(self.malformed(field, format!("expected bool, got {other:?}"))),
        }
    }

    fn string(&mut self, field: &str) -> Result<String, LedgerError> {
        match self.next(field)? {
            Token::String(value) => Ok(value),
            other => Err(self.malformed(field, format!("expected string, got {other:?}"))),
        }
    }

    fn address(&mut self, field: &str) -> Result<Address, LedgerError> {
        match self.next(field)? {
            Token::Address(value) => Ok(value),
            other => Err(self.malformed(field, format!("expected address, got {other:?}"))),
        }
    }

    fn array(&mut self, field: &str) -> Result<Vec<Token>, LedgerError> {
        match self.next(field)? {
            Token::Array(values) => Ok(values),
            other => Err(self.malformed(field, format!("expected array, got {other:?}"))),
        }
    }
}

fn to_u64(value: Uint) -> Option<u64> {
    (value <= Uint::from(u64::MAX)).then(|| value.low_u64())
}

fn single(function: &'static str, tokens: Vec<Token>) -> Result<Fields, LedgerError> {
    Fields::new(function, tokens, 1)
}

pub fn decode_uint(function: &'static str, tokens: Vec<Token>) -> Result<u64, LedgerError> {
    single(function, tokens)?.uint("value")
}

pub fn decode_bool(function: &'static str, tokens: Vec<Token>) -> Result<bool, LedgerError> {
    single(function, tokens)?.boolean("value")
}

pub fn decode_address(function: &'static str, tokens: Vec<Token>) -> Result<Address, LedgerError> {
    single(function, tokens)?.address("value")
}

pub fn decode_addresses(
    function: &'static str,
    tokens: Vec<Token>,
) -> Result<Vec<Address>, LedgerError> {
    let entries = single(function, tokens)?.array("value")?;
    let arity = entries.len();
    let mut fields = Fields::new(function, entries, arity)?;
    (0..arity).map(|_| fields.address("entry")).collect()
}

/// `getElectionStatus() -> (isActive, startTime, endTime, totalVotes)`
pub fn decode_status(tokens: Vec<Token>) -> Result<ElectionStatus, LedgerError> {
    let mut fields = Fields::new("getElectionStatus", tokens, 4)?;
    Ok(ElectionStatus {
        is_active: fields.boolean("isActive")?,
        start_time: fields.timestamp("startTime")?,
        end_time: fields.timestamp("endTime")?,
        total_votes: fields.uint("totalVotes")?,
    })
}

/// `candidates(id) -> (id, voteCount, isActive, name, party, tagline, logoIPFS)`
///
/// Unknown ids come back as an all-zero tuple, which decodes to `None`.
pub fn decode_candidate(tokens: Vec<Token>) -> Result<Option<Candidate>, LedgerError> {
    let mut fields = Fields::new("candidates", tokens, 7)?;
    let candidate = Candidate {
        id: fields.uint("id")?,
        vote_count: fields.uint("voteCount")?,
        is_active: fields.boolean("isActive")?,
        name: fields.string("name")?,
        party: fields.string("party")?,
        tagline: fields.string("tagline")?,
        logo_ref: fields.string("logoIPFS")?,
    };
    Ok(candidate.found())
}

/// `getElectionHistory(id) -> (id, startTime, endTime, totalVotes, results[])`
/// where each result is `(candidateId, candidateName, party, voteCount)`.
///
/// The "not found" record (id 0) decodes to `None`.
pub fn decode_election_record(tokens: Vec<Token>) -> Result<Option<ElectionRecord>, LedgerError> {
    let mut fields = Fields::new("getElectionHistory", tokens, 5)?;
    let id = fields.uint("id")?;
    let start_time = fields.timestamp("startTime")?;
    let end_time = fields.timestamp("endTime")?;
    let total_votes = fields.uint("totalVotes")?;
    let results = fields
        .array("results")?
        .into_iter()
        .map(decode_candidate_result)
        .collect::<Result<Vec<_>, _>>()?;
    let record = ElectionRecord {
        id,
        start_time,
        end_time,
        total_votes,
        results,
    };
    Ok(record.found())
}

fn decode_candidate_result(token: Token) -> Result<CandidateResult, LedgerError> {
    let tokens = match token {
        Token::Tuple(tokens) => tokens,
        other => {
            return Err(LedgerError::Malformed(format!(
                "getElectionHistory.results: expected tuple, got {other:?}"
            )))
        }
    };
    let mut fields = Fields::new("CandidateResult", tokens, 4)?;
    Ok(CandidateResult {
        candidate_id: fields.uint("candidateId")?,
        candidate_name: fields.string("candidateName")?,
        party: fields.string("party")?,
        vote_count: fields.uint("voteCount")?,
    })
}

/// `VoteCast(address indexed voter, uint256 indexed electionId, uint256 candidateId)`
pub fn decode_vote_cast(log: Log) -> Result<VoteCastEvent, LedgerError> {
    let mut params = log.params;
    let mut take = |name: &str| {
        params
            .iter()
            .position(|param| param.name == name)
            .map(|index| params.swap_remove(index).value)
            .ok_or_else(|| LedgerError::Malformed(format!("VoteCast.{name}: missing")))
    };
    let tokens = vec![take("voter")?, take("electionId")?, take("candidateId")?];
    let mut fields = Fields::new("VoteCast", tokens, 3)?;
    Ok(VoteCastEvent {
        voter: fields.address("voter")?,
        election_id: fields.uint("electionId")?,
        candidate_id: fields.uint("candidateId")?,
    })
}

/// The contract function and arguments for a write.
pub fn encode_write(write: &LedgerWrite) -> (&'static str, Vec<Token>) {
    match write {
        LedgerWrite::StartElection { duration_minutes } => (
            "startElection",
            vec![Token::Uint((*duration_minutes).into())],
        ),
        LedgerWrite::EndElection => ("endElection", vec![]),
        LedgerWrite::Vote { candidate_id } => ("vote", vec![Token::Uint((*candidate_id).into())]),
        LedgerWrite::ApproveVoter(voter) => ("approveVoter", vec![Token::Address(*voter)]),
        LedgerWrite::RemoveVoter(voter) => ("removeVoter", vec![Token::Address(*voter)]),
        LedgerWrite::RemoveAllVoters => ("removeAllVoters", vec![]),
        LedgerWrite::AddCandidate(candidate) => (
            "addCandidate",
            vec![
                Token::String(candidate.name.clone()),
                Token::String(candidate.party.clone()),
                Token::String(candidate.tagline.clone()),
                Token::String(candidate.logo_ref.clone()),
            ],
        ),
        LedgerWrite::RemoveCandidate(id) => ("removeCandidate", vec![Token::Uint((*id).into())]),
    }
}
