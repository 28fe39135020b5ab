use rocket::{http::Status, response::Responder, serde::json::Json, Request};
use serde::Serialize;
use thiserror::Error;

use crate::ledger::{LedgerError, TxFailure};
use crate::sync::ActionError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Transaction(#[from] TxFailure),
    #[error("Refused: {0}")]
    Refused(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Ledger(_) => Status::BadGateway,
            Self::Transaction(_) => Status::UnprocessableEntity,
            Self::Refused(_) => Status::Conflict,
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
        }
    }
}

impl From<ActionError> for Error {
    fn from(error: ActionError) -> Self {
        match error {
            ActionError::Refused(reason) => Self::Refused(reason),
            ActionError::Ledger(e) => Self::Ledger(e),
            ActionError::Failed(e) => Self::Transaction(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (self.status(), body).respond_to(req)
    }
}
