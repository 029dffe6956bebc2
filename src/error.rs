//! Error types for collaborators and session operations.

use thiserror::Error;

use crate::roulette::RouletteError;

/// Failures of the drill generation and scoring collaborators.
#[derive(Debug, Error)]
pub enum ServiceError {
  /// Superseded by a newer request. Not a failure.
  #[error("request cancelled")]
  Cancelled,
  #[error("service unavailable: {0}")]
  Unavailable(String),
  #[error("malformed response: {0}")]
  Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
  /// Superseded work; callers drop it silently.
  #[error("cancelled")]
  Cancelled,
  #[error("unable to produce a drill this round: {0}")]
  Generation(String),
  #[error("unable to score this round: {0}")]
  Scoring(String),
  #[error("no drill is active")]
  NoActiveDrill,
  #[error("answer is for drill {0}, which is no longer active")]
  StaleDrill(String),
  #[error("an answer is already being scored")]
  SubmissionInFlight,
  #[error("encounter is resolving")]
  EncounterResolving,
  #[error("invalid command: {0}")]
  InvalidCommand(&'static str),
  #[error("roulette: {0}")]
  Roulette(#[from] RouletteError),
  #[error("session closed")]
  Closed,
}

impl SessionError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, SessionError::Cancelled)
  }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
