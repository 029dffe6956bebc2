//! Interfaces of the external collaborators and the cooperative cancellation
//! token used for drill requests.

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{DifficultyTier, GeneratedDrill, Mode, ScoreResult};
use crate::encounter::BossKind;
use crate::error::ServiceError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillRequest {
  pub mode: Mode,
  pub difficulty_tier: DifficultyTier,
  pub rating: u32,
  pub forced_encounter_kind: Option<BossKind>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
  pub user_answer: String,
  pub reference_answer: String,
  pub source_text: String,
  pub rating: u32,
  pub mode: Mode,
  pub is_reversed: bool,
}

#[async_trait]
pub trait DrillService: Send + Sync {
  /// Produce one sentence pair. Implementations should check `cancel` once
  /// the network call resolves and again after parsing.
  async fn generate(&self, req: &DrillRequest, cancel: &CancelToken) -> Result<GeneratedDrill, ServiceError>;
}

#[async_trait]
pub trait ScoringService: Send + Sync {
  async fn score(&self, req: &ScoreRequest) -> Result<ScoreResult, ServiceError>;
}

/// Issues tokens; issuing a new one cancels all earlier ones.
#[derive(Clone, Debug, Default)]
pub struct CancelSource {
  current: Arc<AtomicU64>,
}

impl CancelSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cancel everything outstanding and hand out a fresh token.
  pub fn issue(&self) -> CancelToken {
    let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    CancelToken { generation, current: self.current.clone() }
  }

  pub fn cancel_all(&self) {
    self.current.fetch_add(1, Ordering::SeqCst);
  }
}

/// Valid until its source issues a newer token or cancels.
#[derive(Clone, Debug)]
pub struct CancelToken {
  generation: u64,
  current: Arc<AtomicU64>,
}

impl CancelToken {
  /// A token nobody can cancel.
  pub fn detached() -> Self {
    Self { generation: 0, current: Arc::new(AtomicU64::new(0)) }
  }

  pub fn is_cancelled(&self) -> bool {
    self.current.load(Ordering::SeqCst) != self.generation
  }

  pub fn check(&self) -> Result<(), ServiceError> {
    if self.is_cancelled() { Err(ServiceError::Cancelled) } else { Ok(()) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn newer_token_cancels_older() {
    let source = CancelSource::new();
    let first = source.issue();
    assert!(!first.is_cancelled());
    let second = source.issue();
    assert!(first.is_cancelled());
    assert!(matches!(first.check(), Err(ServiceError::Cancelled)));
    assert!(second.check().is_ok());
    source.cancel_all();
    assert!(second.is_cancelled());
  }

  #[test]
  fn detached_token_stays_live() {
    assert!(!CancelToken::detached().is_cancelled());
  }
}
