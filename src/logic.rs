//! Local fallbacks shared by the services: an offline scorer and a wrapper
//! that falls back from a primary service to a local one on failure.

use async_trait::async_trait;
use tracing::{error, instrument};

use crate::domain::{GeneratedDrill, ScoreResult, Segment};
use crate::error::ServiceError;
use crate::services::{CancelToken, DrillRequest, DrillService, ScoreRequest, ScoringService};
use crate::util::normalize;

/// Offline scorer: word overlap against the reference, in order where possible.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalScorer;

#[async_trait]
impl ScoringService for LocalScorer {
  #[instrument(level = "debug", skip(self, req), fields(answer_len = req.user_answer.len()))]
  async fn score(&self, req: &ScoreRequest) -> Result<ScoreResult, ServiceError> {
    Ok(score_locally(&req.user_answer, &req.reference_answer))
  }
}

pub fn score_locally(answer: &str, reference: &str) -> ScoreResult {
  let got = normalize(answer);
  let want = normalize(reference);
  if want.is_empty() {
    return ScoreResult { score: 0.0, feedback: "(local) No reference to compare against.".into(), segments: None };
  }
  if got == want {
    return ScoreResult { score: 10.0, feedback: "(local) Exact match.".into(), segments: None };
  }

  let want_words: Vec<&str> = want.split(' ').collect();
  let got_words: Vec<&str> = got.split(' ').filter(|w| !w.is_empty()).collect();
  let lcs = lcs_len(&got_words, &want_words);
  let recall = lcs as f32 / want_words.len() as f32;
  let precision = if got_words.is_empty() { 0.0 } else { lcs as f32 / got_words.len() as f32 };
  let f1 = if recall + precision == 0.0 { 0.0 } else { 2.0 * recall * precision / (recall + precision) };
  let score = (f1 * 100.0).round() / 10.0;

  let segments = got_words
    .iter()
    .map(|w| Segment { text: (*w).to_string(), correct: want_words.contains(w) })
    .collect();
  let missing: Vec<&str> = want_words.iter().copied().filter(|w| !got_words.contains(w)).collect();
  let feedback = if missing.is_empty() {
    format!("(local) score={:.1}: word order differs from the reference.", score)
  } else {
    format!("(local) score={:.1}: missing {}", score, missing.join(", "))
  };
  ScoreResult { score, feedback, segments: Some(segments) }
}

fn lcs_len(a: &[&str], b: &[&str]) -> usize {
  let mut prev = vec![0usize; b.len() + 1];
  for x in a {
    let mut cur = vec![0usize; b.len() + 1];
    for (j, y) in b.iter().enumerate() {
      cur[j + 1] = if x == y { prev[j] + 1 } else { cur[j].max(prev[j + 1]) };
    }
    prev = cur;
  }
  prev[b.len()]
}

/// Tries `primary`; on failure other than cancellation logs and uses `fallback`.
pub struct WithFallback<P, F> {
  pub primary: P,
  pub fallback: F,
}

impl<P, F> WithFallback<P, F> {
  pub fn new(primary: P, fallback: F) -> Self {
    Self { primary, fallback }
  }
}

#[async_trait]
impl<P: DrillService, F: DrillService> DrillService for WithFallback<P, F> {
  async fn generate(&self, req: &DrillRequest, cancel: &CancelToken) -> Result<GeneratedDrill, ServiceError> {
    match self.primary.generate(req, cancel).await {
      Err(ServiceError::Cancelled) => Err(ServiceError::Cancelled),
      Err(e) => {
        error!(target: "drill", mode = %req.mode, error = %e, "Drill generation failed; using local bank.");
        self.fallback.generate(req, cancel).await
      }
      ok => ok,
    }
  }
}

#[async_trait]
impl<P: ScoringService, F: ScoringService> ScoringService for WithFallback<P, F> {
  async fn score(&self, req: &ScoreRequest) -> Result<ScoreResult, ServiceError> {
    match self.primary.score(req).await {
      Err(ServiceError::Cancelled) => Err(ServiceError::Cancelled),
      Err(e) => {
        error!(target: "drill", mode = %req.mode, error = %e, "Scoring failed; using local scorer.");
        self.fallback.score(req).await
      }
      ok => ok,
    }
  }
}
