//! Seed drills and the local drill service built on them.
//!
//! Guarantees the app stays usable without an LLM: drills come from the
//! built-in bank plus any drills configured in TOML.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::config::DrillCfg;
use crate::domain::{DifficultyTier, DrillSource, GeneratedDrill, Mode, VocabHint};
use crate::error::ServiceError;
use crate::services::{CancelToken, DrillRequest, DrillService};

#[derive(Clone, Debug, PartialEq)]
pub struct BankDrill {
  pub mode: Mode,
  pub tier: DifficultyTier,
  pub drill: GeneratedDrill,
}

fn bank(mode: Mode, tier: DifficultyTier, source: &str, reference: &str, hints: &[(&str, &str)]) -> BankDrill {
  BankDrill {
    mode,
    tier,
    drill: GeneratedDrill {
      source_text: source.into(),
      reference_answer: reference.into(),
      vocab_hints: hints.iter().map(|(t, m)| VocabHint { term: (*t).into(), meaning: (*m).into() }).collect(),
      source: DrillSource::Seed,
    },
  }
}

/// Minimal built-in set covering both modes at a spread of tiers.
pub fn seed_drills() -> Vec<BankDrill> {
  use DifficultyTier::*;
  use Mode::*;
  vec![
    bank(Translation, Beginner, "I want to drink coffee.", "Quiero tomar café.", &[("tomar", "to drink")]),
    bank(Translation, Elementary, "The weather is great today.", "Hoy hace muy buen tiempo.", &[("tiempo", "weather")]),
    bank(Translation, PreIntermediate, "He went to the market yesterday.", "Ayer fue al mercado.", &[("mercado", "market")]),
    bank(Translation, Intermediate, "If I had time, I would learn to paint.", "Si tuviera tiempo, aprendería a pintar.", &[("tuviera", "had (subjunctive)")]),
    bank(Translation, UpperIntermediate, "She insisted that we stay for dinner.", "Ella insistió en que nos quedáramos a cenar.", &[("quedarse", "to stay")]),
    bank(Translation, Advanced, "Had they warned us, we would have left earlier.", "Si nos hubieran avisado, habríamos salido antes.", &[("avisar", "to warn")]),
    bank(Listening, Beginner, "Hola, ¿cómo estás?", "Hola, ¿cómo estás?", &[]),
    bank(Listening, PreIntermediate, "Mañana vamos a la playa con mis primos.", "Mañana vamos a la playa con mis primos.", &[("primos", "cousins")]),
    bank(Listening, Intermediate, "Me alegra que hayas venido a la fiesta.", "Me alegra que hayas venido a la fiesta.", &[("alegrar", "to please")]),
    bank(Listening, Advanced, "De haberlo sabido, no habría dicho nada.", "De haberlo sabido, no habría dicho nada.", &[]),
  ]
}

/// Absolute last-resort fallback when the bank has nothing for a mode.
pub fn hard_fallback_drill() -> GeneratedDrill {
  GeneratedDrill {
    source_text: "He is a teacher.".into(),
    reference_answer: "Él es profesor.".into(),
    vocab_hints: vec![],
    source: DrillSource::Seed,
  }
}

impl From<DrillCfg> for BankDrill {
  fn from(c: DrillCfg) -> Self {
    BankDrill {
      mode: c.mode,
      tier: c.tier,
      drill: GeneratedDrill {
        source_text: c.source_text,
        reference_answer: c.reference_answer,
        vocab_hints: c.vocab_hints,
        source: DrillSource::LocalBank,
      },
    }
  }
}

/// Serves drills from the bank: same mode, tier nearest the request,
/// skipping the one served last when there is a choice.
pub struct SeedDrills {
  drills: Vec<BankDrill>,
  last_by_mode: RwLock<HashMap<Mode, usize>>,
}

impl SeedDrills {
  /// Configured drills first, then the built-in seeds.
  pub fn new(configured: Vec<DrillCfg>) -> Self {
    let mut drills: Vec<BankDrill> = configured.into_iter().map(BankDrill::from).collect();
    drills.extend(seed_drills());
    Self { drills, last_by_mode: RwLock::new(HashMap::new()) }
  }

  pub fn len(&self) -> usize {
    self.drills.len()
  }

  pub fn is_empty(&self) -> bool {
    self.drills.is_empty()
  }

  async fn choose(&self, mode: Mode, tier: DifficultyTier) -> Option<usize> {
    let candidates: Vec<usize> = (0..self.drills.len()).filter(|i| self.drills[*i].mode == mode).collect();
    let distance = |i: &usize| (self.drills[*i].tier.index() as i64 - tier.index() as i64).abs();
    let best = candidates.iter().map(distance).min()?;
    let nearest: Vec<usize> = candidates.into_iter().filter(|i| distance(i) == best).collect();

    let last = { self.last_by_mode.read().await.get(&mode).copied() };
    let chosen = nearest.iter().copied().find(|i| Some(*i) != last).unwrap_or(nearest[0]);
    self.last_by_mode.write().await.insert(mode, chosen);
    Some(chosen)
  }
}

#[async_trait]
impl DrillService for SeedDrills {
  #[instrument(level = "debug", skip(self, cancel), fields(mode = %req.mode, tier = ?req.difficulty_tier))]
  async fn generate(&self, req: &DrillRequest, cancel: &CancelToken) -> Result<GeneratedDrill, ServiceError> {
    cancel.check()?;
    let drill = match self.choose(req.mode, req.difficulty_tier).await {
      Some(i) => self.drills[i].drill.clone(),
      None => hard_fallback_drill(),
    };
    debug!(target: "drill", mode = %req.mode, source = %drill.source_text, "Seed drill served");
    Ok(drill)
  }
}
