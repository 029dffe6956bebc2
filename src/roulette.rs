//! Six-chamber roulette mini-game.
//!
//! Stages run `intro -> loading -> spinning -> slowmo -> aiming -> fired`.
//! The live chamber is committed when the spin starts and never changes, so
//! the outcome is fixed before any animation plays. The outcome selects which
//! forced boss follows; only survival pays rating directly.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encounter::BossKind;
use crate::selector::ForcedEncounter;

pub const CHAMBERS: usize = 6;

/// Bullets loaded -> (survive bonus, jackpot multiplier).
const GREED_TABLE: [(u32, u32); CHAMBERS + 1] = [(0, 0), (10, 2), (25, 3), (50, 5), (100, 8), (200, 15), (0, 50)];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreedScaling {
  pub survive_bonus: u32,
  pub jackpot_multiplier: u32,
}

/// Greed scaling for a bullet count; counts above six read as six.
pub fn greed_scaling(bullets: usize) -> GreedScaling {
  let (survive_bonus, jackpot_multiplier) = GREED_TABLE[bullets.min(CHAMBERS)];
  GreedScaling { survive_bonus, jackpot_multiplier }
}

pub fn greed_table() -> Vec<(usize, GreedScaling)> {
  (0..=CHAMBERS).map(|n| (n, greed_scaling(n))).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouletteStage {
  Intro,
  Loading,
  Spinning,
  Slowmo,
  Aiming,
  Fired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RouletteOutcome {
  Survived { bullets: usize },
  Died { bullets: usize },
}

impl RouletteOutcome {
  pub fn bullets(&self) -> usize {
    match self {
      RouletteOutcome::Survived { bullets } | RouletteOutcome::Died { bullets } => *bullets,
    }
  }

  /// Rating paid straight away; only survival pays.
  pub fn survive_bonus(&self) -> u32 {
    match self {
      RouletteOutcome::Survived { bullets } => greed_scaling(*bullets).survive_bonus,
      RouletteOutcome::Died { .. } => 0,
    }
  }

  /// The boss the next drill is forced into.
  pub fn forced_encounter(&self) -> ForcedEncounter {
    match self {
      RouletteOutcome::Survived { .. } => ForcedEncounter::Roulette { kind: BossKind::Roulette, jackpot_multiplier: None },
      RouletteOutcome::Died { bullets } => ForcedEncounter::Roulette {
        kind: BossKind::RouletteExecution,
        jackpot_multiplier: Some(greed_scaling(*bullets).jackpot_multiplier),
      },
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouletteError {
  #[error("roulette is in stage {actual:?}, expected {expected:?}")]
  WrongStage { expected: RouletteStage, actual: RouletteStage },
  #[error("load at least one bullet before spinning")]
  NoBullets,
  #[error("chamber {0} does not exist")]
  ChamberOutOfRange(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouletteSession {
  pub chambers: [bool; CHAMBERS],
  /// Committed at the start of the spin.
  pub active_chamber: Option<usize>,
  pub stage: RouletteStage,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub outcome: Option<RouletteOutcome>,
  #[serde(skip)]
  consumed: bool,
}

impl Default for RouletteSession {
  fn default() -> Self {
    Self::new()
  }
}

impl RouletteSession {
  pub fn new() -> Self {
    Self { chambers: [false; CHAMBERS], active_chamber: None, stage: RouletteStage::Intro, outcome: None, consumed: false }
  }

  fn expect_stage(&self, expected: RouletteStage) -> Result<(), RouletteError> {
    if self.stage == expected {
      Ok(())
    } else {
      Err(RouletteError::WrongStage { expected, actual: self.stage })
    }
  }

  pub fn bullet_count(&self) -> usize {
    self.chambers.iter().filter(|c| **c).count()
  }

  pub fn greed(&self) -> GreedScaling {
    greed_scaling(self.bullet_count())
  }

  /// Leave the intro and open the cylinder.
  pub fn begin_loading(&mut self) -> Result<(), RouletteError> {
    self.expect_stage(RouletteStage::Intro)?;
    self.stage = RouletteStage::Loading;
    Ok(())
  }

  /// Flip one chamber while loading; returns its new state.
  pub fn toggle_chamber(&mut self, index: usize) -> Result<bool, RouletteError> {
    self.expect_stage(RouletteStage::Loading)?;
    let slot = self.chambers.get_mut(index).ok_or(RouletteError::ChamberOutOfRange(index))?;
    *slot = !*slot;
    Ok(*slot)
  }

  /// Start the spin, drawing the live chamber uniformly.
  pub fn spin<R: Rng>(&mut self, rng: &mut R) -> Result<usize, RouletteError> {
    self.expect_stage(RouletteStage::Loading)?;
    if self.bullet_count() == 0 {
      return Err(RouletteError::NoBullets);
    }
    let index = rng.gen_range(0..CHAMBERS);
    self.commit_spin(index)
  }

  /// Start the spin with a chosen live chamber.
  pub fn spin_to(&mut self, index: usize) -> Result<usize, RouletteError> {
    self.expect_stage(RouletteStage::Loading)?;
    if self.bullet_count() == 0 {
      return Err(RouletteError::NoBullets);
    }
    if index >= CHAMBERS {
      return Err(RouletteError::ChamberOutOfRange(index));
    }
    self.commit_spin(index)
  }

  fn commit_spin(&mut self, index: usize) -> Result<usize, RouletteError> {
    self.active_chamber = Some(index);
    self.stage = RouletteStage::Spinning;
    Ok(index)
  }

  /// Step the presentational sequence `spinning -> slowmo -> aiming`.
  pub fn advance(&mut self) -> Result<RouletteStage, RouletteError> {
    self.stage = match self.stage {
      RouletteStage::Spinning => RouletteStage::Slowmo,
      RouletteStage::Slowmo => RouletteStage::Aiming,
      actual => return Err(RouletteError::WrongStage { expected: RouletteStage::Spinning, actual }),
    };
    Ok(self.stage)
  }

  /// Pull the trigger on the committed chamber.
  pub fn fire(&mut self) -> Result<RouletteOutcome, RouletteError> {
    self.expect_stage(RouletteStage::Aiming)?;
    // Aiming is only reachable through a committed spin.
    let index = self.active_chamber.unwrap_or(0);
    let bullets = self.bullet_count();
    let outcome = if self.chambers[index] {
      RouletteOutcome::Died { bullets }
    } else {
      RouletteOutcome::Survived { bullets }
    };
    self.stage = RouletteStage::Fired;
    self.outcome = Some(outcome);
    Ok(outcome)
  }

  /// Hand the outcome over exactly once.
  pub fn take_outcome(&mut self) -> Option<RouletteOutcome> {
    if self.consumed {
      return None;
    }
    let outcome = self.outcome?;
    self.consumed = true;
    Some(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{rngs::StdRng, SeedableRng};

  fn loaded(bullets: &[usize]) -> RouletteSession {
    let mut s = RouletteSession::new();
    s.begin_loading().unwrap();
    for b in bullets {
      s.toggle_chamber(*b).unwrap();
    }
    s
  }

  fn fire_at(mut s: RouletteSession, index: usize) -> RouletteOutcome {
    s.spin_to(index).unwrap();
    s.advance().unwrap();
    s.advance().unwrap();
    s.fire().unwrap()
  }

  #[test]
  fn greed_table_values() {
    assert_eq!(greed_scaling(3), GreedScaling { survive_bonus: 50, jackpot_multiplier: 5 });
    assert_eq!(greed_scaling(0), GreedScaling { survive_bonus: 0, jackpot_multiplier: 0 });
    assert_eq!(greed_scaling(6), GreedScaling { survive_bonus: 0, jackpot_multiplier: 50 });
    assert_eq!(greed_table().len(), 7);
  }

  #[test]
  fn greed_lookup_ignores_stage() {
    let mut s = loaded(&[0, 2, 4]);
    assert_eq!(s.greed(), greed_scaling(3));
    s.spin_to(1).unwrap();
    assert_eq!(s.greed(), greed_scaling(3));
    s.advance().unwrap();
    s.advance().unwrap();
    assert_eq!(s.greed(), greed_scaling(3));
  }

  #[test]
  fn committed_chamber_decides_outcome() {
    assert_eq!(fire_at(loaded(&[0]), 0), RouletteOutcome::Died { bullets: 1 });
    assert_eq!(fire_at(loaded(&[0]), 3), RouletteOutcome::Survived { bullets: 1 });
  }

  #[test]
  fn empty_cylinder_cannot_spin() {
    let mut s = loaded(&[]);
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(s.spin(&mut rng), Err(RouletteError::NoBullets));
    s.toggle_chamber(5).unwrap();
    s.toggle_chamber(5).unwrap();
    assert_eq!(s.spin(&mut rng), Err(RouletteError::NoBullets));
  }

  #[test]
  fn chambers_lock_once_spinning() {
    let mut s = loaded(&[1]);
    let mut rng = StdRng::seed_from_u64(9);
    let idx = s.spin(&mut rng).unwrap();
    assert!(idx < CHAMBERS);
    assert!(matches!(s.toggle_chamber(2), Err(RouletteError::WrongStage { .. })));
    s.advance().unwrap();
    s.advance().unwrap();
    assert_eq!(s.active_chamber, Some(idx));
    assert!(matches!(s.advance(), Err(RouletteError::WrongStage { .. })));
  }

  #[test]
  fn stage_order_is_enforced() {
    let mut s = RouletteSession::new();
    assert!(matches!(s.toggle_chamber(0), Err(RouletteError::WrongStage { .. })));
    assert!(matches!(s.fire(), Err(RouletteError::WrongStage { .. })));
    s.begin_loading().unwrap();
    assert_eq!(s.toggle_chamber(6), Err(RouletteError::ChamberOutOfRange(6)));
  }

  #[test]
  fn outcome_is_consumed_once() {
    let mut s = loaded(&[0, 1]);
    s.spin_to(4).unwrap();
    s.advance().unwrap();
    s.advance().unwrap();
    s.fire().unwrap();
    assert_eq!(s.take_outcome(), Some(RouletteOutcome::Survived { bullets: 2 }));
    assert_eq!(s.take_outcome(), None);
  }

  #[test]
  fn outcome_selects_forced_boss() {
    let died = RouletteOutcome::Died { bullets: 3 };
    assert_eq!(died.survive_bonus(), 0);
    assert_eq!(
      died.forced_encounter(),
      ForcedEncounter::Roulette { kind: BossKind::RouletteExecution, jackpot_multiplier: Some(5) }
    );
    let survived = RouletteOutcome::Survived { bullets: 4 };
    assert_eq!(survived.survive_bonus(), 100);
    assert_eq!(survived.forced_encounter(), ForcedEncounter::Roulette { kind: BossKind::Roulette, jackpot_multiplier: None });
  }

  #[test]
  fn full_cylinder_always_dies() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..50 {
      let mut s = loaded(&[0, 1, 2, 3, 4, 5]);
      s.spin(&mut rng).unwrap();
      s.advance().unwrap();
      s.advance().unwrap();
      assert!(matches!(s.fire().unwrap(), RouletteOutcome::Died { bullets: 6 }));
    }
  }
}
