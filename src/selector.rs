//! Encounter selection: decides whether the next drill starts a boss fight or
//! a wager. Never re-rolls while an encounter is live.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::Mode;
use crate::encounter::{BossKind, BossState, EncounterState, WagerState};

pub const BOSS_CHANCE: f64 = 0.02;
/// Upper bound of the wager band; wagers roll in `[BOSS_CHANCE, WAGER_CEILING)`.
pub const WAGER_CEILING: f64 = 0.07;

const TRANSLATION_BOSSES: &[(BossKind, f64)] = &[
  (BossKind::Reverser, 0.40),
  (BossKind::Lightning, 0.30),
  (BossKind::Reaper, 0.30),
];

const LISTENING_BOSSES: &[(BossKind, f64)] = &[
  (BossKind::Blind, 0.30),
  (BossKind::Echo, 0.25),
  (BossKind::Lightning, 0.25),
  (BossKind::Reaper, 0.20),
];

/// Why an encounter is being forced instead of rolled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ForcedEncounter {
  /// Manual trigger; the intro still plays.
  Debug { kind: BossKind },
  /// Roulette outcome; its own intro already played.
  Roulette { kind: BossKind, jackpot_multiplier: Option<u32> },
}

pub fn boss_table(mode: Mode) -> &'static [(BossKind, f64)] {
  match mode {
    Mode::Translation => TRANSLATION_BOSSES,
    Mode::Listening => LISTENING_BOSSES,
  }
}

/// Pick the weighted entry that `u` in `[0, 1)` lands on.
pub fn pick_boss(mode: Mode, u: f64) -> BossKind {
  let table = boss_table(mode);
  let mut acc = 0.0;
  for (kind, weight) in table {
    acc += weight;
    if u < acc {
      return *kind;
    }
  }
  // Float slack at the top end lands on the last entry.
  table[table.len() - 1].0
}

/// Deterministic core of the roll, given both uniform draws.
pub fn encounter_from_rolls(mode: Mode, u: f64, u_kind: f64) -> EncounterState {
  if u < BOSS_CHANCE {
    EncounterState::boss(pick_boss(mode, u_kind), false)
  } else if u < WAGER_CEILING && mode == Mode::Listening {
    EncounterState::Wager(WagerState::new())
  } else {
    EncounterState::None
  }
}

/// Decide the encounter for the next drill.
///
/// A live encounter is returned untouched. A forced encounter skips the roll.
pub fn select_encounter<R: Rng>(
  rng: &mut R,
  mode: Mode,
  current: &EncounterState,
  forced: Option<ForcedEncounter>,
) -> EncounterState {
  if current.is_active() {
    return current.clone();
  }
  match forced {
    Some(ForcedEncounter::Debug { kind }) => EncounterState::boss(kind, false),
    Some(ForcedEncounter::Roulette { kind, jackpot_multiplier }) => {
      let mut boss = BossState::new(kind, true);
      boss.jackpot_multiplier = jackpot_multiplier;
      EncounterState::Boss(boss)
    }
    None => {
      let u: f64 = rng.gen();
      if u >= WAGER_CEILING {
        return EncounterState::None;
      }
      let u_kind: f64 = rng.gen();
      encounter_from_rolls(mode, u, u_kind)
    }
  }
}
