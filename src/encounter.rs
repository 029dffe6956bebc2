//! Encounter state machine: boss fights and wagers layered over normal drilling.
//!
//! Exactly one `EncounterState` is live per session. `resolve_attempt`
//! consumes one scored attempt and returns the rating override (if the
//! encounter replaces normal scoring), the next state and an optional event
//! for the presentation layer. All functions here are total: out-of-range
//! counters are clamped and logged, never propagated as errors.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rating::is_success;

pub const REAPER_HP: u8 = 3;
pub const REAPER_VICTORY_REWARD: i32 = 50;
pub const REAPER_DEFEAT_PENALTY: i32 = -50;
pub const MAX_DOUBLE_DOWNS: u8 = 2;
pub const DOUBLE_DOWN_PAYOUT_GROWTH: f64 = 2.5;
pub const DOUBLE_DOWN_LOSS_GROWTH: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BossKind {
  /// Listening without the transcript shown.
  Blind,
  /// Answer before the fuse burns down.
  Lightning,
  /// Audio plays with an echo.
  Echo,
  /// Translation direction is flipped.
  Reverser,
  /// Hit-point duel; overrides scoring entirely.
  Reaper,
  /// Forced after surviving the roulette.
  Roulette,
  /// Forced after losing the roulette.
  RouletteExecution,
}

impl BossKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      BossKind::Blind => "blind",
      BossKind::Lightning => "lightning",
      BossKind::Echo => "echo",
      BossKind::Reverser => "reverser",
      BossKind::Reaper => "reaper",
      BossKind::Roulette => "roulette",
      BossKind::RouletteExecution => "roulette_execution",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerTier {
  Safe,
  Risky,
  Madness,
}

impl WagerTier {
  /// Base payout of a won attempt, before double-down growth.
  pub fn base_win(&self) -> f64 {
    match self {
      WagerTier::Safe => 0.0,
      WagerTier::Risky => 60.0,
      WagerTier::Madness => 150.0,
    }
  }

  /// Base loss of a failed attempt, before double-down growth.
  pub fn base_loss(&self) -> i32 {
    match self {
      WagerTier::Safe => 0,
      WagerTier::Risky => -20,
      WagerTier::Madness => -50,
    }
  }

  pub fn is_staked(&self) -> bool {
    !matches!(self, WagerTier::Safe)
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BossState {
  pub kind: BossKind,
  pub intro_acknowledged: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hp: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_hp: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub player_hp: Option<u8>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub player_max_hp: Option<u8>,
  /// Roulette jackpot multiplier carried into an execution boss.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub jackpot_multiplier: Option<u32>,
}

impl BossState {
  /// A fresh boss. Only the reaper carries hit points.
  pub fn new(kind: BossKind, intro_acknowledged: bool) -> Self {
    let hp = (kind == BossKind::Reaper).then_some(REAPER_HP);
    Self {
      kind,
      intro_acknowledged,
      hp,
      max_hp: hp,
      player_hp: hp,
      player_max_hp: hp,
      jackpot_multiplier: None,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerState {
  pub tier: Option<WagerTier>,
  pub double_down_count: u8,
  pub intro_acknowledged: bool,
  /// A win is waiting on the double-down decision.
  pub double_down_offered: bool,
}

impl WagerState {
  pub fn new() -> Self {
    Self { tier: None, double_down_count: 0, intro_acknowledged: false, double_down_offered: false }
  }
}

impl Default for WagerState {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EncounterState {
  #[default]
  None,
  Boss(BossState),
  Wager(WagerState),
}

impl EncounterState {
  pub fn boss(kind: BossKind, intro_acknowledged: bool) -> Self {
    EncounterState::Boss(BossState::new(kind, intro_acknowledged))
  }

  pub fn is_active(&self) -> bool {
    !matches!(self, EncounterState::None)
  }

  pub fn boss_kind(&self) -> Option<BossKind> {
    match self {
      EncounterState::Boss(b) => Some(b.kind),
      _ => None,
    }
  }

  pub fn intro_acknowledged(&self) -> bool {
    match self {
      EncounterState::None => false,
      EncounterState::Boss(b) => b.intro_acknowledged,
      EncounterState::Wager(w) => w.intro_acknowledged,
    }
  }

  /// Fuse length in 100ms ticks when this encounter runs against the clock.
  /// Ignores intro and submission gating; see `fuse_should_run`.
  pub fn fuse_ticks(&self) -> Option<u32> {
    match self {
      EncounterState::Boss(b) if b.kind == BossKind::Lightning => Some(crate::fuse::LIGHTNING_TICKS),
      EncounterState::Wager(WagerState { tier: Some(t), double_down_offered: false, .. }) if t.is_staked() => {
        Some(crate::fuse::WAGER_TICKS)
      }
      _ => None,
    }
  }

  /// True iff a fuse should be burning for this encounter right now.
  pub fn fuse_should_run(&self, submitting: bool) -> bool {
    !submitting && self.intro_acknowledged() && self.fuse_ticks().is_some()
  }

  /// Rating penalty applied when the fuse runs out.
  pub fn timeout_penalty(&self) -> i32 {
    match self {
      EncounterState::Boss(b) if b.kind == BossKind::Lightning => -20,
      EncounterState::Wager(WagerState { tier: Some(WagerTier::Risky), .. }) => -20,
      _ => -50,
    }
  }
}

/// Something the presentation layer should react to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EncounterEvent {
  BossHit { hp: u8 },
  PlayerHit { player_hp: u8 },
  BossDefeated { reward: i32 },
  PlayerDied { penalty: i32 },
  WagerWon { payout: i32, double_down_count: u8 },
  DoubleDownOffered { payout: i32, next_count: u8 },
  WagerLost { loss: i32 },
  WagerClosed,
  FuseExpired { penalty: i32 },
}

/// Result of consuming one attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
  /// Replaces the normal rating delta when present.
  pub rating_override: Option<i32>,
  pub next: EncounterState,
  pub event: Option<EncounterEvent>,
  pub force_streak_reset: bool,
  /// The encounter ended on a terminal visual; clear it after the delay.
  pub schedule_teardown: bool,
}

impl Resolution {
  fn passthrough(state: &EncounterState) -> Self {
    Self { rating_override: None, next: state.clone(), event: None, force_streak_reset: false, schedule_teardown: false }
  }
}

/// Consume one scored attempt against the live encounter.
pub fn resolve_attempt(state: &EncounterState, score: f32) -> Resolution {
  match state {
    EncounterState::None => Resolution::passthrough(state),
    // The duel starts once its intro has been dismissed.
    EncounterState::Boss(b) if b.kind == BossKind::Reaper && b.intro_acknowledged => resolve_reaper(b, is_success(score)),
    EncounterState::Boss(_) => Resolution::passthrough(state),
    EncounterState::Wager(w) => resolve_wager(w, is_success(score)),
  }
}

fn resolve_reaper(boss: &BossState, success: bool) -> Resolution {
  let mut next = boss.clone();
  if success {
    let hp = clamp_hp(boss.hp, "hp").saturating_sub(1);
    next.hp = Some(hp);
    if hp == 0 {
      debug!(target: "encounter", "Reaper defeated");
      return Resolution {
        rating_override: Some(REAPER_VICTORY_REWARD),
        next: EncounterState::None,
        event: Some(EncounterEvent::BossDefeated { reward: REAPER_VICTORY_REWARD }),
        force_streak_reset: false,
        schedule_teardown: false,
      };
    }
    Resolution {
      rating_override: Some(0),
      next: EncounterState::Boss(next),
      event: Some(EncounterEvent::BossHit { hp }),
      force_streak_reset: false,
      schedule_teardown: false,
    }
  } else {
    let player_hp = clamp_hp(boss.player_hp, "player_hp").saturating_sub(1);
    next.player_hp = Some(player_hp);
    if player_hp == 0 {
      debug!(target: "encounter", "Player fell to the reaper");
      // Terminal values stay visible until the teardown fires.
      return Resolution {
        rating_override: Some(REAPER_DEFEAT_PENALTY),
        next: EncounterState::Boss(next),
        event: Some(EncounterEvent::PlayerDied { penalty: REAPER_DEFEAT_PENALTY }),
        force_streak_reset: true,
        schedule_teardown: true,
      };
    }
    Resolution {
      rating_override: Some(0),
      next: EncounterState::Boss(next),
      event: Some(EncounterEvent::PlayerHit { player_hp }),
      force_streak_reset: false,
      schedule_teardown: false,
    }
  }
}

fn clamp_hp(hp: Option<u8>, field: &'static str) -> u8 {
  match hp {
    Some(v) if v <= REAPER_HP => v,
    Some(v) => {
      warn!(target: "encounter", field, value = v, "Reaper counter above max; clamping");
      REAPER_HP
    }
    None => {
      warn!(target: "encounter", field, "Reaper without hit points; assuming full");
      REAPER_HP
    }
  }
}

fn resolve_wager(wager: &WagerState, success: bool) -> Resolution {
  let tier = match wager.tier {
    Some(t) if t.is_staked() && wager.intro_acknowledged => t,
    // No stake on the table: normal scoring.
    _ => return Resolution::passthrough(&EncounterState::Wager(wager.clone())),
  };

  if wager.double_down_offered {
    // Answering instead of choosing walks away from the offer.
    debug!(target: "encounter", "Attempt while double-down pending; closing wager");
    return Resolution {
      rating_override: None,
      next: EncounterState::None,
      event: Some(EncounterEvent::WagerClosed),
      force_streak_reset: false,
      schedule_teardown: false,
    };
  }

  let count = clamp_double_downs(wager.double_down_count);
  if success {
    let payout = (tier.base_win() * DOUBLE_DOWN_PAYOUT_GROWTH.powi(count as i32)).round() as i32;
    let (next, event) = if count < MAX_DOUBLE_DOWNS {
      let mut next = wager.clone();
      next.double_down_count = count;
      next.double_down_offered = true;
      (EncounterState::Wager(next), EncounterEvent::DoubleDownOffered { payout, next_count: count + 1 })
    } else {
      (EncounterState::None, EncounterEvent::WagerWon { payout, double_down_count: count })
    };
    Resolution { rating_override: Some(payout), next, event: Some(event), force_streak_reset: false, schedule_teardown: false }
  } else {
    let loss = tier.base_loss() * DOUBLE_DOWN_LOSS_GROWTH.pow(count as u32);
    Resolution {
      rating_override: Some(loss),
      next: EncounterState::None,
      event: Some(EncounterEvent::WagerLost { loss }),
      force_streak_reset: true,
      schedule_teardown: false,
    }
  }
}

fn clamp_double_downs(count: u8) -> u8 {
  if count > MAX_DOUBLE_DOWNS {
    warn!(target: "encounter", count, "Double-down count above cap; clamping");
    MAX_DOUBLE_DOWNS
  } else {
    count
  }
}

/// Walk away from the live encounter. Only presentation bosses (no hit
/// points, no stake) can be left this way; returns `None` for the rest.
pub fn exit_encounter(state: &EncounterState) -> Option<EncounterState> {
  match state {
    EncounterState::Boss(b) if b.kind != BossKind::Reaper => Some(EncounterState::None),
    _ => None,
  }
}

/// Dismiss the intro screen of the live encounter.
pub fn acknowledge_intro(state: &EncounterState) -> EncounterState {
  match state {
    EncounterState::None => EncounterState::None,
    EncounterState::Boss(b) => EncounterState::Boss(BossState { intro_acknowledged: true, ..b.clone() }),
    EncounterState::Wager(w) => EncounterState::Wager(WagerState { intro_acknowledged: true, ..w.clone() }),
  }
}

/// Pick the stake of a fresh wager. `Safe` closes the encounter at once.
/// Returns `None` when no wager is waiting on a tier.
pub fn choose_wager_tier(state: &EncounterState, tier: WagerTier) -> Option<EncounterState> {
  match state {
    EncounterState::Wager(w) if w.tier.is_none() => {
      if tier.is_staked() {
        Some(EncounterState::Wager(WagerState { tier: Some(tier), intro_acknowledged: true, ..w.clone() }))
      } else {
        Some(EncounterState::None)
      }
    }
    _ => None,
  }
}

/// Answer a pending double-down offer. Returns `None` when nothing is offered.
pub fn answer_double_down(state: &EncounterState, accept: bool) -> Option<EncounterState> {
  match state {
    EncounterState::Wager(w) if w.double_down_offered => {
      if accept && w.double_down_count < MAX_DOUBLE_DOWNS {
        Some(EncounterState::Wager(WagerState {
          double_down_count: w.double_down_count + 1,
          double_down_offered: false,
          ..w.clone()
        }))
      } else {
        Some(EncounterState::None)
      }
    }
    _ => None,
  }
}
