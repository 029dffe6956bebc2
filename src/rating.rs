//! Elo-style rating engine. Pure functions only.
//!
//! The tier midpoint plays the opponent in a logistic expected-score model.
//! Raw scores are rescaled so that 3/10 or less counts as a total miss and
//! 10/10 as perfect before being compared to the expectation.

use crate::domain::{DifficultyTier, SkillProfile};

pub const K_FACTOR: f64 = 40.0;
/// K multiplier once the pre-attempt streak reaches `HOT_STREAK`.
pub const STREAK_K_MULTIPLIER: f64 = 1.25;
pub const HOT_STREAK: u32 = 2;
/// Flat bonus for a success that brings the streak to `BONUS_STREAK` or more.
pub const STREAK_BONUS: i32 = 2;
pub const BONUS_STREAK: u32 = 3;
/// Minimum raw score that counts as a success.
pub const SUCCESS_SCORE: f32 = 9.0;

pub fn is_success(raw_score: f32) -> bool {
  raw_score >= SUCCESS_SCORE
}

/// Probability-like expectation of beating an opponent rated `opponent`.
pub fn expected_score(rating: u32, opponent: u32) -> f64 {
  1.0 / (1.0 + 10f64.powf((opponent as f64 - rating as f64) / 400.0))
}

/// Map a 0–10 raw score onto the 0–1 performance axis.
pub fn normalized_score(raw_score: f32) -> f64 {
  ((raw_score as f64 - 3.0) / 7.0).clamp(0.0, 1.0)
}

pub fn streak_after(streak: u32, raw_score: f32) -> u32 {
  if is_success(raw_score) { streak.saturating_add(1) } else { 0 }
}

/// Rating change for one scored attempt, streak bonus included.
pub fn rating_delta(profile: &SkillProfile, tier: DifficultyTier, raw_score: f32) -> i32 {
  let expected = expected_score(profile.rating, tier.midpoint());
  let k = if profile.streak >= HOT_STREAK { K_FACTOR * STREAK_K_MULTIPLIER } else { K_FACTOR };
  let mut delta = (k * (normalized_score(raw_score) - expected)).round() as i32;
  if is_success(raw_score) && streak_after(profile.streak, raw_score) >= BONUS_STREAK {
    delta += STREAK_BONUS;
  }
  delta
}

/// Effect of one resolved attempt on a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatingOutcome {
  pub delta: i32,
  pub profile: SkillProfile,
}

/// Add `delta` to a rating, flooring at zero.
pub fn apply_delta(rating: u32, delta: i32) -> u32 {
  (rating as i64 + delta as i64).clamp(0, u32::MAX as i64) as u32
}

fn with_rating(profile: &SkillProfile, delta: i32, streak: u32) -> RatingOutcome {
  let rating = apply_delta(profile.rating, delta);
  RatingOutcome {
    delta,
    profile: SkillProfile { rating, streak, max_rating: profile.max_rating.max(rating) },
  }
}

/// Score one attempt. With an `override_delta` (boss or wager resolution)
/// the normal delta is replaced, but the streak still follows the success
/// signal; `force_streak_reset` zeroes it regardless.
pub fn settle_attempt(
  profile: &SkillProfile,
  tier: DifficultyTier,
  raw_score: f32,
  override_delta: Option<i32>,
  force_streak_reset: bool,
) -> RatingOutcome {
  let delta = override_delta.unwrap_or_else(|| rating_delta(profile, tier, raw_score));
  let streak = if force_streak_reset { 0 } else { streak_after(profile.streak, raw_score) };
  with_rating(profile, delta, streak)
}

/// Timeout penalty: fixed delta, streak zeroed.
pub fn settle_penalty(profile: &SkillProfile, penalty: i32) -> RatingOutcome {
  with_rating(profile, penalty, 0)
}

/// Bonus that leaves the streak alone (roulette survival).
pub fn settle_bonus(profile: &SkillProfile, bonus: i32) -> RatingOutcome {
  with_rating(profile, bonus, profile.streak)
}
