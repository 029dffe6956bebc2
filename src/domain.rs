//! Domain models shared by the core: practice modes, difficulty tiers, the
//! persisted skill profile, and drills as handed to the presentation layer.

use serde::{Deserialize, Serialize};

use crate::encounter::BossKind;

/// Rating a fresh profile starts at.
pub const DEFAULT_RATING: u32 = 1200;
/// Starting rating of the legacy translation track.
pub const LEGACY_TRANSLATION_RATING: u32 = 600;

/// Which practice track a drill belongs to. Each mode keeps its own profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  /// Translate the source sentence into the target language.
  Translation,
  /// Transcribe a spoken sentence.
  Listening,
}

impl Mode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Mode::Translation => "translation",
      Mode::Listening => "listening",
    }
  }
}

impl std::fmt::Display for Mode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Nine ordered difficulty levels, each standing in for an "opponent" rating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
  Beginner,
  Elementary,
  PreIntermediate,
  Intermediate,
  UpperIntermediate,
  Advanced,
  Proficient,
  Expert,
  Master,
}

impl DifficultyTier {
  pub const ALL: [DifficultyTier; 9] = [
    DifficultyTier::Beginner,
    DifficultyTier::Elementary,
    DifficultyTier::PreIntermediate,
    DifficultyTier::Intermediate,
    DifficultyTier::UpperIntermediate,
    DifficultyTier::Advanced,
    DifficultyTier::Proficient,
    DifficultyTier::Expert,
    DifficultyTier::Master,
  ];

  /// Representative rating of the tier: 200, 600, ..., 3400.
  pub fn midpoint(&self) -> u32 {
    200 + 400 * self.index() as u32
  }

  pub fn index(&self) -> usize {
    *self as usize
  }

  /// Tier whose 400-wide band contains `rating`; ratings past the top band
  /// stay on the last tier.
  pub fn for_rating(rating: u32) -> Self {
    let idx = (rating / 400) as usize;
    Self::ALL[idx.min(Self::ALL.len() - 1)]
  }
}

/// Persisted rating state for one user in one mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillProfile {
  pub rating: u32,
  pub streak: u32,
  pub max_rating: u32,
}

impl SkillProfile {
  pub fn starting_at(rating: u32) -> Self {
    Self { rating, streak: 0, max_rating: rating }
  }

  /// Profile created on first use of a mode.
  pub fn initial(mode: Mode, legacy_translation_track: bool) -> Self {
    match mode {
      Mode::Translation if legacy_translation_track => Self::starting_at(LEGACY_TRANSLATION_RATING),
      _ => Self::starting_at(DEFAULT_RATING),
    }
  }
}

/// Vocabulary help attached to a drill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabHint {
  pub term: String,
  pub meaning: String,
}

/// Where a drill came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillSource {
  #[default]
  Generated,
  LocalBank,
  Seed,
}

/// Sentence pair produced by the drill generation service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDrill {
  pub source_text: String,
  pub reference_answer: String,
  #[serde(default)]
  pub vocab_hints: Vec<VocabHint>,
  #[serde(default)]
  pub source: DrillSource,
}

/// One generated drill instance. A fresh `id` is minted for every
/// generation, even when the sentence text repeats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drill {
  pub id: String,
  pub mode: Mode,
  pub tier: DifficultyTier,
  pub source: DrillSource,
  pub source_text: String,
  pub reference_answer: String,
  pub vocab_hints: Vec<VocabHint>,
  #[serde(default)]
  pub encounter_kind: Option<BossKind>,
}

impl Drill {
  /// The reverser boss flips the direction of a translation drill.
  pub fn is_reversed(&self) -> bool {
    matches!(self.encounter_kind, Some(BossKind::Reverser))
  }
}

/// Feedback segment marking a span of the user's answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
  pub text: String,
  #[serde(default)]
  pub correct: bool,
}

/// Result of the scoring service. `score` is authoritative in `[0, 10]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
  pub score: f32,
  pub feedback: String,
  #[serde(default)]
  pub segments: Option<Vec<Segment>>,
}

impl ScoreResult {
  /// Clamp the score into `[0, 10]`; NaN counts as a zero.
  pub fn clamped(mut self) -> Self {
    self.score = if self.score.is_nan() { 0.0 } else { self.score.clamp(0.0, 10.0) };
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tier_midpoints_step_by_400() {
    let mids: Vec<u32> = DifficultyTier::ALL.iter().map(|t| t.midpoint()).collect();
    assert_eq!(mids, vec![200, 600, 1000, 1400, 1800, 2200, 2600, 3000, 3400]);
  }

  #[test]
  fn tier_for_rating_uses_bands() {
    assert_eq!(DifficultyTier::for_rating(0), DifficultyTier::Beginner);
    assert_eq!(DifficultyTier::for_rating(1200), DifficultyTier::Intermediate);
    assert_eq!(DifficultyTier::for_rating(1199), DifficultyTier::PreIntermediate);
    assert_eq!(DifficultyTier::for_rating(9000), DifficultyTier::Master);
  }

  #[test]
  fn initial_profiles() {
    assert_eq!(SkillProfile::initial(Mode::Listening, true).rating, 1200);
    assert_eq!(SkillProfile::initial(Mode::Translation, false).rating, 1200);
    let legacy = SkillProfile::initial(Mode::Translation, true);
    assert_eq!(legacy, SkillProfile { rating: 600, streak: 0, max_rating: 600 });
  }

  #[test]
  fn score_is_clamped() {
    let s = ScoreResult { score: 14.0, feedback: String::new(), segments: None }.clamped();
    assert_eq!(s.score, 10.0);
    let s = ScoreResult { score: f32::NAN, feedback: String::new(), segments: None }.clamped();
    assert_eq!(s.score, 0.0);
  }
}
