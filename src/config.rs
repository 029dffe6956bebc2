//! Loading application configuration (prompts, game tuning, local drill bank) from TOML.
//!
//! See `AppConfig`, `Prompts` and `GameTuning` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{DifficultyTier, Mode, VocabHint};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub game: GameTuning,
  #[serde(default)]
  pub drills: Vec<DrillCfg>,
}

/// Drill entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct DrillCfg {
  pub mode: Mode,
  pub tier: DifficultyTier,
  pub source_text: String,
  pub reference_answer: String,
  #[serde(default)] pub vocab_hints: Vec<VocabHint>,
}

/// Timings and storage knobs. Scoring constants are fixed in code.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GameTuning {
  /// How long a terminal encounter stays on screen before it clears.
  pub teardown_delay_ms: u64,
  pub spin_ms: u64,
  pub slowmo_ms: u64,
  pub profile_dir: String,
  /// Translation profiles start at 600 instead of 1200.
  pub legacy_translation_track: bool,
}

impl Default for GameTuning {
  fn default() -> Self {
    Self {
      teardown_delay_ms: 3_000,
      spin_ms: 1_200,
      slowmo_ms: 1_500,
      profile_dir: "./profiles".into(),
      legacy_translation_track: false,
    }
  }
}

/// Prompts used by the OpenAI client. Override them in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub drill_system: String,
  pub drill_user_template: String,
  pub score_system: String,
  pub score_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      drill_system: "You are a language drill generator. Respond ONLY with strict JSON.".into(),
      drill_user_template: "Mode: {mode}. Learner rating: {rating} (difficulty tier '{tier}'). Encounter: {encounter}.\nGenerate ONE short natural sentence for the learner to {task}. Return JSON with fields: source_text, reference_answer, vocab_hints (array of {\"term\", \"meaning\"}, at most 3).".into(),
      score_system: "You are a strict but fair language examiner. Reply as compact JSON.".into(),
      score_user_template: "Mode: {mode}. Source: {source}\nReference: {reference}\nLearner answer: {answer}\nReturn JSON {\"score\": number 0-10, \"feedback\": string, \"segments\": [{\"text\": string, \"correct\": boolean}]}. 10 = perfect meaning and grammar; ignore punctuation and casing.".into(),
    }
  }
}

/// Attempt to load `AppConfig` from GAUNTLET_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("GAUNTLET_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "drill_gauntlet", %path, drills = cfg.drills.len(), "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "drill_gauntlet", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "drill_gauntlet", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = parse_config("").unwrap();
    assert_eq!(cfg.game.teardown_delay_ms, 3_000);
    assert!(cfg.drills.is_empty());
    assert!(cfg.prompts.drill_user_template.contains("{mode}"));
  }

  #[test]
  fn partial_sections_merge_with_defaults() {
    let cfg = parse_config(
      r#"
      [game]
      legacy_translation_track = true
      spin_ms = 10

      [prompts]
      score_system = "Be kind."

      [[drills]]
      mode = "listening"
      tier = "upper_intermediate"
      source_text = "Il pleut."
      reference_answer = "Il pleut."
      "#,
    )
    .unwrap();
    assert!(cfg.game.legacy_translation_track);
    assert_eq!(cfg.game.spin_ms, 10);
    assert_eq!(cfg.game.slowmo_ms, 1_500);
    assert_eq!(cfg.prompts.score_system, "Be kind.");
    assert!(!cfg.prompts.drill_system.is_empty());
    assert_eq!(cfg.drills[0].tier, DifficultyTier::UpperIntermediate);
  }
}
