//! HTTP endpoint handlers. These are thin read-only views; play happens over `/ws`.

use std::sync::Arc;
use axum::{extract::{State, Query}, http::StatusCode, Json, response::IntoResponse};
use tracing::{error, info, instrument};

use crate::domain::{DifficultyTier, Mode, SkillProfile};
use crate::protocol::*;
use crate::state::AppState;
use crate::store::ProfileKey;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, llm: state.llm_enabled })
}

#[instrument(level = "info", skip(state), fields(user = %q.user, mode = ?q.mode))]
pub async fn http_get_profile(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ProfileQuery>,
) -> impl IntoResponse {
  let mode = q.mode.unwrap_or(Mode::Translation);
  let key = ProfileKey::new(q.user.clone(), mode);
  match state.services.store.read(&key).await {
    Ok(found) => {
      let stored = found.is_some();
      let profile = found.unwrap_or_else(|| SkillProfile::initial(mode, state.config.game.legacy_translation_track));
      info!(target: "rating", user = %q.user, %mode, rating = profile.rating, stored, "HTTP profile served");
      let out = ProfileOut { user: q.user, mode, profile, tier: DifficultyTier::for_rating(profile.rating), stored };
      (StatusCode::OK, Json(out)).into_response()
    }
    Err(e) => {
      error!(target: "drill_gauntlet", user = %q.user, error = %e, "Profile read failed");
      (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "profile unavailable" }))).into_response()
    }
  }
}

#[instrument(level = "info")]
pub async fn http_greed_table() -> impl IntoResponse {
  Json(greed_rows())
}
