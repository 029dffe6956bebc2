//! Minimal OpenAI client backing the drill generation and scoring services.
//!
//! We only call chat.completions and request a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::Prompts;
use crate::domain::{DrillSource, GeneratedDrill, Mode, ScoreResult, Segment, VocabHint};
use crate::encounter::BossKind;
use crate::error::ServiceError;
use crate::services::{CancelToken, DrillRequest, DrillService, ScoreRequest, ScoringService};
use crate::util::{fill_template, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  pub prompts: Prompts,
}

#[derive(Deserialize)]
struct Gen {
  source_text: String,
  reference_answer: String,
  #[serde(default)]
  vocab_hints: Vec<GenHint>,
}

#[derive(Deserialize)]
struct GenHint {
  term: String,
  meaning: String,
}

#[derive(Deserialize)]
struct Eval {
  score: f32,
  #[serde(default)]
  feedback: String,
  #[serde(default)]
  segments: Option<Vec<Segment>>,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, fast_model, strong_model, prompts })
  }

  /// JSON-object chat completion returning the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model))]
  async fn chat_json_raw(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, ServiceError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "drill-gauntlet/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| ServiceError::Unavailable(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(ServiceError::Unavailable(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| ServiceError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    Ok(body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default())
  }
}

fn task_for(mode: Mode, reversed: bool) -> &'static str {
  match (mode, reversed) {
    (Mode::Translation, false) => "translate from English into the target language",
    (Mode::Translation, true) => "translate from the target language into English",
    (Mode::Listening, _) => "transcribe after hearing it read aloud (source_text and reference_answer are identical)",
  }
}

fn parse_drill(text: &str) -> Result<GeneratedDrill, ServiceError> {
  let gen: Gen = serde_json::from_str(text).map_err(|e| ServiceError::Malformed(format!("JSON parse error: {e}")))?;
  if gen.source_text.trim().is_empty() || gen.reference_answer.trim().is_empty() {
    return Err(ServiceError::Malformed("empty source_text or reference_answer".into()));
  }
  Ok(GeneratedDrill {
    source_text: gen.source_text.trim().to_string(),
    reference_answer: gen.reference_answer.trim().to_string(),
    vocab_hints: gen.vocab_hints.into_iter().map(|h| VocabHint { term: h.term, meaning: h.meaning }).collect(),
    source: DrillSource::Generated,
  })
}

fn parse_score(text: &str) -> Result<ScoreResult, ServiceError> {
  let e: Eval = serde_json::from_str(text).map_err(|e| ServiceError::Malformed(format!("JSON parse error: {e}")))?;
  if !e.score.is_finite() {
    return Err(ServiceError::Malformed("score is not a number".into()));
  }
  Ok(ScoreResult { score: e.score, feedback: e.feedback, segments: e.segments }.clamped())
}

#[async_trait]
impl DrillService for OpenAI {
  #[instrument(level = "info", skip(self, cancel), fields(mode = %req.mode, tier = ?req.difficulty_tier, model = %self.strong_model))]
  async fn generate(&self, req: &DrillRequest, cancel: &CancelToken) -> Result<GeneratedDrill, ServiceError> {
    let reversed = req.forced_encounter_kind == Some(BossKind::Reverser);
    let rating = req.rating.to_string();
    let tier = format!("{:?}", req.difficulty_tier);
    let encounter = req.forced_encounter_kind.map(|k| k.as_str()).unwrap_or("none");
    let user = fill_template(
      &self.prompts.drill_user_template,
      &[
        ("mode", req.mode.as_str()),
        ("rating", &rating),
        ("tier", &tier),
        ("encounter", encounter),
        ("task", task_for(req.mode, reversed)),
      ],
    );

    let start = Instant::now();
    let result = self.chat_json_raw(&self.strong_model, &self.prompts.drill_system, &user, 0.9).await;
    let elapsed = start.elapsed();
    let text = match result {
      Ok(t) => t,
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during drill generation");
        return Err(e);
      }
    };
    cancel.check()?;
    let drill = parse_drill(&text)?;
    cancel.check()?;

    info!(
      ?elapsed,
      source_preview = %drill.source_text.chars().take(40).collect::<String>(),
      hints = drill.vocab_hints.len(),
      "Drill generated"
    );
    Ok(drill)
  }
}

#[async_trait]
impl ScoringService for OpenAI {
  #[instrument(level = "info", skip(self, req), fields(mode = %req.mode, answer_len = req.user_answer.len(), model = %self.fast_model))]
  async fn score(&self, req: &ScoreRequest) -> Result<ScoreResult, ServiceError> {
    let user = fill_template(
      &self.prompts.score_user_template,
      &[
        ("mode", req.mode.as_str()),
        ("source", &req.source_text),
        ("reference", &req.reference_answer),
        ("answer", &req.user_answer),
      ],
    );
    let text = self.chat_json_raw(&self.fast_model, &self.prompts.score_system, &user, 0.2).await?;
    parse_score(&text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
