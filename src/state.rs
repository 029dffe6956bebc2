//! Application state: configuration, the drill and scoring services, and the
//! profile store shared by every WebSocket session.
//!
//! With OPENAI_API_KEY set, the LLM services are wrapped so that failures fall
//! back to the local seed bank and the offline scorer. Without it, the local
//! services are used directly.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{load_config_from_env, AppConfig};
use crate::logic::{LocalScorer, WithFallback};
use crate::openai::OpenAI;
use crate::orchestrator::Services;
use crate::seeds::SeedDrills;
use crate::store::JsonFileProfileStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: Services,
    /// Whether an LLM backs generation and scoring.
    pub llm_enabled: bool,
}

impl AppState {
    /// Build state from env: load config, seed the local bank, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_config_from_env().unwrap_or_default();
        let seeds = SeedDrills::new(config.drills.clone());
        info!(target: "drill", bank = seeds.len(), configured = config.drills.len(), "Startup drill inventory");

        let store = Arc::new(JsonFileProfileStore::new(&config.game.profile_dir));
        info!(target: "drill_gauntlet", profile_dir = %config.game.profile_dir, "Profiles stored as JSON files");

        let openai = OpenAI::from_env(config.prompts.clone());
        let llm_enabled = openai.is_some();
        let services = match openai {
            Some(oa) => {
                info!(target: "drill_gauntlet", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, "OpenAI enabled.");
                Services {
                    drills: Arc::new(WithFallback::new(oa.clone(), seeds)),
                    scoring: Arc::new(WithFallback::new(oa, LocalScorer)),
                    store,
                }
            }
            None => {
                info!(target: "drill_gauntlet", "OpenAI disabled (no OPENAI_API_KEY). Using seed drills and local scoring.");
                Services { drills: Arc::new(seeds), scoring: Arc::new(LocalScorer), store }
            }
        };

        Self { config, services, llm_enabled }
    }

    /// State with explicit collaborators.
    pub fn with_services(config: AppConfig, services: Services) -> Self {
        Self { config, services, llm_enabled: false }
    }
}
