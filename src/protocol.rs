//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{DifficultyTier, Drill, DrillSource, Mode, SkillProfile, VocabHint};
use crate::encounter::{BossKind, EncounterEvent, EncounterState, WagerTier};
use crate::fuse::FuseTimer;
use crate::roulette::{greed_table, GreedScaling, RouletteOutcome, RouletteSession};
use crate::selector::ForcedEncounter;
use crate::session::{AttemptReport, Fever, PendingTeardown, SessionSnapshot};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartSession {
        user: String,
        mode: Mode,
    },
    NextDrill {
        /// Debug trigger: start this boss instead of rolling.
        #[serde(default, rename = "forceBoss")]
        force_boss: Option<BossKind>,
    },
    SubmitAnswer {
        #[serde(rename = "drillId")]
        drill_id: String,
        answer: String,
    },
    AcknowledgeIntro,
    /// Leave the current presentation boss.
    ExitEncounter,
    ChooseWager {
        tier: WagerTier,
    },
    DoubleDown {
        accept: bool,
    },
    RouletteOpen,
    RouletteLoad,
    RouletteToggle {
        chamber: usize,
    },
    RouletteSpin,
    RouletteFire,
    Snapshot,
    EndSession,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Snapshot {
        snapshot: SnapshotOut,
    },
    Drill {
        drill: DrillOut,
    },
    AttemptResult {
        result: AttemptReport,
    },
    EncounterEvent {
        event: EncounterEvent,
    },
    Roulette {
        outcome: RouletteOutcome,
        snapshot: SnapshotOut,
    },
    Error {
        message: String,
    },
}

/// Drill as shown to the player. The reference answer stays on the server
/// until the attempt is scored.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillOut {
    pub id: String,
    pub mode: Mode,
    pub tier: DifficultyTier,
    pub source: DrillSource,
    pub source_text: String,
    pub vocab_hints: Vec<VocabHint>,
    pub encounter_kind: Option<BossKind>,
}

impl From<&Drill> for DrillOut {
    fn from(d: &Drill) -> Self {
        DrillOut {
            id: d.id.clone(),
            mode: d.mode,
            tier: d.tier,
            source: d.source,
            source_text: d.source_text.clone(),
            vocab_hints: d.vocab_hints.clone(),
            encounter_kind: d.encounter_kind,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouletteOut {
    #[serde(flatten)]
    pub table: RouletteSession,
    pub bullets: usize,
    pub greed: GreedScaling,
}

/// Everything the presentation layer needs to redraw the session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOut {
    pub mode: Mode,
    pub profile: SkillProfile,
    pub tier: DifficultyTier,
    pub encounter: EncounterState,
    pub fuse: FuseTimer,
    pub drill: Option<DrillOut>,
    pub drill_rated: bool,
    pub submitting: bool,
    pub teardown: Option<PendingTeardown>,
    pub roulette: Option<RouletteOut>,
    pub pending_forced: Option<ForcedEncounter>,
    pub fever: Fever,
}

impl From<&SessionSnapshot> for SnapshotOut {
    fn from(s: &SessionSnapshot) -> Self {
        SnapshotOut {
            mode: s.mode,
            profile: s.profile,
            tier: s.tier(),
            encounter: s.encounter.clone(),
            fuse: s.fuse,
            drill: s.drill.as_ref().map(|a| DrillOut::from(&a.drill)),
            drill_rated: s.drill.as_ref().is_some_and(|a| a.rated),
            submitting: s.submitting,
            teardown: s.teardown,
            roulette: s.roulette.as_ref().map(|r| RouletteOut {
                table: r.clone(),
                bullets: r.bullet_count(),
                greed: r.greed(),
            }),
            pending_forced: s.pending_forced,
            fever: s.fever,
        }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub llm: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub user: String,
    pub mode: Option<Mode>,
}

#[derive(Debug, Serialize)]
pub struct ProfileOut {
    pub user: String,
    pub mode: Mode,
    pub profile: SkillProfile,
    pub tier: DifficultyTier,
    /// False when the user has no stored profile yet.
    pub stored: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GreedRowOut {
    pub bullets: usize,
    pub survive_bonus: u32,
    pub jackpot_multiplier: u32,
}

pub fn greed_rows() -> Vec<GreedRowOut> {
    greed_table()
        .into_iter()
        .map(|(bullets, g)| GreedRowOut { bullets, survive_bonus: g.survive_bonus, jackpot_multiplier: g.jackpot_multiplier })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SkillProfile;

    #[test]
    fn parses_client_messages() {
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"next_drill","forceBoss":"reaper"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::NextDrill { force_boss: Some(BossKind::Reaper) }));
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"next_drill"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::NextDrill { force_boss: None }));
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"submit_answer","drillId":"d1","answer":"hola"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::SubmitAnswer { ref drill_id, .. } if drill_id == "d1"));
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"choose_wager","tier":"madness"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::ChooseWager { tier: WagerTier::Madness }));
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"exit_encounter"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::ExitEncounter));
        assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn snapshot_hides_reference_answer() {
        let mut s = SessionSnapshot::new(Mode::Translation, SkillProfile::starting_at(1200));
        s = s
            .deliver_drill(Drill {
                id: "d1".into(),
                mode: Mode::Translation,
                tier: DifficultyTier::Intermediate,
                source: DrillSource::Seed,
                source_text: "I am tired.".into(),
                reference_answer: "Estoy cansado.".into(),
                vocab_hints: vec![],
                encounter_kind: None,
            }, None)
            .unwrap()
            .snapshot;
        let json = serde_json::to_string(&ServerWsMessage::Snapshot { snapshot: SnapshotOut::from(&s) }).unwrap();
        assert!(json.contains(r#""type":"snapshot""#));
        assert!(json.contains("I am tired."));
        assert!(!json.contains("Estoy cansado."));
    }

    #[test]
    fn greed_rows_cover_every_bullet_count() {
        let rows = greed_rows();
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[3].survive_bonus, 50);
        assert_eq!(rows[6].jackpot_multiplier, 50);
    }
}
