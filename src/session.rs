//! Session reducer.
//!
//! The whole live session (profile, encounter, fuse, current drill, roulette)
//! is one `SessionSnapshot` value. Each event is applied by a method that
//! borrows the current snapshot and returns the next one plus the effects
//! the driver must carry out (persisting, scheduling delayed transitions,
//! publishing encounter events). Nothing here touches time, IO or tasks.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{DifficultyTier, Drill, Mode, ScoreResult, SkillProfile};
use crate::encounter::{self, EncounterEvent, EncounterState, WagerTier};
use crate::error::{SessionError, SessionResult};
use crate::fuse::{just_expired, FusePhase, FuseTimer};
use crate::rating::{self, is_success};
use crate::roulette::{RouletteOutcome, RouletteSession, RouletteStage};
use crate::selector::{select_encounter, ForcedEncounter};
use crate::services::{DrillRequest, ScoreRequest};

/// Consecutive plain successes that light up fever mode.
pub const FEVER_COMBO: u32 = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct ActiveDrill {
  pub drill: Drill,
  /// One-shot flag: the first resolved attempt rates, replays do not.
  pub rated: bool,
}

/// Cosmetic combo counter; never feeds rating math.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Fever {
  pub combo: u32,
  pub active: bool,
}

impl Fever {
  fn after(self, success: bool, in_encounter: bool) -> Self {
    if !success {
      return Fever::default();
    }
    if in_encounter {
      return self;
    }
    let combo = self.combo + 1;
    Fever { combo, active: combo >= FEVER_COMBO }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
  PlayerDied,
  FuseExpired,
}

/// Terminal encounter state waiting out its presentation delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PendingTeardown {
  pub id: u64,
  pub reason: TeardownReason,
}

/// Work the driver performs after a transition.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
  Persist(SkillProfile),
  Encounter(EncounterEvent),
  /// Deliver `teardown_elapsed(id)` after the presentation delay.
  ScheduleTeardown { id: u64 },
  /// Deliver `roulette_advance(from)` after the stage's animation time.
  ScheduleRouletteAdvance { from: RouletteStage },
}

/// What the user sees after an attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptReport {
  pub drill_id: String,
  pub score: f32,
  pub feedback: String,
  pub expected: String,
  pub delta: i32,
  pub rating: u32,
  pub streak: u32,
  /// A replay of an already rated drill.
  pub practice: bool,
  pub event: Option<EncounterEvent>,
}

/// A drill request and the encounter it was rolled under.
#[derive(Clone, Debug, PartialEq)]
pub struct DrillPlan {
  pub request: DrillRequest,
  /// Encounter to start with the drill; `None` while one is already live.
  pub staged: Option<EncounterState>,
  consumes_forced: bool,
}

/// Next snapshot, effects to run, and an operation-specific value.
#[derive(Clone, Debug)]
pub struct Transition<T = ()> {
  pub snapshot: SessionSnapshot,
  pub effects: Vec<Effect>,
  pub value: T,
}

impl<T> Transition<T> {
  fn new(snapshot: SessionSnapshot, effects: Vec<Effect>, value: T) -> Self {
    Self { snapshot, effects, value }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
  pub mode: Mode,
  pub profile: SkillProfile,
  pub encounter: EncounterState,
  pub fuse: FuseTimer,
  pub drill: Option<ActiveDrill>,
  pub submitting: bool,
  pub teardown: Option<PendingTeardown>,
  pub roulette: Option<RouletteSession>,
  pub pending_forced: Option<ForcedEncounter>,
  pub fever: Fever,
  next_timer_id: u64,
}

impl SessionSnapshot {
  pub fn new(mode: Mode, profile: SkillProfile) -> Self {
    Self {
      mode,
      profile,
      encounter: EncounterState::None,
      fuse: FuseTimer::idle(),
      drill: None,
      submitting: false,
      teardown: None,
      roulette: None,
      pending_forced: None,
      fever: Fever::default(),
      next_timer_id: 0,
    }
  }

  pub fn tier(&self) -> DifficultyTier {
    DifficultyTier::for_rating(self.profile.rating)
  }

  fn schedule_teardown(&mut self, reason: TeardownReason, effects: &mut Vec<Effect>) {
    self.next_timer_id += 1;
    let id = self.next_timer_id;
    self.teardown = Some(PendingTeardown { id, reason });
    self.fuse = self.fuse.cancel();
    effects.push(Effect::ScheduleTeardown { id });
  }

  fn guard_resolving(&self) -> SessionResult<()> {
    if self.teardown.is_some() || self.fuse.is_expired() {
      Err(SessionError::EncounterResolving)
    } else {
      Ok(())
    }
  }

  /// Re-evaluate the fuse after the encounter or drill changed. A fresh
  /// attempt cycle (unrated drill, acknowledged intro) arms a full fuse.
  fn sync_fuse(&mut self, rearm: bool) {
    if self.fuse.is_expired() {
      return;
    }
    let Some(ticks) = self.encounter.fuse_ticks() else {
      self.fuse = self.fuse.cancel();
      return;
    };
    let fresh_cycle = self.drill.as_ref().is_some_and(|d| !d.rated);
    if rearm && fresh_cycle && self.encounter.fuse_should_run(self.submitting) {
      self.fuse = FuseTimer::armed(ticks);
    }
  }

  /// Roll (or force) the encounter for the next drill and build its request.
  /// The snapshot is left as is; the rolled encounter travels in the plan and
  /// only goes live when `deliver_drill` installs the drill.
  pub fn begin_drill_request<R: Rng>(
    &self,
    rng: &mut R,
    debug_force: Option<ForcedEncounter>,
  ) -> SessionResult<Transition<DrillPlan>> {
    self.guard_resolving()?;
    if self.submitting {
      return Err(SessionError::SubmissionInFlight);
    }
    let (staged, consumes_forced) = if self.encounter.is_active() {
      (None, false)
    } else {
      let forced = match (self.pending_forced, debug_force) {
        (Some(pending), Some(ignored)) => {
          warn!(target: "encounter", ?pending, ?ignored, "Roulette outcome pending; debug force ignored");
          Some(pending)
        }
        (pending, debug) => pending.or(debug),
      };
      (Some(select_encounter(rng, self.mode, &self.encounter, forced)), self.pending_forced.is_some())
    };
    let upcoming = staged.as_ref().unwrap_or(&self.encounter);
    let request = DrillRequest {
      mode: self.mode,
      difficulty_tier: self.tier(),
      rating: self.profile.rating,
      forced_encounter_kind: upcoming.boss_kind(),
    };
    let plan = DrillPlan { request, staged, consumes_forced };
    Ok(Transition::new(self.clone(), vec![], plan))
  }

  /// Install a freshly generated drill; clears the one-shot rated flag.
  ///
  /// With a plan, its staged encounter goes live here, unless an encounter
  /// is already running. The installed drill carries the kind of the
  /// encounter it is actually played under.
  pub fn deliver_drill(&self, mut drill: Drill, plan: Option<&DrillPlan>) -> SessionResult<Transition<Drill>> {
    self.guard_resolving()?;
    let mut next = self.clone();
    let staged = plan.and_then(|p| p.staged.as_ref().map(|e| (e, p.consumes_forced)));
    if let Some((staged, consumes_forced)) = staged.filter(|_| !self.encounter.is_active()) {
      next.encounter = staged.clone();
      if consumes_forced {
        next.pending_forced = None;
      }
      if let Some(kind) = next.encounter.boss_kind() {
        info!(target: "encounter", mode = %self.mode, kind = kind.as_str(), "Boss encounter started");
      } else if next.encounter.is_active() {
        info!(target: "encounter", mode = %self.mode, "Wager encounter started");
      }
    }
    drill.encounter_kind = next.encounter.boss_kind();
    next.drill = Some(ActiveDrill { drill: drill.clone(), rated: false });
    next.submitting = false;
    next.sync_fuse(true);
    Ok(Transition::new(next, vec![], drill))
  }

  /// Walk away from a presentation boss; the current drill stays playable.
  pub fn exit_encounter(&self) -> SessionResult<Transition> {
    self.guard_resolving()?;
    if self.submitting {
      return Err(SessionError::SubmissionInFlight);
    }
    let left = encounter::exit_encounter(&self.encounter)
      .ok_or(SessionError::InvalidCommand("this encounter cannot be exited"))?;
    debug!(target: "encounter", kind = ?self.encounter.boss_kind(), "Encounter exited");
    let mut next = self.clone();
    next.encounter = left;
    next.fuse = next.fuse.cancel();
    Ok(Transition::new(next, vec![], ()))
  }

  /// Lock the drill for scoring and pause the fuse.
  pub fn begin_submit(&self, drill_id: &str, answer: &str) -> SessionResult<Transition<ScoreRequest>> {
    self.guard_resolving()?;
    let active = self.drill.as_ref().ok_or(SessionError::NoActiveDrill)?;
    if active.drill.id != drill_id {
      return Err(SessionError::StaleDrill(drill_id.to_string()));
    }
    if self.submitting {
      return Err(SessionError::SubmissionInFlight);
    }
    let request = ScoreRequest {
      user_answer: answer.to_string(),
      reference_answer: active.drill.reference_answer.clone(),
      source_text: active.drill.source_text.clone(),
      rating: self.profile.rating,
      mode: self.mode,
      is_reversed: active.drill.is_reversed(),
    };
    let mut next = self.clone();
    next.submitting = true;
    next.fuse = next.fuse.pause();
    Ok(Transition::new(next, vec![], request))
  }

  /// Scoring failed: release the drill without touching rating or encounter.
  pub fn abort_submit(&self, drill_id: &str) -> Transition {
    let mut next = self.clone();
    let matches = self.drill.as_ref().is_some_and(|d| d.drill.id == drill_id);
    if self.submitting && matches {
      next.submitting = false;
      if next.fuse.phase == FusePhase::Paused && next.encounter.fuse_should_run(false) {
        next.fuse.phase = FusePhase::Running;
      }
    }
    Transition::new(next, vec![], ())
  }

  /// Fold a score into profile and encounter.
  pub fn apply_score(&self, drill_id: &str, result: ScoreResult) -> SessionResult<Transition<AttemptReport>> {
    let active = match &self.drill {
      Some(a) if self.submitting && a.drill.id == drill_id => a,
      _ => return Err(SessionError::Cancelled),
    };
    let result = result.clamped();
    let mut next = self.clone();
    next.submitting = false;

    if active.rated {
      debug!(target: "rating", drill_id, score = result.score, "Practice replay; rating untouched");
      let report = AttemptReport {
        drill_id: drill_id.to_string(),
        score: result.score,
        feedback: result.feedback,
        expected: active.drill.reference_answer.clone(),
        delta: 0,
        rating: self.profile.rating,
        streak: self.profile.streak,
        practice: true,
        event: None,
      };
      return Ok(Transition::new(next, vec![], report));
    }

    let resolution = encounter::resolve_attempt(&self.encounter, result.score);
    let outcome = rating::settle_attempt(
      &self.profile,
      active.drill.tier,
      result.score,
      resolution.rating_override,
      resolution.force_streak_reset,
    );
    info!(
      target: "rating",
      drill_id,
      score = result.score,
      delta = outcome.delta,
      rating = outcome.profile.rating,
      streak = outcome.profile.streak,
      overridden = resolution.rating_override.is_some(),
      "Attempt rated"
    );

    next.profile = outcome.profile;
    next.fever = self.fever.after(is_success(result.score), self.encounter.is_active());
    next.encounter = resolution.next.clone();
    if let Some(d) = next.drill.as_mut() {
      d.rated = true;
    }

    let mut effects = vec![Effect::Persist(outcome.profile)];
    if let Some(ev) = &resolution.event {
      effects.push(Effect::Encounter(ev.clone()));
    }
    if resolution.schedule_teardown {
      next.schedule_teardown(TeardownReason::PlayerDied, &mut effects);
    } else {
      next.sync_fuse(false);
    }

    let report = AttemptReport {
      drill_id: drill_id.to_string(),
      score: result.score,
      feedback: result.feedback,
      expected: active.drill.reference_answer.clone(),
      delta: outcome.delta,
      rating: outcome.profile.rating,
      streak: outcome.profile.streak,
      practice: false,
      event: resolution.event,
    };
    Ok(Transition::new(next, effects, report))
  }

  /// Advance the fuse by `elapsed_ms`; expiry resolves the attempt as a timeout.
  pub fn tick(&self, elapsed_ms: u64) -> Transition {
    if self.teardown.is_some() || !self.fuse.is_running() {
      return Transition::new(self.clone(), vec![], ());
    }
    let mut next = self.clone();
    let before = self.fuse;
    next.fuse = before.tick(elapsed_ms);
    if !just_expired(&before, &next.fuse) {
      return Transition::new(next, vec![], ());
    }

    let penalty = self.encounter.timeout_penalty();
    let outcome = rating::settle_penalty(&self.profile, penalty);
    info!(target: "encounter", penalty, rating = outcome.profile.rating, "Fuse expired");
    next.profile = outcome.profile;
    next.fever = Fever::default();
    if let Some(d) = next.drill.as_mut() {
      d.rated = true;
    }
    let mut effects = vec![Effect::Persist(outcome.profile), Effect::Encounter(EncounterEvent::FuseExpired { penalty })];
    next.schedule_teardown(TeardownReason::FuseExpired, &mut effects);
    // Keep showing the burnt fuse until teardown.
    next.fuse = FuseTimer { remaining: 0.0, phase: FusePhase::Expired, ..before };
    Transition::new(next, effects, ())
  }

  /// Clear the terminal encounter once its presentation delay is over.
  pub fn teardown_elapsed(&self, id: u64) -> Transition {
    let mut next = self.clone();
    if self.teardown.map(|t| t.id) == Some(id) {
      debug!(target: "encounter", id, "Encounter torn down");
      next.teardown = None;
      next.encounter = EncounterState::None;
      next.fuse = FuseTimer::idle();
    }
    Transition::new(next, vec![], ())
  }

  pub fn acknowledge_intro(&self) -> SessionResult<Transition> {
    self.guard_resolving()?;
    if !self.encounter.is_active() {
      return Err(SessionError::InvalidCommand("no encounter to acknowledge"));
    }
    let mut next = self.clone();
    next.encounter = encounter::acknowledge_intro(&self.encounter);
    next.sync_fuse(true);
    Ok(Transition::new(next, vec![], ()))
  }

  pub fn choose_wager(&self, tier: WagerTier) -> SessionResult<Transition> {
    self.guard_resolving()?;
    let chosen = encounter::choose_wager_tier(&self.encounter, tier)
      .ok_or(SessionError::InvalidCommand("no wager is waiting for a tier"))?;
    let mut next = self.clone();
    next.encounter = chosen;
    let mut effects = vec![];
    if !next.encounter.is_active() {
      effects.push(Effect::Encounter(EncounterEvent::WagerClosed));
    }
    next.sync_fuse(true);
    Ok(Transition::new(next, effects, ()))
  }

  pub fn double_down(&self, accept: bool) -> SessionResult<Transition> {
    self.guard_resolving()?;
    let answered = encounter::answer_double_down(&self.encounter, accept)
      .ok_or(SessionError::InvalidCommand("no double-down is on offer"))?;
    let mut next = self.clone();
    next.encounter = answered;
    let mut effects = vec![];
    if !next.encounter.is_active() {
      effects.push(Effect::Encounter(EncounterEvent::WagerClosed));
    }
    next.sync_fuse(true);
    Ok(Transition::new(next, effects, ()))
  }

  /// Open a fresh roulette table. Only between encounters.
  pub fn open_roulette(&self) -> SessionResult<Transition> {
    self.guard_resolving()?;
    if self.encounter.is_active() || self.pending_forced.is_some() {
      return Err(SessionError::InvalidCommand("roulette is only available between encounters"));
    }
    if self.roulette.as_ref().is_some_and(|r| r.stage != RouletteStage::Fired) {
      return Err(SessionError::InvalidCommand("a roulette round is already running"));
    }
    let mut next = self.clone();
    next.roulette = Some(RouletteSession::new());
    Ok(Transition::new(next, vec![], ()))
  }

  fn with_roulette<T>(
    &self,
    f: impl FnOnce(&mut RouletteSession) -> Result<T, crate::roulette::RouletteError>,
  ) -> SessionResult<(SessionSnapshot, T)> {
    let mut next = self.clone();
    let table = next.roulette.as_mut().ok_or(SessionError::InvalidCommand("no roulette table is open"))?;
    let value = f(table)?;
    Ok((next, value))
  }

  pub fn roulette_load(&self) -> SessionResult<Transition> {
    let (next, ()) = self.with_roulette(|r| r.begin_loading())?;
    Ok(Transition::new(next, vec![], ()))
  }

  pub fn roulette_toggle(&self, chamber: usize) -> SessionResult<Transition<bool>> {
    let (next, loaded) = self.with_roulette(|r| r.toggle_chamber(chamber))?;
    Ok(Transition::new(next, vec![], loaded))
  }

  /// Commit the live chamber and start the animation sequence.
  pub fn roulette_spin<R: Rng>(&self, rng: &mut R) -> SessionResult<Transition> {
    let (next, index) = self.with_roulette(|r| r.spin(rng))?;
    debug!(target: "roulette", chamber = index, "Chamber committed");
    Ok(Transition::new(next, vec![Effect::ScheduleRouletteAdvance { from: RouletteStage::Spinning }], ()))
  }

  /// Scheduled animation step; stale steps are ignored.
  pub fn roulette_advance(&self, from: RouletteStage) -> Transition {
    match &self.roulette {
      Some(r) if r.stage == from => {}
      _ => return Transition::new(self.clone(), vec![], ()),
    }
    match self.with_roulette(|r| r.advance()) {
      Ok((next, stage)) => {
        let effects = match stage {
          RouletteStage::Slowmo => vec![Effect::ScheduleRouletteAdvance { from: RouletteStage::Slowmo }],
          _ => vec![],
        };
        Transition::new(next, effects, ())
      }
      Err(_) => Transition::new(self.clone(), vec![], ()),
    }
  }

  /// Pull the trigger. Survival pays the greed bonus now; either way the
  /// next drill is forced into the matching roulette boss.
  pub fn roulette_fire(&self) -> SessionResult<Transition<RouletteOutcome>> {
    let (mut next, outcome) = self.with_roulette(|r| {
      r.fire()?;
      // Fire just recorded the outcome, so it is always present here.
      Ok(r.take_outcome())
    })?;
    let outcome = outcome.ok_or(SessionError::InvalidCommand("roulette outcome already consumed"))?;
    info!(target: "roulette", ?outcome, "Roulette fired");

    let mut effects = vec![];
    let bonus = outcome.survive_bonus();
    if bonus > 0 {
      let settled = rating::settle_bonus(&next.profile, bonus as i32);
      next.profile = settled.profile;
      effects.push(Effect::Persist(settled.profile));
    }
    next.pending_forced = Some(outcome.forced_encounter());
    Ok(Transition::new(next, effects, outcome))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::DrillSource;
  use crate::encounter::{BossKind, WagerState};
  use crate::fuse::{LIGHTNING_TICKS, TICK_INTERVAL_MS};
  use rand::{rngs::StdRng, SeedableRng};

  fn drill(id: &str, tier: DifficultyTier) -> Drill {
    Drill {
      id: id.into(),
      mode: Mode::Listening,
      tier,
      source: DrillSource::Seed,
      source_text: "src".into(),
      reference_answer: "ref".into(),
      vocab_hints: vec![],
      encounter_kind: None,
    }
  }

  fn score(s: f32) -> ScoreResult {
    ScoreResult { score: s, feedback: "ok".into(), segments: None }
  }

  fn session_with(encounter: EncounterState) -> SessionSnapshot {
    let mut s = SessionSnapshot::new(Mode::Listening, SkillProfile::starting_at(1200));
    s.encounter = encounter;
    s.deliver_drill(drill("d1", DifficultyTier::PreIntermediate), None).unwrap().snapshot
  }

  fn attempt(s: &SessionSnapshot, id: &str, raw: f32) -> Transition<AttemptReport> {
    let t = s.begin_submit(id, "answer").unwrap();
    t.snapshot.apply_score(id, score(raw)).unwrap()
  }

  #[test]
  fn plain_attempt_rates_and_persists() {
    let s = session_with(EncounterState::None);
    let t = attempt(&s, "d1", 9.0);
    assert_eq!(t.value.delta, 4);
    assert_eq!(t.snapshot.profile.rating, 1204);
    assert_eq!(t.snapshot.profile.streak, 1);
    assert_eq!(t.effects, vec![Effect::Persist(t.snapshot.profile)]);
  }

  #[test]
  fn replay_of_same_drill_is_practice() {
    let s = session_with(EncounterState::None);
    let first = attempt(&s, "d1", 2.0).snapshot;
    let replay = attempt(&first, "d1", 10.0);
    assert!(replay.value.practice);
    assert_eq!(replay.value.delta, 0);
    assert_eq!(replay.snapshot.profile, first.profile);
    assert!(replay.effects.is_empty());

    let fresh = replay.snapshot.deliver_drill(drill("d2", DifficultyTier::PreIntermediate), None).unwrap().snapshot;
    assert!(!attempt(&fresh, "d2", 10.0).value.practice);
  }

  #[test]
  fn stale_and_duplicate_submissions_are_rejected() {
    let s = session_with(EncounterState::None);
    assert!(matches!(s.begin_submit("other", "x"), Err(SessionError::StaleDrill(_))));
    let submitting = s.begin_submit("d1", "x").unwrap().snapshot;
    assert!(matches!(submitting.begin_submit("d1", "x"), Err(SessionError::SubmissionInFlight)));
    assert!(matches!(s.apply_score("d1", score(9.0)), Err(SessionError::Cancelled)));
  }

  #[test]
  fn lightning_fuse_arms_on_delivery_and_pauses_on_submit() {
    let s = session_with(EncounterState::boss(BossKind::Lightning, true));
    assert!(s.fuse.is_running());
    assert_eq!(s.fuse.duration_ticks, LIGHTNING_TICKS);
    let submitting = s.begin_submit("d1", "x").unwrap().snapshot;
    assert_eq!(submitting.fuse.phase, FusePhase::Paused);
    let later = submitting.tick(60_000).snapshot;
    assert!(!later.fuse.is_expired());
    assert!(later.teardown.is_none());
  }

  #[test]
  fn fuse_expiry_penalizes_once_and_blocks_late_answers() {
    let s = session_with(EncounterState::boss(BossKind::Lightning, true));
    let mut s = SessionSnapshot { profile: SkillProfile { rating: 1200, streak: 4, max_rating: 1200 }, ..s };
    let mut penalties = 0;
    for _ in 0..(LIGHTNING_TICKS + 20) {
      let t = s.tick(TICK_INTERVAL_MS);
      penalties += t.effects.iter().filter(|e| matches!(e, Effect::Encounter(EncounterEvent::FuseExpired { .. }))).count();
      s = t.snapshot;
    }
    assert_eq!(penalties, 1);
    assert_eq!(s.profile.rating, 1180);
    assert_eq!(s.profile.streak, 0);
    assert!(matches!(s.teardown, Some(PendingTeardown { reason: TeardownReason::FuseExpired, .. })));
    assert!(matches!(s.begin_submit("d1", "x"), Err(SessionError::EncounterResolving)));
    // Terminal state is still readable until the teardown lands.
    assert_eq!(s.encounter.boss_kind(), Some(BossKind::Lightning));
    let id = s.teardown.unwrap().id;
    let cleared = s.teardown_elapsed(id).snapshot;
    assert_eq!(cleared.encounter, EncounterState::None);
    assert!(cleared.teardown.is_none());
  }

  #[test]
  fn submission_wins_race_against_fuse() {
    let s = session_with(EncounterState::boss(BossKind::Lightning, true));
    let almost = s.tick(29_900).snapshot;
    let submitting = almost.begin_submit("d1", "x").unwrap().snapshot;
    let ticked = submitting.tick(5_000).snapshot;
    let t = ticked.apply_score("d1", score(3.0)).unwrap();
    let expiries = t.effects.iter().filter(|e| matches!(e, Effect::Encounter(EncounterEvent::FuseExpired { .. }))).count();
    assert_eq!(expiries, 0);
    assert_eq!(t.effects.iter().filter(|e| matches!(e, Effect::Persist(_))).count(), 1);
    // After the result the fuse stays held until the next drill arrives.
    assert!(!t.snapshot.tick(60_000).snapshot.fuse.is_expired());
  }

  #[test]
  fn reaper_defeat_schedules_teardown_with_terminal_values() {
    let mut s = session_with(EncounterState::boss(BossKind::Reaper, true));
    let mut last = None;
    for i in 0..3 {
      let id = format!("r{i}");
      s = s.deliver_drill(drill(&id, DifficultyTier::PreIntermediate), None).unwrap().snapshot;
      let t = attempt(&s, &id, 0.0);
      s = t.snapshot.clone();
      last = Some(t);
    }
    let t = last.unwrap();
    assert_eq!(t.value.delta, -50);
    assert_eq!(s.profile.rating, 1150);
    assert!(t.effects.iter().any(|e| matches!(e, Effect::ScheduleTeardown { .. })));
    match &s.encounter {
      EncounterState::Boss(b) => assert_eq!(b.player_hp, Some(0)),
      other => panic!("expected terminal boss, got {other:?}"),
    }
    let mut rng = StdRng::seed_from_u64(1);
    assert!(matches!(s.begin_drill_request(&mut rng, None), Err(SessionError::EncounterResolving)));
  }

  #[test]
  fn reaper_victory_pays_fifty() {
    let mut s = session_with(EncounterState::boss(BossKind::Reaper, true));
    for i in 0..3 {
      let id = format!("r{i}");
      s = s.deliver_drill(drill(&id, DifficultyTier::PreIntermediate), None).unwrap().snapshot;
      s = attempt(&s, &id, 10.0).snapshot;
    }
    assert_eq!(s.profile.rating, 1250);
    assert_eq!(s.encounter, EncounterState::None);
  }

  #[test]
  fn wager_flow_with_double_down() {
    let s = session_with(EncounterState::Wager(WagerState::new()));
    assert!(!s.fuse.is_running());
    let s = s.acknowledge_intro().unwrap().snapshot;
    let s = s.choose_wager(WagerTier::Risky).unwrap().snapshot;
    assert!(s.fuse.is_running());
    let won = attempt(&s, "d1", 9.5);
    assert_eq!(won.value.delta, 60);
    assert!(!won.snapshot.fuse.is_running());
    let s = won.snapshot.double_down(true).unwrap().snapshot;
    let s = s.deliver_drill(drill("d2", DifficultyTier::PreIntermediate), None).unwrap().snapshot;
    assert!(s.fuse.is_running());
    let lost = attempt(&s, "d2", 5.0);
    assert_eq!(lost.value.delta, -40);
    assert_eq!(lost.snapshot.profile.streak, 0);
    assert_eq!(lost.snapshot.encounter, EncounterState::None);
    assert!(lost.snapshot.fuse.phase == FusePhase::Cancelled);
  }

  #[test]
  fn safe_wager_scores_normally() {
    let s = session_with(EncounterState::Wager(WagerState::new()));
    let t = s.choose_wager(WagerTier::Safe).unwrap();
    assert_eq!(t.effects, vec![Effect::Encounter(EncounterEvent::WagerClosed)]);
    let r = attempt(&t.snapshot, "d1", 4.0);
    assert_eq!(r.snapshot.profile.streak, 0);
    assert!(r.value.delta < 0 && r.value.delta > -40);
  }

  #[test]
  fn scoring_failure_resumes_fuse_without_rating() {
    let s = session_with(EncounterState::boss(BossKind::Lightning, true));
    let submitting = s.begin_submit("d1", "x").unwrap().snapshot;
    let released = submitting.abort_submit("d1").snapshot;
    assert!(!released.submitting);
    assert!(released.fuse.is_running());
    assert_eq!(released.profile, s.profile);
    assert!(!released.drill.as_ref().unwrap().rated);
  }

  #[test]
  fn fever_counts_plain_successes_only() {
    let mut s = session_with(EncounterState::None);
    for i in 0..3 {
      let id = format!("f{i}");
      s = s.deliver_drill(drill(&id, DifficultyTier::PreIntermediate), None).unwrap().snapshot;
      s = attempt(&s, &id, 9.0).snapshot;
    }
    assert!(s.fever.active);
    s = s.deliver_drill(drill("f9", DifficultyTier::PreIntermediate), None).unwrap().snapshot;
    s = attempt(&s, "f9", 8.0).snapshot;
    assert_eq!(s.fever, Fever::default());
  }

  fn planned(s: &SessionSnapshot, forced: Option<ForcedEncounter>, id: &str) -> Transition<Drill> {
    let mut rng = StdRng::seed_from_u64(5);
    let plan = s.begin_drill_request(&mut rng, forced).unwrap().value;
    s.deliver_drill(drill(id, DifficultyTier::Intermediate), Some(&plan)).unwrap()
  }

  #[test]
  fn drill_request_rolls_once_and_carries_boss_kind() {
    let mut rng = StdRng::seed_from_u64(5);
    let s = SessionSnapshot::new(Mode::Translation, SkillProfile::starting_at(1200));
    let t = s.begin_drill_request(&mut rng, Some(ForcedEncounter::Debug { kind: BossKind::Reverser })).unwrap();
    assert_eq!(t.value.request.forced_encounter_kind, Some(BossKind::Reverser));
    assert_eq!(t.value.request.difficulty_tier, DifficultyTier::Intermediate);
    assert_eq!(t.snapshot.encounter, EncounterState::None);
    let live = t.snapshot.deliver_drill(drill("d1", DifficultyTier::Intermediate), Some(&t.value)).unwrap();
    assert_eq!(live.value.encounter_kind, Some(BossKind::Reverser));
    assert!(live.value.is_reversed());
    // Live encounter: the debug force is ignored.
    let again = live.snapshot.begin_drill_request(&mut rng, Some(ForcedEncounter::Debug { kind: BossKind::Reaper })).unwrap();
    assert_eq!(again.value.request.forced_encounter_kind, Some(BossKind::Reverser));
    assert_eq!(again.value.staged, None);
  }

  #[test]
  fn previous_drill_resolves_against_its_own_encounter() {
    let s = session_with(EncounterState::None);
    let mut rng = StdRng::seed_from_u64(5);
    let reaper = s.begin_drill_request(&mut rng, Some(ForcedEncounter::Debug { kind: BossKind::Reaper })).unwrap();
    // d1 is answered while the next drill is still being generated.
    let t = attempt(&reaper.snapshot, "d1", 0.0);
    assert!(t.value.delta < 0);
    assert_eq!(t.value.event, None);
    assert_eq!(t.snapshot.encounter, EncounterState::None);

    let d2 = t.snapshot.deliver_drill(drill("d2", DifficultyTier::PreIntermediate), Some(&reaper.value)).unwrap();
    match &d2.snapshot.encounter {
      EncounterState::Boss(b) => {
        assert_eq!(b.kind, BossKind::Reaper);
        assert_eq!(b.player_hp, Some(3));
        assert!(!b.intro_acknowledged);
      }
      other => panic!("expected reaper, got {other:?}"),
    }
  }

  #[test]
  fn undelivered_plan_leaves_encounter_and_roulette_outcome() {
    let mut s = session_with(EncounterState::None);
    s.pending_forced = Some(ForcedEncounter::Roulette { kind: BossKind::Roulette, jackpot_multiplier: None });
    let mut rng = StdRng::seed_from_u64(9);
    let t = s.begin_drill_request(&mut rng, None).unwrap();
    assert_eq!(t.snapshot, s);
    assert!(t.effects.is_empty());
    // Generation failed; the retry still carries the roulette boss.
    let retry = planned(&t.snapshot, None, "d2");
    assert_eq!(retry.value.encounter_kind, Some(BossKind::Roulette));
    assert!(retry.snapshot.pending_forced.is_none());
  }

  #[test]
  fn roulette_outcome_wins_over_debug_force() {
    let mut s = SessionSnapshot::new(Mode::Listening, SkillProfile::starting_at(1200));
    s.pending_forced = Some(ForcedEncounter::Roulette { kind: BossKind::RouletteExecution, jackpot_multiplier: Some(5) });
    let t = planned(&s, Some(ForcedEncounter::Debug { kind: BossKind::Echo }), "d1");
    assert_eq!(t.snapshot.encounter.boss_kind(), Some(BossKind::RouletteExecution));
    assert!(t.snapshot.pending_forced.is_none());
  }

  #[test]
  fn presentation_boss_can_be_exited() {
    let s = session_with(EncounterState::boss(BossKind::Lightning, true));
    assert!(s.fuse.is_running());
    let left = s.exit_encounter().unwrap().snapshot;
    assert_eq!(left.encounter, EncounterState::None);
    assert!(!left.fuse.is_running());
    assert!(!left.tick(60_000).snapshot.fuse.is_expired());
    assert!(left.open_roulette().is_ok());
    assert!(matches!(left.exit_encounter(), Err(SessionError::InvalidCommand(_))));

    let reaper = session_with(EncounterState::boss(BossKind::Reaper, true));
    assert!(matches!(reaper.exit_encounter(), Err(SessionError::InvalidCommand(_))));
  }

  #[test]
  fn roulette_survival_pays_and_forces_boss() {
    let s = SessionSnapshot::new(Mode::Listening, SkillProfile::starting_at(1200));
    let s = s.open_roulette().unwrap().snapshot;
    let s = s.roulette_load().unwrap().snapshot;
    let s = s.roulette_toggle(0).unwrap().snapshot;
    let mut s = s;
    s.roulette.as_mut().unwrap().spin_to(3).unwrap();
    let s = s.roulette_advance(RouletteStage::Spinning);
    assert_eq!(s.effects, vec![Effect::ScheduleRouletteAdvance { from: RouletteStage::Slowmo }]);
    let s = s.snapshot.roulette_advance(RouletteStage::Slowmo).snapshot;
    // A stale step does nothing.
    let s = s.roulette_advance(RouletteStage::Spinning).snapshot;
    let fired = s.roulette_fire().unwrap();
    assert_eq!(fired.value, RouletteOutcome::Survived { bullets: 1 });
    assert_eq!(fired.snapshot.profile.rating, 1210);
    assert!(matches!(fired.snapshot.roulette_fire(), Err(SessionError::Roulette(_))));

    let next = planned(&fired.snapshot, None, "d1");
    assert_eq!(next.value.encounter_kind, Some(BossKind::Roulette));
    assert!(next.snapshot.encounter.intro_acknowledged());
    assert!(next.snapshot.pending_forced.is_none());
  }

  #[test]
  fn roulette_death_forces_execution_with_jackpot() {
    let mut s = SessionSnapshot::new(Mode::Translation, SkillProfile::starting_at(1200));
    s = s.open_roulette().unwrap().snapshot;
    s = s.roulette_load().unwrap().snapshot;
    for c in [0, 1, 2] {
      s = s.roulette_toggle(c).unwrap().snapshot;
    }
    s.roulette.as_mut().unwrap().spin_to(1).unwrap();
    s = s.roulette_advance(RouletteStage::Spinning).snapshot;
    s = s.roulette_advance(RouletteStage::Slowmo).snapshot;
    let fired = s.roulette_fire().unwrap();
    assert_eq!(fired.snapshot.profile.rating, 1200);
    assert!(fired.effects.is_empty());
    let next = planned(&fired.snapshot, None, "d1");
    match &next.snapshot.encounter {
      EncounterState::Boss(b) => {
        assert_eq!(b.kind, BossKind::RouletteExecution);
        assert_eq!(b.jackpot_multiplier, Some(5));
      }
      other => panic!("expected execution boss, got {other:?}"),
    }
  }
}
