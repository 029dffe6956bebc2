//! Async driver around the session reducer.
//!
//! `SessionDriver` owns the live `SessionSnapshot`, calls the drill and
//! scoring services, runs the fuse ticker and the delayed transitions, and
//! hands profile writes to a single ordered persistence task. Background
//! tasks hold only a weak reference to the session and are aborted on
//! shutdown, so nothing mutates a closed session.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
  },
  time::Duration,
};

use rand::{rngs::StdRng, SeedableRng};
use tokio::{
  sync::{mpsc, Mutex},
  task::JoinHandle,
  time::MissedTickBehavior,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::GameTuning;
use crate::domain::{Drill, Mode, SkillProfile};
use crate::encounter::{BossKind, EncounterEvent, WagerTier};
use crate::error::{ServiceError, SessionError, SessionResult};
use crate::fuse::TICK_INTERVAL_MS;
use crate::roulette::{RouletteOutcome, RouletteStage};
use crate::selector::ForcedEncounter;
use crate::services::{CancelSource, DrillService, ScoringService};
use crate::session::{AttemptReport, Effect, SessionSnapshot, Transition};
use crate::store::{ProfileKey, ProfileStore};

/// Collaborators a session needs.
#[derive(Clone)]
pub struct Services {
  pub drills: Arc<dyn DrillService>,
  pub scoring: Arc<dyn ScoringService>,
  pub store: Arc<dyn ProfileStore>,
}

/// Things that happen to a session outside of a direct command reply.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionNotice {
  Encounter(EncounterEvent),
  /// The snapshot changed on a timer (fuse expiry, teardown, roulette step).
  Updated(SessionSnapshot),
}

#[derive(Clone, Copy, Debug)]
enum Timer {
  Teardown(u64),
  RouletteAdvance(RouletteStage),
}

struct Inner {
  state: Mutex<SessionSnapshot>,
  services: Services,
  key: ProfileKey,
  cancel: CancelSource,
  rng: std::sync::Mutex<StdRng>,
  tuning: GameTuning,
  notices: mpsc::UnboundedSender<SessionNotice>,
  persist: mpsc::UnboundedSender<SkillProfile>,
  tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
  closed: AtomicBool,
}

#[derive(Clone)]
pub struct SessionDriver {
  inner: Arc<Inner>,
}

impl SessionDriver {
  /// Load the profile for `key` and start the session's background tasks.
  pub async fn start(
    services: Services,
    key: ProfileKey,
    tuning: GameTuning,
  ) -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
    Self::start_with_rng(services, key, tuning, StdRng::from_entropy()).await
  }

  #[instrument(level = "info", skip(services, tuning, rng), fields(user = %key.user, mode = %key.mode))]
  pub async fn start_with_rng(
    services: Services,
    key: ProfileKey,
    tuning: GameTuning,
    rng: StdRng,
  ) -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
    let profile = match services.store.read(&key).await {
      Ok(Some(p)) => p,
      Ok(None) => SkillProfile::initial(key.mode, tuning.legacy_translation_track),
      Err(e) => {
        error!(target: "drill_gauntlet", user = %key.user, error = %e, "Profile read failed; starting fresh");
        SkillProfile::initial(key.mode, tuning.legacy_translation_track)
      }
    };
    info!(target: "rating", user = %key.user, mode = %key.mode, rating = profile.rating, streak = profile.streak, "Session started");

    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (persist_tx, persist_rx) = mpsc::unbounded_channel();
    let persister = tokio::spawn(persist_loop(services.store.clone(), key.clone(), persist_rx));

    let inner = Arc::new(Inner {
      state: Mutex::new(SessionSnapshot::new(key.mode, profile)),
      services,
      key,
      cancel: CancelSource::new(),
      rng: std::sync::Mutex::new(rng),
      tuning,
      notices: notice_tx,
      persist: persist_tx,
      tasks: std::sync::Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
    });
    let ticker = tokio::spawn(tick_loop(Arc::downgrade(&inner)));
    inner.track(ticker);
    // Untracked: queued writes outlive shutdown.
    drop(persister);

    (Self { inner }, notice_rx)
  }

  pub fn mode(&self) -> Mode {
    self.inner.key.mode
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::SeqCst)
  }

  pub async fn snapshot(&self) -> SessionSnapshot {
    self.inner.state.lock().await.clone()
  }

  /// Request the next drill. Starting a request supersedes any in flight;
  /// superseded requests resolve to `SessionError::Cancelled`.
  #[instrument(level = "info", skip(self), fields(mode = %self.inner.key.mode))]
  pub async fn next_drill(&self, force_boss: Option<BossKind>) -> SessionResult<Drill> {
    let token = self.inner.cancel.issue();
    let forced = force_boss.map(|kind| ForcedEncounter::Debug { kind });
    let plan = self.inner.apply(|s| {
      let mut rng = self.inner.rng.lock().unwrap_or_else(|e| e.into_inner());
      s.begin_drill_request(&mut *rng, forced)
    }).await?.0;

    let generated = self.inner.services.drills.generate(&plan.request, &token).await;
    if token.is_cancelled() {
      debug!(target: "drill", "Superseded drill dropped");
      return Err(SessionError::Cancelled);
    }
    let generated = match generated {
      Ok(g) => g,
      Err(ServiceError::Cancelled) => return Err(SessionError::Cancelled),
      Err(e) => {
        warn!(target: "drill", error = %e, "No drill this round");
        return Err(SessionError::Generation(e.to_string()));
      }
    };

    let drill = Drill {
      id: Uuid::new_v4().to_string(),
      mode: plan.request.mode,
      tier: plan.request.difficulty_tier,
      source: generated.source,
      source_text: generated.source_text,
      reference_answer: generated.reference_answer,
      vocab_hints: generated.vocab_hints,
      encounter_kind: plan.request.forced_encounter_kind,
    };
    let (drill, _) = self.inner.apply(|s| {
      // Re-check under the lock: a newer request may have started meanwhile.
      if token.is_cancelled() {
        return Err(SessionError::Cancelled);
      }
      s.deliver_drill(drill, Some(&plan))
    }).await?;
    info!(target: "drill", id = %drill.id, tier = ?drill.tier, source = ?drill.source, encounter = ?drill.encounter_kind, "Drill delivered");
    Ok(drill)
  }

  /// Score an answer for the active drill and fold it into the session.
  #[instrument(level = "info", skip(self, answer), fields(answer_len = answer.len()))]
  pub async fn submit(&self, drill_id: &str, answer: &str) -> SessionResult<AttemptReport> {
    let request = self.inner.apply(|s| s.begin_submit(drill_id, answer)).await?.0;
    let scored = self.inner.services.scoring.score(&request).await;
    match scored {
      Ok(result) => Ok(self.inner.apply(|s| s.apply_score(drill_id, result)).await?.0),
      Err(e) => {
        // Release the drill for a retry.
        let _ = self.inner.apply(|s| Ok(s.abort_submit(drill_id))).await;
        match e {
          ServiceError::Cancelled => Err(SessionError::Cancelled),
          e => {
            warn!(target: "drill", drill_id, error = %e, "Scoring failed");
            Err(SessionError::Scoring(e.to_string()))
          }
        }
      }
    }
  }

  pub async fn acknowledge_intro(&self) -> SessionResult<SessionSnapshot> {
    Ok(self.inner.apply(|s| s.acknowledge_intro()).await?.1)
  }

  /// Leave a presentation boss. Any drill request in flight is dropped,
  /// since it was generated for the boss.
  pub async fn exit_encounter(&self) -> SessionResult<SessionSnapshot> {
    let (_, snapshot) = self.inner.apply(|s| {
      let t = s.exit_encounter()?;
      self.inner.cancel.cancel_all();
      Ok(t)
    }).await?;
    Ok(snapshot)
  }

  pub async fn choose_wager(&self, tier: WagerTier) -> SessionResult<SessionSnapshot> {
    Ok(self.inner.apply(|s| s.choose_wager(tier)).await?.1)
  }

  pub async fn double_down(&self, accept: bool) -> SessionResult<SessionSnapshot> {
    Ok(self.inner.apply(|s| s.double_down(accept)).await?.1)
  }

  pub async fn roulette_open(&self) -> SessionResult<SessionSnapshot> {
    Ok(self.inner.apply(|s| s.open_roulette()).await?.1)
  }

  pub async fn roulette_load(&self) -> SessionResult<SessionSnapshot> {
    Ok(self.inner.apply(|s| s.roulette_load()).await?.1)
  }

  pub async fn roulette_toggle(&self, chamber: usize) -> SessionResult<SessionSnapshot> {
    Ok(self.inner.apply(|s| s.roulette_toggle(chamber)).await?.1)
  }

  pub async fn roulette_spin(&self) -> SessionResult<SessionSnapshot> {
    let (_, snapshot) = self.inner.apply(|s| {
      let mut rng = self.inner.rng.lock().unwrap_or_else(|e| e.into_inner());
      s.roulette_spin(&mut *rng)
    }).await?;
    Ok(snapshot)
  }

  pub async fn roulette_fire(&self) -> SessionResult<(RouletteOutcome, SessionSnapshot)> {
    self.inner.apply(|s| s.roulette_fire()).await
  }

  /// Cancel in-flight drill requests, stop every timer and refuse further
  /// commands. Queued profile writes still complete.
  #[instrument(level = "info", skip(self), fields(user = %self.inner.key.user))]
  pub async fn shutdown(&self) {
    let _guard = self.inner.state.lock().await;
    if self.inner.closed.swap(true, Ordering::SeqCst) {
      return;
    }
    self.inner.cancel.cancel_all();
    self.inner.abort_tasks();
    info!(target: "drill_gauntlet", user = %self.inner.key.user, "Session closed");
  }
}

impl Inner {
  /// Run one reducer step under the lock and carry out its effects.
  async fn apply<T>(
    self: &Arc<Self>,
    step: impl FnOnce(&SessionSnapshot) -> SessionResult<Transition<T>>,
  ) -> SessionResult<(T, SessionSnapshot)> {
    let mut guard = self.state.lock().await;
    if self.closed.load(Ordering::SeqCst) {
      return Err(SessionError::Closed);
    }
    let Transition { snapshot, effects, value } = step(&*guard)?;
    *guard = snapshot;
    let current = guard.clone();
    drop(guard);
    self.run_effects(effects);
    Ok((value, current))
  }

  async fn on_tick(self: &Arc<Self>) {
    let mut guard = self.state.lock().await;
    if self.closed.load(Ordering::SeqCst) {
      return;
    }
    let t = guard.tick(TICK_INTERVAL_MS);
    let changed = !t.effects.is_empty();
    *guard = t.snapshot;
    let current = guard.clone();
    drop(guard);
    self.run_effects(t.effects);
    if changed {
      self.notify(SessionNotice::Updated(current));
    }
  }

  async fn on_timer(self: &Arc<Self>, timer: Timer) {
    let mut guard = self.state.lock().await;
    if self.closed.load(Ordering::SeqCst) {
      return;
    }
    let t = match timer {
      Timer::Teardown(id) => guard.teardown_elapsed(id),
      Timer::RouletteAdvance(from) => guard.roulette_advance(from),
    };
    let changed = t.snapshot != *guard;
    *guard = t.snapshot;
    let current = guard.clone();
    drop(guard);
    self.run_effects(t.effects);
    if changed {
      self.notify(SessionNotice::Updated(current));
    }
  }

  fn run_effects(self: &Arc<Self>, effects: Vec<Effect>) {
    for effect in effects {
      match effect {
        Effect::Persist(profile) => {
          if self.persist.send(profile).is_err() {
            error!(target: "drill_gauntlet", user = %self.key.user, "Persistence task is gone; profile not saved");
          }
        }
        Effect::Encounter(event) => {
          info!(target: "encounter", ?event, "Encounter event");
          self.notify(SessionNotice::Encounter(event));
        }
        Effect::ScheduleTeardown { id } => {
          self.schedule(self.tuning.teardown_delay_ms, Timer::Teardown(id));
        }
        Effect::ScheduleRouletteAdvance { from } => {
          let delay = match from {
            RouletteStage::Spinning => self.tuning.spin_ms,
            _ => self.tuning.slowmo_ms,
          };
          self.schedule(delay, Timer::RouletteAdvance(from));
        }
      }
    }
  }

  fn schedule(self: &Arc<Self>, delay_ms: u64, timer: Timer) {
    let weak = Arc::downgrade(self);
    let handle = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(delay_ms)).await;
      if let Some(inner) = weak.upgrade() {
        inner.on_timer(timer).await;
      }
    });
    self.track(handle);
  }

  fn notify(&self, notice: SessionNotice) {
    // A dropped receiver only means nobody is listening any more.
    let _ = self.notices.send(notice);
  }

  fn track(&self, handle: JoinHandle<()>) {
    let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
    tasks.retain(|h| !h.is_finished());
    tasks.push(handle);
  }

  fn abort_tasks(&self) {
    let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
    for handle in tasks.drain(..) {
      handle.abort();
    }
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.cancel.cancel_all();
    self.abort_tasks();
  }
}

async fn tick_loop(session: Weak<Inner>) {
  let mut interval = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
  // The first tick completes immediately.
  interval.tick().await;
  loop {
    interval.tick().await;
    let Some(inner) = session.upgrade() else { break };
    if inner.closed.load(Ordering::SeqCst) {
      break;
    }
    inner.on_tick().await;
  }
}

/// Writes profiles in the order the session produced them.
async fn persist_loop(store: Arc<dyn ProfileStore>, key: ProfileKey, mut rx: mpsc::UnboundedReceiver<SkillProfile>) {
  while let Some(profile) = rx.recv().await {
    if let Err(e) = store.write(&key, &profile).await {
      error!(target: "drill_gauntlet", user = %key.user, mode = %key.mode, error = %e, "Profile write failed");
    }
  }
}
