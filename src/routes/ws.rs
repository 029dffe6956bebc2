//! WebSocket upgrade + message loop. One socket hosts at most one game
//! session. Commands run on their own tasks so a newer drill request can
//! supersede one in flight; every reply and session notice funnels through a
//! single outbound channel.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::error::SessionError;
use crate::orchestrator::{SessionDriver, SessionNotice};
use crate::protocol::{ClientWsMessage, DrillOut, ServerWsMessage, SnapshotOut};
use crate::state::AppState;
use crate::store::ProfileKey;

type Outbound = mpsc::UnboundedSender<ServerWsMessage>;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "drill_gauntlet", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// The live session on this socket and the task relaying its notices.
struct Live {
  driver: SessionDriver,
  relay: JoinHandle<()>,
}

impl Live {
  async fn close(self) {
    self.driver.shutdown().await;
    self.relay.abort();
  }
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "drill_gauntlet", "WebSocket connected");
  let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerWsMessage>();
  let mut live: Option<Live> = None;

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => match serde_json::from_str::<ClientWsMessage>(&txt) {
            Ok(cmd) => {
              debug!(target: "drill_gauntlet", "WS received: {:?}", &cmd);
              dispatch(cmd, &state, &mut live, &out_tx).await;
            }
            Err(e) => {
              let _ = out_tx.send(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) });
            }
          },
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
      Some(reply) = out_rx.recv() => {
        let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });
        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "drill_gauntlet", error = %e, "WS send error");
          break;
        }
      }
    }
  }

  if let Some(l) = live.take() {
    l.close().await;
  }
  info!(target: "drill_gauntlet", "WebSocket disconnected");
}

async fn dispatch(cmd: ClientWsMessage, state: &Arc<AppState>, live: &mut Option<Live>, out: &Outbound) {
  match cmd {
    ClientWsMessage::Ping => {
      let _ = out.send(ServerWsMessage::Pong);
    }

    ClientWsMessage::StartSession { user, mode } => {
      if let Some(previous) = live.take() {
        previous.close().await;
      }
      let key = ProfileKey::new(user, mode);
      let (driver, notices) = SessionDriver::start(state.services.clone(), key, state.config.game.clone()).await;
      let snapshot = driver.snapshot().await;
      let relay = tokio::spawn(relay_notices(notices, out.clone()));
      *live = Some(Live { driver, relay });
      let _ = out.send(ServerWsMessage::Snapshot { snapshot: SnapshotOut::from(&snapshot) });
    }

    ClientWsMessage::EndSession => match live.take() {
      Some(l) => {
        let last = l.driver.snapshot().await;
        l.close().await;
        let _ = out.send(ServerWsMessage::Snapshot { snapshot: SnapshotOut::from(&last) });
      }
      None => {
        let _ = out.send(ServerWsMessage::Error { message: "No session to end.".into() });
      }
    },

    cmd => match live.as_ref() {
      Some(l) => {
        tokio::spawn(run_command(l.driver.clone(), cmd, out.clone()));
      }
      None => {
        let _ = out.send(ServerWsMessage::Error { message: "No session; send start_session first.".into() });
      }
    },
  }
}

/// Execute one session command and queue its replies.
async fn run_command(driver: SessionDriver, cmd: ClientWsMessage, out: Outbound) {
  let replies = match command_replies(&driver, cmd).await {
    Ok(replies) => replies,
    Err(SessionError::Cancelled) => return,
    Err(e) => {
      warn!(target: "drill_gauntlet", error = %e, "WS command rejected");
      vec![ServerWsMessage::Error { message: e.to_string() }]
    }
  };
  for reply in replies {
    if out.send(reply).is_err() {
      break;
    }
  }
}

async fn command_replies(driver: &SessionDriver, cmd: ClientWsMessage) -> Result<Vec<ServerWsMessage>, SessionError> {
  let snapshot = |s: &crate::session::SessionSnapshot| ServerWsMessage::Snapshot { snapshot: SnapshotOut::from(s) };
  let replies = match cmd {
    ClientWsMessage::NextDrill { force_boss } => {
      let drill = driver.next_drill(force_boss).await?;
      info!(target: "drill", id = %drill.id, mode = %drill.mode, "WS next_drill served");
      vec![ServerWsMessage::Drill { drill: DrillOut::from(&drill) }, snapshot(&driver.snapshot().await)]
    }
    ClientWsMessage::SubmitAnswer { drill_id, answer } => {
      let result = driver.submit(&drill_id, &answer).await?;
      info!(target: "drill", id = %drill_id, score = result.score, delta = result.delta, "WS submit_answer evaluated");
      vec![ServerWsMessage::AttemptResult { result }, snapshot(&driver.snapshot().await)]
    }
    ClientWsMessage::AcknowledgeIntro => vec![snapshot(&driver.acknowledge_intro().await?)],
    ClientWsMessage::ExitEncounter => vec![snapshot(&driver.exit_encounter().await?)],
    ClientWsMessage::ChooseWager { tier } => vec![snapshot(&driver.choose_wager(tier).await?)],
    ClientWsMessage::DoubleDown { accept } => vec![snapshot(&driver.double_down(accept).await?)],
    ClientWsMessage::RouletteOpen => vec![snapshot(&driver.roulette_open().await?)],
    ClientWsMessage::RouletteLoad => vec![snapshot(&driver.roulette_load().await?)],
    ClientWsMessage::RouletteToggle { chamber } => vec![snapshot(&driver.roulette_toggle(chamber).await?)],
    ClientWsMessage::RouletteSpin => vec![snapshot(&driver.roulette_spin().await?)],
    ClientWsMessage::RouletteFire => {
      let (outcome, s) = driver.roulette_fire().await?;
      vec![ServerWsMessage::Roulette { outcome, snapshot: SnapshotOut::from(&s) }]
    }
    ClientWsMessage::Snapshot => vec![snapshot(&driver.snapshot().await)],
    ClientWsMessage::Ping | ClientWsMessage::StartSession { .. } | ClientWsMessage::EndSession => {
      return Err(SessionError::InvalidCommand("handled by the socket loop"));
    }
  };
  Ok(replies)
}

async fn relay_notices(mut notices: mpsc::UnboundedReceiver<SessionNotice>, out: Outbound) {
  while let Some(notice) = notices.recv().await {
    let msg = match notice {
      SessionNotice::Encounter(event) => ServerWsMessage::EncounterEvent { event },
      SessionNotice::Updated(s) => ServerWsMessage::Snapshot { snapshot: SnapshotOut::from(&s) },
    };
    if out.send(msg).is_err() {
      break;
    }
  }
}
