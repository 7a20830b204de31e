use std::sync::RwLock;

use tokio::sync::watch;

use crate::agent_engine::state::{Action, SessionState};
use crate::perception::types::CropRegion;

#[derive(Debug, Default)]
struct Memory {
    previous_actions: Vec<Action>,
    last_turn: u64,
}

/// One-turn memory plus the session's crop region and pause gate.
///
/// `record_turn` replaces the previous action list wholesale; nothing is
/// merged or carried across more than one turn. Crop and pause are read by
/// the turn loop every cycle and written by the control surface.
pub struct TurnHistoryStore {
    memory: RwLock<Memory>,
    crop: RwLock<Option<CropRegion>>,
    gate: watch::Sender<SessionState>,
}

impl TurnHistoryStore {
    /// The gate starts closed (`Paused`) unless told otherwise.
    pub fn new(crop: Option<CropRegion>, start_paused: bool) -> Self {
        let initial = if start_paused { SessionState::Paused } else { SessionState::Running };
        let (gate, _) = watch::channel(initial);
        Self {
            memory: RwLock::new(Memory::default()),
            crop: RwLock::new(crop),
            gate,
        }
    }

    pub fn previous_actions(&self) -> Vec<Action> {
        self.memory
            .read()
            .map(|m| m.previous_actions.clone())
            .unwrap_or_default()
    }

    pub fn last_turn(&self) -> u64 {
        self.memory.read().map(|m| m.last_turn).unwrap_or_default()
    }

    /// Replace the previous turn's actions with `actions`.
    pub fn record_turn(&self, turn: u64, actions: Vec<Action>) {
        let mut m = self.memory.write().unwrap_or_else(|p| p.into_inner());
        tracing::debug!(turn, actions = actions.len(), replaced = m.previous_actions.len(), "turn recorded");
        m.previous_actions = actions;
        m.last_turn = turn;
    }

    pub fn crop(&self) -> Option<CropRegion> {
        self.crop.read().map(|c| *c).unwrap_or_default()
    }

    pub fn set_crop(&self, crop: Option<CropRegion>) {
        *self.crop.write().unwrap_or_else(|p| p.into_inner()) = crop;
        tracing::info!(?crop, "crop region updated");
    }

    pub fn is_paused(&self) -> bool {
        *self.gate.borrow() == SessionState::Paused
    }

    pub fn state(&self) -> SessionState {
        *self.gate.borrow()
    }

    /// Returns true when the gate actually changed.
    pub fn set_paused(&self, paused: bool) -> bool {
        let next = if paused { SessionState::Paused } else { SessionState::Running };
        self.gate.send_if_modified(|s| {
            if *s == next {
                false
            } else {
                *s = next;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.gate.subscribe()
    }

    /// Resolves once the gate is `Running`. Returns immediately if it already is.
    pub async fn wait_until_running(&self) {
        let mut rx = self.gate.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel here.
        let _ = rx.wait_for(|s| *s == SessionState::Running).await;
    }

    /// Resolves once the gate is `Paused`. Returns immediately if it already is.
    pub async fn wait_until_paused(&self) {
        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Paused).await;
    }
}
