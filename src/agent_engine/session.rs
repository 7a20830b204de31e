use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::agent_engine::event_bus::{EventBus, TurnEvent};
use crate::agent_engine::history::TurnHistoryStore;
use crate::agent_engine::state::SessionState;
use crate::agent_engine::turn_log::TurnLog;
use crate::broker::job::JobState;
use crate::broker::job_broker::RenderJobBroker;
use crate::config::AppConfig;
use crate::errors::{HeatloopError, HeatloopResult};
use crate::perception::types::CropRegion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub last_turn: u64,
    pub job: JobState,
    pub crop: Option<CropRegion>,
}

/// Everything one run shares between the turn loop, the compositor and the
/// control socket.
pub struct Session {
    store: TurnHistoryStore,
    broker: Arc<RenderJobBroker>,
    bus: EventBus,
    log: TurnLog,
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Create the run directory and pick up a persisted crop, if any.
    pub fn start(config: &AppConfig) -> HeatloopResult<Arc<Self>> {
        let log = TurnLog::create(&config.session.run_dir)?;
        let crop = log.load_crop();
        let (shutdown, _) = watch::channel(false);
        let session = Self {
            store: TurnHistoryStore::new(crop, config.session.start_paused),
            broker: Arc::new(RenderJobBroker::new(config.render)),
            bus: EventBus::new(),
            log,
            shutdown,
        };
        tracing::info!(
            session_id = %session.log.session_id,
            paused = session.store.is_paused(),
            ?crop,
            "session started"
        );
        Ok(Arc::new(session))
    }

    pub fn store(&self) -> &TurnHistoryStore {
        &self.store
    }

    pub fn broker(&self) -> Arc<RenderJobBroker> {
        self.broker.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn log(&self) -> &TurnLog {
        &self.log
    }

    /// Close the gate. An outstanding render wait is cancelled at once.
    pub fn pause(&self, reason: &str) {
        if self.store.set_paused(true) {
            tracing::info!(reason, "session paused");
            self.broker.cancel_outstanding();
            self.bus.send(TurnEvent::Paused { reason: reason.to_string() });
        }
    }

    pub fn resume(&self) {
        if self.store.set_paused(false) {
            tracing::info!("session resumed");
            self.bus.send(TurnEvent::Resumed);
        }
    }

    /// Replace the crop and persist it; `None` means full screen.
    pub fn set_crop(&self, crop: Option<CropRegion>) -> HeatloopResult<()> {
        if let Some(c) = crop {
            if c.is_empty() {
                return Err(HeatloopError::Geometry(format!("crop {c:?} has no area")));
            }
        }
        self.log.save_crop(crop)?;
        self.store.set_crop(crop);
        Ok(())
    }

    /// Re-read the persisted crop file.
    pub fn reload_crop(&self) -> Option<CropRegion> {
        let crop = self.log.load_crop();
        self.store.set_crop(crop);
        crop
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.log.session_id.clone(),
            state: self.store.state(),
            last_turn: self.store.last_turn(),
            job: self.broker.state(),
            crop: self.store.crop(),
        }
    }

    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("session shutting down");
        }
        self.broker.cancel_outstanding();
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Resolves once `rx` reports shutdown (or its sender is gone).
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|down| *down).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::codec;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.session.run_dir = dir.to_path_buf();
        cfg.render = crate::perception::types::RenderSize { width: 8, height: 8 };
        cfg
    }

    #[tokio::test]
    async fn pause_cancels_outstanding_render() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::start(&config(tmp.path())).unwrap();
        session.resume();
        let mut events = session.bus().subscribe();

        let png = codec::encode_png(&image::RgbaImage::new(8, 8)).unwrap();
        let broker = session.broker();
        let handle = broker.publish(1, png, vec![]).unwrap();
        let waiter = tokio::spawn(async move { broker.await_result(handle, Duration::from_secs(30)).await });

        session.pause("user");
        let r = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert!(matches!(r, Err(HeatloopError::Cancelled)));
        assert!(matches!(events.recv().await.unwrap(), TurnEvent::Paused { .. }));
        assert_eq!(session.status().job, JobState::Cancelled { seq: 1 });
    }

    #[tokio::test]
    async fn crop_persists_across_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let crop = CropRegion { x1: 10, y1: 20, w: 300, h: 200 };
        {
            let s = Session::start(&config(tmp.path())).unwrap();
            assert_eq!(s.status().crop, None);
            s.set_crop(Some(crop)).unwrap();
            assert!(s.set_crop(Some(CropRegion { x1: 0, y1: 0, w: 0, h: 5 })).is_err());
        }
        let s = Session::start(&config(tmp.path())).unwrap();
        assert_eq!(s.status().crop, Some(crop));
        assert_eq!(s.status().state, SessionState::Paused);
    }

    #[tokio::test]
    async fn shutdown_is_observable() {
        let tmp = tempfile::tempdir().unwrap();
        let s = Session::start(&config(tmp.path())).unwrap();
        let mut rx = s.shutdown_signal();
        s.shutdown();
        tokio::time::timeout(Duration::from_secs(1), shutdown_requested(&mut rx)).await.unwrap();
        assert!(s.is_shut_down());
    }
}
