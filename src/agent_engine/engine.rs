use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agent_engine::event_bus::TurnEvent;
use crate::agent_engine::loop_control::{LoopController, StreakVerdict};
use crate::agent_engine::parser::{parse_actions, story_text};
use crate::agent_engine::session::{shutdown_requested, Session};
use crate::agent_engine::state::Turn;
use crate::agent_engine::turn_log::TurnRecord;
use crate::config::AppConfig;
use crate::errors::{HeatloopError, HeatloopResult};
use crate::executor::dispatcher::{dispatch, ExecutionReport};
use crate::executor::input::InputDriver;
use crate::llm::prompt::{recovery_story, INITIAL_STORY};
use crate::llm::provider::VisionModel;
use crate::perception::codec;
use crate::perception::geometry::to_render_space;
use crate::perception::traits::ScreenSource;
use crate::perception::types::RenderSize;

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn: Turn,
    pub malformed: Vec<String>,
    pub report: ExecutionReport,
    pub verdict: StreakVerdict,
}

/// Drives the per-turn pipeline: capture, render, publish, await the
/// annotated image, ask the model, record, execute.
pub struct TurnEngine {
    session: Arc<Session>,
    screen: Arc<dyn ScreenSource>,
    model: Arc<dyn VisionModel>,
    driver: Arc<dyn InputDriver>,
    render: RenderSize,
    render_timeout: Duration,
    loop_delay: Duration,
    allowed_tools: Vec<String>,

    loop_ctrl: LoopController,
    story: String,
    turn: u64,
}

impl TurnEngine {
    pub fn new(
        session: Arc<Session>,
        screen: Arc<dyn ScreenSource>,
        model: Arc<dyn VisionModel>,
        driver: Arc<dyn InputDriver>,
        config: &AppConfig,
    ) -> Self {
        Self {
            session,
            screen,
            model,
            driver,
            render: config.render,
            render_timeout: Duration::from_millis(config.broker.render_timeout_ms),
            loop_delay: config.session.loop_delay(),
            allowed_tools: config.session.allowed_tools.clone(),
            loop_ctrl: LoopController::new(),
            story: INITIAL_STORY.to_string(),
            turn: 0,
        }
    }

    pub fn story(&self) -> &str {
        &self.story
    }

    /// Loop until shutdown. Recoverable failures abandon only the current
    /// turn; anything else (protocol violations) ends the loop with an error.
    pub async fn run(&mut self) -> HeatloopResult<()> {
        let mut shutdown = self.session.shutdown_signal();
        tracing::info!(model = %self.model.name(), "turn loop started");

        loop {
            if self.session.is_shut_down() {
                break;
            }
            if self.session.store().is_paused() {
                tracing::info!("paused; waiting for resume");
            }
            tokio::select! {
                _ = self.session.store().wait_until_running() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            self.turn += 1;
            let turn = self.turn;
            let result = tokio::select! {
                r = self.run_turn(turn) => r,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            match result {
                Ok(outcome) => self.apply_verdict(&outcome),
                Err(e) if self.session.is_shut_down() => {
                    tracing::debug!(turn, error = %e, "turn interrupted by shutdown");
                    break;
                }
                Err(e) if e.is_turn_recoverable() => {
                    tracing::warn!(turn, error = %e, "turn abandoned");
                    self.session.bus().send(TurnEvent::TurnAbandoned {
                        turn,
                        reason: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::error!(turn, error = %e, "turn loop stopped");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.loop_delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        tracing::info!(turns = self.turn, "turn loop finished");
        Ok(())
    }

    /// One full turn. Actions are recorded only once the model has answered
    /// for an image it actually saw; any earlier failure leaves the previous
    /// turn's actions in place for the retry.
    pub async fn run_turn(&mut self, turn: u64) -> HeatloopResult<TurnOutcome> {
        let started = Instant::now();
        let session = self.session.clone();
        let store = session.store();
        let broker = session.broker();
        if store.is_paused() {
            return Err(HeatloopError::Cancelled);
        }
        tracing::info!(turn, "turn started");

        let frame = self.screen.capture().await?;
        let rendered = to_render_space(&frame.image, store.crop(), self.render)?;
        let source_png = codec::encode_png(&rendered.image)?;

        // A pause that landed during capture found no job to cancel.
        if store.is_paused() {
            tracing::info!(turn, "paused before publish; turn cancelled");
            return Err(HeatloopError::Cancelled);
        }

        let seq = broker.next_seq();
        let handle = broker.publish(seq, source_png, store.previous_actions())?;
        let annotated = tokio::select! {
            r = broker.await_result(handle, self.render_timeout) => r?,
            _ = store.wait_until_paused() => {
                broker.cancel_outstanding();
                tracing::info!(turn, seq, "paused while rendering; turn cancelled");
                return Err(HeatloopError::Cancelled);
            }
        };
        tracing::debug!(turn, seq, "annotated image received");

        let raw = tokio::select! {
            r = self.model.decide(&self.story, &annotated.png) => r?,
            _ = store.wait_until_paused() => {
                tracing::info!(turn, seq, "paused while the model was deciding; turn cancelled");
                return Err(HeatloopError::Cancelled);
            }
        };
        let parsed = parse_actions(&raw, &self.allowed_tools);
        if let Some(e) = parsed.parse_error() {
            tracing::warn!(turn, seq, error = %e, "model output had malformed action lines");
        }

        if store.is_paused() {
            return Err(HeatloopError::Cancelled);
        }

        store.record_turn(turn, parsed.actions.clone());
        let report = dispatch(&parsed.actions, &rendered.crop, self.driver.as_ref()).await;

        if raw.trim().is_empty() {
            tracing::warn!(turn, "model returned empty output; keeping previous story");
        } else {
            self.story = story_text(&raw);
        }

        let mut errors = parsed.malformed.clone();
        errors.extend(report.errors.iter().cloned());
        let verdict = self.loop_ctrl.observe(report.executed.len(), errors.len());

        let latency_ms = started.elapsed().as_millis() as u64;
        let record = TurnRecord {
            turn,
            seq,
            ts: chrono::Utc::now().timestamp_millis(),
            latency_ms,
            actions: parsed.actions.clone(),
            malformed: errors.clone(),
            executed: report.executed.clone(),
            story: self.story.clone(),
        };
        if let Err(e) = session.log().append(&record, &annotated.png) {
            tracing::warn!(turn, error = %e, "turn log write failed");
        }

        tracing::info!(
            turn,
            seq,
            actions = parsed.actions.len(),
            executed = report.executed.len(),
            malformed = errors.len(),
            latency_ms,
            "turn complete"
        );
        session.bus().send(TurnEvent::TurnCompleted {
            turn,
            seq,
            actions: parsed.actions.clone(),
            malformed: errors.clone(),
            executed: report.executed.clone(),
            story: self.story.clone(),
            timestamp: chrono::Utc::now(),
        });

        Ok(TurnOutcome {
            turn: Turn { number: turn, seq, actions: parsed.actions, image: annotated.png },
            malformed: errors,
            report,
            verdict,
        })
    }

    fn apply_verdict(&mut self, outcome: &TurnOutcome) {
        match outcome.verdict {
            StreakVerdict::Continue => {}
            StreakVerdict::ResetStory => {
                tracing::warn!(turn = outcome.turn.number, "story reset after failed turns");
                self.story = recovery_story(outcome.turn.number);
            }
            StreakVerdict::AutoPause => {
                tracing::warn!(turn = outcome.turn.number, "auto-pausing after repeated failed turns");
                self.story = recovery_story(outcome.turn.number);
                self.session.pause("consecutive failed turns");
            }
        }
    }
}
