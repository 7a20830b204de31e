/// Per-turn render-job synchronization between the dispatching turn and a
/// (local or remote) compositor.
///
/// Each job moves `Idle -> Published -> (Resolved | TimedOut | Cancelled)`.
/// At most one job is outstanding; sequence numbers strictly increase and a
/// result is accepted only for the outstanding sequence.
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::agent_engine::state::Action;
use crate::broker::job::{AnnotatedImage, JobState, RenderJob};
use crate::errors::{HeatloopError, HeatloopResult};
use crate::perception::codec;
use crate::perception::types::RenderSize;

enum Outcome {
    Resolved(AnnotatedImage),
    Cancelled,
}

/// Returned by [`RenderJobBroker::publish`]; redeemed once by
/// [`RenderJobBroker::await_result`].
pub struct JobHandle {
    seq: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl JobHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct Pending {
    job: RenderJob,
    tx: oneshot::Sender<Outcome>,
}

struct Inner {
    last_seq: u64,
    state: JobState,
    pending: Option<Pending>,
}

pub struct RenderJobBroker {
    render: RenderSize,
    inner: Mutex<Inner>,
}

impl RenderJobBroker {
    pub fn new(render: RenderSize) -> Self {
        Self {
            render,
            inner: Mutex::new(Inner { last_seq: 0, state: JobState::Idle, pending: None }),
        }
    }

    pub fn render_size(&self) -> RenderSize {
        self.render
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner holds plain data; a panic elsewhere cannot leave it half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// The sequence number the next job must carry.
    pub fn next_seq(&self) -> u64 {
        self.lock().last_seq + 1
    }

    /// Publish a job for `image` (render-sized PNG) and the previous turn's actions.
    ///
    /// Fails with `ProtocolViolation` when a job is still outstanding, when
    /// `seq` does not increase, or when the image is not render-sized.
    pub fn publish(&self, seq: u64, image: Vec<u8>, actions: Vec<Action>) -> HeatloopResult<JobHandle> {
        let dims = codec::image_dimensions(&image)?;
        let mut inner = self.lock();

        if let Some(pending) = &inner.pending {
            let msg = format!("publish seq={seq} while seq={} is outstanding", pending.job.seq);
            tracing::error!("{msg}");
            return Err(HeatloopError::ProtocolViolation(msg));
        }
        if seq <= inner.last_seq {
            let msg = format!("publish seq={seq} does not follow seq={}", inner.last_seq);
            tracing::error!("{msg}");
            return Err(HeatloopError::ProtocolViolation(msg));
        }
        if dims != (self.render.width, self.render.height) {
            let msg = format!(
                "job image is {}x{}, render size is {}x{}",
                dims.0, dims.1, self.render.width, self.render.height
            );
            tracing::error!("{msg}");
            return Err(HeatloopError::ProtocolViolation(msg));
        }

        let (tx, rx) = oneshot::channel();
        let job = RenderJob {
            seq,
            image,
            actions,
            render_width: self.render.width,
            render_height: self.render.height,
        };
        tracing::debug!(seq, actions = job.actions.len(), "render job published");
        inner.last_seq = seq;
        inner.state = JobState::Published { seq };
        inner.pending = Some(Pending { job, tx });
        Ok(JobHandle { seq, rx })
    }

    /// Block the calling turn until the job is resolved, `timeout` elapses,
    /// or the job is cancelled.
    ///
    /// Expiry moves the job to `TimedOut` and returns `RenderTimeout`; a
    /// late result for it is then rejected as stale.
    pub async fn await_result(&self, handle: JobHandle, timeout: Duration) -> HeatloopResult<AnnotatedImage> {
        let JobHandle { seq, mut rx } = handle;
        let started = Instant::now();

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(Outcome::Resolved(img))) => Ok(img),
            Ok(Ok(Outcome::Cancelled)) | Ok(Err(_)) => Err(HeatloopError::Cancelled),
            Err(_) => {
                {
                    let mut inner = self.lock();
                    if inner.pending.as_ref().is_some_and(|p| p.job.seq == seq) {
                        inner.pending = None;
                        inner.state = JobState::TimedOut { seq };
                        let waited_ms = started.elapsed().as_millis() as u64;
                        tracing::warn!(seq, waited_ms, "render job timed out");
                        return Err(HeatloopError::RenderTimeout { seq, waited_ms });
                    }
                }
                // Resolved or cancelled between the deadline and the lock.
                match rx.try_recv() {
                    Ok(Outcome::Resolved(img)) => Ok(img),
                    _ => Err(HeatloopError::Cancelled),
                }
            }
        }
    }

    /// The currently published job, if any. Does not consume or change it.
    pub fn fetch_pending(&self) -> Option<RenderJob> {
        self.lock().pending.as_ref().map(|p| p.job.clone())
    }

    /// Resolve the outstanding job with an annotated PNG.
    ///
    /// Results for any other sequence (a timed-out or cancelled job, or one
    /// never published) are rejected and wake nobody. Results of the wrong
    /// size are rejected and leave the job outstanding.
    pub fn submit_result(&self, seq: u64, image: Vec<u8>) -> HeatloopResult<()> {
        let mut inner = self.lock();

        let outstanding = inner.pending.as_ref().map(|p| p.job.seq);
        if outstanding != Some(seq) {
            let msg = match outstanding {
                Some(cur) => format!("stale result seq={seq}, outstanding seq={cur}"),
                None => format!("stale result seq={seq}, no job outstanding"),
            };
            tracing::warn!("{msg}");
            return Err(HeatloopError::ProtocolViolation(msg));
        }

        let dims = codec::image_dimensions(&image)?;
        if dims != (self.render.width, self.render.height) {
            let msg = format!(
                "result seq={seq} is {}x{}, render size is {}x{}",
                dims.0, dims.1, self.render.width, self.render.height
            );
            tracing::warn!("{msg}");
            return Err(HeatloopError::ProtocolViolation(msg));
        }

        if let Some(pending) = inner.pending.take() {
            if pending.tx.send(Outcome::Resolved(AnnotatedImage { seq, png: image })).is_err() {
                tracing::debug!(seq, "result arrived after its waiter went away");
            }
        }
        inner.state = JobState::Resolved { seq };
        tracing::debug!(seq, "render job resolved");
        Ok(())
    }

    /// Cancel the outstanding job, waking its waiter with `Cancelled`.
    /// Returns the cancelled sequence number.
    pub fn cancel_outstanding(&self) -> Option<u64> {
        let mut inner = self.lock();
        let pending = inner.pending.take()?;
        let seq = pending.job.seq;
        let _ = pending.tx.send(Outcome::Cancelled);
        inner.state = JobState::Cancelled { seq };
        tracing::info!(seq, "render job cancelled");
        Some(seq)
    }
}
