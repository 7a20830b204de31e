//! The compositor side of the render-job protocol: poll for the published
//! job, composite heat and markers, post the result back. Runs in-process
//! against the broker or in another process over the control socket.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::agent_engine::session::shutdown_requested;
use crate::broker::job::RenderJob;
use crate::broker::job_broker::RenderJobBroker;
use crate::broker::protocol::{ClientMessage, ServerMessage};
use crate::config::HeatConfig;
use crate::errors::{HeatloopError, HeatloopResult};
use crate::perception::annotator;

/// The two calls a compositor needs from a broker.
#[async_trait]
pub trait JobChannel: Send + Sync {
    async fn fetch_pending(&self) -> HeatloopResult<Option<RenderJob>>;
    async fn submit_result(&self, seq: u64, image: Vec<u8>) -> HeatloopResult<()>;
}

#[async_trait]
impl JobChannel for RenderJobBroker {
    async fn fetch_pending(&self) -> HeatloopResult<Option<RenderJob>> {
        Ok(RenderJobBroker::fetch_pending(self))
    }

    async fn submit_result(&self, seq: u64, image: Vec<u8>) -> HeatloopResult<()> {
        RenderJobBroker::submit_result(self, seq, image)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broker reached over the control socket.
pub struct RemoteBroker {
    ws: Mutex<WsStream>,
}

impl RemoteBroker {
    pub async fn connect(url: &str) -> HeatloopResult<Self> {
        let (ws, _) = connect_async(url).await?;
        tracing::info!(url, "connected to control socket");
        Ok(Self { ws: Mutex::new(ws) })
    }

    /// Send one request and wait for its reply.
    pub async fn request(&self, msg: &ClientMessage) -> HeatloopResult<ServerMessage> {
        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(serde_json::to_string(msg)?)).await?;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(HeatloopError::Transport("control socket closed".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl JobChannel for RemoteBroker {
    async fn fetch_pending(&self) -> HeatloopResult<Option<RenderJob>> {
        match self.request(&ClientMessage::FetchPending).await? {
            ServerMessage::Job { job } => Ok(Some(job)),
            ServerMessage::NoJob => Ok(None),
            other => Err(HeatloopError::Transport(format!("unexpected reply to fetch_pending: {other:?}"))),
        }
    }

    async fn submit_result(&self, seq: u64, image: Vec<u8>) -> HeatloopResult<()> {
        match self.request(&ClientMessage::SubmitResult { seq, image }).await? {
            ServerMessage::Accepted => Ok(()),
            ServerMessage::Rejected { reason } => Err(HeatloopError::ProtocolViolation(reason)),
            other => Err(HeatloopError::Transport(format!("unexpected reply to submit_result: {other:?}"))),
        }
    }
}

pub struct CompositorWorker<C: JobChannel + ?Sized> {
    channel: Arc<C>,
    style: HeatConfig,
    poll_interval: Duration,
    last_seq: Option<u64>,
}

impl<C: JobChannel + ?Sized> CompositorWorker<C> {
    pub fn new(channel: Arc<C>, style: HeatConfig, poll_interval: Duration) -> Self {
        Self { channel, style, poll_interval, last_seq: None }
    }

    /// Handle at most one job. Returns the sequence it composited, if any.
    /// A sequence already handled is skipped, even if still published.
    pub async fn poll_once(&mut self) -> HeatloopResult<Option<u64>> {
        let Some(job) = self.channel.fetch_pending().await? else {
            return Ok(None);
        };
        if self.last_seq == Some(job.seq) {
            return Ok(None);
        }
        self.last_seq = Some(job.seq);

        let seq = job.seq;
        let style = self.style.clone();
        let png = tokio::task::spawn_blocking(move || annotator::annotate_png(&job.image, &job.actions, &style))
            .await
            .map_err(|e| HeatloopError::Geometry(format!("compositor join: {e}")))??;

        self.channel.submit_result(seq, png).await?;
        tracing::debug!(seq, "annotated image posted");
        Ok(Some(seq))
    }

    /// Poll until `shutdown`. Rejections (a job that timed out meanwhile)
    /// are logged and polling continues; a lost connection ends the worker.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> HeatloopResult<()> {
        tracing::info!(poll_ms = self.poll_interval.as_millis() as u64, "compositor worker started");
        loop {
            match self.poll_once().await {
                Ok(_) => {}
                Err(HeatloopError::Transport(reason)) => {
                    tracing::error!(%reason, "compositor lost its broker");
                    return Err(HeatloopError::Transport(reason));
                }
                Err(e) => tracing::warn!(error = %e, "render job not completed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        tracing::info!("compositor worker stopped");
        Ok(())
    }
}
