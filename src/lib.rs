pub mod agent_engine;
pub mod broker;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::engine::TurnEngine;
use crate::agent_engine::session::Session;
use crate::broker::compositor::{CompositorWorker, RemoteBroker};
use crate::broker::server::ControlServer;
use crate::config::{AppConfig, CompositorMode};
use crate::errors::HeatloopResult;
use crate::executor::input::{EnigoDriver, InputDriver, RecordingDriver};
use crate::llm::prompt::system_prompt;
use crate::llm::providers::openai_compatible::OpenAiCompatibleModel;
use crate::perception::screenshot::PrimaryMonitor;

/// `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Run a full session: control socket, compositor (unless remote), turn loop.
/// Returns when the session shuts down (Ctrl-C) or the loop hits a defect.
pub async fn run(config: AppConfig) -> HeatloopResult<()> {
    config.validate()?;
    let session = Session::start(&config)?;

    let server = ControlServer::new(session.clone()).start(config.broker.listen).await?;
    tracing::info!(addr = %server.local_addr, "pause/resume/crop/status available on the control socket");

    if config.broker.compositor == CompositorMode::Local {
        let worker = CompositorWorker::new(
            session.broker(),
            config.heat.clone(),
            Duration::from_millis(config.broker.poll_interval_ms),
        );
        let shutdown = session.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                tracing::error!(error = %e, "local compositor exited");
            }
        });
    } else {
        tracing::info!("waiting for a remote compositor to poll the control socket");
    }

    let model = OpenAiCompatibleModel::new(config.model.clone(), system_prompt(&config.session.allowed_tools));
    let driver: Arc<dyn InputDriver> = if config.session.physical_execution {
        Arc::new(EnigoDriver::new())
    } else {
        tracing::info!("physical_execution = false; actions are recorded, not delivered");
        Arc::new(RecordingDriver::new())
    };

    let ctrl_c_session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_session.shutdown();
        }
    });

    let mut engine = TurnEngine::new(session.clone(), Arc::new(PrimaryMonitor), Arc::new(model), driver, &config);
    let result = engine.run().await;
    session.shutdown();
    let _ = server.task.await;
    result
}

/// Remote compositor process: poll `url` for jobs until Ctrl-C or the
/// connection drops.
pub async fn run_remote_compositor(url: &str, config: AppConfig) -> HeatloopResult<()> {
    let broker = Arc::new(RemoteBroker::connect(url).await?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });
    CompositorWorker::new(broker, config.heat, Duration::from_millis(config.broker.poll_interval_ms))
        .run(shutdown_rx)
        .await
}
