mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use heatloop_lib::agent_engine::event_bus::TurnEvent;
use heatloop_lib::agent_engine::session::Session;
use heatloop_lib::agent_engine::turn_log;
use heatloop_lib::agent_engine::state::{Action, SessionState};
use heatloop_lib::broker::compositor::{CompositorWorker, JobChannel, RemoteBroker};
use heatloop_lib::broker::job::JobState;
use heatloop_lib::broker::protocol::{ClientMessage, ServerMessage};
use heatloop_lib::broker::server::ControlServer;
use heatloop_lib::config::HeatConfig;
use heatloop_lib::errors::HeatloopError;
use heatloop_lib::perception::annotator;
use heatloop_lib::perception::codec;
use heatloop_lib::perception::types::{CropRegion, NormalizedPoint, RenderSize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn start() -> (tempfile::TempDir, Arc<Session>, String) {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = common::test_config(tmp.path());
    cfg.render = RenderSize { width: 64, height: 36 };
    let session = Session::start(&cfg).unwrap();
    let handle = ControlServer::new(session.clone()).start(cfg.broker.listen).await.unwrap();
    (tmp, session, format!("ws://{}", handle.local_addr))
}

#[tokio::test]
async fn remote_compositor_resolves_published_job() {
    let (_tmp, session, url) = start().await;
    let remote = Arc::new(RemoteBroker::connect(&url).await.unwrap());
    let mut worker = CompositorWorker::new(remote.clone(), HeatConfig::default(), Duration::from_millis(5));

    assert_eq!(worker.poll_once().await.unwrap(), None);

    let size = RenderSize { width: 64, height: 36 };
    let base = common::gray(64, 36);
    let actions = vec![Action::Drag {
        start: NormalizedPoint::new(100, 100).unwrap(),
        end: NormalizedPoint::new(900, 100).unwrap(),
    }];
    let broker = session.broker();
    let handle = broker.publish(1, common::render_png(size), actions.clone()).unwrap();

    let b = broker.clone();
    let waiter = tokio::spawn(async move { b.await_result(handle, Duration::from_secs(5)).await });

    assert_eq!(worker.poll_once().await.unwrap(), Some(1));
    let img = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap().unwrap();
    let expected = codec::encode_png(&annotator::annotate(&base, &actions, &HeatConfig::default())).unwrap();
    assert_eq!(img.png, expected);

    // A late duplicate for the resolved job is refused.
    let err = remote.submit_result(1, common::render_png(size)).await.err().unwrap();
    assert!(matches!(err, HeatloopError::ProtocolViolation(_)));
    session.shutdown();
}

#[tokio::test]
async fn control_messages_drive_the_session() {
    let (_tmp, session, url) = start().await;
    let remote = RemoteBroker::connect(&url).await.unwrap();

    let status = match remote.request(&ClientMessage::Status).await.unwrap() {
        ServerMessage::Status { status } => status,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(status.state, SessionState::Running);
    assert_eq!(status.job, JobState::Idle);

    assert_eq!(remote.request(&ClientMessage::Pause).await.unwrap(), ServerMessage::Accepted);
    assert!(session.store().is_paused());
    assert_eq!(remote.request(&ClientMessage::Resume).await.unwrap(), ServerMessage::Accepted);
    assert!(!session.store().is_paused());

    let crop = CropRegion { x1: 5, y1: 6, w: 70, h: 80 };
    assert_eq!(
        remote.request(&ClientMessage::SetCrop { crop: Some(crop) }).await.unwrap(),
        ServerMessage::Accepted
    );
    assert_eq!(session.store().crop(), Some(crop));
    assert!(matches!(
        remote
            .request(&ClientMessage::SetCrop { crop: Some(CropRegion { x1: 0, y1: 0, w: 0, h: 0 }) })
            .await
            .unwrap(),
        ServerMessage::Rejected { .. }
    ));
    session.shutdown();
}

#[tokio::test]
async fn garbage_frames_are_rejected_not_fatal() {
    let (_tmp, session, url) = start().await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    ws.send(Message::Text("{\"type\":\"warp\"}".to_string())).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    let reply: ServerMessage = serde_json::from_str(&reply.to_string()).unwrap();
    assert!(matches!(reply, ServerMessage::Rejected { .. }));

    ws.send(Message::Text(serde_json::to_string(&ClientMessage::FetchPending).unwrap()))
        .await
        .unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    let reply: ServerMessage = serde_json::from_str(&reply.to_string()).unwrap();
    assert_eq!(reply, ServerMessage::NoJob);
    session.shutdown();
}

#[tokio::test]
async fn reload_crop_picks_up_an_edited_crop_file() {
    let (tmp, session, url) = start().await;
    let remote = RemoteBroker::connect(&url).await.unwrap();
    assert_eq!(session.store().crop(), None);

    let crop = CropRegion { x1: 10, y1: 20, w: 300, h: 200 };
    turn_log::save_crop(tmp.path(), Some(crop)).unwrap();
    // Not picked up until asked.
    assert_eq!(session.store().crop(), None);

    match remote.request(&ClientMessage::ReloadCrop).await.unwrap() {
        ServerMessage::Status { status } => assert_eq!(status.crop, Some(crop)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.store().crop(), Some(crop));

    turn_log::save_crop(tmp.path(), None).unwrap();
    remote.request(&ClientMessage::ReloadCrop).await.unwrap();
    assert_eq!(session.store().crop(), None);
    session.shutdown();
}

#[tokio::test]
async fn subscribed_connection_streams_turn_events() {
    let (_tmp, session, url) = start().await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    async fn next_reply(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> ServerMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        serde_json::from_str(&frame.to_string()).unwrap()
    }

    ws.send(Message::Text(serde_json::to_string(&ClientMessage::Subscribe).unwrap()))
        .await
        .unwrap();
    assert_eq!(next_reply(&mut ws).await, ServerMessage::Accepted);

    session.pause("dashboard test");
    session.resume();
    assert_eq!(
        next_reply(&mut ws).await,
        ServerMessage::Event { event: TurnEvent::Paused { reason: "dashboard test".into() } }
    );
    assert_eq!(next_reply(&mut ws).await, ServerMessage::Event { event: TurnEvent::Resumed });

    // Other connections keep request/reply semantics.
    let remote = RemoteBroker::connect(&url).await.unwrap();
    assert!(matches!(remote.request(&ClientMessage::Status).await.unwrap(), ServerMessage::Status { .. }));
    session.shutdown();
}
