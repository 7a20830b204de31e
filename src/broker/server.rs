// Compositor / control socket. Each WebSocket text frame carries one
// `ClientMessage`; every message gets exactly one `ServerMessage` reply,
// except `subscribe`, after which the connection only streams events.
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::agent_engine::event_bus::TurnEvent;
use crate::agent_engine::session::{shutdown_requested, Session};
use crate::broker::protocol::{ClientMessage, ServerMessage};
use crate::errors::HeatloopResult;

pub struct ControlServer {
    session: Arc<Session>,
}

pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub task: JoinHandle<()>,
}

impl ControlServer {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Bind `addr` and serve until the session shuts down. Port 0 picks a
    /// free port; the bound address is in the returned handle.
    pub async fn start(self, addr: SocketAddr) -> HeatloopResult<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "control socket listening");

        let session = self.session;
        let task = tokio::spawn(async move {
            let mut shutdown = session.shutdown_signal();
            loop {
                let accepted = tokio::select! {
                    a = listener.accept() => a,
                    _ = shutdown_requested(&mut shutdown) => break,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "control connection accepted");
                        tokio::spawn(accept_connection(stream, session.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        break;
                    }
                }
            }
            info!("control socket closed");
        });

        Ok(ServerHandle { local_addr, task })
    }
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

async fn accept_connection(stream: TcpStream, session: Arc<Session>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut shutdown = session.shutdown_signal();

    loop {
        let msg = tokio::select! {
            m = ws_receiver.next() => m,
            _ = shutdown_requested(&mut shutdown) => break,
        };
        let request = match msg {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<ClientMessage>(&text),
            Some(Ok(Message::Close(_))) | None => {
                info!("WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                error!("WebSocket error: {}", e);
                break;
            }
            Some(Ok(_)) => continue,
        };

        let reply = match request {
            Ok(ClientMessage::Subscribe) => {
                // Subscribe before acknowledging so no event falls in between.
                let events = session.bus().subscribe();
                if send(&mut ws_sender, &ServerMessage::Accepted).await {
                    stream_events(&mut ws_sender, &mut ws_receiver, events, &mut shutdown).await;
                }
                break;
            }
            Ok(request) => handle(&session, request),
            Err(e) => {
                warn!(error = %e, "unparseable control message");
                ServerMessage::Rejected { reason: format!("bad message: {e}") }
            }
        };
        if !send(&mut ws_sender, &reply).await {
            break;
        }
    }
}

/// Returns false when the connection should be dropped.
async fn send(ws_sender: &mut WsSink, reply: &ServerMessage) -> bool {
    let json = match serde_json::to_string(reply) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "reply serialization failed");
            return false;
        }
    };
    if let Err(e) = ws_sender.send(Message::Text(json)).await {
        error!("Failed to send message to WS: {}", e);
        return false;
    }
    true
}

/// Forward turn events until the client leaves or the session shuts down.
/// Incoming frames other than close are ignored.
async fn stream_events(
    ws_sender: &mut WsSink,
    ws_receiver: &mut WsSource,
    mut events: broadcast::Receiver<TurnEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    info!("control connection subscribed to turn events");
    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Ok(event) => {
                    if !send(ws_sender, &ServerMessage::Event { event }).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            m = ws_receiver.next() => match m {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown_requested(shutdown) => break,
        }
    }
    info!("event subscriber disconnected");
}

/// Apply one client request to the session.
pub fn handle(session: &Session, request: ClientMessage) -> ServerMessage {
    let rejected = |e: crate::errors::HeatloopError| ServerMessage::Rejected { reason: e.to_string() };
    match request {
        ClientMessage::FetchPending => match session.broker().fetch_pending() {
            Some(job) => ServerMessage::Job { job },
            None => ServerMessage::NoJob,
        },
        ClientMessage::SubmitResult { seq, image } => match session.broker().submit_result(seq, image) {
            Ok(()) => ServerMessage::Accepted,
            Err(e) => rejected(e),
        },
        ClientMessage::Pause => {
            session.pause("requested over control socket");
            ServerMessage::Accepted
        }
        ClientMessage::Resume => {
            session.resume();
            ServerMessage::Accepted
        }
        ClientMessage::SetCrop { crop } => match session.set_crop(crop) {
            Ok(()) => ServerMessage::Accepted,
            Err(e) => rejected(e),
        },
        ClientMessage::ReloadCrop => {
            session.reload_crop();
            ServerMessage::Status { status: session.status() }
        }
        ClientMessage::Status => ServerMessage::Status { status: session.status() },
        // Streaming is set up by the connection loop; here it is only acknowledged.
        ClientMessage::Subscribe => ServerMessage::Accepted,
    }
}
