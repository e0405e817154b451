use async_trait::async_trait;
use aurademo_agent::{DemoSession, FrameObserver, VideoFrame};
use aurademo_browser::redact;
use aurademo_core::{Config, Error, InMemoryProductRegistry, Paths};
use aurademo_realtime::{DeltaKind, TranscriptListener};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Per-client outbound queue depth. Frames beyond it are dropped.
const CLIENT_QUEUE: usize = 64;

/// Events pushed to an observer client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum GatewayEvent {
    #[serde(rename = "session_started")]
    SessionStarted { session_id: String },
    #[serde(rename = "transcript")]
    Transcript { kind: &'static str, delta: String },
    /// Base64 PCM16 chunk of the AI's spoken reply.
    #[serde(rename = "audio_output")]
    AudioOutput { data: String },
    #[serde(rename = "response_done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { message: String },
}

impl GatewayEvent {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages an observer client may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    TextInput { text: String },
    /// Base64 PCM16 microphone chunk.
    AudioInput { audio: String },
    Ping,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    product: Option<String>,
}

#[derive(Clone)]
struct GatewayState {
    config: Arc<Config>,
    paths: Arc<Paths>,
    registry: Arc<InMemoryProductRegistry>,
    active_sessions: Arc<AtomicUsize>,
    started_at: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    active_sessions: usize,
    uptime_secs: u64,
    version: String,
}

/// Relays decimated video frames into the client's queue.
struct SocketObserver {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl FrameObserver for SocketObserver {
    async fn on_video_frame(&self, frame: VideoFrame) -> aurademo_core::Result<()> {
        let json = serde_json::to_string(&frame)?;
        match self.tx.try_send(json) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Observer queue full, dropping frame");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Connection("observer disconnected".to_string()))
            }
        }
    }
}

/// Streams the AI's transcript (PII redacted) and voice to the client.
struct SocketTranscript {
    tx: mpsc::Sender<String>,
}

impl TranscriptListener for SocketTranscript {
    fn on_delta(&self, kind: DeltaKind, text: &str) {
        let event = match kind {
            DeltaKind::Text => GatewayEvent::Transcript {
                kind: "text",
                delta: redact(text),
            },
            DeltaKind::AudioTranscript => GatewayEvent::Transcript {
                kind: "audio",
                delta: redact(text),
            },
            DeltaKind::Audio => GatewayEvent::AudioOutput {
                data: text.to_string(),
            },
        };
        if self.tx.try_send(event.to_json()).is_err() {
            debug!(?kind, "Observer queue unavailable, dropping delta");
        }
    }

    fn on_response_done(&self) {
        let _ = self.tx.try_send(GatewayEvent::ResponseDone.to_json());
    }
}

fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/health", get(handle_health))
        .route("/v1/ws", get(handle_ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = super::load_config(&paths)?;

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let state = GatewayState {
        registry: Arc::new(InMemoryProductRegistry::new(config.products.clone())),
        config: Arc::new(config),
        paths: Arc::new(paths),
        active_sessions: Arc::new(AtomicUsize::new(0)),
        started_at: Instant::now(),
    };

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Gateway listening (ws: /v1/ws, health: /v1/health)");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut http_shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.recv().await;
            })
            .await
            .ok();
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = http_handle.await;
    Ok(())
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.active_sessions.load(Ordering::SeqCst),
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, params.product))
}

async fn handle_ws_connection(socket: WebSocket, state: GatewayState, product: Option<String>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(CLIENT_QUEUE);

    // Writer task: the only owner of the socket sink
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_sender.send(WsMessage::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let profile_key = format!("ws-{}", uuid::Uuid::new_v4());
    let backend = super::browser_backend(&state.config, &state.paths, &profile_key);
    let mut session = DemoSession::new(state.config.as_ref().clone(), backend)
        .with_observer(Arc::new(SocketObserver { tx: out_tx.clone() }))
        .with_transcript_listener(Arc::new(SocketTranscript { tx: out_tx.clone() }));

    if let Some(product_id) = product {
        session = match session.with_product(state.registry.as_ref(), &product_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(product = %product_id, error = %e, "Unknown product requested");
                finish_with_error(out_tx, send_task, e.to_string()).await;
                return;
            }
        };
    }

    info!(session_id = %session.id(), "Observer connected, starting session");
    if let Err(e) = session.start().await {
        error!(session_id = %session.id(), error = %e, "Session failed to start");
        drop(session);
        finish_with_error(out_tx, send_task, e.to_string()).await;
        return;
    }
    state.active_sessions.fetch_add(1, Ordering::SeqCst);
    let _ = out_tx
        .send(
            GatewayEvent::SessionStarted {
                session_id: session.id().to_string(),
            }
            .to_json(),
        )
        .await;

    let sender = session.sender();
    loop {
        tokio::select! {
            _ = session.wait_closed() => {
                info!(session_id = %session.id(), "Realtime connection closed");
                let _ = out_tx.try_send(GatewayEvent::Error {
                    message: "realtime connection closed".to_string(),
                }.to_json());
                break;
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::TextInput { text }) => {
                        if let Some(sender) = &sender {
                            if let Err(e) = sender.send_text(&text).await {
                                warn!(error = %e, "Failed to forward text input");
                            }
                        }
                    }
                    Ok(ClientMessage::AudioInput { audio }) => {
                        if let Some(sender) = &sender {
                            if let Err(e) = sender.send_audio(&audio).await {
                                warn!(error = %e, "Failed to forward audio input");
                            }
                        }
                    }
                    Ok(ClientMessage::Ping) => {}
                    Err(e) => debug!(error = %e, "Ignoring unrecognized client message"),
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket receive error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    session.stop().await;
    state.active_sessions.fetch_sub(1, Ordering::SeqCst);
    drop(session);
    drop(out_tx);
    // Flush anything still queued, then give up on a stuck client.
    let mut send_task = send_task;
    if tokio::time::timeout(std::time::Duration::from_secs(2), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    info!("Observer disconnected");
}

async fn finish_with_error(
    out_tx: mpsc::Sender<String>,
    send_task: tokio::task::JoinHandle<()>,
    message: String,
) {
    let _ = out_tx.send(GatewayEvent::Error { message }.to_json()).await;
    drop(out_tx);
    let mut send_task = send_task;
    if tokio::time::timeout(std::time::Duration::from_secs(2), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"text_input","text":"show me pricing"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::TextInput {
                text: "show me pricing".to_string()
            }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"audio_input","audio":"AAEC"}"#)
                .unwrap(),
            ClientMessage::AudioInput {
                audio: "AAEC".to_string()
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_gateway_event_wire_shape() {
        let json: serde_json::Value = serde_json::from_str(
            &GatewayEvent::Transcript {
                kind: "audio",
                delta: "hi".to_string(),
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["kind"], "audio");
        assert_eq!(GatewayEvent::ResponseDone.to_json(), r#"{"type":"response_done"}"#);
    }

    #[tokio::test]
    async fn test_socket_observer_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let observer = SocketObserver { tx };
        let frame = VideoFrame {
            kind: "video_frame",
            data: "abc".to_string(),
            timestamp: 1.5,
        };

        observer.on_video_frame(frame.clone()).await.unwrap();
        // Full queue drops the frame without failing the capture loop.
        observer.on_video_frame(frame.clone()).await.unwrap();

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "video_frame");
        assert_eq!(first["data"], "abc");
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(observer.on_video_frame(frame).await.is_err());
    }

    #[test]
    fn test_transcript_is_redacted() {
        let (tx, mut rx) = mpsc::channel(4);
        let listener = SocketTranscript { tx };
        listener.on_delta(DeltaKind::Text, "mail me at jane@example.com");
        let json: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(json["delta"], "mail me at ***@example.com");
        assert_eq!(json["kind"], "text");
    }

    #[test]
    fn test_audio_delta_relayed_untouched() {
        let (tx, mut rx) = mpsc::channel(4);
        let listener = SocketTranscript { tx };
        // Audio chunks are base64 and skip redaction.
        let chunk = "MTIzNDU2Nzg5MDEy3456789012==";
        listener.on_delta(DeltaKind::Audio, chunk);
        listener.on_delta(DeltaKind::AudioTranscript, "call 555-123-4567");

        let audio: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(audio["type"], "audio_output");
        assert_eq!(audio["data"], chunk);

        let transcript: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(transcript["type"], "transcript");
        assert_eq!(transcript["kind"], "audio");
        assert_ne!(transcript["delta"], "call 555-123-4567");
    }
}
