//! Realtime WebSocket client.
//!
//! Lifecycle: `Disconnected -> Connecting -> Configured -> Active -> Closed`.
//! A writer task owns the sink, a reader task dispatches inbound events, and
//! a dispatcher task runs tool calls one at a time in arrival order.

use async_trait::async_trait;
use aurademo_core::config::RealtimeConfig;
use aurademo_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::events::{self, ServerEvent};

const OUTBOUND_BUFFER: usize = 256;
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open and session configuration sent.
    Configured,
    /// Inbound events are being dispatched.
    Active,
    Closed,
}

impl ConnectionState {
    fn is_open(self) -> bool {
        matches!(self, Self::Configured | Self::Active)
    }
}

/// A completed function call from the AI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments, as received.
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Text,
    /// Base64 PCM16 audio, not text.
    Audio,
    AudioTranscript,
}

/// Receives tool calls. Calls are delivered sequentially; the next one is not
/// started until this returns.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn on_tool_call(&self, call: ToolCall);
}

/// Receives streamed text, audio and transcript fragments.
pub trait TranscriptListener: Send + Sync {
    fn on_delta(&self, kind: DeltaKind, text: &str);

    fn on_response_done(&self) {}
}

/// The outbound half the orchestration layer depends on.
#[async_trait]
pub trait RealtimeOutbound: Send + Sync {
    /// Report a tool result and ask the AI to continue.
    async fn send_tool_result(&self, call_id: &str, output: &str) -> Result<()>;

    /// Ground the conversation with a frame. Does not trigger a response.
    async fn send_image(&self, image_base64: &str) -> Result<()>;
}

/// Cloneable handle for sending on an open connection.
#[derive(Clone)]
pub struct RealtimeSender {
    tx: mpsc::Sender<Message>,
    state: watch::Receiver<ConnectionState>,
}

impl RealtimeSender {
    async fn send_json(&self, value: &Value) -> Result<()> {
        let state = *self.state.borrow();
        if !state.is_open() {
            return Err(Error::Connection(format!(
                "realtime connection is not open ({:?})",
                state
            )));
        }
        self.send_raw(Message::Text(value.to_string())).await
    }

    async fn send_raw(&self, msg: Message) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| Error::Connection("realtime connection closed".to_string()))
    }

    /// Stream a chunk of base64 PCM16 microphone audio. No response is
    /// requested; the service detects the end of the turn.
    pub async fn send_audio(&self, audio_base64: &str) -> Result<()> {
        self.send_json(&events::input_audio_append(audio_base64)).await
    }

    /// Inject a typed user message and request a response.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_json(&events::input_text(text)).await?;
        self.send_json(&events::response_create(None)).await
    }
}

#[async_trait]
impl RealtimeOutbound for RealtimeSender {
    async fn send_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        self.send_json(&events::function_call_output(call_id, output))
            .await?;
        self.send_json(&events::response_create(None)).await
    }

    async fn send_image(&self, image_base64: &str) -> Result<()> {
        self.send_json(&events::input_image(image_base64)).await
    }
}

pub struct RealtimeClient {
    config: RealtimeConfig,
    instructions: String,
    tool_handler: Option<Arc<dyn ToolCallHandler>>,
    listener: Option<Arc<dyn TranscriptListener>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    sender: RealtimeSender,
    outbound_rx: Option<mpsc::Receiver<Message>>,
    writer_handle: Option<JoinHandle<()>>,
    reader_handle: Option<JoinHandle<()>>,
    dispatcher_handle: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Build a client. Missing endpoint, key or deployment is an error here,
    /// not at connect time.
    pub fn new(config: RealtimeConfig, instructions: impl Into<String>) -> Result<Self> {
        for (value, name) in [
            (&config.endpoint, "endpoint"),
            (&config.api_key, "api key"),
            (&config.deployment, "deployment"),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("realtime {} is not configured", name)));
            }
        }

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        Ok(Self {
            config,
            instructions: instructions.into(),
            tool_handler: None,
            listener: None,
            state_tx: Arc::new(state_tx),
            sender: RealtimeSender { tx, state: state_rx },
            outbound_rx: Some(outbound_rx),
            writer_handle: None,
            reader_handle: None,
            dispatcher_handle: None,
        })
    }

    pub fn set_tool_call_handler(&mut self, handler: Arc<dyn ToolCallHandler>) {
        self.tool_handler = Some(handler);
    }

    pub fn set_transcript_listener(&mut self, listener: Arc<dyn TranscriptListener>) {
        self.listener = Some(listener);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Outbound handle. Usable once connected; sends fail before that.
    pub fn sender(&self) -> RealtimeSender {
        self.sender.clone()
    }

    /// `{endpoint}/openai/realtime?api-version=..&deployment=..` with the
    /// scheme mapped to its WebSocket counterpart.
    pub fn realtime_url(&self) -> Result<Url> {
        let endpoint = self.config.endpoint.trim();
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };

        let mut url = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid realtime endpoint '{}': {}", endpoint, e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::Config(format!(
                    "unsupported realtime endpoint scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("cannot use scheme {} for {}", scheme, endpoint)))?;

        url.set_path("/openai/realtime");
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version)
            .append_pair("deployment", &self.config.deployment);
        Ok(url)
    }

    /// Open the socket, configure the session and start dispatching.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(Error::Connection(format!(
                "cannot connect from state {:?}",
                self.state()
            )));
        }
        let url = self.realtime_url()?;
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return Err(Error::Connection("client already used".to_string()));
        };

        self.state_tx.send_replace(ConnectionState::Connecting);
        let ws_stream = match self.open_socket(&url).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Closed);
                return Err(e);
            }
        };
        info!(host = url.host_str().unwrap_or(""), "Connected to realtime service");

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        // Writer task: owns the sink, stops after forwarding a close frame
        self.writer_handle = Some(tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_sink.send(msg).await {
                    error!("Realtime WebSocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        }));

        self.sender
            .send_raw(Message::Text(events::session_update(&self.instructions).to_string()))
            .await?;
        self.sender
            .send_raw(Message::Text(
                events::response_create(Some(&self.config.greeting)).to_string(),
            ))
            .await?;
        self.state_tx.send_replace(ConnectionState::Configured);
        debug!("Session configuration and greeting sent");

        let (tool_tx, mut tool_rx) = mpsc::unbounded_channel::<ToolCall>();
        let handler = self.tool_handler.clone();
        self.dispatcher_handle = Some(tokio::spawn(async move {
            while let Some(call) = tool_rx.recv().await {
                match &handler {
                    Some(handler) => handler.on_tool_call(call).await,
                    None => warn!(call_id = %call.call_id, "No tool handler registered, dropping call"),
                }
            }
        }));

        self.state_tx.send_replace(ConnectionState::Active);

        let listener = self.listener.clone();
        let state_tx = self.state_tx.clone();
        self.reader_handle = Some(tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match ServerEvent::parse(&text) {
                        Ok(event) => dispatch_event(event, &tool_tx, listener.as_deref()),
                        Err(e) => warn!("{}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Realtime connection closed by server");
                        break;
                    }
                    Err(e) => {
                        error!("Realtime WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            state_tx.send_replace(ConnectionState::Closed);
        }));

        Ok(())
    }

    async fn open_socket(
        &self,
        url: &Url,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    > {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(format!("invalid realtime request: {}", e)))?;
        let api_key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| Error::Config(format!("invalid api key header: {}", e)))?;
        request.headers_mut().insert("api-key", api_key);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(e)) => Err(Error::Connection(format!(
                "failed to connect to realtime service: {}",
                e
            ))),
            Err(_) => Err(Error::Timeout(format!(
                "realtime connect timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Close the socket and stop dispatching. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer_handle.take() {
            let flushing = self.state().is_open()
                && self.sender.send_raw(Message::Close(None)).await.is_ok();
            if flushing && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
                debug!("Realtime writer did not finish in time");
            }
            writer.abort();
        }
        for handle in [self.reader_handle.take(), self.dispatcher_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    /// Resolve once the connection reaches `Closed`.
    pub async fn wait_closed(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for handle in [
            self.writer_handle.take(),
            self.reader_handle.take(),
            self.dispatcher_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Route one inbound event. Tool calls are queued, never run inline, so the
/// reader keeps draining the socket while a browser action is in progress.
fn dispatch_event(
    event: ServerEvent,
    tool_tx: &mpsc::UnboundedSender<ToolCall>,
    listener: Option<&dyn TranscriptListener>,
) {
    match event {
        ServerEvent::TextDelta { delta } => {
            if let Some(l) = listener {
                l.on_delta(DeltaKind::Text, &delta);
            }
        }
        ServerEvent::AudioDelta { delta } => {
            if let Some(l) = listener {
                l.on_delta(DeltaKind::Audio, &delta);
            }
        }
        ServerEvent::AudioTranscriptDelta { delta } => {
            if let Some(l) = listener {
                l.on_delta(DeltaKind::AudioTranscript, &delta);
            }
        }
        ServerEvent::FunctionCallArgumentsDone {
            call_id,
            name,
            arguments,
        } => {
            info!(call_id = %call_id, tool = %name, "Tool call received");
            if tool_tx
                .send(ToolCall {
                    call_id,
                    name,
                    arguments,
                })
                .is_err()
            {
                warn!("Tool dispatcher stopped, dropping call");
            }
        }
        ServerEvent::ResponseDone { response } => {
            let status = response.get("status").cloned().unwrap_or_default();
            info!(status = %status, "Response done");
            if let Some(l) = listener {
                l.on_response_done();
            }
        }
        ServerEvent::Error { error } => {
            error!("Realtime service error: {}", error);
        }
        ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
            debug!("Realtime session acknowledged");
        }
        ServerEvent::Unknown => debug!("Unhandled realtime event"),
    }
}
