//! Session orchestrator: wires one browser, one realtime connection and one
//! capture loop together for the lifetime of a demo.

use aurademo_browser::{ActionExecutor, BrowserBackend};
use aurademo_core::product::build_instructions;
use aurademo_core::{Config, Error, ProductRegistry, Result};
use aurademo_realtime::{
    ConnectionState, RealtimeClient, RealtimeOutbound, RealtimeSender, TranscriptListener,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{FrameObserver, FrameSource, VisualCaptureLoop};
use crate::handler::BrowserToolHandler;

const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connecting,
    Active,
    Ending,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Ending => write!(f, "ending"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

pub struct DemoSession {
    id: String,
    state: SessionState,
    config: Config,
    instructions: String,
    executor: Arc<Mutex<ActionExecutor>>,
    client: Option<RealtimeClient>,
    sender: Option<RealtimeSender>,
    connection_rx: Option<watch::Receiver<ConnectionState>>,
    observer: Option<Arc<dyn FrameObserver>>,
    listener: Option<Arc<dyn TranscriptListener>>,
    shutdown_tx: broadcast::Sender<()>,
    capture_handle: Option<JoinHandle<()>>,
}

impl DemoSession {
    pub fn new(config: Config, backend: Arc<dyn BrowserBackend>) -> Self {
        let executor = ActionExecutor::new(backend, config.browser.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Created,
            config,
            instructions: build_instructions(None),
            executor: Arc::new(Mutex::new(executor)),
            client: None,
            sender: None,
            connection_rx: None,
            observer: None,
            listener: None,
            shutdown_tx,
            capture_handle: None,
        }
    }

    /// Ground the instructions in a registered product.
    pub async fn with_product(
        mut self,
        registry: &dyn ProductRegistry,
        product_id: &str,
    ) -> Result<Self> {
        let product = registry
            .get(product_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("product '{}'", product_id)))?;
        info!(session_id = %self.id, product = %product.name, "Seeding instructions from product");
        self.instructions = build_instructions(Some(&product));
        Ok(self)
    }

    pub fn with_observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_transcript_listener(mut self, listener: Arc<dyn TranscriptListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Outbound handle once the connection is up.
    pub fn sender(&self) -> Option<RealtimeSender> {
        self.sender.clone()
    }

    /// Browser, then connection, then capture loop. Any failure tears down
    /// whatever was already acquired and is returned to the caller.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(Error::Session(format!(
                "session {} cannot start from state {}",
                self.id, self.state
            )));
        }
        self.state = SessionState::Connecting;
        info!(session_id = %self.id, "Starting demo session");

        if let Err(e) = self.connect_all().await {
            error!(session_id = %self.id, error = %e, "Session start failed");
            self.stop().await;
            return Err(e);
        }

        self.state = SessionState::Active;
        info!(session_id = %self.id, "Demo session active");
        Ok(())
    }

    async fn connect_all(&mut self) -> Result<()> {
        self.executor.lock().await.start().await?;

        let mut client = RealtimeClient::new(self.config.realtime.clone(), self.instructions.clone())?;
        let sender = client.sender();
        let outbound: Arc<dyn RealtimeOutbound> = Arc::new(sender.clone());

        client.set_tool_call_handler(Arc::new(BrowserToolHandler::new(
            self.executor.clone(),
            outbound.clone(),
        )));
        if let Some(listener) = &self.listener {
            client.set_transcript_listener(listener.clone());
        }
        self.connection_rx = Some(client.subscribe_state());

        let connected = client.connect().await;
        self.client = Some(client);
        connected?;
        self.sender = Some(sender);

        let source: Arc<dyn FrameSource> = self.executor.clone();
        let mut capture = VisualCaptureLoop::new(
            source,
            outbound,
            Duration::from_millis(self.config.capture.interval_ms),
        );
        if let Some(observer) = &self.observer {
            capture = capture.with_observer(observer.clone());
        }
        self.capture_handle = Some(tokio::spawn(capture.run(self.shutdown_tx.subscribe())));
        Ok(())
    }

    /// Capture loop, connection, browser; each step best-effort. Safe after
    /// a failed `start()` and on repeated calls.
    pub async fn stop(&mut self) {
        if self.state == SessionState::Closed {
            debug!(session_id = %self.id, "Session already closed");
            return;
        }
        self.state = SessionState::Ending;
        info!(session_id = %self.id, "Stopping demo session");

        let _ = self.shutdown_tx.send(());
        if let Some(mut handle) = self.capture_handle.take() {
            if tokio::time::timeout(CAPTURE_STOP_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!(session_id = %self.id, "Capture loop did not stop in time, aborting");
                handle.abort();
            }
        }

        if let Some(mut client) = self.client.take() {
            client.close().await;
        }
        self.sender = None;

        self.executor.lock().await.stop().await;

        self.state = SessionState::Closed;
        info!(session_id = %self.id, "Demo session closed");
    }

    /// Resolve when the realtime connection has closed, for whatever reason.
    /// Returns immediately if no connection was ever attempted.
    pub async fn wait_closed(&self) {
        let Some(rx) = &self.connection_rx else {
            return;
        };
        let mut rx = rx.clone();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}
