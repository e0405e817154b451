//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! One client per debugging endpoint (browser-level or page target). Commands
//! are correlated with responses by request id; events are ignored.

use aurademo_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A CDP WebSocket client that can send commands and receive responses.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: PendingMap,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    command_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("failed to connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: resolves pending commands; drops events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Waiters observe a closed channel.
            pending_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("failed to send {}: {}", method, e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("{} failed: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp(format!("{}: connection closed", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}ms",
                    method,
                    self.command_timeout.as_millis()
                )))
            }
        }
    }

    /// Enable a CDP domain (e.g., "Page", "Runtime", "DOM").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value> {
        let result = self
            .send_command("Page.navigate", json!({"url": url}))
            .await?;
        if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Browser(format!("navigation to {} failed: {}", url, err)));
        }
        Ok(result)
    }

    /// Loader of the document currently committed in the main frame.
    pub async fn main_frame_loader_id(&self) -> Result<Option<String>> {
        let tree = self.send_command("Page.getFrameTree", json!({})).await?;
        Ok(tree
            .pointer("/frameTree/frame/loaderId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Evaluate JavaScript in the page context and return the by-value result.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("script threw");
            return Err(Error::Browser(text.to_string()));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Capture the viewport as base64-encoded JPEG.
    pub async fn screenshot_jpeg(&self, quality: u8) -> Result<String> {
        let result = self
            .send_command(
                "Page.captureScreenshot",
                json!({"format": "jpeg", "quality": quality}),
            )
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no screenshot data returned".to_string()))
    }

    /// Dispatch a mouse event via Input domain.
    pub async fn dispatch_mouse_event(
        &self,
        event_type: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: i32,
    ) -> Result<()> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    /// Insert text (bypasses key events, good for filling forms).
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send_command("Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    /// Close a target by its targetId (browser-level connection).
    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    /// Ask the browser to exit (browser-level connection).
    pub async fn close_browser(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Minimal DevTools endpoint answering a few canned methods.
    async fn fake_devtools() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                json!({"method": "Page.loadEventFired", "params": {}}).to_string(),
            ))
            .await
            .unwrap();

            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                let id = req["id"].clone();
                let reply = match req["method"].as_str().unwrap_or("") {
                    "Runtime.evaluate" if req["params"]["expression"] == "throw" => json!({
                        "id": id,
                        "result": {
                            "result": {"type": "object"},
                            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "Error: boom"}}
                        }
                    }),
                    "Runtime.evaluate" => json!({
                        "id": id,
                        "result": {"result": {"type": "number", "value": 42}}
                    }),
                    "Page.navigate" => json!({
                        "id": id,
                        "result": {"frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED"}
                    }),
                    "Page.captureScreenshot" => json!({"id": id, "result": {"data": "/9j/abc"}}),
                    "Page.getFrameTree" => json!({
                        "id": id,
                        "result": {"frameTree": {"frame": {"id": "F1", "loaderId": "L7", "url": "about:blank"}}}
                    }),
                    "Slow.never" => continue,
                    _ => json!({"id": id, "error": {"code": -32601, "message": "method not found"}}),
                };
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_commands_resolve_by_id() {
        let client = CdpClient::connect(&fake_devtools().await).await.unwrap();
        assert_eq!(client.evaluate_js("6 * 7").await.unwrap(), json!(42));
        assert_eq!(client.screenshot_jpeg(50).await.unwrap(), "/9j/abc");
        assert_eq!(
            client.main_frame_loader_id().await.unwrap().as_deref(),
            Some("L7")
        );
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let client = CdpClient::connect(&fake_devtools().await).await.unwrap();

        match client.evaluate_js("throw").await {
            Err(Error::Browser(msg)) => assert_eq!(msg, "Error: boom"),
            other => panic!("unexpected: {:?}", other),
        }
        match client.navigate("https://nowhere.invalid").await {
            Err(Error::Browser(msg)) => assert!(msg.contains("ERR_NAME_NOT_RESOLVED")),
            other => panic!("unexpected: {:?}", other),
        }
        match client.enable_domain("Bogus").await {
            Err(Error::Cdp(msg)) => assert!(msg.contains("Bogus.enable failed")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let client = CdpClient::connect(&fake_devtools().await)
            .await
            .unwrap()
            .with_command_timeout(Duration::from_millis(100));
        match client.send_command("Slow.never", json!({})).await {
            Err(Error::Timeout(msg)) => assert!(msg.contains("Slow.never")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(matches!(
            CdpClient::connect(&format!("ws://{}", addr)).await,
            Err(Error::Cdp(_))
        ));
    }
}
