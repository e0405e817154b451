//! Visual grounding: periodic screenshots forwarded to the AI and, at half
//! rate, relayed to an observer as video frames.

use async_trait::async_trait;
use aurademo_browser::ActionExecutor;
use aurademo_core::Result;
use aurademo_realtime::RealtimeOutbound;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// One successfully captured screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Base64 JPEG.
    pub data: String,
    /// Unix seconds.
    pub timestamp: f64,
    /// 1-based count of successful captures.
    pub sequence: u64,
}

/// Observer wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: String,
    pub timestamp: f64,
}

impl From<&CapturedFrame> for VideoFrame {
    fn from(frame: &CapturedFrame) -> Self {
        Self {
            kind: "video_frame",
            data: frame.data.clone(),
            timestamp: frame.timestamp,
        }
    }
}

/// Where screenshots come from.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// `Ok(None)` when no page is available yet.
    async fn capture_frame(&self) -> Result<Option<String>>;
}

#[async_trait]
impl FrameSource for Mutex<ActionExecutor> {
    async fn capture_frame(&self) -> Result<Option<String>> {
        self.lock().await.capture_frame().await
    }
}

/// Downstream consumer of relayed frames (e.g. a dashboard socket).
#[async_trait]
pub trait FrameObserver: Send + Sync {
    async fn on_video_frame(&self, frame: VideoFrame) -> Result<()>;
}

pub struct VisualCaptureLoop {
    source: Arc<dyn FrameSource>,
    outbound: Arc<dyn RealtimeOutbound>,
    observer: Option<Arc<dyn FrameObserver>>,
    interval: Duration,
    frame_count: u64,
}

impl VisualCaptureLoop {
    pub fn new(
        source: Arc<dyn FrameSource>,
        outbound: Arc<dyn RealtimeOutbound>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            outbound,
            observer: None,
            interval,
            frame_count: 0,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Capture once. Every frame goes to the AI; even-numbered frames also
    /// go to the observer.
    pub async fn tick(&mut self) -> Option<CapturedFrame> {
        let data = match self.source.capture_frame().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!("No page to capture yet");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Frame capture failed");
                return None;
            }
        };

        self.frame_count += 1;
        let frame = CapturedFrame {
            data,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            sequence: self.frame_count,
        };

        if let Err(e) = self.outbound.send_image(&frame.data).await {
            warn!(sequence = frame.sequence, error = %e, "Failed to forward frame to AI");
        }

        if frame.sequence % 2 == 0 {
            if let Some(observer) = &self.observer {
                if let Err(e) = observer.on_video_frame(VideoFrame::from(&frame)).await {
                    warn!(sequence = frame.sequence, error = %e, "Failed to relay frame");
                }
            }
        }

        Some(frame)
    }

    /// Sleep, capture, repeat until shutdown.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Visual capture loop started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }
        info!(frames = self.frame_count, "Visual capture loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, RecordingObserver, RecordingOutbound};
    use aurademo_core::config::BrowserConfig;
    use aurademo_core::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted capture outcomes, then keeps returning frames.
    #[derive(Default)]
    struct ScriptedSource {
        script: StdMutex<VecDeque<Result<Option<String>>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Option<String>>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn capture_frame(&self) -> Result<Option<String>> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Some("frame".to_string())))
        }
    }

    #[test]
    fn test_video_frame_wire_shape() {
        let frame = CapturedFrame {
            data: "abc".into(),
            timestamp: 1700000000.5,
            sequence: 2,
        };
        let json = serde_json::to_value(VideoFrame::from(&frame)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "video_frame", "data": "abc", "timestamp": 1700000000.5})
        );
    }

    #[tokio::test]
    async fn test_null_frames_are_skipped_silently() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(None), Ok(None)]));
        let outbound = Arc::new(RecordingOutbound::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut capture = VisualCaptureLoop::new(source, outbound.clone(), Duration::from_secs(2))
            .with_observer(observer.clone());

        assert!(capture.tick().await.is_none());
        assert!(capture.tick().await.is_none());
        assert_eq!(capture.frame_count(), 0);
        assert!(outbound.sent().is_empty());
        assert_eq!(observer.count(), 0);

        let frame = capture.tick().await.unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(outbound.images(), 1);
        assert_eq!(observer.count(), 0);
    }

    #[tokio::test]
    async fn test_unstarted_executor_is_skipped() {
        let executor = Arc::new(Mutex::new(ActionExecutor::new(
            FakeBackend::working(),
            BrowserConfig::default(),
        )));
        let outbound = Arc::new(RecordingOutbound::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut capture =
            VisualCaptureLoop::new(executor.clone(), outbound.clone(), Duration::from_secs(2))
                .with_observer(observer.clone());

        assert!(capture.tick().await.is_none());
        assert_eq!(capture.frame_count(), 0);
        assert!(outbound.sent().is_empty());

        executor.lock().await.start().await.unwrap();
        let frame = capture.tick().await.unwrap();
        assert_eq!(frame.data, "/9j/4AAQ");
        assert_eq!(outbound.images(), 1);

        executor.lock().await.stop().await;
        assert!(capture.tick().await.is_none());
        assert_eq!(capture.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_errors_do_not_advance_counter() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(Some("a".into())),
            Err(Error::Cdp("screenshot failed".into())),
            Ok(Some("b".into())),
        ]));
        let outbound = Arc::new(RecordingOutbound::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut capture = VisualCaptureLoop::new(source, outbound.clone(), Duration::from_secs(2))
            .with_observer(observer.clone());

        for _ in 0..3 {
            capture.tick().await;
        }
        assert_eq!(capture.frame_count(), 2);
        assert_eq!(outbound.images(), 2);
        let relayed = observer.frames.lock().unwrap().clone();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].data, "b");
    }

    #[tokio::test]
    async fn test_forward_failure_still_relays() {
        let source = Arc::new(ScriptedSource::default());
        let outbound = Arc::new(RecordingOutbound {
            fail: true,
            ..Default::default()
        });
        let observer = Arc::new(RecordingObserver::default());
        let mut capture = VisualCaptureLoop::new(source, outbound, Duration::from_secs(2))
            .with_observer(observer.clone());

        capture.tick().await;
        capture.tick().await;
        assert_eq!(capture.frame_count(), 2);
        assert_eq!(observer.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_forwards_every_frame_and_relays_half() {
        let source = Arc::new(ScriptedSource::default());
        let outbound = Arc::new(RecordingOutbound::default());
        let observer = Arc::new(RecordingObserver::default());
        let capture = VisualCaptureLoop::new(source, outbound.clone(), Duration::from_secs(2))
            .with_observer(observer.clone());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(capture.run(shutdown_rx));

        // Captures land at 2s, 4s and 6s.
        tokio::time::sleep(Duration::from_secs(7)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(outbound.images(), 3);
        assert_eq!(observer.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_observer() {
        let source = Arc::new(ScriptedSource::default());
        let outbound = Arc::new(RecordingOutbound::default());
        let capture = VisualCaptureLoop::new(source, outbound.clone(), Duration::from_millis(500));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(capture.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(2250)).await;
        drop(shutdown_tx);
        handle.await.unwrap();

        assert_eq!(outbound.images(), 4);
    }
}
