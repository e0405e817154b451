//! Test doubles shared by the agent tests.

use async_trait::async_trait;
use aurademo_browser::{BrowserBackend, ElementTarget, PageDriver};
use aurademo_core::{Error, Result};
use aurademo_realtime::RealtimeOutbound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::{FrameObserver, VideoFrame};

#[derive(Default)]
pub struct BrowserLog {
    pub calls: Mutex<Vec<String>>,
    pub launches: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl BrowserLog {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct FakePage {
    log: Arc<BrowserLog>,
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.log.push(format!("goto {}", url));
        Ok(())
    }

    async fn click(&self, target: &ElementTarget, _timeout: Duration) -> Result<()> {
        self.log.push(format!("click {:?}", target));
        Ok(())
    }

    async fn fill(&self, target: &ElementTarget, text: &str, _timeout: Duration) -> Result<()> {
        self.log.push(format!("fill {:?} {}", target, text));
        Ok(())
    }

    async fn hover(&self, target: &ElementTarget, _timeout: Duration) -> Result<()> {
        self.log.push(format!("hover {:?}", target));
        Ok(())
    }

    async fn scroll_by(&self, dy: i64) -> Result<()> {
        self.log.push(format!("scroll {}", dy));
        Ok(())
    }

    async fn screenshot_jpeg(&self, _quality: u8) -> Result<String> {
        Ok("/9j/4AAQ".to_string())
    }

    async fn shutdown(&mut self) {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeBackend {
    pub log: Arc<BrowserLog>,
    pub fail_launch: bool,
}

impl FakeBackend {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::default(),
            fail_launch: false,
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::default(),
            fail_launch: true,
        })
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(Error::BrowserLaunch("no browser binary".to_string()));
        }
        Ok(Box::new(FakePage {
            log: self.log.clone(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    ToolResult { call_id: String, output: String },
    Image(String),
}

#[derive(Default)]
pub struct RecordingOutbound {
    pub sent: Mutex<Vec<Sent>>,
    pub fail: bool,
}

impl RecordingOutbound {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn images(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Image(_)))
            .count()
    }
}

#[async_trait]
impl RealtimeOutbound for RecordingOutbound {
    async fn send_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::ToolResult {
            call_id: call_id.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn send_image(&self, image_base64: &str) -> Result<()> {
        if self.fail {
            return Err(Error::Connection("socket gone".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Image(image_base64.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub frames: Mutex<Vec<VideoFrame>>,
}

impl RecordingObserver {
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[async_trait]
impl FrameObserver for RecordingObserver {
    async fn on_video_frame(&self, frame: VideoFrame) -> Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}
