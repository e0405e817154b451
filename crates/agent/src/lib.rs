pub mod capture;
pub mod handler;
pub mod session;

#[cfg(test)]
mod testing;

pub use capture::{CapturedFrame, FrameObserver, FrameSource, VideoFrame, VisualCaptureLoop};
pub use handler::{BrowserActionArgs, BrowserToolHandler};
pub use session::{DemoSession, SessionState};
