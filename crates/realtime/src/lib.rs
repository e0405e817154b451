//! Duplex client for the realtime AI service.
//!
//! One persistent WebSocket per session: session configuration and tool
//! schema go out on connect, inbound events are dispatched by type, and tool
//! results / grounding frames go back through [`RealtimeSender`].

pub mod client;
pub mod events;

pub use client::{
    ConnectionState, DeltaKind, RealtimeClient, RealtimeOutbound, RealtimeSender, ToolCall,
    ToolCallHandler, TranscriptListener,
};
pub use events::{browser_action_tool, ServerEvent, BROWSER_ACTION_TOOL};
