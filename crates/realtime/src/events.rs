//! Wire events of the realtime protocol.

use aurademo_core::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};

pub const BROWSER_ACTION_TOOL: &str = "browser_action";

/// Action names the AI may put in `browser_action.action`.
pub const BROWSER_ACTIONS: &[&str] = &["click", "type", "scroll", "goto", "hover"];

/// Inbound events the client reacts to. Everything else is `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },

    /// Base64 PCM16 audio of the AI's spoken reply.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.audio.transcript.delta"
    )]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Value,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode one text frame. Frames that are not a JSON object with a
    /// `type` are protocol errors.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("unparseable realtime event: {}", e)))
    }
}

/// Tool schema declared in `session.update`.
pub fn browser_action_tool() -> Value {
    json!({
        "type": "function",
        "name": BROWSER_ACTION_TOOL,
        "description": "Control the web browser to demonstrate features. Use this to navigate, click, type, or scroll.",
        "parameters": {
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": BROWSER_ACTIONS,
                    "description": "The specific browser interaction to perform."
                },
                "selector": {
                    "type": "string",
                    "description": "The CSS selector or text description of the element (e.g., 'text=Sign Up' or '#submit-btn'). For 'scroll', the direction ('up' or 'down')."
                },
                "value": {
                    "type": "string",
                    "description": "The text to type (only for 'type' action) or URL to visit (for 'goto')."
                }
            },
            "required": ["action", "selector"]
        }
    })
}

pub fn session_update(instructions: &str) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "instructions": instructions,
            "tools": [browser_action_tool()],
            "tool_choice": "auto",
        }
    })
}

/// `response.create`, optionally with per-response instructions.
pub fn response_create(instructions: Option<&str>) -> Value {
    match instructions {
        Some(text) => json!({
            "type": "response.create",
            "response": {
                "modalities": ["text", "audio"],
                "instructions": text,
            }
        }),
        None => json!({"type": "response.create"}),
    }
}

pub fn function_call_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }
    })
}

pub fn input_image(image_base64: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "user",
            "content": [
                {
                    "type": "input_image",
                    "image": format!("data:image/jpeg;base64,{}", image_base64),
                }
            ]
        }
    })
}

/// Append a chunk of base64 PCM16 microphone audio to the input buffer.
/// Server-side voice activity detection decides when a turn ends.
pub fn input_audio_append(audio_base64: &str) -> Value {
    json!({
        "type": "input_audio_buffer.append",
        "audio": audio_base64,
    })
}

pub fn input_text(text: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "user",
            "content": [
                {"type": "input_text", "text": text}
            ]
        }
    })
}
