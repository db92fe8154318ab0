//! JSON frames exchanged with the client over the WebSocket.

use klaudkod_core::types::StreamEvent;
use serde::{Deserialize, Serialize};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingFrame {
    Prompt {
        #[serde(default)]
        content: String,
        /// Accepted for compatibility; the connection is the session.
        #[serde(default)]
        session_id: Option<String>,
    },
    Cancel,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingFrame {
    Chunk { content: String },
    ToolCall { tool_call: ToolCallFrame },
    ToolResult { tool_result: ToolResultFrame },
    Error { error: String },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallFrame {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResultFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub content: String,
    pub is_error: bool,
}

impl OutgoingFrame {
    pub fn error(message: impl Into<String>) -> Self {
        OutgoingFrame::Error {
            error: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutgoingFrame::Done | OutgoingFrame::Error { .. })
    }
}

impl From<StreamEvent> for OutgoingFrame {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Chunk(content) => OutgoingFrame::Chunk { content },
            StreamEvent::ToolCall(call) => OutgoingFrame::ToolCall {
                tool_call: ToolCallFrame {
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                },
            },
            StreamEvent::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => OutgoingFrame::ToolResult {
                tool_result: ToolResultFrame {
                    tool_call_id: Some(tool_call_id),
                    content,
                    is_error,
                },
            },
            StreamEvent::Error(error) => OutgoingFrame::Error { error },
            StreamEvent::Done => OutgoingFrame::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaudkod_core::types::ToolCall;
    use serde_json::json;

    #[test]
    fn test_parse_inbound_frames() {
        let prompt: IncomingFrame =
            serde_json::from_str(r#"{"type":"prompt","content":"hi","session_id":"s1"}"#).unwrap();
        assert_eq!(
            prompt,
            IncomingFrame::Prompt {
                content: "hi".into(),
                session_id: Some("s1".into()),
            }
        );

        let cancel: IncomingFrame = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert_eq!(cancel, IncomingFrame::Cancel);

        assert!(serde_json::from_str::<IncomingFrame>(r#"{"type":"shout"}"#).is_err());
        assert!(serde_json::from_str::<IncomingFrame>("not json").is_err());
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let call = OutgoingFrame::from(StreamEvent::ToolCall(ToolCall {
            id: "call_1".into(),
            name: "glob".into(),
            arguments: "{}".into(),
        }));
        assert_eq!(
            serde_json::to_value(call).unwrap(),
            json!({"type": "tool_call", "tool_call": {"id": "call_1", "name": "glob", "arguments": "{}"}})
        );

        let result = OutgoingFrame::from(StreamEvent::ToolResult {
            tool_call_id: "call_1".into(),
            content: "x".into(),
            is_error: true,
        });
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"type": "tool_result", "tool_result": {"tool_call_id": "call_1", "content": "x", "is_error": true}})
        );

        assert_eq!(serde_json::to_value(OutgoingFrame::Done).unwrap(), json!({"type": "done"}));
        assert_eq!(
            serde_json::to_value(OutgoingFrame::error("boom")).unwrap(),
            json!({"type": "error", "error": "boom"})
        );
    }
}
