use serde::{Deserialize, Serialize};

/// Discriminates pushes from error reports on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsResponseType {
    Success,
    Error,
}

/// # WebSocket Response Envelope
///
/// Every frame the server sends has this shape:
/// `{ "type": "success" | "error", "message": "...", "payload": ... }`.
/// Snapshots travel as `success` with an empty message; errors carry the
/// reason in `message` and a `null` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsResponse<T> {
    #[serde(rename = "type")]
    pub kind: WsResponseType,
    pub message: String,
    pub payload: Option<T>,
}

impl<T> WsResponse<T> {
    pub fn success(payload: T) -> Self {
        Self {
            kind: WsResponseType::Success,
            message: String::new(),
            payload: Some(payload),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == WsResponseType::Error
    }
}

impl WsResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: WsResponseType::Error,
            message: message.into(),
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let text = serde_json::to_string(&WsResponse::error("boom")).unwrap();
        assert_eq!(text, r#"{"type":"error","message":"boom","payload":null}"#);
    }

    #[test]
    fn test_success_envelope_shape() {
        let value = serde_json::to_value(WsResponse::success(vec![1, 2])).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "success", "message": "", "payload": [1, 2] }));
    }
}
