//! Transport-neutral connection halves.
//!
//! Sessions never see axum or tungstenite types. They write [`WsFrame`]s into
//! a `Sink` and read them from a `Stream`; the HTTP layer adapts real sockets
//! and tests plug in channels.

use futures_util::{Sink, SinkExt, Stream};
use serde::Serialize;

use crate::error::{PushError, TransportError};
use crate::model::WsResponse;

/// WebSocket close codes the session cares about.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const ABNORMAL: u16 = 1006;
    pub const POLICY: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl WsFrame {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        WsFrame::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
    }
}

/// A peer close with one of these codes (or none at all) is an ordinary
/// disconnect and is not logged as an error.
pub fn is_expected_close(code: Option<u16>) -> bool {
    matches!(
        code,
        None | Some(close_code::NORMAL) | Some(close_code::GOING_AWAY) | Some(close_code::ABNORMAL)
    )
}

/// Outbound half of a connection.
pub trait FrameSink: Sink<WsFrame, Error = TransportError> + Send + Unpin + 'static {}

impl<T> FrameSink for T where T: Sink<WsFrame, Error = TransportError> + Send + Unpin + 'static {}

/// Inbound half of a connection.
pub trait FrameStream: Stream<Item = Result<WsFrame, TransportError>> + Send + Unpin + 'static {}

impl<T> FrameStream for T where T: Stream<Item = Result<WsFrame, TransportError>> + Send + Unpin + 'static {}

/// Encodes `envelope` as one text frame and writes it.
pub async fn write_envelope<W, T>(writer: &mut W, envelope: &WsResponse<T>) -> Result<(), PushError>
where
    W: FrameSink,
    T: Serialize,
{
    let text = serde_json::to_string(envelope)?;
    writer.send(WsFrame::Text(text)).await?;
    Ok(())
}

/// Best-effort error report. Failures are logged at debug and swallowed.
pub async fn write_error<W: FrameSink>(writer: &mut W, message: &str) {
    if let Err(e) = write_envelope(writer, &WsResponse::error(message)).await {
        log::debug!("could not report error to client: {}", e);
    }
}

/// Sends a close frame and closes the sink, ignoring failures.
pub async fn close_quietly<W: FrameSink>(writer: &mut W, code: u16, reason: &str) {
    if let Err(e) = writer.send(WsFrame::close(code, reason)).await {
        log::debug!("close frame not sent: {}", e);
    }
    if let Err(e) = writer.close().await {
        log::debug!("closing writer failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_close_codes() {
        assert!(is_expected_close(None));
        assert!(is_expected_close(Some(close_code::NORMAL)));
        assert!(is_expected_close(Some(close_code::GOING_AWAY)));
        assert!(is_expected_close(Some(close_code::ABNORMAL)));
        assert!(!is_expected_close(Some(close_code::POLICY)));
        assert!(!is_expected_close(Some(4000)));
    }
}
