//! Helpers shared by the unit tests: in-memory connection halves, canned
//! listers and event builders.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{TimeZone, Utc};
use futures_channel::mpsc;
use futures_util::{Sink, SinkExt};

use crate::core::transport::{FrameSink, WsFrame};
use crate::error::{CacheError, TransportError};
use crate::model::{Event, ObjectRef, WsResponse};
use crate::services::EventLister;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A writer whose frames come out of the returned receiver.
pub fn channel_sink() -> (impl FrameSink, mpsc::UnboundedReceiver<WsFrame>) {
    let (tx, rx) = mpsc::unbounded();
    let sink = tx.sink_map_err(|e| TransportError::Write(e.to_string()));
    (sink, rx)
}

/// A reader fed by the returned sender. Dropping the sender ends the stream.
pub fn channel_stream() -> (
    mpsc::UnboundedSender<Result<WsFrame, TransportError>>,
    mpsc::UnboundedReceiver<Result<WsFrame, TransportError>>,
) {
    mpsc::unbounded()
}

/// Parses a text frame as a snapshot envelope.
pub fn decode(frame: &WsFrame) -> WsResponse<Vec<Event>> {
    match frame {
        WsFrame::Text(text) => serde_json::from_str(text).expect("envelope json"),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

/// Names of the events in a success envelope, in order.
pub fn names(frame: &WsFrame) -> Vec<String> {
    decode(frame)
        .payload
        .unwrap_or_default()
        .into_iter()
        .map(|e| e.metadata.name)
        .collect()
}

/// A pod event in namespace `prod` with `eventTime` at `secs` past the epoch.
pub fn event_at(name: &str, uid: &str, message: &str, secs: i64) -> Event {
    let pod = ObjectRef::new("Pod", "prod", format!("pod-{}", uid), uid);
    Event::new(name, pod, message).with_event_time(Utc.timestamp_opt(secs, 0).unwrap())
}

pub fn ev(name: &str, uid: &str, message: &str, secs: i64) -> Arc<Event> {
    Arc::new(event_at(name, uid, message, secs))
}

/// Lister over a fixed set of events.
pub struct StaticLister {
    events: Mutex<Vec<Arc<Event>>>,
}

impl StaticLister {
    pub fn new(events: Vec<Arc<Event>>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }
}

impl EventLister for StaticLister {
    fn list(&self) -> Result<Vec<Arc<Event>>, CacheError> {
        Ok(self.events.lock().unwrap().clone())
    }
}

/// Lister that always fails.
pub struct FailingLister;

impl EventLister for FailingLister {
    fn list(&self) -> Result<Vec<Arc<Event>>, CacheError> {
        Err(CacheError::List("informer not synced".into()))
    }
}

/// Writer that rejects every frame and counts the attempts.
#[derive(Default)]
pub struct FailingSink {
    attempts: Arc<AtomicU32>,
}

impl FailingSink {
    pub fn attempts(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.attempts)
    }
}

impl Sink<WsFrame> for FailingSink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Err(TransportError::Write("broken pipe".into())))
    }

    fn start_send(self: Pin<&mut Self>, _item: WsFrame) -> Result<(), Self::Error> {
        Err(TransportError::Write("broken pipe".into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
