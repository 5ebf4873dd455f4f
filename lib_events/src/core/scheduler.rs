//! # Push Scheduler
//!
//! All writes of one session go through a single [`SendLoop`] task that owns
//! the connection writer and the session's [`SeenSet`]. Everyone else holds a
//! [`PushScheduler`] and calls [`trigger`](PushScheduler::trigger).
//!
//! Requests travel over an `mpsc` channel of capacity one. A trigger that
//! finds a request already queued is folded into it: the queued push re-reads
//! the cache anyway, so it will see whatever the extra trigger was about.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::filter::RelevanceFilter;
use super::governor::FailureGovernor;
use super::snapshot::{self, SeenSet};
use super::transport::{write_envelope, write_error, FrameSink};
use crate::error::PushError;
use crate::model::WsResponse;
use crate::services::EventLister;

/// Handle used to request a push. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PushScheduler {
    requests: mpsc::Sender<()>,
}

impl PushScheduler {
    /// Creates the handle and the send loop it feeds. The loop does nothing
    /// until it is spawned with [`SendLoop::run`].
    pub fn new<W: FrameSink>(
        writer: W,
        lister: Arc<dyn EventLister>,
        filter: RelevanceFilter,
        seen: Option<SeenSet>,
        governor: Arc<FailureGovernor>,
        cancel: CancellationToken,
        label: impl Into<String>,
    ) -> (Self, SendLoop<W>) {
        let (requests, inbox) = mpsc::channel(1);
        let send_loop = SendLoop {
            writer,
            lister,
            filter,
            seen,
            governor,
            cancel,
            inbox,
            pushes: 0,
            label: label.into(),
        };
        (Self { requests }, send_loop)
    }

    /// Requests a push. Never blocks.
    ///
    /// Returns `false` once the send loop has stopped.
    pub fn trigger(&self) -> bool {
        match self.requests.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                log::trace!("push already pending, trigger coalesced");
                true
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// What the send loop hands back when it stops.
#[derive(Debug)]
pub struct Finished<W> {
    /// The connection writer, for the final error report and close.
    pub writer: W,
    /// Snapshots that reached the connection.
    pub pushes: u64,
}

/// The only task allowed to write to a session's connection.
pub struct SendLoop<W> {
    writer: W,
    lister: Arc<dyn EventLister>,
    filter: RelevanceFilter,
    seen: Option<SeenSet>,
    governor: Arc<FailureGovernor>,
    cancel: CancellationToken,
    inbox: mpsc::Receiver<()>,
    pushes: u64,
    label: String,
}

impl<W: FrameSink> SendLoop<W> {
    /// Serves push requests until the session is cancelled or every
    /// [`PushScheduler`] has been dropped.
    pub async fn run(mut self) -> Finished<W> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = self.inbox.recv() => match request {
                    Some(()) => self.push_once().await,
                    None => break,
                },
            }
        }
        log::debug!("[{}] send loop stopped after {} pushes", self.label, self.pushes);
        Finished {
            writer: self.writer,
            pushes: self.pushes,
        }
    }

    async fn push_once(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.governor.exceeded() {
            log::debug!("[{}] failure ceiling exceeded, push skipped", self.label);
            return;
        }

        if let Err(e) = self.try_push().await {
            log::warn!("[{}] push failed: {}", self.label, e);
            if !self.cancel.is_cancelled() {
                write_error(&mut self.writer, &e.to_string()).await;
            }
            self.governor.on_failure(&self.cancel).await;
        }
    }

    /// One list, build and write. `Ok(false)` means the session was
    /// cancelled before anything was written.
    async fn try_push(&mut self) -> Result<bool, PushError> {
        let raw = self.lister.list()?;
        let snapshot = snapshot::build(raw, &self.filter, self.seen.as_ref());

        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let envelope = WsResponse::success(&snapshot.events);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(false),
            written = write_envelope(&mut self.writer, &envelope) => written?,
        }

        if let Some(seen) = self.seen.as_mut() {
            seen.mark_delivered(&snapshot);
        }
        self.pushes += 1;
        log::debug!(
            "[{}] pushed {} events ({} new)",
            self.label,
            snapshot.len(),
            snapshot.fresh
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, decode, ev, FailingLister, FailingSink, StaticLister};
    use futures_util::StreamExt;
    use std::time::Duration;

    fn governor(max_failed: u32) -> Arc<FailureGovernor> {
        Arc::new(FailureGovernor::new(max_failed, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_concurrent_triggers_never_interleave() {
        test_support::init_logging();
        let lister = Arc::new(StaticLister::new(vec![ev("e1", "p-1", "m1", 5), ev("e2", "p-1", "m2", 3)]));
        let (writer, mut frames) = test_support::channel_sink();
        let (scheduler, send_loop) = PushScheduler::new(
            writer,
            lister,
            RelevanceFilter::all(),
            None,
            governor(10),
            CancellationToken::new(),
            "test",
        );
        let sender = tokio::spawn(send_loop.run());

        const N: usize = 32;
        let mut triggers = Vec::new();
        for _ in 0..N {
            let scheduler = scheduler.clone();
            triggers.push(tokio::spawn(async move { scheduler.trigger() }));
        }
        for t in triggers {
            assert!(t.await.unwrap());
        }
        drop(scheduler);

        let finished = sender.await.unwrap();
        drop(finished.writer);

        let mut count = 0;
        while let Some(frame) = frames.next().await {
            let response = decode(&frame);
            assert!(!response.is_error());
            let names: Vec<String> = response
                .payload
                .unwrap()
                .into_iter()
                .map(|e| e.metadata.name)
                .collect();
            assert_eq!(names, vec!["e2", "e1"]);
            count += 1;
        }
        assert!(count >= 1 && count <= N);
        assert_eq!(finished.pushes as usize, count);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported_and_counted() {
        let (writer, mut frames) = test_support::channel_sink();
        let gov = Arc::new(FailureGovernor::new(10, Duration::ZERO));
        let (scheduler, send_loop) = PushScheduler::new(
            writer,
            Arc::new(FailingLister),
            RelevanceFilter::all(),
            None,
            Arc::clone(&gov),
            CancellationToken::new(),
            "test",
        );
        let sender = tokio::spawn(send_loop.run());
        scheduler.trigger();

        let frame = frames.next().await.unwrap();
        let response = decode(&frame);
        assert!(response.is_error());
        assert!(response.message.contains("list events"));

        drop(scheduler);
        let finished = sender.await.unwrap();
        assert_eq!(finished.pushes, 0);
        assert_eq!(gov.failed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_stop_once_ceiling_is_exceeded() {
        let sink = FailingSink::default();
        let attempts = sink.attempts();
        let gov = governor(2);
        let (scheduler, send_loop) = PushScheduler::new(
            sink,
            Arc::new(StaticLister::new(vec![ev("e1", "p-1", "m1", 1)])),
            RelevanceFilter::all(),
            None,
            Arc::clone(&gov),
            CancellationToken::new(),
            "test",
        );
        let sender = tokio::spawn(send_loop.run());

        for _ in 0..6 {
            scheduler.trigger();
            tokio::time::sleep(Duration::from_millis(1500)).await;
        }
        assert_eq!(gov.failed_count(), 3);
        assert!(gov.exceeded());
        let after_breach = attempts.load(std::sync::atomic::Ordering::SeqCst);

        scheduler.trigger();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), after_breach);

        drop(scheduler);
        let finished = sender.await.unwrap();
        assert_eq!(finished.pushes, 0);
    }

    #[tokio::test]
    async fn test_cancelled_loop_writes_nothing() {
        let (writer, mut frames) = test_support::channel_sink();
        let cancel = CancellationToken::new();
        let (scheduler, send_loop) = PushScheduler::new(
            writer,
            Arc::new(StaticLister::new(vec![ev("e1", "p-1", "m1", 1)])),
            RelevanceFilter::all(),
            None,
            governor(10),
            cancel.clone(),
            "test",
        );
        cancel.cancel();
        scheduler.trigger();

        let finished = send_loop.run().await;
        drop(finished.writer);
        assert_eq!(finished.pushes, 0);
        assert!(frames.next().await.is_none());
        assert!(!scheduler.trigger());
    }
}
