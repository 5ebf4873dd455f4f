//! # Session Lifecycle Controller
//!
//! Drives one streaming connection through `Opening → Streaming → Closing →
//! Closed`.
//!
//! ## Opening
//!
//! Authorization, target resolution, filter construction and the informer
//! subscription. Any failure is reported to the client as one error envelope,
//! the connection is closed and no task is ever spawned.
//!
//! ## Streaming
//!
//! Four tasks share one [`CancellationToken`], a child of the caller's:
//!
//! - the send loop, sole owner of the connection writer;
//! - the change listener, turning relevant cache changes into triggers;
//! - the inbound monitor, blocked on the connection reader;
//! - the watchdog, polling the [`FailureGovernor`].
//!
//! ## Closing
//!
//! The first of caller cancellation, a peer close or read error, the informer
//! closing its change feed, and a governor breach records its [`CloseReason`] and cancels the token. Later
//! attempts find the reason already set and do nothing.
//!
//! ## Closed
//!
//! Every task is joined, the informer subscription is released, a final
//! error envelope is written for error reasons and the connection is closed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::filter::RelevanceFilter;
use super::governor::{
    watchdog, FailureGovernor, DEFAULT_COOLDOWN, DEFAULT_MAX_FAILED, DEFAULT_WATCHDOG_INTERVAL,
};
use super::scheduler::PushScheduler;
use super::snapshot::SeenSet;
use super::transport::{close_code, close_quietly, is_expected_close, write_error, FrameSink, FrameStream, WsFrame};
use crate::error::SetupError;
use crate::model::{Caller, SubscriptionTarget};
use crate::services::{
    Authorizer, CacheChange, CacheSubscription, EventCache, GroupFilterFactory, TargetResolver,
};

/// Message sent to the client when the failure ceiling is breached.
pub const TOO_MANY_FAILURES: &str = "ws events failed too frequently!";

/// Message sent to the client when the informer stops publishing changes.
pub const INFORMER_STOPPED: &str = "event informer stopped";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Failed pushes tolerated before the session is torn down.
    pub max_failed: u32,
    /// Pause after each failed push.
    pub failure_cooldown: Duration,
    /// How often the watchdog checks the failure count.
    pub watchdog_interval: Duration,
    /// Kind used when narrowing a stream to a single instance.
    pub instance_kind: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_failed: DEFAULT_MAX_FAILED,
            failure_cooldown: DEFAULT_COOLDOWN,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            instance_kind: "Pod".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Streaming,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection or it dropped. `code` is the close
    /// code the peer sent, if any.
    PeerDisconnected { code: Option<u16> },
    /// The caller's token was cancelled (server shutdown and the like).
    CallerCancelled,
    /// Reading from the connection failed.
    ReadFailed(String),
    /// More pushes failed than the governor allows.
    TooManyFailures,
    /// The informer closed its change feed; no further pushes can happen.
    InformerStopped,
    /// The session never reached `Streaming`.
    SetupFailed(SetupError),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::ReadFailed(_)
                | CloseReason::TooManyFailures
                | CloseReason::InformerStopped
                | CloseReason::SetupFailed(_)
        )
    }

    /// Text of the final error envelope, for error reasons only.
    pub fn client_message(&self) -> Option<String> {
        match self {
            CloseReason::ReadFailed(e) => Some(e.clone()),
            CloseReason::TooManyFailures => Some(TOO_MANY_FAILURES.to_string()),
            CloseReason::InformerStopped => Some(INFORMER_STOPPED.to_string()),
            CloseReason::SetupFailed(e) => Some(e.to_string()),
            CloseReason::PeerDisconnected { .. } | CloseReason::CallerCancelled => None,
        }
    }

    fn close_code(&self) -> u16 {
        match self {
            CloseReason::SetupFailed(SetupError::Forbidden(_)) => close_code::POLICY,
            reason if reason.is_error() => close_code::INTERNAL_ERROR,
            _ => close_code::NORMAL,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerDisconnected { code: Some(code) } => write!(f, "peer disconnected ({})", code),
            CloseReason::PeerDisconnected { code: None } => write!(f, "peer disconnected"),
            CloseReason::CallerCancelled => write!(f, "cancelled"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            CloseReason::TooManyFailures => write!(f, "{}", TOO_MANY_FAILURES),
            CloseReason::InformerStopped => write!(f, "{}", INFORMER_STOPPED),
            CloseReason::SetupFailed(e) => write!(f, "setup failed: {}", e),
        }
    }
}

/// Outcome of one session, returned once it is fully closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: u64,
    pub reason: CloseReason,
    /// Snapshots that reached the client.
    pub pushes: u64,
    /// Failed push attempts counted by the governor.
    pub failures: u32,
}

/// First reason wins; later calls are no-ops.
struct Closer {
    reason: Mutex<Option<CloseReason>>,
    token: CancellationToken,
}

impl Closer {
    fn new(token: CancellationToken) -> Self {
        Self {
            reason: Mutex::new(None),
            token,
        }
    }

    fn close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() || self.token.is_cancelled() {
                return false;
            }
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    /// The recorded reason. A token cancelled from the parent side leaves no
    /// reason behind, which means the caller cancelled.
    fn reason(&self) -> CloseReason {
        let slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        slot.clone().unwrap_or(CloseReason::CallerCancelled)
    }
}

/// Result of a successful `Opening` phase.
pub struct OpenedSession {
    pub filter: RelevanceFilter,
    pub subscription: CacheSubscription,
    /// Present for group sessions only.
    pub seen: Option<SeenSet>,
}

impl fmt::Debug for OpenedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedSession")
            .field("filter", &self.filter)
            .field("dedup", &self.seen.is_some())
            .finish()
    }
}

/// # Event Stream Service
///
/// Shared by every connection. Holds the collaborators and the session
/// tuning; each call to [`stream`](Self::stream) runs one session to the end.
#[derive(Clone)]
pub struct EventStreamService {
    authorizer: Arc<dyn Authorizer>,
    resolver: Arc<dyn TargetResolver>,
    groups: Arc<dyn GroupFilterFactory>,
    cache: Arc<dyn EventCache>,
    config: SessionConfig,
}

impl EventStreamService {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        resolver: Arc<dyn TargetResolver>,
        groups: Arc<dyn GroupFilterFactory>,
        cache: Arc<dyn EventCache>,
        config: SessionConfig,
    ) -> Self {
        Self {
            authorizer,
            resolver,
            groups,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the `Opening` phase: authorize, resolve, build the filter and
    /// subscribe to the target namespace's informer.
    pub async fn open(&self, caller: &Caller, target: &SubscriptionTarget) -> Result<OpenedSession, SetupError> {
        self.authorizer.can_view(caller, target).await?;
        self.resolver.resolve_cluster(target.cluster()).await?;

        let (filter, namespace, seen) = match target {
            SubscriptionTarget::Resource(t) => {
                if t.namespace.is_empty() {
                    return Err(SetupError::InvalidRequest("namespace is required".into()));
                }
                let filter = match &t.name {
                    Some(name) => {
                        let instance = self.resolver.resolve_instance(&t.cluster, &t.namespace, name).await?;
                        RelevanceFilter::for_object(&instance.object)
                    }
                    None => RelevanceFilter::all(),
                };
                (filter, t.namespace.clone(), None)
            }
            SubscriptionTarget::Group(t) => {
                let group = self
                    .resolver
                    .resolve_group(&t.cluster, t.namespace.as_deref(), &t.group)
                    .await?;
                let instance = match &t.instance {
                    Some(name) => {
                        let instance = self.resolver.resolve_instance(&t.cluster, &group.namespace, name).await?;
                        if !self.groups.owns_instance(&group, &instance) {
                            return Err(SetupError::NotInGroup {
                                instance: name.clone(),
                                group: group.name.clone(),
                            });
                        }
                        Some(instance)
                    }
                    None => None,
                };
                let group_filter = self.groups.make_filter(&group, instance.as_ref()).await?;
                let filter = RelevanceFilter::narrowed(
                    group_filter,
                    instance.as_ref().map(|i| &i.object),
                    &self.config.instance_kind,
                );
                (filter, group.namespace.clone(), Some(SeenSet::new()))
            }
        };

        let subscription = self.cache.subscribe(target.cluster(), &namespace).await?;
        Ok(OpenedSession {
            filter,
            subscription,
            seen,
        })
    }

    /// Runs one session until it closes. See [`stream_with_state`](Self::stream_with_state).
    pub async fn stream<W, R>(
        &self,
        caller: Caller,
        target: SubscriptionTarget,
        writer: W,
        reader: R,
        parent: &CancellationToken,
    ) -> SessionReport
    where
        W: FrameSink,
        R: FrameStream,
    {
        let (state, _) = watch::channel(SessionState::Opening);
        self.stream_with_state(caller, target, writer, reader, parent, &state)
            .await
    }

    /// Runs one session until it closes, publishing every state transition on
    /// `state`. All spawned tasks have finished when this returns.
    pub async fn stream_with_state<W, R>(
        &self,
        caller: Caller,
        target: SubscriptionTarget,
        mut writer: W,
        reader: R,
        parent: &CancellationToken,
        state: &watch::Sender<SessionState>,
    ) -> SessionReport
    where
        W: FrameSink,
        R: FrameStream,
    {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let label = format!("session {}", id);
        state.send_replace(SessionState::Opening);
        log::info!("[{}] opening {}", label, target);

        let opened = match self.open(&caller, &target).await {
            Ok(opened) => opened,
            Err(e) => {
                log::warn!("[{}] setup failed: {}", label, e);
                let reason = CloseReason::SetupFailed(e);
                state.send_replace(SessionState::Closing);
                finish(&mut writer, &reason).await;
                state.send_replace(SessionState::Closed);
                return SessionReport {
                    id,
                    reason,
                    pushes: 0,
                    failures: 0,
                };
            }
        };

        let token = parent.child_token();
        let closer = Arc::new(Closer::new(token.clone()));
        let governor = Arc::new(FailureGovernor::new(
            self.config.max_failed,
            self.config.failure_cooldown,
        ));

        let OpenedSession {
            filter,
            subscription,
            seen,
        } = opened;
        let CacheSubscription { lister, changes, guard } = subscription;

        let (scheduler, send_loop) = PushScheduler::new(
            writer,
            lister,
            filter.clone(),
            seen,
            Arc::clone(&governor),
            token.clone(),
            label.clone(),
        );

        state.send_replace(SessionState::Streaming);
        log::info!("[{}] streaming with {:?}", label, filter);
        scheduler.trigger();

        let sender = tokio::spawn(send_loop.run());
        let listener = tokio::spawn(listen_changes(changes, filter, scheduler, Arc::clone(&closer), label.clone()));
        let monitor = tokio::spawn(monitor_inbound(reader, Arc::clone(&closer), label.clone()));
        let guard_task = tokio::spawn({
            let governor = Arc::clone(&governor);
            let closer = Arc::clone(&closer);
            let every = self.config.watchdog_interval;
            async move {
                if watchdog(&governor, every, &closer.token).await {
                    closer.close(CloseReason::TooManyFailures);
                }
            }
        });

        token.cancelled().await;
        state.send_replace(SessionState::Closing);
        let reason = closer.reason();
        log::info!("[{}] closing: {}", label, reason);

        let (sent, listened, monitored, watched) = tokio::join!(sender, listener, monitor, guard_task);
        for (task, result) in [("listener", listened), ("monitor", monitored), ("watchdog", watched)] {
            if let Err(e) = result {
                log::error!("[{}] {} task failed: {}", label, task, e);
            }
        }
        guard.release();

        let pushes = match sent {
            Ok(mut finished) => {
                finish(&mut finished.writer, &reason).await;
                finished.pushes
            }
            Err(e) => {
                log::error!("[{}] send loop failed: {}", label, e);
                0
            }
        };

        state.send_replace(SessionState::Closed);
        let report = SessionReport {
            id,
            reason,
            pushes,
            failures: governor.failed_count(),
        };
        log::info!(
            "[{}] closed: {} ({} pushes, {} failures)",
            label,
            report.reason,
            report.pushes,
            report.failures
        );
        report
    }
}

/// Final error report, if any, then the close frame.
async fn finish<W: FrameSink>(writer: &mut W, reason: &CloseReason) {
    if let Some(message) = reason.client_message() {
        write_error(writer, &message).await;
    }
    let text = if reason.is_error() { "error" } else { "bye" };
    close_quietly(writer, reason.close_code(), text).await;
}

async fn listen_changes(
    mut changes: broadcast::Receiver<CacheChange>,
    filter: RelevanceFilter,
    scheduler: PushScheduler,
    closer: Arc<Closer>,
    label: String,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = closer.token.cancelled() => return,
            change = changes.recv() => change,
        };

        let relevant = match &change {
            Ok(CacheChange::Updated { old, new }) => filter.matches(new) || filter.matches(old),
            Ok(change) => filter.matches(change.object()),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("[{}] change listener lagged by {} notifications", label, missed);
                true
            }
            Err(broadcast::error::RecvError::Closed) => {
                log::error!("[{}] informer closed its change feed", label);
                closer.close(CloseReason::InformerStopped);
                return;
            }
        };

        if let Ok(change) = &change {
            log::trace!("[{}] {} {} relevant={}", label, change.verb(), change.object().key(), relevant);
        }
        if relevant && !scheduler.trigger() {
            return;
        }
    }
}

async fn monitor_inbound<R: FrameStream>(mut reader: R, closer: Arc<Closer>, label: String) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = closer.token.cancelled() => return,
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(WsFrame::Close(frame))) => {
                let code = frame.map(|f| f.code);
                if is_expected_close(code) {
                    log::info!("[{}] client disconnected ({:?})", label, code);
                } else {
                    log::error!("[{}] unexpected close code {:?}", label, code);
                }
                closer.close(CloseReason::PeerDisconnected { code });
                return;
            }
            // Clients have nothing to say on this channel.
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                log::error!("[{}] {}", label, e);
                closer.close(CloseReason::ReadFailed(e.to_string()));
                return;
            }
            None => {
                log::info!("[{}] connection dropped", label);
                closer.close(CloseReason::PeerDisconnected {
                    code: Some(close_code::ABNORMAL),
                });
                return;
            }
        }
    }
}
