//! The executive interface shared by both implementations.
//!
//! Client code talks to an executive through the [`Executive`] trait, so a
//! model written against it runs unchanged on the full-featured
//! [`FullExecutive`] or, when it only needs synchronous dispatch, on the
//! higher-throughput [`FastExecutive`]. Event handlers receive the executive
//! that dispatched them as `&dyn Executive`.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::ExecutiveConfiguration,
    detachable::DetachableEvent,
    error::ExecutiveResult,
    event::{EventHandler, EventInfo, EventKey, EventRequest, ExecEventType, Payload, TargetId},
    fast::FastExecutive,
    full::FullExecutive,
    notify::{NotificationHandler, NotificationKind, SubscriptionId},
    remover::EventRemover,
};

/// Run state of an executive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecState {
    /// Not running. Initial state, and the state after abort or reset.
    Stopped,
    /// The dispatch loop is active.
    Running,
    /// The dispatch loop is blocked in a pause, or a run was stopped with
    /// events remaining.
    Paused,
    /// The last run ran out of non-daemon events.
    Finished,
}

/// Executive implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutiveKind {
    /// [`FullExecutive`]: all dispatch kinds, cancellation, pause and joins.
    Full,
    /// [`FastExecutive`]: synchronous dispatch only, binary-heap queue.
    Fast,
}

static NEXT_EXECUTIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an executive instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutiveId(u64);

impl ExecutiveId {
    pub(crate) fn next() -> Self {
        Self(NEXT_EXECUTIVE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecutiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

/// A discrete-event simulation executive.
pub trait Executive: Send + Sync {
    /// Identifier of this executive instance.
    fn id(&self) -> ExecutiveId;

    /// Which implementation this is.
    fn kind(&self) -> ExecutiveKind;

    /// Current run state.
    fn state(&self) -> ExecState;

    /// Current simulated time.
    fn now(&self) -> Duration;

    /// Time of the most recently dispatched event.
    fn last_event_served_time(&self) -> Duration;

    /// Priority of the event being dispatched, or of the last one dispatched.
    fn current_priority(&self) -> f64;

    /// Number of runs started since construction.
    fn run_number(&self) -> u64;

    /// Number of events dispatched in the current run.
    fn events_served(&self) -> u64;

    /// Number of queued events, daemon events included.
    fn pending_event_count(&self) -> usize;

    /// Queued events in dispatch order.
    fn event_list(&self) -> Vec<EventInfo>;

    /// Schedules an event, returning its key.
    fn request(&self, request: EventRequest) -> ExecutiveResult<EventKey>;

    /// Schedules a non-daemon event.
    fn request_event(
        &self,
        handler: EventHandler,
        when: Duration,
        priority: f64,
        payload: Payload,
        kind: ExecEventType,
    ) -> ExecutiveResult<EventKey> {
        self.request(
            EventRequest::new(handler, when)
                .priority(priority)
                .payload(payload)
                .kind(kind),
        )
    }

    /// Schedules a synchronous daemon event, which does not keep the run alive.
    fn request_daemon_event(
        &self,
        handler: EventHandler,
        when: Duration,
        priority: f64,
        payload: Payload,
    ) -> ExecutiveResult<EventKey> {
        self.request(
            EventRequest::new(handler, when)
                .priority(priority)
                .payload(payload)
                .daemon(true),
        )
    }

    /// Schedules an event at the current time and priority, as read when the
    /// request is accepted.
    fn request_immediate_event(
        &self,
        handler: EventHandler,
        payload: Payload,
        kind: ExecEventType,
    ) -> ExecutiveResult<EventKey> {
        self.request(EventRequest::immediate(handler).payload(payload).kind(kind))
    }

    /// Cancels a pending event. A no-op for [`EventKey::IGNORED`].
    fn unrequest_event(&self, key: EventKey) -> ExecutiveResult<()>;

    /// Cancels every pending event the remover selects.
    fn unrequest_events(&self, remover: EventRemover) -> ExecutiveResult<()>;

    /// Copies a pending event to `new_time`, optionally cancelling the original.
    ///
    /// Returns [`EventKey::IGNORED`] if `key` is not pending.
    fn resubmit_event_at_time(
        &self,
        key: EventKey,
        new_time: Duration,
        delete_old: bool,
    ) -> ExecutiveResult<EventKey>;

    /// Suspends the calling detachable event until every listed event has
    /// completed.
    fn join(&self, keys: &[EventKey]) -> ExecutiveResult<()>;

    /// Runs the dispatch loop on the calling thread until it stops or finishes.
    fn start(&self) -> ExecutiveResult<()>;

    /// Asks the dispatch loop to exit after the in-flight event.
    fn stop(&self);

    /// Blocks the dispatch loop before it selects the next event.
    fn pause(&self) -> ExecutiveResult<()>;

    /// Releases a paused dispatch loop.
    fn resume(&self) -> ExecutiveResult<()>;

    /// Aborts every live detachable event, then resets.
    fn abort(&self) -> ExecutiveResult<()>;

    /// Clears the queue and returns the clock to its origin.
    fn reset(&self);

    /// Moves the clock origin. Not allowed while running.
    fn set_start_time(&self, start_time: Duration) -> ExecutiveResult<()>;

    /// The detachable event currently holding control, if any.
    fn current_detachable(&self) -> Option<DetachableEvent>;

    /// Every detachable event whose handler has not returned yet.
    fn live_detachables(&self) -> Vec<DetachableEvent>;

    /// Subscribes to a notification.
    fn subscribe(&self, kind: NotificationKind, handler: NotificationHandler) -> SubscriptionId;

    /// Subscribes to a notification on behalf of `owner`, so that
    /// [`Executive::detach`] can drop it.
    fn subscribe_for(
        &self,
        owner: TargetId,
        kind: NotificationKind,
        handler: NotificationHandler,
    ) -> SubscriptionId;

    /// Drops a subscription. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Drops all of `target`'s subscriptions and cancels its pending events.
    fn detach(&self, target: TargetId) -> ExecutiveResult<()>;
}

/// Builds the executive selected by `config.kind`.
pub fn create_executive(config: ExecutiveConfiguration) -> Box<dyn Executive> {
    match config.kind {
        ExecutiveKind::Full => Box::new(FullExecutive::new(config)),
        ExecutiveKind::Fast => Box::new(FastExecutive::new(config)),
    }
}
