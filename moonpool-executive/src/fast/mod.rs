//! The fast executive.
//!
//! [`FastExecutive`] trades features for throughput: synchronous dispatch
//! only, a binary min-heap ordered purely on time, no cancellation, no
//! rescheduling, no pause and no joins. Those operations return
//! [`ExecutiveError::NotSupported`]. Requested priorities are ignored.
//!
//! Causality is handled more loosely than in the full executive. A request
//! for a past time is never rejected: with causality checking enabled it is
//! logged and admitted at its requested time, otherwise it is moved to the
//! current time. In both cases the clock does not move backwards.

mod heap;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard};
use tracing::instrument;

use self::heap::{EventHeap, FastEvent};
use crate::{
    config::ExecutiveConfiguration,
    detachable::{DetachableEvent, panic_error},
    error::{ExecutiveError, ExecutiveResult, HandlerError},
    event::{Dispatch, EventInfo, EventKey, EventRequest, ExecEventType, TargetId},
    executive::{ExecState, Executive, ExecutiveId, ExecutiveKind},
    notify::{
        Notification, NotificationHandler, NotificationKind, NotificationRegistry,
        SubscriptionId,
    },
    remover::EventRemover,
};

const INITIAL_HEAP_CAPACITY: usize = 64;

struct FastCore {
    run_state: ExecState,
    loop_active: bool,
    now: Duration,
    start_time: Duration,
    last_event_served_time: Duration,
    heap: EventHeap,
    next_key: i64,
    non_daemon_count: usize,
    stop_requested: bool,
    reset_requested: bool,
    run_number: u64,
    events_served: u64,
    failure: Option<(EventKey, HandlerError)>,
}

impl FastCore {
    fn new(start_time: Duration) -> Self {
        Self {
            run_state: ExecState::Stopped,
            loop_active: false,
            now: start_time,
            start_time,
            last_event_served_time: start_time,
            heap: EventHeap::with_capacity(INITIAL_HEAP_CAPACITY),
            next_key: 0,
            non_daemon_count: 0,
            stop_requested: false,
            reset_requested: false,
            run_number: 0,
            events_served: 0,
            failure: None,
        }
    }

    fn clear_for_reset(&mut self) {
        self.heap.clear();
        self.now = self.start_time;
        self.last_event_served_time = self.start_time;
        self.non_daemon_count = 0;
        self.events_served = 0;
        self.stop_requested = false;
        self.reset_requested = false;
        self.failure = None;
        self.run_state = ExecState::Stopped;
    }
}

struct FastInner {
    id: ExecutiveId,
    config: ExecutiveConfiguration,
    core: Mutex<FastCore>,
    notifications: NotificationRegistry,
}

/// What the loop does next.
enum Step {
    Dispatch(FastEvent),
    AnnounceClock { from: Duration, to: Duration },
    Exit,
}

/// The restricted, high-throughput executive.
#[derive(Clone)]
pub struct FastExecutive {
    inner: Arc<FastInner>,
}

impl Default for FastExecutive {
    fn default() -> Self {
        Self::new(ExecutiveConfiguration::fast())
    }
}

impl FastExecutive {
    /// Creates a stopped executive with the clock at `config.start_time`.
    pub fn new(config: ExecutiveConfiguration) -> Self {
        let core = FastCore::new(config.start_time);
        Self {
            inner: Arc::new(FastInner {
                id: ExecutiveId::next(),
                config,
                core: Mutex::new(core),
                notifications: NotificationRegistry::default(),
            }),
        }
    }

    /// The configuration this executive was built with.
    pub fn config(&self) -> &ExecutiveConfiguration {
        &self.inner.config
    }

    fn core(&self) -> MutexGuard<'_, FastCore> {
        self.inner.core.lock()
    }

    fn fire(&self, notification: Notification<'_>) {
        self.inner.notifications.fire(self, notification);
    }

    fn unsupported<T>(&self, operation: &'static str) -> ExecutiveResult<T> {
        Err(ExecutiveError::NotSupported {
            operation,
            kind: ExecutiveKind::Fast,
        })
    }

    #[instrument(skip(self), fields(executive = %self.inner.id))]
    fn run(&self) -> ExecutiveResult<()> {
        {
            let mut core = self.core();
            if core.loop_active {
                return Err(ExecutiveError::InvalidTransition {
                    operation: "start",
                    state: core.run_state,
                });
            }
            core.run_number += 1;
            core.events_served = 0;
            core.run_state = ExecState::Running;
            core.loop_active = true;
            core.stop_requested = false;
            tracing::debug!(
                "Fast executive {} starting run {} with {} events queued",
                self.inner.id,
                core.run_number,
                core.heap.len()
            );
        }
        self.fire(Notification::Started);

        let mut announced: Option<Duration> = None;
        loop {
            match self.next_step(&mut announced) {
                Step::Exit => break,
                Step::AnnounceClock { from, to } => {
                    self.fire(Notification::ClockAboutToChange { from, to });
                }
                Step::Dispatch(event) => self.dispatch(event),
            }
        }

        self.finish_run()
    }

    fn next_step(&self, announced: &mut Option<Duration>) -> Step {
        let mut core = self.core();
        if core.stop_requested || core.non_daemon_count == 0 {
            return Step::Exit;
        }
        let when = match core.heap.peek_min() {
            Some(event) => event.info.when,
            None => return Step::Exit,
        };
        if when > core.now
            && *announced != Some(when)
            && self
                .inner
                .notifications
                .has_subscribers(NotificationKind::ClockAboutToChange)
        {
            *announced = Some(when);
            return Step::AnnounceClock {
                from: core.now,
                to: when,
            };
        }

        let Some(event) = core.heap.extract_min() else {
            return Step::Exit;
        };
        if !event.info.is_daemon {
            core.non_daemon_count -= 1;
        }
        core.now = core.now.max(event.info.when);
        core.last_event_served_time = event.info.when;
        core.events_served += 1;
        Step::Dispatch(event)
    }

    fn dispatch(&self, event: FastEvent) {
        let FastEvent { info, handler } = event;
        tracing::trace!("Dispatching event {} at {:?}", info.key, info.when);
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| handler.call(self, &info.payload)));
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(unwind) => panic_error(unwind),
        };
        tracing::error!("Handler for event {} failed: {}", info.key, error);
        let mut core = self.core();
        core.stop_requested = true;
        if core.failure.is_none() {
            core.failure = Some((info.key, error));
        }
    }

    fn finish_run(&self) -> ExecutiveResult<()> {
        let mut core = self.core();
        core.loop_active = false;
        let outcome = match core.failure.take() {
            Some((key, source)) => Err(ExecutiveError::DispatchFailed {
                executive: self.inner.id,
                key,
                source,
            }),
            None => Ok(()),
        };

        if core.reset_requested {
            drop(core);
            self.reset_now();
            return outcome;
        }

        core.run_state = ExecState::Stopped;
        let stopped = core.stop_requested;
        core.stop_requested = false;
        tracing::debug!(
            "Fast executive {} {} at {:?} after {} events ({} queued)",
            self.inner.id,
            if stopped { "stopped" } else { "finished" },
            core.now,
            core.events_served,
            core.heap.len()
        );
        drop(core);
        self.fire(if stopped {
            Notification::Stopped
        } else {
            Notification::Finished
        });
        outcome
    }

    #[instrument(skip(self), fields(executive = %self.inner.id))]
    fn reset_now(&self) {
        self.core().clear_for_reset();
        tracing::debug!("Fast executive {} reset", self.inner.id);
        self.fire(Notification::Reset);
    }
}

impl Executive for FastExecutive {
    fn id(&self) -> ExecutiveId {
        self.inner.id
    }

    fn kind(&self) -> ExecutiveKind {
        ExecutiveKind::Fast
    }

    fn state(&self) -> ExecState {
        self.core().run_state
    }

    fn now(&self) -> Duration {
        self.core().now
    }

    fn last_event_served_time(&self) -> Duration {
        self.core().last_event_served_time
    }

    fn current_priority(&self) -> f64 {
        0.0
    }

    fn run_number(&self) -> u64 {
        self.core().run_number
    }

    fn events_served(&self) -> u64 {
        self.core().events_served
    }

    fn pending_event_count(&self) -> usize {
        self.core().heap.len()
    }

    fn event_list(&self) -> Vec<EventInfo> {
        let mut infos: Vec<EventInfo> = self.core().heap.iter().map(|e| e.info.clone()).collect();
        infos.sort_by_key(|info| (info.when, info.key));
        infos
    }

    fn request(&self, mut request: EventRequest) -> ExecutiveResult<EventKey> {
        match request.kind {
            ExecEventType::Synchronous => {}
            ExecEventType::None => return Err(ExecutiveError::InvalidEventType(request.kind)),
            ExecEventType::Detachable => return self.unsupported("detachable dispatch"),
            ExecEventType::Asynchronous => return self.unsupported("asynchronous dispatch"),
        }

        let mut core = self.core();
        request.resolve_immediate(core.now, 0.0);
        let key = EventKey(core.next_key);
        core.next_key += 1;

        let mut event = request.into_event(key);
        event.info.priority = 0.0;
        if event.info.when < core.now {
            if self.inner.config.causality_checking {
                tracing::warn!(
                    "Causality violation: event {} requested at {:?}, executive time is {:?}",
                    key,
                    event.info.when,
                    core.now
                );
            } else {
                tracing::trace!(
                    "Event {} requested at {:?}, moved to {:?}",
                    key,
                    event.info.when,
                    core.now
                );
                event.info.when = core.now;
            }
        }

        let Dispatch::Handler(handler) = event.dispatch else {
            return Err(ExecutiveError::InvalidEventType(event.info.kind));
        };
        if !event.info.is_daemon {
            core.non_daemon_count += 1;
        }
        core.heap.insert(FastEvent {
            info: event.info,
            handler,
        });
        Ok(key)
    }

    fn unrequest_event(&self, _key: EventKey) -> ExecutiveResult<()> {
        self.unsupported("unrequest event")
    }

    fn unrequest_events(&self, _remover: EventRemover) -> ExecutiveResult<()> {
        self.unsupported("unrequest events")
    }

    fn resubmit_event_at_time(
        &self,
        _key: EventKey,
        _new_time: Duration,
        _delete_old: bool,
    ) -> ExecutiveResult<EventKey> {
        self.unsupported("resubmit event")
    }

    fn join(&self, _keys: &[EventKey]) -> ExecutiveResult<()> {
        self.unsupported("join")
    }

    fn start(&self) -> ExecutiveResult<()> {
        self.run()
    }

    fn stop(&self) {
        let mut core = self.core();
        if core.loop_active {
            core.stop_requested = true;
        }
    }

    fn pause(&self) -> ExecutiveResult<()> {
        self.unsupported("pause")
    }

    fn resume(&self) -> ExecutiveResult<()> {
        self.unsupported("resume")
    }

    fn abort(&self) -> ExecutiveResult<()> {
        self.unsupported("abort")
    }

    fn reset(&self) {
        let mut core = self.core();
        if core.loop_active {
            core.reset_requested = true;
            core.stop_requested = true;
            return;
        }
        drop(core);
        self.reset_now();
    }

    fn set_start_time(&self, start_time: Duration) -> ExecutiveResult<()> {
        let mut core = self.core();
        if core.loop_active {
            return Err(ExecutiveError::InvalidTransition {
                operation: "set start time",
                state: core.run_state,
            });
        }
        core.start_time = start_time;
        core.now = start_time;
        core.last_event_served_time = start_time;
        Ok(())
    }

    fn current_detachable(&self) -> Option<DetachableEvent> {
        None
    }

    fn live_detachables(&self) -> Vec<DetachableEvent> {
        Vec::new()
    }

    fn subscribe(&self, kind: NotificationKind, handler: NotificationHandler) -> SubscriptionId {
        self.inner.notifications.subscribe(None, kind, handler)
    }

    fn subscribe_for(
        &self,
        owner: TargetId,
        kind: NotificationKind,
        handler: NotificationHandler,
    ) -> SubscriptionId {
        self.inner.notifications.subscribe(Some(owner), kind, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifications.unsubscribe(id)
    }

    fn detach(&self, target: TargetId) -> ExecutiveResult<()> {
        let dropped = self.inner.notifications.detach(target);
        tracing::debug!("Detached {:?}: {} subscriptions dropped", target, dropped);
        let pending = self
            .core()
            .heap
            .iter()
            .any(|event| event.info.target == Some(target));
        if pending {
            return self.unsupported("cancelling a target's events");
        }
        Ok(())
    }
}
