//! The full-featured executive.
//!
//! [`FullExecutive`] owns an ordered event queue, the simulated clock and the
//! run/pause/stop/abort state machine, and supports synchronous, detachable
//! and asynchronous dispatch. Like `SimWorld` it is a handle: clones share
//! one executive, and a clone is what detachable and asynchronous handlers
//! hold while they run on their own threads.

mod run;

use std::{
    collections::HashSet,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
    time::Duration,
};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    config::ExecutiveConfiguration,
    detachable::DetachableEvent,
    error::{ExecutiveError, ExecutiveResult, HandlerError},
    event::{Dispatch, Event, EventInfo, EventKey, EventRequest, ExecEventType, TargetId},
    executive::{ExecState, Executive, ExecutiveId, ExecutiveKind},
    notify::{
        Notification, NotificationHandler, NotificationKind, NotificationRegistry,
        SubscriptionId,
    },
    queue::EventQueue,
    remover::EventRemover,
};

/// A detachable event blocked in `join` until `pending` is empty.
struct JoinWait {
    pending: HashSet<EventKey>,
    waiter: DetachableEvent,
}

/// Mutable executive state, guarded by one lock.
pub(crate) struct ExecCore {
    run_state: ExecState,
    loop_active: bool,
    loop_thread: Option<ThreadId>,
    now: Duration,
    start_time: Duration,
    last_event_served_time: Duration,
    current_priority: f64,
    queue: EventQueue,
    removals: Vec<EventRemover>,
    next_key: i64,
    daemon_count: usize,
    non_daemon_count: usize,
    stop_requested: bool,
    pause_requested: bool,
    abort_requested: bool,
    reset_requested: bool,
    run_number: u64,
    events_served: u64,
    current_detachable: Option<DetachableEvent>,
    live_detachables: Vec<DetachableEvent>,
    joins: Vec<JoinWait>,
    failure: Option<(EventKey, HandlerError)>,
}

impl ExecCore {
    fn new(start_time: Duration) -> Self {
        Self {
            run_state: ExecState::Stopped,
            loop_active: false,
            loop_thread: None,
            now: start_time,
            start_time,
            last_event_served_time: start_time,
            current_priority: 0.0,
            queue: EventQueue::new(),
            removals: Vec::new(),
            next_key: 0,
            daemon_count: 0,
            non_daemon_count: 0,
            stop_requested: false,
            pause_requested: false,
            abort_requested: false,
            reset_requested: false,
            run_number: 0,
            events_served: 0,
            current_detachable: None,
            live_detachables: Vec::new(),
            joins: Vec::new(),
            failure: None,
        }
    }

    fn next_key(&mut self) -> EventKey {
        let key = EventKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn enqueue(&mut self, event: Event) -> EventKey {
        let key = event.key();
        if event.info.is_daemon {
            self.daemon_count += 1;
        } else {
            self.non_daemon_count += 1;
        }
        self.queue.insert(event);
        key
    }

    fn take_earliest(&mut self) -> Option<Event> {
        let event = self.queue.remove_earliest()?;
        if event.info.is_daemon {
            self.daemon_count -= 1;
        } else {
            self.non_daemon_count -= 1;
        }
        Some(event)
    }

    /// Causality gate. `Ok(false)` means the request is silently dropped.
    fn admit(&self, when: Duration, causality_checking: bool) -> ExecutiveResult<bool> {
        if self.run_state == ExecState::Finished {
            return Err(ExecutiveError::ExecutiveFinished);
        }
        if self.run_state != ExecState::Stopped && when < self.now {
            if causality_checking {
                return Err(ExecutiveError::CausalityViolation {
                    requested: when,
                    now: self.now,
                });
            }
            tracing::warn!(
                "Ignoring event requested at {:?}, executive time is {:?}",
                when,
                self.now
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn push_resumption(&mut self, ctrl: &DetachableEvent, when: Duration, priority: f64) -> EventKey {
        let root = ctrl.root_event();
        let key = self.next_key();
        let info = EventInfo {
            key,
            when,
            priority,
            kind: ExecEventType::Detachable,
            is_daemon: root.is_daemon,
            target: root.target,
            callback: root.callback,
            is_resumption: true,
            payload: None,
        };
        self.enqueue(Event {
            info,
            dispatch: Dispatch::Resume(ctrl.clone()),
        })
    }

    /// Applies every recorded removal, then recounts pending events.
    fn apply_removals(&mut self) {
        if self.removals.is_empty() {
            return;
        }
        let removals = std::mem::take(&mut self.removals);
        let mut removed = Vec::new();
        for remover in removals {
            match remover {
                EventRemover::Key(key) => {
                    if self.queue.remove(key).is_some() {
                        removed.push(key);
                    } else {
                        tracing::warn!("Removal of event {} found no pending event", key);
                    }
                }
                other => removed.extend(self.queue.remove_where(|info| other.matches(info))),
            }
        }
        let (daemon, non_daemon) = self.queue.count_by_daemon();
        self.daemon_count = daemon;
        self.non_daemon_count = non_daemon;
        tracing::trace!("Applied removals, {} events cancelled", removed.len());
        self.complete_keys(&removed);
    }

    /// Marks events as completed for `join`, resuming waiters that are done.
    fn complete_keys(&mut self, keys: &[EventKey]) {
        if self.joins.is_empty() || keys.is_empty() {
            return;
        }
        let mut ready = Vec::new();
        self.joins.retain_mut(|wait| {
            for key in keys {
                wait.pending.remove(key);
            }
            if wait.pending.is_empty() {
                ready.push(wait.waiter.clone());
                false
            } else {
                true
            }
        });
        let now = self.now;
        for waiter in ready {
            if waiter.is_aborted() || waiter.is_finished() {
                continue;
            }
            let priority = waiter.root_event().priority;
            self.push_resumption(&waiter, now, priority);
        }
    }

    fn is_pending(&self, key: EventKey) -> bool {
        self.queue.contains(key)
            || self
                .live_detachables
                .iter()
                .any(|d| d.key() == key && !d.is_finished())
    }

    fn clear_for_reset(&mut self) {
        self.queue.clear();
        self.removals.clear();
        self.joins.clear();
        self.now = self.start_time;
        self.last_event_served_time = self.start_time;
        self.current_priority = 0.0;
        self.daemon_count = 0;
        self.non_daemon_count = 0;
        self.events_served = 0;
        self.stop_requested = false;
        self.pause_requested = false;
        self.abort_requested = false;
        self.reset_requested = false;
        self.failure = None;
        self.run_state = ExecState::Stopped;
    }
}

pub(crate) struct ExecInner {
    id: ExecutiveId,
    config: ExecutiveConfiguration,
    core: Mutex<ExecCore>,
    pause_gate: Condvar,
    notifications: NotificationRegistry,
}

/// The full-featured executive.
///
/// ```ignore
/// let exec = FullExecutive::new(ExecutiveConfiguration::full());
/// exec.request_event(handler, Duration::from_secs(5), 0.0, None, ExecEventType::Synchronous)?;
/// exec.start()?;
/// ```
#[derive(Clone)]
pub struct FullExecutive {
    inner: Arc<ExecInner>,
}

/// Weak handle to a [`FullExecutive`].
#[derive(Clone)]
pub struct WeakFullExecutive {
    inner: Weak<ExecInner>,
}

impl WeakFullExecutive {
    /// Upgrades to a strong handle if the executive still exists.
    pub fn upgrade(&self) -> Option<FullExecutive> {
        self.inner.upgrade().map(|inner| FullExecutive { inner })
    }
}

impl Default for FullExecutive {
    fn default() -> Self {
        Self::new(ExecutiveConfiguration::full())
    }
}

impl FullExecutive {
    /// Creates a stopped executive with the clock at `config.start_time`.
    pub fn new(config: ExecutiveConfiguration) -> Self {
        let core = ExecCore::new(config.start_time);
        Self {
            inner: Arc::new(ExecInner {
                id: ExecutiveId::next(),
                config,
                core: Mutex::new(core),
                pause_gate: Condvar::new(),
                notifications: NotificationRegistry::default(),
            }),
        }
    }

    /// Creates a weak handle that does not keep the executive alive.
    pub fn downgrade(&self) -> WeakFullExecutive {
        WeakFullExecutive {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The configuration this executive was built with.
    pub fn config(&self) -> &ExecutiveConfiguration {
        &self.inner.config
    }

    fn core(&self) -> MutexGuard<'_, ExecCore> {
        self.inner.core.lock()
    }

    fn fire(&self, notification: Notification<'_>) {
        self.inner.notifications.fire(self, notification);
    }

    pub(crate) fn current_time(&self) -> Duration {
        self.core().now
    }

    pub(crate) fn current_detachable_ref(&self) -> Option<DetachableEvent> {
        self.core().current_detachable.clone()
    }

    /// The active detachable event, if the calling thread is its context.
    fn own_detachable(&self) -> Option<DetachableEvent> {
        self.current_detachable_ref().filter(|ctrl| ctrl.is_own_context())
    }

    /// Returns `true` if the calling thread may advance simulation state:
    /// no run is active, or it is the dispatch loop, or it is the active
    /// detachable event's context.
    pub(crate) fn holds_control(&self) -> bool {
        let active = {
            let core = self.core();
            if !core.loop_active || core.loop_thread == Some(thread::current().id()) {
                return true;
            }
            core.current_detachable.clone()
        };
        active.is_some_and(|ctrl| ctrl.is_own_context())
    }

    /// Queues a resumption of `ctrl` at `when`, or at the current time if
    /// `None`.
    pub(crate) fn schedule_resumption(
        &self,
        ctrl: &DetachableEvent,
        when: Option<Duration>,
        priority: f64,
    ) -> ExecutiveResult<EventKey> {
        let mut core = self.core();
        let when = when.unwrap_or(core.now);
        if !core.admit(when, self.inner.config.causality_checking)? {
            return Ok(EventKey::IGNORED);
        }
        Ok(core.push_resumption(ctrl, when, priority))
    }

    /// Records the first handler failure of the run and asks the loop to stop.
    pub(crate) fn record_failure(&self, key: EventKey, error: HandlerError) {
        tracing::error!("Handler for event {} failed: {}", key, error);
        let mut core = self.core();
        core.stop_requested = true;
        if core.failure.is_none() {
            core.failure = Some((key, error));
        }
        self.inner.pause_gate.notify_all();
    }

    /// Forgets a finished detachable event and completes its key.
    pub(crate) fn retire_detachable(&self, ctrl: &DetachableEvent) {
        let mut core = self.core();
        core.live_detachables.retain(|d| !d.ptr_eq(ctrl));
        if core
            .current_detachable
            .as_ref()
            .is_some_and(|current| current.ptr_eq(ctrl))
        {
            core.current_detachable = None;
        }
        core.complete_keys(&[ctrl.key()]);
        drop(core);
        ctrl.join_thread();
    }

    fn push_removal(&self, remover: EventRemover) -> ExecutiveResult<()> {
        let mut core = self.core();
        if let EventRemover::Key(key) = remover {
            if !core.queue.contains(key) {
                return Err(ExecutiveError::UnknownEventKey(key));
            }
        }
        core.removals.push(remover);
        Ok(())
    }
}

impl Executive for FullExecutive {
    fn id(&self) -> ExecutiveId {
        self.inner.id
    }

    fn kind(&self) -> ExecutiveKind {
        ExecutiveKind::Full
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
        self.core().current_priority
    }

    fn run_number(&self) -> u64 {
        self.core().run_number
    }

    fn events_served(&self) -> u64 {
        self.core().events_served
    }

    fn pending_event_count(&self) -> usize {
        self.core().queue.len()
    }

    fn event_list(&self) -> Vec<EventInfo> {
        self.core().queue.infos()
    }

    fn request(&self, mut request: EventRequest) -> ExecutiveResult<EventKey> {
        if request.kind == ExecEventType::None {
            return Err(ExecutiveError::InvalidEventType(request.kind));
        }
        let mut core = self.core();
        request.resolve_immediate(core.now, core.current_priority);
        if !core.admit(request.when, self.inner.config.causality_checking)? {
            return Ok(EventKey::IGNORED);
        }
        let key = core.next_key();
        let event = request.into_event(key);
        tracing::trace!(
            "Requested event {} at {:?} priority {} ({:?})",
            key,
            event.info.when,
            event.info.priority,
            event.info.kind
        );
        Ok(core.enqueue(event))
    }

    fn unrequest_event(&self, key: EventKey) -> ExecutiveResult<()> {
        if key.is_ignored() {
            return Ok(());
        }
        self.push_removal(EventRemover::Key(key))
    }

    fn unrequest_events(&self, remover: EventRemover) -> ExecutiveResult<()> {
        if let EventRemover::Key(key) = remover {
            return self.unrequest_event(key);
        }
        self.push_removal(remover)
    }

    fn resubmit_event_at_time(
        &self,
        key: EventKey,
        new_time: Duration,
        delete_old: bool,
    ) -> ExecutiveResult<EventKey> {
        let mut core = self.core();
        let Some(original) = core.queue.get(key).cloned() else {
            return Ok(EventKey::IGNORED);
        };
        if !core.admit(new_time, self.inner.config.causality_checking)? {
            return Ok(EventKey::IGNORED);
        }
        let new_key = core.next_key();
        let mut copy = original;
        copy.info.key = new_key;
        copy.info.when = new_time;
        core.enqueue(copy);
        if delete_old {
            core.removals.push(EventRemover::Key(key));
        }
        Ok(new_key)
    }

    fn join(&self, keys: &[EventKey]) -> ExecutiveResult<()> {
        let Some(waiter) = self.own_detachable() else {
            return Err(ExecutiveError::NotInDetachableContext);
        };
        let mut core = self.core();
        let pending: HashSet<EventKey> = keys
            .iter()
            .copied()
            .filter(|key| !key.is_ignored() && *key != waiter.key() && core.is_pending(*key))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        core.joins.push(JoinWait {
            pending,
            waiter: waiter.clone(),
        });
        drop(core);
        waiter.suspend();
        Ok(())
    }

    fn start(&self) -> ExecutiveResult<()> {
        self.run()
    }

    fn stop(&self) {
        let mut core = self.core();
        if core.loop_active {
            core.stop_requested = true;
            self.inner.pause_gate.notify_all();
        }
    }

    fn pause(&self) -> ExecutiveResult<()> {
        let mut core = self.core();
        if core.run_state != ExecState::Running {
            return Err(ExecutiveError::InvalidTransition {
                operation: "pause",
                state: core.run_state,
            });
        }
        core.pause_requested = true;
        core.run_state = ExecState::Paused;
        drop(core);
        tracing::debug!("Executive {} paused", self.inner.id);
        self.fire(Notification::Paused);
        Ok(())
    }

    fn resume(&self) -> ExecutiveResult<()> {
        let mut core = self.core();
        if core.run_state != ExecState::Paused || !core.loop_active {
            return Err(ExecutiveError::InvalidTransition {
                operation: "resume",
                state: core.run_state,
            });
        }
        core.pause_requested = false;
        core.run_state = ExecState::Running;
        self.inner.pause_gate.notify_all();
        drop(core);
        tracing::debug!("Executive {} resumed", self.inner.id);
        self.fire(Notification::Resumed);
        Ok(())
    }

    fn abort(&self) -> ExecutiveResult<()> {
        let mut core = self.core();
        if core.loop_active {
            core.abort_requested = true;
            core.stop_requested = true;
            self.inner.pause_gate.notify_all();
            return Ok(());
        }
        drop(core);
        self.abort_now();
        Ok(())
    }

    fn reset(&self) {
        let mut core = self.core();
        if core.loop_active {
            core.reset_requested = true;
            core.stop_requested = true;
            self.inner.pause_gate.notify_all();
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
        self.current_detachable_ref()
    }

    fn live_detachables(&self) -> Vec<DetachableEvent> {
        self.core().live_detachables.clone()
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
        self.push_removal(EventRemover::Target(target))
    }
}
