//! Detachable events: handlers that can suspend mid-flight and be resumed.
//!
//! A detachable handler runs on its own thread, but never concurrently with
//! the dispatch loop. Control moves between the two by token passing over a
//! per-event mutex and condvar: whoever does not hold the token is blocked.
//!
//! ```text
//!  dispatch loop                         detachable context
//!  ─────────────                         ──────────────────
//!  spawn + hand token ─────────────────▶ handler starts
//!  (blocked)                             ...
//!                    ◀────────────────── suspend(): hand token back
//!  dispatch other events                 (blocked)
//!  dispatch resumption event ──────────▶ suspend() returns
//!  (blocked)                             ...
//!                    ◀────────────────── handler returns
//!  retire controller
//! ```
//!
//! Resumption always goes through a queued event, so a resumed handler takes
//! its turn in the ordinary dispatch order. Aborting a suspended controller
//! wakes it with an abort flag set; `suspend` then unwinds the detachable
//! thread instead of returning.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe, Location},
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    error::{ExecutiveError, ExecutiveResult, HandlerError},
    event::{EventHandler, EventInfo, EventKey, Payload, TargetId},
    full::FullExecutive,
};

/// Unwind payload used to terminate an aborted detachable context.
struct DetachableAbort;

type AbortHandler = Box<dyn FnOnce(&DetachableEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Executive,
    Detachable,
}

struct Handoff {
    turn: Turn,
    thread: Option<ThreadId>,
    join_handle: Option<JoinHandle<()>>,
    finished: bool,
    abort_requested: bool,
    abort_deferred: bool,
    waiting: bool,
    time_of_last_wait: Option<Duration>,
    suspended_at: Option<&'static Location<'static>>,
    abort_handler: Option<AbortHandler>,
}

struct DetachableInner {
    exec: FullExecutive,
    root: EventInfo,
    handoff: Mutex<Handoff>,
    cv: Condvar,
}

/// Controller of a dispatched detachable event.
///
/// Cheap to clone; all clones refer to the same execution context.
#[derive(Clone)]
pub struct DetachableEvent {
    inner: Arc<DetachableInner>,
}

impl DetachableEvent {
    /// Creates the controller and its thread. The thread blocks until the
    /// dispatch loop first hands it control.
    pub(crate) fn spawn(
        exec: &FullExecutive,
        root: EventInfo,
        handler: EventHandler,
        stack_size: Option<usize>,
    ) -> ExecutiveResult<Self> {
        let ctrl = Self {
            inner: Arc::new(DetachableInner {
                exec: exec.clone(),
                root,
                handoff: Mutex::new(Handoff {
                    turn: Turn::Executive,
                    thread: None,
                    join_handle: None,
                    finished: false,
                    abort_requested: false,
                    abort_deferred: false,
                    waiting: false,
                    time_of_last_wait: None,
                    suspended_at: None,
                    abort_handler: None,
                }),
                cv: Condvar::new(),
            }),
        };

        let mut builder = thread::Builder::new().name(format!("detachable-{}", ctrl.key().0));
        if let Some(bytes) = stack_size {
            builder = builder.stack_size(bytes);
        }
        let context = ctrl.clone();
        let handle = builder
            .spawn(move || context.run(handler))
            .map_err(ExecutiveError::DetachableSpawn)?;

        let mut handoff = ctrl.inner.handoff.lock();
        handoff.thread = Some(handle.thread().id());
        handoff.join_handle = Some(handle);
        drop(handoff);
        Ok(ctrl)
    }

    /// Thread entry point.
    fn run(self, handler: EventHandler) {
        {
            let mut handoff = self.inner.handoff.lock();
            while handoff.turn != Turn::Detachable {
                self.inner.cv.wait(&mut handoff);
            }
        }

        let exec = self.inner.exec.clone();
        let payload: Payload = self.inner.root.payload.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(&exec, &payload)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => exec.record_failure(self.key(), error),
            Err(unwind) if unwind.is::<DetachableAbort>() => {
                tracing::debug!("Detachable event {} unwound after abort", self.key());
            }
            Err(unwind) => exec.record_failure(self.key(), panic_error(unwind)),
        }

        let mut handoff = self.inner.handoff.lock();
        handoff.finished = true;
        handoff.waiting = false;
        handoff.turn = Turn::Executive;
        self.inner.cv.notify_all();
    }

    /// Gives this context control and blocks until it suspends or finishes.
    ///
    /// Called by whoever currently holds simulation control: the dispatch
    /// loop, or a context aborting this one.
    pub(crate) fn transfer_control(&self) {
        let mut handoff = self.inner.handoff.lock();
        handoff.turn = Turn::Detachable;
        self.inner.cv.notify_all();
        while handoff.turn == Turn::Detachable {
            self.inner.cv.wait(&mut handoff);
        }
    }

    /// Reaps the finished thread. The thread has already handed control back,
    /// so this only waits for it to exit.
    pub(crate) fn join_thread(&self) {
        let handle = self.inner.handoff.lock().join_handle.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Detachable event {} thread exited abnormally", self.key());
            }
        }
    }

    /// Returns `true` if called from this event's own execution context.
    pub(crate) fn is_own_context(&self) -> bool {
        self.inner.handoff.lock().thread == Some(thread::current().id())
    }

    #[track_caller]
    fn assert_own_context(&self, operation: &str) {
        if !self.is_own_context() {
            panic!(
                "{operation}() of detachable event {} called outside its own context",
                self.key()
            );
        }
    }

    /// Suspends the calling handler until something resumes it.
    ///
    /// # Panics
    ///
    /// Panics if called from any context other than this event's own handler
    /// while it holds control, or after the event was aborted.
    #[track_caller]
    pub fn suspend(&self) {
        let location = Location::caller();
        self.assert_own_context("suspend");
        let is_active = self
            .inner
            .exec
            .current_detachable_ref()
            .is_some_and(|current| current.ptr_eq(self));
        if !is_active {
            panic!(
                "suspend() of detachable event {} called while it is not the active detachable",
                self.key()
            );
        }
        let now = self.inner.exec.current_time();

        let mut handoff = self.inner.handoff.lock();
        if handoff.abort_requested {
            if !handoff.abort_deferred {
                panic!(
                    "suspend() of detachable event {} called after it was aborted",
                    self.key()
                );
            }
            // Aborted by another thread while this context held control
            handoff.abort_deferred = false;
            drop(handoff);
            self.fire_abort_handler();
            panic::resume_unwind(Box::new(DetachableAbort));
        }
        handoff.waiting = true;
        handoff.time_of_last_wait = Some(now);
        handoff.suspended_at = Some(location);
        handoff.turn = Turn::Executive;
        self.inner.cv.notify_all();
        while handoff.turn == Turn::Executive {
            self.inner.cv.wait(&mut handoff);
        }
        handoff.waiting = false;
        let aborted = handoff.abort_requested;
        drop(handoff);

        if aborted {
            panic::resume_unwind(Box::new(DetachableAbort));
        }
    }

    /// Schedules a resumption at `when`, then suspends.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`DetachableEvent::suspend`].
    #[track_caller]
    pub fn suspend_until(&self, when: Duration) -> ExecutiveResult<()> {
        self.assert_own_context("suspend_until");
        let now = self.inner.exec.current_time();
        if when < now {
            return Err(ExecutiveError::CausalityViolation {
                requested: when,
                now,
            });
        }
        self.inner
            .exec
            .schedule_resumption(self, Some(when), self.inner.root.priority)?;
        self.suspend();
        Ok(())
    }

    /// Schedules a resumption `duration` from now, then suspends.
    #[track_caller]
    pub fn suspend_for(&self, duration: Duration) -> ExecutiveResult<()> {
        let when = self.inner.exec.current_time() + duration;
        self.suspend_until(when)
    }

    /// Schedules an immediate resumption with the priority of the event this
    /// controller wraps.
    pub fn resume(&self) -> ExecutiveResult<EventKey> {
        self.resume_with_priority(self.inner.root.priority)
    }

    /// Schedules an immediate resumption with the given priority.
    ///
    /// # Panics
    ///
    /// Panics if the event was aborted.
    pub fn resume_with_priority(&self, priority: f64) -> ExecutiveResult<EventKey> {
        let handoff = self.inner.handoff.lock();
        if handoff.abort_requested {
            panic!("resume() of aborted detachable event {}", self.key());
        }
        if handoff.finished {
            tracing::warn!(
                "resume() of detachable event {} after its handler returned",
                self.key()
            );
            return Ok(EventKey::IGNORED);
        }
        drop(handoff);
        self.inner.exec.schedule_resumption(self, None, priority)
    }

    /// Installs the handler run once when this event is aborted, replacing
    /// any previous one.
    pub fn set_abort_handler<F>(&self, handler: F)
    where
        F: FnOnce(&DetachableEvent) + Send + 'static,
    {
        self.inner.handoff.lock().abort_handler = Some(Box::new(handler));
    }

    /// Removes the abort handler without running it.
    pub fn clear_abort_handler(&self) {
        self.inner.handoff.lock().abort_handler = None;
    }

    /// Runs and clears the abort handler, if one is installed.
    pub fn fire_abort_handler(&self) {
        let handler = self.inner.handoff.lock().abort_handler.take();
        if let Some(handler) = handler {
            handler(self);
        }
    }

    /// Returns `true` if an abort handler is installed.
    pub fn has_abort_handler(&self) -> bool {
        self.inner.handoff.lock().abort_handler.is_some()
    }

    /// Aborts this event: fires the abort handler, then wakes the suspended
    /// context so it unwinds.
    ///
    /// When called from the event's own context the caller unwinds
    /// immediately. When called from a thread that does not hold simulation
    /// control, such as an asynchronous handler, the event is marked aborted
    /// at once but the abort handler and the unwind run later, from a
    /// resumption event dispatched in turn.
    ///
    /// # Panics
    ///
    /// Panics if the event was already aborted.
    pub fn abort(&self) {
        let holds_control = self.inner.exec.holds_control();
        {
            let mut handoff = self.inner.handoff.lock();
            if handoff.abort_requested {
                panic!("detachable event {} aborted twice", self.key());
            }
            if handoff.finished {
                return;
            }
            handoff.abort_requested = true;
            handoff.abort_deferred = !holds_control;
        }

        if !holds_control {
            tracing::debug!(
                "Deferring abort of detachable event {} to the dispatch loop",
                self.key()
            );
            let queued = self
                .inner
                .exec
                .schedule_resumption(self, None, self.inner.root.priority);
            if let Err(error) = queued {
                tracing::warn!(
                    "Could not queue abort of detachable event {}: {}",
                    self.key(),
                    error
                );
            }
            return;
        }

        tracing::debug!("Aborting detachable event {}", self.key());
        self.complete_abort();
    }

    /// Clears a deferred abort, returning `true` if the context still has to
    /// be unwound.
    pub(crate) fn take_deferred_abort(&self) -> bool {
        let mut handoff = self.inner.handoff.lock();
        let deferred = std::mem::take(&mut handoff.abort_deferred);
        deferred && !handoff.finished
    }

    /// Fires the abort handler and unwinds the context. The caller holds
    /// simulation control.
    pub(crate) fn complete_abort(&self) {
        self.fire_abort_handler();

        if self.is_own_context() {
            panic::resume_unwind(Box::new(DetachableAbort));
        }

        let suspended = {
            let handoff = self.inner.handoff.lock();
            handoff.turn == Turn::Executive && !handoff.finished
        };
        if suspended {
            self.transfer_control();
            self.inner.exec.retire_detachable(self);
        }
    }

    /// Key of the event this controller wraps.
    pub fn key(&self) -> EventKey {
        self.inner.root.key
    }

    /// The event this controller wraps.
    pub fn root_event(&self) -> &EventInfo {
        &self.inner.root
    }

    /// Target of the event this controller wraps.
    pub fn target(&self) -> Option<TargetId> {
        self.inner.root.target
    }

    /// Returns `true` while the handler is blocked in a suspend.
    pub fn is_waiting(&self) -> bool {
        self.inner.handoff.lock().waiting
    }

    /// Simulated time of the most recent suspend.
    pub fn time_of_last_wait(&self) -> Option<Duration> {
        self.inner.handoff.lock().time_of_last_wait
    }

    /// Source location of the most recent suspend.
    pub fn suspended_at(&self) -> Option<&'static Location<'static>> {
        self.inner.handoff.lock().suspended_at
    }

    /// Returns `true` once an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.inner.handoff.lock().abort_requested
    }

    /// Returns `true` once the handler returned or unwound.
    pub fn is_finished(&self) -> bool {
        self.inner.handoff.lock().finished
    }

    /// Returns `true` if both handles refer to the same controller.
    pub fn ptr_eq(&self, other: &DetachableEvent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DetachableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handoff = self.inner.handoff.lock();
        f.debug_struct("DetachableEvent")
            .field("key", &self.inner.root.key)
            .field("target", &self.inner.root.target)
            .field("waiting", &handoff.waiting)
            .field("finished", &handoff.finished)
            .field("aborted", &handoff.abort_requested)
            .field("time_of_last_wait", &handoff.time_of_last_wait)
            .finish()
    }
}

/// Converts a caught panic into a handler error.
pub(crate) fn panic_error(unwind: Box<dyn Any + Send>) -> HandlerError {
    if let Some(message) = unwind.downcast_ref::<&str>() {
        format!("handler panicked: {message}").into()
    } else if let Some(message) = unwind.downcast_ref::<String>() {
        format!("handler panicked: {message}").into()
    } else {
        "handler panicked".into()
    }
}
