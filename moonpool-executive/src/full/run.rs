//! The dispatch loop of the full-featured executive.

use std::{
    panic::{self, AssertUnwindSafe},
    thread,
    time::Duration,
};

use tracing::instrument;

use super::FullExecutive;
use crate::{
    detachable::{DetachableEvent, panic_error},
    error::{ExecutiveError, ExecutiveResult},
    event::{Dispatch, Event, EventHandler, EventInfo, ExecEventType},
    executive::ExecState,
    notify::{Notification, NotificationKind},
};

/// What the loop does next.
enum Step {
    Dispatch(Event),
    AnnounceClock { from: Duration, to: Duration },
    Exit,
}

impl FullExecutive {
    #[instrument(skip(self), fields(executive = %self.inner.id))]
    pub(super) fn run(&self) -> ExecutiveResult<()> {
        {
            let mut core = self.core();
            match core.run_state {
                ExecState::Stopped => {
                    core.run_number += 1;
                    core.events_served = 0;
                }
                // A run that was stopped with events left continues
                ExecState::Paused if !core.loop_active => {}
                state => {
                    return Err(ExecutiveError::InvalidTransition {
                        operation: "start",
                        state,
                    });
                }
            }
            core.run_state = ExecState::Running;
            core.loop_active = true;
            core.loop_thread = Some(thread::current().id());
            core.stop_requested = false;
            core.pause_requested = false;
            tracing::debug!(
                "Executive {} starting run {} at {:?}",
                self.inner.id,
                core.run_number,
                core.now
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

    /// Waits out a pause, applies removals and selects the next event.
    fn next_step(&self, announced: &mut Option<Duration>) -> Step {
        let mut core = self.core();
        while core.pause_requested && !core.stop_requested {
            self.inner.pause_gate.wait(&mut core);
        }
        if core.stop_requested {
            return Step::Exit;
        }

        core.apply_removals();
        if core.non_daemon_count == 0 {
            return Step::Exit;
        }

        let when = match core.queue.peek_earliest() {
            Some(event) => event.when(),
            None => return Step::Exit,
        };
        if when > core.now
            && *announced != Some(when)
            && self
                .inner
                .notifications
                .has_subscribers(NotificationKind::ClockAboutToChange)
        {
            // Announce without the lock held, then select again since the
            // subscribers may have changed the queue
            *announced = Some(when);
            return Step::AnnounceClock {
                from: core.now,
                to: when,
            };
        }

        let Some(event) = core.take_earliest() else {
            return Step::Exit;
        };
        core.now = core.now.max(event.when());
        core.current_priority = event.info.priority;
        core.last_event_served_time = event.when();
        core.events_served += 1;
        Step::Dispatch(event)
    }

    fn dispatch(&self, event: Event) {
        let info = event.info.clone();
        tracing::trace!(
            "Dispatching event {} at {:?} priority {} ({:?})",
            info.key,
            info.when,
            info.priority,
            info.kind
        );
        self.fire(Notification::EventAboutToFire(&info));

        match event.dispatch {
            Dispatch::Handler(handler) => match info.kind {
                ExecEventType::Synchronous | ExecEventType::None => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        handler.call(self, &info.payload)
                    }));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => self.record_failure(info.key, error),
                        Err(unwind) => self.record_failure(info.key, panic_error(unwind)),
                    }
                    self.core().complete_keys(&[info.key]);
                }
                ExecEventType::Detachable => self.launch_detachable(&event.info, handler),
                ExecEventType::Asynchronous => {
                    self.launch_asynchronous(&event.info, handler);
                    self.core().complete_keys(&[info.key]);
                }
            },
            Dispatch::Resume(ctrl) => {
                if ctrl.take_deferred_abort() {
                    tracing::debug!(
                        "Completing deferred abort of detachable event {}",
                        ctrl.key()
                    );
                    ctrl.complete_abort();
                } else if ctrl.is_finished() || ctrl.is_aborted() {
                    tracing::debug!(
                        "Skipping resumption of detachable event {}: no longer suspended",
                        ctrl.key()
                    );
                } else {
                    self.hand_off(&ctrl);
                }
            }
        }

        self.fire(Notification::EventCompleted(&info));
    }

    fn launch_detachable(&self, info: &EventInfo, handler: EventHandler) {
        let stack_size = self.inner.config.detachable_stack_size;
        match DetachableEvent::spawn(self, info.clone(), handler, stack_size) {
            Ok(ctrl) => {
                self.core().live_detachables.push(ctrl.clone());
                self.hand_off(&ctrl);
            }
            Err(error) => {
                tracing::error!("Could not start detachable event {}: {}", info.key, error);
                self.record_failure(info.key, Box::new(error));
            }
        }
    }

    /// Makes `ctrl` the active detachable and gives it control until it
    /// suspends or returns.
    fn hand_off(&self, ctrl: &DetachableEvent) {
        self.core().current_detachable = Some(ctrl.clone());
        ctrl.transfer_control();
        self.core().current_detachable = None;
        if ctrl.is_finished() {
            self.retire_detachable(ctrl);
        }
    }

    fn launch_asynchronous(&self, info: &EventInfo, handler: EventHandler) {
        let exec = self.clone();
        let key = info.key;
        let payload = info.payload.clone();
        let spawned = thread::Builder::new()
            .name(format!("async-{}", key.0))
            .spawn(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| handler.call(&exec, &payload)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::error!("Asynchronous handler for event {} failed: {}", key, error)
                    }
                    Err(unwind) => tracing::error!(
                        "Asynchronous handler for event {} failed: {}",
                        key,
                        panic_error(unwind)
                    ),
                }
            });
        if let Err(error) = spawned {
            tracing::error!("Could not start asynchronous event {}: {}", key, error);
            self.record_failure(key, Box::new(error));
        }
    }

    /// Settles the run state after the loop exits and re-raises a handler
    /// failure.
    fn finish_run(&self) -> ExecutiveResult<()> {
        let mut core = self.core();
        core.loop_active = false;
        core.loop_thread = None;
        let failure = core.failure.take();
        let outcome = match failure {
            Some((key, source)) => Err(ExecutiveError::DispatchFailed {
                executive: self.inner.id,
                key,
                source,
            }),
            None => Ok(()),
        };

        if core.abort_requested {
            drop(core);
            self.abort_now();
            return outcome;
        }
        if core.reset_requested {
            drop(core);
            self.reset_now();
            return outcome;
        }
        if core.stop_requested {
            core.stop_requested = false;
            core.pause_requested = false;
            core.run_state = if core.non_daemon_count > 0 {
                ExecState::Paused
            } else {
                ExecState::Stopped
            };
            tracing::debug!(
                "Executive {} stopped at {:?} ({:?}, {} events pending)",
                self.inner.id,
                core.now,
                core.run_state,
                core.queue.len()
            );
            drop(core);
            self.fire(Notification::Stopped);
            return outcome;
        }

        core.run_state = ExecState::Finished;
        // Nothing runs after finish, so no joiner can be resumed
        core.joins.clear();
        let leaked = core.live_detachables.clone();
        tracing::debug!(
            "Executive {} finished at {:?} after {} events",
            self.inner.id,
            core.now,
            core.events_served
        );
        drop(core);
        self.fire(Notification::Finished);
        self.reap_leaked(leaked);
        outcome
    }

    /// Reports and aborts detachable events left suspended at finish.
    fn reap_leaked(&self, leaked: Vec<DetachableEvent>) {
        for ctrl in leaked {
            let deferred = ctrl.take_deferred_abort();
            if !deferred && (ctrl.is_finished() || ctrl.is_aborted()) {
                continue;
            }
            if self.inner.config.report_leaked_detachables {
                let location = ctrl
                    .suspended_at()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::warn!(
                    "Unterminated detachable event {} (target {:?}) suspended at {:?} in {}",
                    ctrl.key(),
                    ctrl.target(),
                    ctrl.time_of_last_wait(),
                    location
                );
                if !ctrl.has_abort_handler() {
                    tracing::warn!(
                        "Detachable event {} has no abort handler, likely deadlock",
                        ctrl.key()
                    );
                }
            }
            if deferred {
                ctrl.complete_abort();
            } else {
                ctrl.abort();
            }
        }
    }

    /// Aborts every live detachable event, then resets.
    #[instrument(skip(self), fields(executive = %self.inner.id))]
    pub(super) fn abort_now(&self) {
        let live = self.core().live_detachables.clone();
        tracing::debug!("Aborting {} live detachable events", live.len());
        for ctrl in live {
            if ctrl.take_deferred_abort() {
                ctrl.complete_abort();
            } else if !ctrl.is_finished() && !ctrl.is_aborted() {
                ctrl.abort();
            }
        }
        self.core().live_detachables.clear();
        self.reset_now();
        self.fire(Notification::Aborted);
    }

    #[instrument(skip(self), fields(executive = %self.inner.id))]
    pub(super) fn reset_now(&self) {
        self.core().clear_for_reset();
        tracing::debug!("Executive {} reset", self.inner.id);
        self.fire(Notification::Reset);
    }
}
