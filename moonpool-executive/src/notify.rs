//! Lifecycle and dispatch notifications.
//!
//! Subscribers are kept in a small registry and invoked with no executive
//! lock held, so a handler may call back into the executive.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    event::{EventInfo, TargetId},
    executive::Executive,
};

/// Which notification a subscriber listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// The run loop is starting.
    Started,
    /// The run loop exited on a stop request.
    Stopped,
    /// The run loop is blocked in a pause.
    Paused,
    /// A pause was released.
    Resumed,
    /// The run loop ran out of non-daemon events.
    Finished,
    /// The executive was aborted.
    Aborted,
    /// The executive was reset.
    Reset,
    /// An event is about to be dispatched.
    EventAboutToFire,
    /// An event's dispatch returned.
    EventCompleted,
    /// Simulated time is about to advance.
    ClockAboutToChange,
}

/// A notification delivered to subscribers.
#[derive(Debug, Clone, Copy)]
pub enum Notification<'a> {
    /// See [`NotificationKind::Started`].
    Started,
    /// See [`NotificationKind::Stopped`].
    Stopped,
    /// See [`NotificationKind::Paused`].
    Paused,
    /// See [`NotificationKind::Resumed`].
    Resumed,
    /// See [`NotificationKind::Finished`].
    Finished,
    /// See [`NotificationKind::Aborted`].
    Aborted,
    /// See [`NotificationKind::Reset`].
    Reset,
    /// See [`NotificationKind::EventAboutToFire`].
    EventAboutToFire(&'a EventInfo),
    /// See [`NotificationKind::EventCompleted`].
    EventCompleted(&'a EventInfo),
    /// See [`NotificationKind::ClockAboutToChange`].
    ClockAboutToChange {
        /// Current time.
        from: Duration,
        /// Time about to be entered.
        to: Duration,
    },
}

impl Notification<'_> {
    /// The kind subscribers filter on.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Started => NotificationKind::Started,
            Self::Stopped => NotificationKind::Stopped,
            Self::Paused => NotificationKind::Paused,
            Self::Resumed => NotificationKind::Resumed,
            Self::Finished => NotificationKind::Finished,
            Self::Aborted => NotificationKind::Aborted,
            Self::Reset => NotificationKind::Reset,
            Self::EventAboutToFire(_) => NotificationKind::EventAboutToFire,
            Self::EventCompleted(_) => NotificationKind::EventCompleted,
            Self::ClockAboutToChange { .. } => NotificationKind::ClockAboutToChange,
        }
    }
}

/// Callback invoked for a notification.
pub type NotificationHandler = Arc<dyn Fn(&dyn Executive, &Notification<'_>) + Send + Sync>;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: NotificationKind,
    owner: Option<TargetId>,
    handler: NotificationHandler,
}

#[derive(Default)]
pub(crate) struct NotificationRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl NotificationRegistry {
    pub(crate) fn subscribe(
        &self,
        owner: Option<TargetId>,
        kind: NotificationKind,
        handler: NotificationHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            id,
            kind,
            owner,
            handler,
        });
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Drops every subscription owned by `owner`, returning how many.
    pub(crate) fn detach(&self, owner: TargetId) -> usize {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.owner != Some(owner));
        before - subs.len()
    }

    pub(crate) fn has_subscribers(&self, kind: NotificationKind) -> bool {
        self.subscriptions.lock().iter().any(|s| s.kind == kind)
    }

    pub(crate) fn fire(&self, exec: &dyn Executive, notification: Notification<'_>) {
        let kind = notification.kind();
        let handlers: Vec<NotificationHandler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(exec, &notification);
        }
    }
}

/// Wraps a closure as a [`NotificationHandler`].
///
/// Use this rather than `Arc::new` so the closure's argument types are
/// inferred from the handler signature.
pub fn notification_handler<F>(handler: F) -> NotificationHandler
where
    F: Fn(&dyn Executive, &Notification<'_>) + Send + Sync + 'static,
{
    Arc::new(handler)
}
