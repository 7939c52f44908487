//! Event records, identity tokens and request building.
//!
//! An event is an immutable record of a scheduled callback. The executive
//! assigns every accepted request a strictly increasing [`EventKey`], which is
//! both the final tie-breaker in dispatch order and the cancellation handle
//! handed back to the caller.

use std::{
    any::Any,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{detachable::DetachableEvent, error::HandlerResult, executive::Executive};

/// Opaque user data delivered to an event handler.
pub type Payload = Option<Arc<dyn Any + Send + Sync>>;

/// Wrap a value as an event payload.
pub fn payload<T: Any + Send + Sync>(value: T) -> Payload {
    Some(Arc::new(value))
}

/// Borrow the payload as a concrete type, if it holds one.
pub fn payload_ref<T: Any>(payload: &Payload) -> Option<&T> {
    payload.as_deref().and_then(|p| p.downcast_ref::<T>())
}

/// Unique, strictly increasing identifier of a requested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey(pub i64);

impl EventKey {
    /// Key returned for a request that was silently dropped.
    pub const IGNORED: EventKey = EventKey(-1);

    /// Returns `true` if this is the [`EventKey::IGNORED`] sentinel.
    pub fn is_ignored(&self) -> bool {
        *self == Self::IGNORED
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a dispatched event's handler is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ExecEventType {
    /// Run on the dispatch loop; the loop waits for it to return.
    Synchronous,
    /// Run on its own execution context, which may suspend and be resumed.
    Detachable,
    /// Run on a separate thread without the dispatch loop waiting for it.
    Asynchronous,
    /// No delivery. Never accepted in a request.
    None,
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Token identifying the object on whose behalf events are requested.
///
/// Used to cancel all of an object's events at once and to detach it from
/// executive notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    /// Allocates a fresh, process-unique target token.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of an [`EventHandler`], shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type HandlerFn = dyn Fn(&dyn Executive, &Payload) -> HandlerResult + Send + Sync;

/// A cloneable event callback with a stable identity.
#[derive(Clone)]
pub struct EventHandler {
    id: CallbackId,
    func: Arc<HandlerFn>,
}

impl EventHandler {
    /// Wraps a closure, allocating a new [`CallbackId`] for it.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&dyn Executive, &Payload) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            id: CallbackId(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)),
            func: Arc::new(func),
        }
    }

    /// Returns the identity shared by this handler and its clones.
    pub fn id(&self) -> CallbackId {
        self.id
    }

    pub(crate) fn call(&self, exec: &dyn Executive, payload: &Payload) -> HandlerResult {
        (self.func)(exec, payload)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler").field("id", &self.id).finish()
    }
}

/// Read-only view of a pending event.
#[derive(Clone)]
pub struct EventInfo {
    /// Insertion key.
    pub key: EventKey,
    /// Scheduled time.
    pub when: Duration,
    /// Priority among events at the same time; higher dispatches first.
    pub priority: f64,
    /// Delivery mechanism.
    pub kind: ExecEventType,
    /// Whether this event alone keeps the run alive.
    pub is_daemon: bool,
    /// Object the event was requested on behalf of.
    pub target: Option<TargetId>,
    /// Identity of the callback.
    pub callback: CallbackId,
    /// `true` for events that resume a suspended detachable event.
    pub is_resumption: bool,
    /// User payload.
    pub payload: Payload,
}

impl fmt::Debug for EventInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventInfo")
            .field("key", &self.key)
            .field("when", &self.when)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("is_daemon", &self.is_daemon)
            .field("target", &self.target)
            .field("callback", &self.callback)
            .field("is_resumption", &self.is_resumption)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// What happens when an event is dispatched.
#[derive(Clone)]
pub(crate) enum Dispatch {
    /// Invoke a user handler.
    Handler(EventHandler),
    /// Hand control back to a suspended detachable event.
    Resume(DetachableEvent),
}

/// A scheduled event as held by the queue.
#[derive(Clone)]
pub(crate) struct Event {
    pub(crate) info: EventInfo,
    pub(crate) dispatch: Dispatch,
}

impl Event {
    pub(crate) fn key(&self) -> EventKey {
        self.info.key
    }

    pub(crate) fn when(&self) -> Duration {
        self.info.when
    }
}

/// A request to schedule an event.
///
/// ```ignore
/// let key = exec.request(
///     EventRequest::new(handler, Duration::from_secs(10))
///         .priority(5.0)
///         .kind(ExecEventType::Detachable),
/// )?;
/// ```
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub(crate) handler: EventHandler,
    pub(crate) when: Duration,
    pub(crate) priority: f64,
    pub(crate) payload: Payload,
    pub(crate) kind: ExecEventType,
    pub(crate) is_daemon: bool,
    pub(crate) target: Option<TargetId>,
    pub(crate) immediate: bool,
}

impl EventRequest {
    /// A synchronous, non-daemon request at `when` with priority zero.
    pub fn new(handler: EventHandler, when: Duration) -> Self {
        Self {
            handler,
            when,
            priority: 0.0,
            payload: None,
            kind: ExecEventType::Synchronous,
            is_daemon: false,
            target: None,
            immediate: false,
        }
    }

    /// A request for the executive's current time and priority.
    ///
    /// Both are read when the executive accepts the request, under the same
    /// lock that queues it, so a concurrently advancing clock cannot turn it
    /// into a past request. A priority set on the builder is overridden.
    pub fn immediate(handler: EventHandler) -> Self {
        Self {
            immediate: true,
            ..Self::new(handler, Duration::ZERO)
        }
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the dispatch kind.
    pub fn kind(mut self, kind: ExecEventType) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the event as a daemon event.
    pub fn daemon(mut self, is_daemon: bool) -> Self {
        self.is_daemon = is_daemon;
        self
    }

    /// Associates the event with a target.
    pub fn target(mut self, target: TargetId) -> Self {
        self.target = Some(target);
        self
    }

    /// Scheduled time of the request. Meaningless for an immediate request
    /// until it is accepted.
    pub fn when(&self) -> Duration {
        self.when
    }

    /// Pins an immediate request to the given time and priority.
    pub(crate) fn resolve_immediate(&mut self, now: Duration, priority: f64) {
        if self.immediate {
            self.when = now;
            self.priority = priority;
        }
    }

    pub(crate) fn into_event(self, key: EventKey) -> Event {
        Event {
            info: EventInfo {
                key,
                when: self.when,
                priority: self.priority,
                kind: self.kind,
                is_daemon: self.is_daemon,
                target: self.target,
                callback: self.handler.id(),
                is_resumption: false,
                payload: self.payload,
            },
            dispatch: Dispatch::Handler(self.handler),
        }
    }
}
