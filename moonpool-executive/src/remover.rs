//! Cancellation filters.
//!
//! A removal request is recorded, not applied. The full executive applies all
//! recorded removals at the start of each dispatch cycle.

use std::{fmt, sync::Arc};

use crate::event::{CallbackId, EventInfo, EventKey, TargetId};

type Predicate = Arc<dyn Fn(&EventInfo) -> bool + Send + Sync>;

/// Selects pending events to cancel.
#[derive(Clone)]
pub enum EventRemover {
    /// Exactly the event with this key.
    Key(EventKey),
    /// Every event the predicate accepts.
    Predicate(Predicate),
    /// Every event requested on behalf of this target.
    ///
    /// Resumption events of a detachable event carry the target of the event
    /// the controller wraps, so they are removed too.
    Target(TargetId),
    /// Every event whose callback has this identity, resumptions included.
    Callback(CallbackId),
}

impl EventRemover {
    /// Builds a predicate remover.
    pub fn predicate<F>(filter: F) -> Self
    where
        F: Fn(&EventInfo) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(filter))
    }

    /// Returns `true` if this remover cancels the event.
    pub fn matches(&self, info: &EventInfo) -> bool {
        match self {
            Self::Key(key) => info.key == *key,
            Self::Predicate(filter) => filter(info),
            Self::Target(target) => info.target == Some(*target),
            Self::Callback(callback) => info.callback == *callback,
        }
    }
}

impl fmt::Debug for EventRemover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Target(target) => f.debug_tuple("Target").field(target).finish(),
            Self::Callback(callback) => f.debug_tuple("Callback").field(callback).finish(),
        }
    }
}
