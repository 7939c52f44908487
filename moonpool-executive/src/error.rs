//! Error types for executive operations.

use std::time::Duration;

use thiserror::Error;

use crate::event::{EventKey, ExecEventType};
use crate::executive::{ExecState, ExecutiveId, ExecutiveKind};

/// Error type returned by event handlers.
///
/// Handlers report recoverable failures through this type; a panic escaping a
/// handler is converted into one carrying the panic message.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by event handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors that can occur while scheduling or running events.
#[derive(Debug, Error)]
pub enum ExecutiveError {
    /// An event was requested for a time earlier than the current time.
    #[error("Causality violation: event requested at {requested:?} but executive time is {now:?}")]
    CausalityViolation {
        /// The time the caller asked for.
        requested: Duration,
        /// The executive time at the moment of the request.
        now: Duration,
    },

    /// The executive has finished its run and accepts no more events until reset.
    #[error("Executive has finished and accepts no new events")]
    ExecutiveFinished,

    /// A removal was requested for a key that is not pending.
    #[error("Unknown event key: {0}")]
    UnknownEventKey(EventKey),

    /// The operation is not available on this executive implementation.
    #[error("{operation} is not supported by the {kind:?} executive")]
    NotSupported {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Executive implementation that rejected it.
        kind: ExecutiveKind,
    },

    /// The operation is not valid in the executive's current state.
    #[error("Cannot {operation} while executive is {state:?}")]
    InvalidTransition {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the executive was in.
        state: ExecState,
    },

    /// The operation must be called from inside a detachable event handler.
    #[error("Operation requires a detachable event context")]
    NotInDetachableContext,

    /// The dispatch kind cannot be used for a request.
    #[error("Invalid event type for a request: {0:?}")]
    InvalidEventType(ExecEventType),

    /// An event handler failed during the run; re-raised once `start` unwinds.
    #[error("Executive {executive} stopped: handler for event {key} failed: {source}")]
    DispatchFailed {
        /// Executive that ran the failing handler.
        executive: ExecutiveId,
        /// Key of the event whose handler failed.
        key: EventKey,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },

    /// The execution context for a detachable event could not be created.
    #[error("Failed to spawn detachable event context: {0}")]
    DetachableSpawn(#[source] std::io::Error),
}

/// A type alias for `Result<T, ExecutiveError>`.
pub type ExecutiveResult<T> = Result<T, ExecutiveError>;
