//! # Moonpool Executive
//!
//! A discrete-event simulation executive. Client code schedules callbacks
//! ("events") at points on a simulated clock, and the executive delivers them
//! in a deterministic, causality-respecting order.
//!
//! ## Ordering
//!
//! Pending events dispatch by time, then by descending priority, then by
//! ascending key. Keys are assigned in request order, so two requests for
//! the same time and priority dispatch in the order they were made.
//!
//! ## Dispatch kinds
//!
//! | Kind | Runs on | Blocks the loop | Can suspend |
//! |------|---------|-----------------|-------------|
//! | [`ExecEventType::Synchronous`] | dispatch loop | until it returns | no |
//! | [`ExecEventType::Detachable`] | its own thread | until it returns or suspends | yes |
//! | [`ExecEventType::Asynchronous`] | its own thread | no | no |
//!
//! Detachable events are cooperative coroutines over real threads: exactly
//! one of the dispatch loop and the active [`DetachableEvent`] advances
//! simulation state at any instant. A suspended detachable event is resumed
//! by an ordinary queued event, so resumption never jumps the queue.
//!
//! ## Executives
//!
//! - [`FullExecutive`]: every dispatch kind, cancellation, rescheduling,
//!   pause/resume, abort and joins.
//! - [`FastExecutive`]: synchronous dispatch from a binary heap, for
//!   throughput-bound models.
//!
//! Both implement [`Executive`]; [`create_executive`] builds one from an
//! [`ExecutiveConfiguration`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use moonpool_executive::{EventHandler, ExecEventType, Executive, ExecutiveConfiguration, create_executive};
//!
//! let exec = create_executive(ExecutiveConfiguration::full());
//! let tick = EventHandler::new(|exec, _| {
//!     tracing::info!("tick at {:?}", exec.now());
//!     Ok(())
//! });
//! exec.request_event(tick, Duration::from_secs(5), 0.0, None, ExecEventType::Synchronous)?;
//! exec.start()?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Core Modules
// =============================================================================

/// Error types for executive operations.
pub mod error;

/// Executive configuration.
pub mod config;

/// Events, keys, handlers and requests.
pub mod event;

/// Event ordering and the full executive's queue.
pub mod queue;

/// Bulk event cancellation selectors.
pub mod remover;

/// Lifecycle and dispatch notifications.
pub mod notify;

/// The executive trait and factory.
pub mod executive;

/// The full-featured executive.
pub mod full;

/// Detachable event controllers.
pub mod detachable;

/// Rendezvous barrier for detachable events.
pub mod synchronizer;

/// The fast executive.
pub mod fast;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::ExecutiveConfiguration;
pub use detachable::DetachableEvent;
pub use error::{ExecutiveError, ExecutiveResult, HandlerError, HandlerResult};
pub use event::{
    CallbackId, EventHandler, EventInfo, EventKey, EventRequest, ExecEventType, Payload, TargetId,
    payload, payload_ref,
};
pub use executive::{ExecState, Executive, ExecutiveId, ExecutiveKind, create_executive};
pub use fast::FastExecutive;
pub use full::{FullExecutive, WeakFullExecutive};
pub use notify::{
    Notification, NotificationHandler, NotificationKind, SubscriptionId, notification_handler,
};
pub use queue::OrderKey;
pub use remover::EventRemover;
pub use synchronizer::{SynchChannel, Synchronizer};
