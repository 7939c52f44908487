//! Rendezvous barrier for detachable events.
//!
//! Each participant takes one [`SynchChannel`] and calls
//! [`SynchChannel::synchronize`] from its detachable handler. Participants
//! stay suspended until every channel issued so far has synchronized; they
//! are then resumed in ascending sequence-key order.
//!
//! A participant that is aborted while waiting reports the failure through
//! its abort handler but does not release the others.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    detachable::DetachableEvent,
    error::{ExecutiveError, ExecutiveResult},
    executive::Executive,
};

#[derive(Default)]
struct SyncState {
    issued: usize,
    arrived: Vec<(i64, DetachableEvent)>,
}

/// Barrier releasing detachable events in sequence-key order.
#[derive(Clone, Default)]
pub struct Synchronizer {
    state: Arc<Mutex<SyncState>>,
}

impl Synchronizer {
    /// Creates a barrier with no participants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a channel for one participant.
    pub fn get_synch_channel(&self, sequence_key: i64) -> SynchChannel {
        self.state.lock().issued += 1;
        SynchChannel {
            sequence_key,
            state: Arc::clone(&self.state),
        }
    }

    /// Number of channels issued.
    pub fn issued(&self) -> usize {
        self.state.lock().issued
    }

    /// Number of participants currently waiting.
    pub fn waiting(&self) -> usize {
        self.state.lock().arrived.len()
    }
}

/// One participant's handle on a [`Synchronizer`]. Usable once.
pub struct SynchChannel {
    sequence_key: i64,
    state: Arc<Mutex<SyncState>>,
}

impl SynchChannel {
    /// Sequence key this channel releases at.
    pub fn sequence_key(&self) -> i64 {
        self.sequence_key
    }

    /// Suspends the calling detachable event until all participants arrive.
    pub fn synchronize(self, exec: &dyn Executive) -> ExecutiveResult<()> {
        let Some(ctrl) = exec
            .current_detachable()
            .filter(|ctrl| ctrl.is_own_context())
        else {
            return Err(ExecutiveError::NotInDetachableContext);
        };

        let sequence_key = self.sequence_key;
        ctrl.set_abort_handler(move |aborted| {
            tracing::error!(
                "Detachable event {} aborted while waiting at synchronizer (sequence {})",
                aborted.key(),
                sequence_key
            );
        });

        let release = {
            let mut state = self.state.lock();
            state.arrived.push((self.sequence_key, ctrl.clone()));
            if state.arrived.len() == state.issued {
                let mut release = std::mem::take(&mut state.arrived);
                release.sort_by_key(|(sequence, _)| *sequence);
                release
            } else {
                Vec::new()
            }
        };

        if !release.is_empty() {
            // Same time and priority, so resumptions dispatch in request order
            let priority = exec.current_priority();
            tracing::debug!("Synchronizer releasing {} participants", release.len());
            for (_, participant) in &release {
                if participant.is_aborted() {
                    continue;
                }
                participant.resume_with_priority(priority)?;
            }
        }

        ctrl.suspend();
        ctrl.clear_abort_handler();
        Ok(())
    }
}
