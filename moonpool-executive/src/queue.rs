//! Priority-ordered event queue for the full-featured executive.
//!
//! Events are held in an ordered map keyed by [`OrderKey`], which gives
//! earliest-first extraction plus removal of arbitrary events by filter.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use crate::event::{Event, EventInfo, EventKey};

/// Dispatch-order position of an event.
///
/// `A` precedes `B` iff `A.when < B.when`, or the times are equal and
/// `A.priority > B.priority`, or both are equal and `A.key < B.key`.
#[derive(Debug, Clone, Copy)]
pub struct OrderKey {
    /// Scheduled time.
    pub when: Duration,
    /// Priority; higher first at a tied time.
    pub priority: f64,
    /// Insertion key; lower first when time and priority tie.
    pub key: EventKey,
}

impl OrderKey {
    pub(crate) fn of(info: &EventInfo) -> Self {
        Self {
            when: info.when,
            priority: info.priority,
            key: info.key,
        }
    }
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.when
            .cmp(&other.when)
            // Higher priority sorts first, so compare reversed
            .then_with(|| other.priority.total_cmp(&self.priority))
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Pending events in dispatch order.
#[derive(Default)]
pub(crate) struct EventQueue {
    events: BTreeMap<OrderKey, Event>,
    index: HashMap<EventKey, OrderKey>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, event: Event) {
        let order = OrderKey::of(&event.info);
        self.index.insert(order.key, order);
        self.events.insert(order, event);
    }

    pub(crate) fn peek_earliest(&self) -> Option<&Event> {
        self.events.values().next()
    }

    pub(crate) fn remove_earliest(&mut self) -> Option<Event> {
        let (_, event) = self.events.pop_first()?;
        self.index.remove(&event.key());
        Some(event)
    }

    pub(crate) fn get(&self, key: EventKey) -> Option<&Event> {
        self.index.get(&key).and_then(|order| self.events.get(order))
    }

    pub(crate) fn contains(&self, key: EventKey) -> bool {
        self.index.contains_key(&key)
    }

    pub(crate) fn remove(&mut self, key: EventKey) -> Option<Event> {
        let order = self.index.remove(&key)?;
        self.events.remove(&order)
    }

    /// Removes every event matching `filter`, returning the removed keys.
    pub(crate) fn remove_where<F>(&mut self, mut filter: F) -> Vec<EventKey>
    where
        F: FnMut(&EventInfo) -> bool,
    {
        let doomed: Vec<OrderKey> = self
            .events
            .iter()
            .filter(|(_, event)| filter(&event.info))
            .map(|(order, _)| *order)
            .collect();
        for order in &doomed {
            self.events.remove(order);
            self.index.remove(&order.key);
        }
        doomed.into_iter().map(|order| order.key).collect()
    }

    /// Counts pending events as `(daemon, non_daemon)` by full rescan.
    pub(crate) fn count_by_daemon(&self) -> (usize, usize) {
        let daemon = self.events.values().filter(|e| e.info.is_daemon).count();
        (daemon, self.events.len() - daemon)
    }

    pub(crate) fn infos(&self) -> Vec<EventInfo> {
        self.events.values().map(|e| e.info.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
        self.index.clear();
    }
}
