//! Binary min-heap keyed on event time.
//!
//! Indices are 1-based: the children of node `i` are `2i` and `2i + 1`, its
//! parent is `i / 2`. Node `i` lives at `events[i - 1]`. The backing storage
//! doubles when full.
//!
//! Ties between equal times are broken by heap position, so the dispatch
//! order among them is consistent for a given request sequence but is not
//! insertion order.

use std::time::Duration;

use crate::event::{EventHandler, EventInfo};

pub(crate) struct FastEvent {
    pub(crate) info: EventInfo,
    pub(crate) handler: EventHandler,
}

impl FastEvent {
    fn when(&self) -> Duration {
        self.info.when
    }
}

pub(crate) struct EventHeap {
    events: Vec<FastEvent>,
}

impl EventHeap {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity.max(1)),
        }
    }

    fn when(&self, node: usize) -> Duration {
        self.events[node - 1].when()
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.events.swap(a - 1, b - 1);
    }

    pub(crate) fn insert(&mut self, event: FastEvent) {
        if self.events.len() == self.events.capacity() {
            let grow = self.events.capacity().max(1);
            self.events.reserve_exact(grow);
        }
        self.events.push(event);
        self.sift_up(self.events.len());
    }

    pub(crate) fn extract_min(&mut self) -> Option<FastEvent> {
        if self.events.is_empty() {
            return None;
        }
        let last = self.events.len();
        self.swap(1, last);
        let min = self.events.pop();
        self.sift_down(1);
        min
    }

    pub(crate) fn peek_min(&self) -> Option<&FastEvent> {
        self.events.first()
    }

    fn sift_up(&mut self, mut node: usize) {
        while node > 1 {
            let parent = node / 2;
            if self.when(node) < self.when(parent) {
                self.swap(node, parent);
                node = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut node: usize) {
        let len = self.events.len();
        loop {
            let left = 2 * node;
            if left > len {
                break;
            }
            let right = left + 1;
            let smallest = if right <= len && self.when(right) < self.when(left) {
                right
            } else {
                left
            };
            if self.when(smallest) < self.when(node) {
                self.swap(node, smallest);
                node = smallest;
            } else {
                break;
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &FastEvent> {
        self.events.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.events.capacity()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }
}
