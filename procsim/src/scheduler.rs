use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::EventId;

/// Priority of a scheduled event. Events occurring at the same time are processed in order of
/// their priority: all urgent events before any normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Used for process initialization and interrupts.
    Urgent,
    /// Used by everything else.
    Normal,
}

/// Entry type stored in the scheduler, including the event ID, the time when it is supposed to
/// occur, its priority, and a sequence number recording the insertion order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventEntry {
    pub(crate) time: OrderedFloat<f64>,
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
    pub(crate) event: EventId,
}

impl EventEntry {
    fn key(&self) -> (OrderedFloat<f64>, Priority, u64) {
        (self.time, self.priority, self.sequence)
    }
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EventEntry {}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    /// Reversed, so that the max-heap pops the earliest entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Scheduler is used to keep the current time and information about the upcoming events.
pub(crate) struct Scheduler {
    events: BinaryHeap<EventEntry>,
    sequence: u64,
    time: f64,
}

impl Scheduler {
    pub(crate) fn new(time: f64) -> Self {
        Self {
            events: BinaryHeap::new(),
            sequence: 0,
            time,
        }
    }

    /// Schedules `event` to be processed at `self.time() + delay`, returning the sequence number
    /// of the new entry.
    pub(crate) fn schedule(&mut self, event: EventId, priority: Priority, delay: f64) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        self.events.push(EventEntry {
            time: OrderedFloat(self.time + delay),
            priority,
            sequence,
            event,
        });
        sequence
    }

    /// Returns the next scheduled entry without removing it. The entry may be stale.
    pub(crate) fn head(&self) -> Option<EventEntry> {
        self.events.peek().copied()
    }

    /// Removes and returns the next scheduled entry or `None` if none are left.
    /// It does not move the clock: some entries may turn out to be stale.
    pub(crate) fn pop(&mut self) -> Option<EventEntry> {
        self.events.pop()
    }

    /// Returns the current simulation time.
    pub(crate) fn time(&self) -> f64 {
        self.time
    }

    /// Moves the clock to `time`.
    pub(crate) fn advance(&mut self, time: f64) {
        debug_assert!(time >= self.time, "time cannot go backwards");
        self.time = time;
    }

    /// Returns the number of entries in the queue, including stale ones.
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}
