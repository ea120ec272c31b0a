//! Utilities shared by the tests of the simulation crates.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

use std::cell::RefCell;
use std::rc::Rc;

pub mod logger;

/// Collects observations made from within simulated processes.
///
/// Clones share the same buffer, so each process can own a clone while the test keeps one to
/// inspect the results once the simulation is over.
///
/// ```
/// # use testing::Recorder;
/// let recorder = Recorder::default();
/// let clone = recorder.clone();
/// clone.record(("A", 0.0));
/// recorder.record(("B", 1.5));
/// assert_eq!(recorder.take(), vec![("A", 0.0), ("B", 1.5)]);
/// assert!(recorder.is_empty());
/// ```
#[derive(Debug)]
pub struct Recorder<T> {
    records: Rc<RefCell<Vec<T>>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            records: Rc::clone(&self.records),
        }
    }
}

impl<T> Recorder<T> {
    /// Appends a record.
    pub fn record(&self, record: T) {
        self.records.borrow_mut().push(record);
    }

    /// Takes out all records made so far.
    pub fn take(&self) -> Vec<T> {
        self.records.borrow_mut().drain(..).collect()
    }

    /// Number of records made since the last [`take`](Self::take).
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    /// Checks if no records were made since the last [`take`](Self::take).
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}
