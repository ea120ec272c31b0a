#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::must_use_candidate
)]

//! Process-based discrete-event simulation.
//!
//! A simulation runs in an [`Environment`], which keeps a virtual clock and a schedule of
//! [`Event`]s. Simulated activities are [`Process`]es: `async` computations that suspend
//! whenever they await an event, and are resumed once the environment processes that event.
//! Time only moves when the environment jumps to the next scheduled event, so waiting for an
//! hour costs as much as waiting for a microsecond.
//!
//! ```
//! # use procsim::{Environment, Error};
//! let env = Environment::new();
//! let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//! for (name, delay) in [("A", 0.0), ("B", 1.0), ("C", 2.0)] {
//!     let env_ = env.clone();
//!     let log = log.clone();
//!     env.process(async move {
//!         env_.timeout(delay)?.await?;
//!         log.borrow_mut().push((name, env_.now()));
//!         Ok(())
//!     });
//! }
//! env.run()?;
//! assert_eq!(*log.borrow(), vec![("A", 0.0), ("B", 1.0), ("C", 2.0)]);
//! # Ok::<(), Error>(())
//! ```
//!
//! Events can be composed into [`Condition`]s, processes can [`interrupt`](Process::interrupt)
//! one another, and shared resources ([`Resource`], [`Container`], [`Store`], and their
//! variants) let processes queue up for limited capacity.
//!
//! The whole simulation runs in a single thread, and it is fully deterministic: events
//! scheduled for the same time are processed in order of [`Priority`], and then in the order
//! they were scheduled.

pub use condition::{Condition, ConditionKind, ConditionValue, Evaluate};
pub use config::Config;
pub use environment::Environment;
pub use error::{Cause, Error, Interrupt, Preempted};
pub use event::{Event, EventFuture, EventId, Waitable};
pub use process::{Process, ProcessId};
pub use resources::{
    Cancel, Container, FilterStore, GetEvent, PreemptiveResource, PriorityResource, PutEvent,
    Request, Resource, Scoped, Store,
};
pub use scheduler::Priority;

mod condition;
mod config;
mod environment;
mod error;
mod event;
mod process;
mod resources;
mod scheduler;
