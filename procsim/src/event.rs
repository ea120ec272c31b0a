use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use derive_more::{Display, From, Into};

use crate::condition::ConditionId;
use crate::{Environment, Error, ProcessId};

/// Type-erased value of a successful event.
pub(crate) type Value = Rc<dyn Any>;

/// Result of a triggered event.
pub(crate) type Outcome = Result<Value, Error>;

/// Identifies an event within its environment.
#[derive(From, Into, Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash, Display)]
#[display(fmt = "event#{}", _0)]
pub struct EventId(usize);

impl EventId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

pub(crate) enum EventState {
    Pending,
    Triggered(Outcome),
    Processed(Outcome),
}

impl EventState {
    pub(crate) fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::Pending => None,
            Self::Triggered(outcome) | Self::Processed(outcome) => Some(outcome),
        }
    }

    pub(crate) fn failure(&self) -> Option<&Error> {
        self.outcome().and_then(|outcome| outcome.as_ref().err())
    }
}

/// Reaction to an event being processed.
pub(crate) enum Callback {
    /// Resume a process waiting for the event.
    Resume(ProcessId),
    /// Throw the failure of the event into a process.
    Interrupt(ProcessId),
    /// Update the bookkeeping of a condition the event is part of.
    Condition(ConditionId),
    /// Arbitrary observer, e.g., a resource re-scanning its queues.
    Observer(Box<dyn FnOnce(&Environment, EventId)>),
}

pub(crate) struct EventSlot {
    pub(crate) state: EventState,
    pub(crate) callbacks: Vec<Callback>,
    /// Failure was handled by someone, so it should not abort the simulation.
    pub(crate) defused: bool,
    /// Sequence number of the live scheduler entry, if any.
    pub(crate) scheduled: Option<u64>,
    /// Set if the event is the outcome of a condition.
    pub(crate) condition: Option<ConditionId>,
}

impl EventSlot {
    pub(crate) fn new(state: EventState) -> Self {
        Self {
            state,
            callbacks: Vec::new(),
            defused: false,
            scheduled: None,
            condition: None,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.state, EventState::Pending)
    }

    pub(crate) fn is_processed(&self) -> bool {
        matches!(self.state, EventState::Processed(_))
    }
}

/// Anything backed by a simulation event: plain events, processes, conditions, resource
/// requests. Used to compose conditions out of events of different value types.
pub trait Waitable {
    /// ID of the underlying event.
    fn event_id(&self) -> EventId;
}

impl Waitable for EventId {
    fn event_id(&self) -> EventId {
        *self
    }
}

impl<W: Waitable + ?Sized> Waitable for &W {
    fn event_id(&self) -> EventId {
        (**self).event_id()
    }
}

/// A handle to an event whose successful value is of type `T`.
///
/// Events start pending. Once triggered with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail), they are scheduled for processing at the current simulation time, and
/// their outcome never changes. When an event is processed, all processes waiting for it are
/// resumed.
///
/// Events are awaited from within processes:
///
/// ```
/// # use procsim::{Environment, Error};
/// let env = Environment::new();
/// let event = env.event::<&str>();
/// let waiter = env.process({
///     let event = event.clone();
///     async move { event.await }
/// });
/// event.succeed("done")?;
/// assert_eq!(env.run_until_event(&waiter)?, "done");
/// # Ok::<(), Error>(())
/// ```
pub struct Event<T> {
    env: Environment,
    id: EventId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Event").field(&self.id).finish()
    }
}

impl<T> Waitable for Event<T> {
    fn event_id(&self) -> EventId {
        self.id
    }
}

impl<T> Event<T> {
    pub(crate) fn new(env: Environment, id: EventId) -> Self {
        Self {
            env,
            id,
            _marker: PhantomData,
        }
    }

    /// ID of this event.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Environment this event belongs to.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Checks if the event has been triggered, i.e., it has an outcome.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.env.is_triggered(self.id)
    }

    /// Checks if the event has been processed, i.e., its callbacks have been invoked.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.env.is_processed(self.id)
    }

    /// Returns `Some(true)` if the event succeeded, `Some(false)` if it failed, or `None` if it
    /// has not been triggered yet.
    #[must_use]
    pub fn is_ok(&self) -> Option<bool> {
        self.env.with_slot(self.id, |slot| {
            slot.state.outcome().map(Result::is_ok)
        })
    }

    /// Registers `callback` to be invoked once the event is processed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyProcessed`] if the event has been processed.
    pub fn add_callback<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnOnce(&Environment, EventId) + 'static,
    {
        self.env.add_callback(self.id, Callback::Observer(Box::new(callback)))
    }

    /// Marks the failure of this event as handled, so that it does not abort the simulation
    /// even if nobody waits for it.
    pub fn defuse(&self) {
        self.env.defuse(self.id);
    }

    /// Fails the event with `error`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyTriggered`] if the event has been triggered before.
    pub fn fail(&self, error: Error) -> Result<(), Error> {
        self.env.trigger(self.id, Err(error))
    }
}

impl<T: 'static> Event<T> {
    /// Triggers the event successfully with `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyTriggered`] if the event has been triggered before.
    pub fn succeed(&self, value: T) -> Result<(), Error> {
        self.env.trigger(self.id, Ok(Rc::new(value)))
    }
}

impl<T: Clone + 'static> Event<T> {
    /// Returns the outcome of the event, or `None` if it is still pending.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<T, Error>> {
        self.env.with_slot(self.id, |slot| {
            slot.state
                .outcome()
                .map(|outcome| outcome.clone().map(|value| downcast(&value)))
        })
    }

    /// Returns the value of a successful event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTriggered`] if the event is still pending, or the failure of the
    /// event if it failed.
    pub fn value(&self) -> Result<T, Error> {
        self.outcome().unwrap_or(Err(Error::NotTriggered(self.id)))
    }
}

pub(crate) fn downcast<T: Clone + 'static>(value: &Value) -> T {
    value
        .downcast_ref::<T>()
        .cloned()
        .expect("value type is fixed by the event handle")
}

/// Future resolving once the event has been processed.
///
/// Can be polled only by a process: the process is suspended until the event is processed, and
/// it is resumed with its outcome.
pub struct EventFuture<T> {
    event: Event<T>,
}

impl<T> fmt::Debug for EventFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventFuture").field(&self.event.id).finish()
    }
}

impl<T: Clone + 'static> Future for EventFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.event
            .env
            .poll_event(self.event.id)
            .map(|outcome| outcome.map(|value| downcast(&value)))
    }
}

impl<T: Clone + 'static> IntoFuture for Event<T> {
    type Output = Result<T, Error>;
    type IntoFuture = EventFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        EventFuture { event: self }
    }
}

impl<T: Clone + 'static> IntoFuture for &Event<T> {
    type Output = Result<T, Error>;
    type IntoFuture = EventFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        EventFuture {
            event: self.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trigger_once() {
        let env = Environment::new();
        let event = env.event::<u32>();
        assert!(!event.is_triggered());
        assert_eq!(event.is_ok(), None);
        assert_eq!(event.value(), Err(Error::NotTriggered(event.id())));

        event.succeed(7).unwrap();
        assert!(event.is_triggered());
        assert!(!event.is_processed());
        assert_eq!(event.value(), Ok(7));
        assert_eq!(event.succeed(8), Err(Error::AlreadyTriggered(event.id())));
        assert_eq!(
            event.fail(Error::failed("late")),
            Err(Error::AlreadyTriggered(event.id()))
        );

        env.step().unwrap();
        assert!(event.is_processed());
        assert_eq!(event.value(), Ok(7));
    }

    #[test]
    fn test_callbacks_invoked_once_in_order() {
        let env = Environment::new();
        let event = env.event::<()>();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        for n in 0..3 {
            let seen = Rc::clone(&seen);
            event
                .add_callback(move |env, id| seen.borrow_mut().push((n, id, env.now())))
                .unwrap();
        }
        event.succeed(()).unwrap();
        env.run().unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![(0, event.id(), 0.0), (1, event.id(), 0.0), (2, event.id(), 0.0)]
        );
        assert_eq!(
            event.add_callback(|_, _| {}),
            Err(Error::AlreadyProcessed(event.id()))
        );
    }

    #[test]
    fn test_callback_added_during_dispatch_is_not_invoked() {
        let env = Environment::new();
        let event = env.event::<()>();
        let invoked = Rc::new(std::cell::Cell::new(0));
        let inner = event.clone();
        let counter = Rc::clone(&invoked);
        event
            .add_callback(move |_, _| {
                counter.set(counter.get() + 1);
                let late = Rc::clone(&counter);
                assert!(inner
                    .add_callback(move |_, _| late.set(late.get() + 10))
                    .is_err());
            })
            .unwrap();
        event.succeed(()).unwrap();
        env.run().unwrap();
        assert_eq!(invoked.get(), 1);
    }

    #[test]
    fn test_unhandled_failure_aborts_step() {
        let env = Environment::new();
        let event = env.event::<()>();
        event.fail(Error::failed("boom")).unwrap();
        assert_eq!(event.value(), Err(Error::failed("boom")));
        assert_eq!(env.step(), Err(Error::failed("boom")));
    }

    #[test]
    fn test_defused_failure_does_not_abort() {
        let env = Environment::new();
        let event = env.event::<()>();
        event.fail(Error::failed("boom")).unwrap();
        event.defuse();
        assert_eq!(env.step(), Ok(()));
        assert_eq!(event.is_ok(), Some(false));
    }
}
