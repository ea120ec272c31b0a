use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;

use crate::condition::ConditionSlot;
use crate::event::{Callback, EventSlot, EventState, Outcome};
use crate::process::ProcessSlot;
use crate::scheduler::{EventEntry, Scheduler};
use crate::{Config, Error, Event, EventId, Priority, ProcessId, Waitable};

/// All simulation state shared by the handles of one environment.
pub(crate) struct Kernel {
    pub(crate) scheduler: Scheduler,
    pub(crate) events: Vec<EventSlot>,
    pub(crate) processes: Vec<ProcessSlot>,
    pub(crate) conditions: Vec<ConditionSlot>,
    pub(crate) active_process: Option<ProcessId>,
}

impl Kernel {
    fn new(initial_time: f64) -> Self {
        Self {
            scheduler: Scheduler::new(initial_time),
            events: Vec::new(),
            processes: Vec::new(),
            conditions: Vec::new(),
            active_process: None,
        }
    }

    pub(crate) fn new_event(&mut self, state: EventState) -> EventId {
        let id = EventId::from(self.events.len());
        self.events.push(EventSlot::new(state));
        id
    }

    pub(crate) fn slot(&self, id: EventId) -> &EventSlot {
        &self.events[id.index()]
    }

    pub(crate) fn slot_mut(&mut self, id: EventId) -> &mut EventSlot {
        &mut self.events[id.index()]
    }

    /// Inserts `event` into the schedule. A previous entry of the same event becomes stale.
    pub(crate) fn schedule(&mut self, event: EventId, priority: Priority, delay: f64) {
        let sequence = self.scheduler.schedule(event, priority, delay);
        log::trace!(
            "[{}] Scheduled {} at {} ({:?})",
            self.scheduler.time(),
            event,
            self.scheduler.time() + delay,
            priority
        );
        self.slot_mut(event).scheduled = Some(sequence);
    }

    /// Sets the outcome of a pending event and schedules it for processing right away.
    pub(crate) fn trigger(
        &mut self,
        event: EventId,
        outcome: Outcome,
        priority: Priority,
    ) -> Result<(), Error> {
        let slot = self.slot_mut(event);
        if !slot.is_pending() {
            return Err(Error::AlreadyTriggered(event));
        }
        slot.state = EventState::Triggered(outcome);
        self.schedule(event, priority, 0.0);
        Ok(())
    }

    fn is_live(&self, entry: &EventEntry) -> bool {
        self.events[entry.event.index()].scheduled == Some(entry.sequence)
    }

    /// Returns the time of the next live entry, discarding stale entries at the head.
    fn peek(&mut self) -> f64 {
        while let Some(entry) = self.scheduler.head() {
            if self.is_live(&entry) {
                return entry.time.into_inner();
            }
            log::trace!("Discarding stale entry of {}", entry.event);
            self.scheduler.pop();
        }
        f64::INFINITY
    }

    /// Pops the next live entry, moves the clock, and marks the event as processed,
    /// handing out its callbacks.
    fn pop(&mut self) -> Result<(EventId, Vec<Callback>), Error> {
        loop {
            let entry = self.scheduler.pop().ok_or(Error::EmptySchedule)?;
            if !self.is_live(&entry) {
                log::trace!("Discarding stale entry of {}", entry.event);
                continue;
            }
            let slot = &mut self.events[entry.event.index()];
            slot.scheduled = None;
            slot.state = match std::mem::replace(&mut slot.state, EventState::Pending) {
                EventState::Triggered(outcome) => EventState::Processed(outcome),
                state => state,
            };
            let callbacks = std::mem::take(&mut slot.callbacks);
            self.scheduler.advance(entry.time.into_inner());
            log::trace!(
                "[{}] Processing {} with {} callback(s)",
                self.scheduler.time(),
                entry.event,
                callbacks.len()
            );
            return Ok((entry.event, callbacks));
        }
    }
}

/// Execution environment of a simulation.
///
/// The environment owns the simulation clock, the schedule of upcoming events, and the state of
/// all events, processes, and conditions. It is a cheap handle: clones refer to the same
/// simulation, which lets processes capture their own copy.
///
/// All the simulation runs in a single thread. Events scheduled for the same time are processed
/// in order of priority, and then in the order they were scheduled, so the same inputs always
/// produce the same run.
#[derive(Clone)]
pub struct Environment {
    pub(crate) kernel: Rc<RefCell<Kernel>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kernel = self.kernel.borrow();
        f.debug_struct("Environment")
            .field("now", &kernel.scheduler.time())
            .field("scheduled", &kernel.scheduler.len())
            .field("events", &kernel.events.len())
            .field("processes", &kernel.processes.len())
            .finish()
    }
}

impl Environment {
    /// Constructs an environment starting at time 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial_time(0.0)
    }

    /// Constructs an environment whose clock starts at `initial_time`.
    #[must_use]
    pub fn with_initial_time(initial_time: f64) -> Self {
        Self {
            kernel: Rc::new(RefCell::new(Kernel::new(initial_time))),
        }
    }

    /// Constructs an environment from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::with_initial_time(config.initial_time)
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.kernel.borrow().scheduler.time()
    }

    /// Returns the time of the next scheduled event, or infinity if none are scheduled.
    #[must_use]
    pub fn peek(&self) -> f64 {
        self.kernel.borrow_mut().peek()
    }

    /// Returns the process that is currently being executed, if any.
    #[must_use]
    pub fn active_process(&self) -> Option<ProcessId> {
        self.kernel.borrow().active_process
    }

    /// Creates a new pending event, to be triggered manually.
    #[must_use]
    pub fn event<T>(&self) -> Event<T> {
        let id = self.kernel.borrow_mut().new_event(EventState::Pending);
        Event::new(self.clone(), id)
    }

    /// Creates an event that succeeds after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeDelay`] if `delay` is negative or NaN.
    pub fn timeout(&self, delay: f64) -> Result<Event<()>, Error> {
        self.timeout_with(delay, ())
    }

    /// Creates an event that succeeds with `value` after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeDelay`] if `delay` is negative or NaN.
    pub fn timeout_with<T: 'static>(&self, delay: f64, value: T) -> Result<Event<T>, Error> {
        if delay.is_nan() || delay < 0.0 {
            return Err(Error::NegativeDelay(delay));
        }
        let mut kernel = self.kernel.borrow_mut();
        let id = kernel.new_event(EventState::Triggered(Ok(Rc::new(value))));
        kernel.schedule(id, Priority::Normal, delay);
        drop(kernel);
        Ok(Event::new(self.clone(), id))
    }

    /// Schedules an already triggered `event` to be processed after `delay` with the given
    /// `priority`. If the event was already scheduled, the previous entry is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTriggered`] if the event is pending, [`Error::AlreadyProcessed`] if it
    /// was processed, and [`Error::NegativeDelay`] if `delay` is negative or NaN.
    pub fn schedule<W: Waitable>(
        &self,
        event: &W,
        priority: Priority,
        delay: f64,
    ) -> Result<(), Error> {
        let id = event.event_id();
        if delay.is_nan() || delay < 0.0 {
            return Err(Error::NegativeDelay(delay));
        }
        let mut kernel = self.kernel.borrow_mut();
        match kernel.slot(id).state {
            EventState::Pending => Err(Error::NotTriggered(id)),
            EventState::Processed(_) => Err(Error::AlreadyProcessed(id)),
            EventState::Triggered(_) => {
                kernel.schedule(id, priority, delay);
                Ok(())
            }
        }
    }

    /// Processes the next scheduled event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySchedule`] if no events are scheduled. If the processed event failed
    /// and nobody handled the failure, the failure is returned. Protocol errors detected while
    /// resuming processes are returned as well.
    pub fn step(&self) -> Result<(), Error> {
        let (event, callbacks) = self.kernel.borrow_mut().pop()?;
        for callback in callbacks {
            self.dispatch(event, callback)?;
        }
        let kernel = self.kernel.borrow();
        let slot = kernel.slot(event);
        match slot.state.failure() {
            Some(failure) if !slot.defused => {
                log::debug!("Unhandled failure of {}: {}", event, failure);
                Err(failure.clone())
            }
            _ => Ok(()),
        }
    }

    fn dispatch(&self, event: EventId, callback: Callback) -> Result<(), Error> {
        match callback {
            Callback::Resume(process) => {
                self.defuse(event);
                self.resume(process)
            }
            Callback::Interrupt(process) => self.deliver_interrupt(event, process),
            Callback::Condition(condition) => {
                self.kernel.borrow_mut().check_condition(condition, event);
                Ok(())
            }
            Callback::Observer(observer) => {
                observer(self, event);
                Ok(())
            }
        }
    }

    /// Runs until no events are left.
    ///
    /// # Errors
    ///
    /// Returns the first error returned by [`step`](Self::step), other than the schedule
    /// running empty.
    pub fn run(&self) -> Result<(), Error> {
        loop {
            match self.step() {
                Ok(()) => {}
                Err(Error::EmptySchedule) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Processes all events scheduled before `until`, and moves the clock to `until`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUntil`] if `until` is not later than the current time, or the
    /// first error returned by [`step`](Self::step).
    pub fn run_until(&self, until: f64) -> Result<(), Error> {
        let now = self.now();
        if until.is_nan() || until <= now {
            return Err(Error::InvalidUntil { until, now });
        }
        while self.peek() < until {
            self.step()?;
        }
        self.kernel.borrow_mut().scheduler.advance(until);
        Ok(())
    }

    /// Runs until `event` is processed, and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UntilNotTriggered`] if no events are left before `event` is processed,
    /// the failure of `event` if it failed, or the first error returned by
    /// [`step`](Self::step).
    pub fn run_until_event<T: Clone + 'static>(&self, event: &Event<T>) -> Result<T, Error> {
        while !event.is_processed() {
            match self.step() {
                Ok(()) => {}
                Err(Error::EmptySchedule) => return Err(Error::UntilNotTriggered(event.id())),
                Err(err) => return Err(err),
            }
        }
        event.value()
    }

    pub(crate) fn with_slot<R, F: FnOnce(&EventSlot) -> R>(&self, event: EventId, f: F) -> R {
        f(self.kernel.borrow().slot(event))
    }

    pub(crate) fn is_triggered(&self, event: EventId) -> bool {
        self.with_slot(event, |slot| !slot.is_pending())
    }

    pub(crate) fn is_processed(&self, event: EventId) -> bool {
        self.with_slot(event, EventSlot::is_processed)
    }

    pub(crate) fn defuse(&self, event: EventId) {
        let mut kernel = self.kernel.borrow_mut();
        let slot = kernel.slot_mut(event);
        if slot.state.failure().is_some() {
            slot.defused = true;
        }
    }

    pub(crate) fn add_callback(&self, event: EventId, callback: Callback) -> Result<(), Error> {
        let mut kernel = self.kernel.borrow_mut();
        let slot = kernel.slot_mut(event);
        if slot.is_processed() {
            return Err(Error::AlreadyProcessed(event));
        }
        slot.callbacks.push(callback);
        Ok(())
    }

    pub(crate) fn trigger(&self, event: EventId, outcome: Outcome) -> Result<(), Error> {
        self.kernel
            .borrow_mut()
            .trigger(event, outcome, Priority::Normal)
    }

    /// Succeeds a pending event that is internal to a resource. No-op if it was triggered.
    pub(crate) fn grant<T: 'static>(&self, event: EventId, value: T) {
        let mut kernel = self.kernel.borrow_mut();
        if kernel.slot(event).is_pending() {
            let _ = kernel.trigger(event, Ok(Rc::new(value)), Priority::Normal);
        }
    }

    /// Polls `event` on behalf of the active process.
    ///
    /// If the event has been processed, its outcome is returned. Otherwise, the active process
    /// is registered to be resumed once it is processed.
    pub(crate) fn poll_event(&self, event: EventId) -> Poll<Outcome> {
        let mut kernel = self.kernel.borrow_mut();
        let process = match kernel.active_process {
            Some(process) => process,
            None => return Poll::Ready(Err(Error::NoActiveProcess)),
        };
        if let Some(interrupt) = kernel.process_mut(process).interrupt.take() {
            return Poll::Ready(Err(interrupt));
        }
        let target = kernel.process(process).target;
        let slot = kernel.slot_mut(event);
        if let EventState::Processed(outcome) = &slot.state {
            let outcome = outcome.clone();
            if outcome.is_err() {
                slot.defused = true;
            }
            return Poll::Ready(outcome);
        }
        match target {
            Some(target) if target == event => Poll::Pending,
            Some(target) => Poll::Ready(Err(Error::AlreadyWaiting {
                process,
                event,
                target,
            })),
            None => {
                slot.callbacks.push(Callback::Resume(process));
                kernel.process_mut(process).target = Some(event);
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_schedule() {
        let env = Environment::new();
        assert_eq!(env.peek(), f64::INFINITY);
        assert_eq!(env.step(), Err(Error::EmptySchedule));
        assert_eq!(env.run(), Ok(()));
    }

    #[test]
    fn test_timeout_moves_clock() {
        let env = Environment::with_initial_time(10.0);
        let timeout = env.timeout_with(2.5, "late").unwrap();
        assert!(timeout.is_triggered());
        assert_eq!(env.peek(), 12.5);
        env.step().unwrap();
        assert_eq!(env.now(), 12.5);
        assert!(timeout.is_processed());
        assert_eq!(timeout.value(), Ok("late"));
    }

    #[test]
    fn test_negative_timeout() {
        let env = Environment::new();
        assert_eq!(env.timeout(-1.0).unwrap_err(), Error::NegativeDelay(-1.0));
        assert!(matches!(
            env.timeout(f64::NAN),
            Err(Error::NegativeDelay(_))
        ));
    }

    #[test]
    fn test_run_until() {
        let env = Environment::new();
        let early = env.timeout(1.0).unwrap();
        let boundary = env.timeout(5.0).unwrap();
        env.run_until(5.0).unwrap();
        assert_eq!(env.now(), 5.0);
        assert!(early.is_processed());
        assert!(!boundary.is_processed());
        assert_eq!(
            env.run_until(5.0),
            Err(Error::InvalidUntil {
                until: 5.0,
                now: 5.0
            })
        );
        env.run_until(7.0).unwrap();
        assert!(boundary.is_processed());
        assert_eq!(env.now(), 7.0);
    }

    #[test]
    fn test_run_until_event() {
        let env = Environment::new();
        let first = env.timeout_with(1.0, 1).unwrap();
        let _second = env.timeout_with(2.0, 2).unwrap();
        assert_eq!(env.run_until_event(&first), Ok(1));
        assert_eq!(env.now(), 1.0);
        assert_eq!(env.run_until_event(&first), Ok(1));

        let never = env.event::<()>();
        assert_eq!(
            env.run_until_event(&never),
            Err(Error::UntilNotTriggered(never.id()))
        );
        assert_eq!(env.now(), 2.0);
    }

    #[test]
    fn test_reschedule_discards_stale_entry() {
        let env = Environment::new();
        let timeout = env.timeout(1.0).unwrap();
        env.schedule(&timeout, Priority::Normal, 3.0).unwrap();
        assert_eq!(env.peek(), 3.0);
        env.step().unwrap();
        assert_eq!(env.now(), 3.0);
        assert!(timeout.is_processed());
        assert_eq!(env.step(), Err(Error::EmptySchedule));
        assert_eq!(
            env.schedule(&timeout, Priority::Normal, 0.0),
            Err(Error::AlreadyProcessed(timeout.id()))
        );
        let pending = env.event::<()>();
        assert_eq!(
            env.schedule(&pending, Priority::Urgent, 0.0),
            Err(Error::NotTriggered(pending.id()))
        );
    }

    #[test]
    fn test_run_until_skips_stale_entries() {
        let env = Environment::new();
        let timeout = env.timeout(1.0).unwrap();
        env.schedule(&timeout, Priority::Normal, 10.0).unwrap();
        assert_eq!(env.peek(), 10.0);
        env.run_until(5.0).unwrap();
        assert_eq!(env.now(), 5.0);
        assert!(!timeout.is_processed());
        env.run_until(12.0).unwrap();
        assert!(timeout.is_processed());
        assert_eq!(env.now(), 12.0);
    }

    #[test]
    fn test_config() {
        let config = Config { initial_time: 4.0 };
        assert_eq!(Environment::from_config(&config).now(), 4.0);
    }
}
