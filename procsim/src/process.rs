use std::fmt;
use std::future::{Future, IntoFuture};
use std::ops::Deref;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use derive_more::{Display, From, Into};

use crate::environment::Kernel;
use crate::event::{Callback, EventState, Outcome, Value};
use crate::{Cause, Environment, Error, Event, EventFuture, EventId, Interrupt, Priority, Waitable};

/// Identifies a process within its environment.
#[derive(From, Into, Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash, Display)]
#[display(fmt = "process#{}", _0)]
pub struct ProcessId(usize);

pub(crate) type ProcessFuture = Pin<Box<dyn Future<Output = Outcome>>>;

pub(crate) struct ProcessSlot {
    /// Event triggered when the process terminates.
    pub(crate) event: EventId,
    /// `None` while the process is being resumed, and after it terminated.
    pub(crate) future: Option<ProcessFuture>,
    /// Event the process is waiting for.
    pub(crate) target: Option<EventId>,
    /// Error to throw at the next suspension point.
    pub(crate) interrupt: Option<Error>,
    pub(crate) alive: bool,
}

impl Kernel {
    pub(crate) fn process(&self, process: ProcessId) -> &ProcessSlot {
        &self.processes[usize::from(process)]
    }

    pub(crate) fn process_mut(&mut self, process: ProcessId) -> &mut ProcessSlot {
        &mut self.processes[usize::from(process)]
    }
}

/// A handle to a running process, which is also an event triggered when the process terminates.
///
/// The event succeeds with the value returned by the process, or fails with the error it
/// returned. Either way, it can be awaited by other processes.
pub struct Process<T> {
    event: Event<T>,
    id: ProcessId,
}

impl<T> Clone for Process<T> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            id: self.id,
        }
    }
}

impl<T> fmt::Debug for Process<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("event", &self.event.id())
            .finish()
    }
}

impl<T> Deref for Process<T> {
    type Target = Event<T>;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl<T> Waitable for Process<T> {
    fn event_id(&self) -> EventId {
        self.event.id()
    }
}

impl<T> Process<T> {
    /// ID of this process.
    #[must_use]
    pub fn pid(&self) -> ProcessId {
        self.id
    }

    /// Checks if the process has not terminated yet.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.event.env().kernel.borrow().process(self.id).alive
    }

    /// The event the process is currently waiting for.
    #[must_use]
    pub fn target(&self) -> Option<EventId> {
        self.event.env().kernel.borrow().process(self.id).target
    }

    /// Interrupts the process with the given `cause`.
    ///
    /// The interrupt is delivered with urgent priority at the current simulation time: the
    /// event the process was waiting for is thrown away, and the process is resumed with
    /// [`Error::Interrupt`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadProcess`] if the process has terminated, or
    /// [`Error::SelfInterrupt`] if called from within the process itself.
    pub fn interrupt<C: Into<Cause>>(&self, cause: C) -> Result<(), Error> {
        self.event.env().interrupt(self.id, cause.into())
    }
}

impl<T: Clone + 'static> IntoFuture for Process<T> {
    type Output = Result<T, Error>;
    type IntoFuture = EventFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.event.into_future()
    }
}

impl<T: Clone + 'static> IntoFuture for &Process<T> {
    type Output = Result<T, Error>;
    type IntoFuture = EventFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        (&self.event).into_future()
    }
}

impl Environment {
    /// Starts a new process executing `future`.
    ///
    /// The process starts at the current simulation time, once the kernel processes its
    /// initialization event. From then on, each time it awaits an [`Event`], it is suspended
    /// until the event is processed.
    ///
    /// ```
    /// # use procsim::{Environment, Error};
    /// let env = Environment::new();
    /// let clock = env.process({
    ///     let env = env.clone();
    ///     async move {
    ///         let mut ticks = Vec::new();
    ///         for _ in 0..3 {
    ///             env.timeout(1.5)?.await?;
    ///             ticks.push(env.now());
    ///         }
    ///         Ok(ticks)
    ///     }
    /// });
    /// assert_eq!(env.run_until_event(&clock)?, vec![1.5, 3.0, 4.5]);
    /// # Ok::<(), Error>(())
    /// ```
    pub fn process<T, F>(&self, future: F) -> Process<T>
    where
        T: 'static,
        F: Future<Output = Result<T, Error>> + 'static,
    {
        let future: ProcessFuture =
            Box::pin(async move { future.await.map(|value| -> Value { Rc::new(value) }) });
        let mut kernel = self.kernel.borrow_mut();
        let event = kernel.new_event(EventState::Pending);
        let process = ProcessId::from(kernel.processes.len());
        let init = kernel.new_event(EventState::Triggered(Ok(Rc::new(()))));
        kernel.slot_mut(init).callbacks.push(Callback::Resume(process));
        kernel.schedule(init, Priority::Urgent, 0.0);
        kernel.processes.push(ProcessSlot {
            event,
            future: Some(future),
            target: Some(init),
            interrupt: None,
            alive: true,
        });
        log::debug!("[{}] Started {}", kernel.scheduler.time(), process);
        drop(kernel);
        Process {
            event: Event::new(self.clone(), event),
            id: process,
        }
    }

    /// Resumes `process` until it awaits an event that has not been processed, or terminates.
    pub(crate) fn resume(&self, process: ProcessId) -> Result<(), Error> {
        let mut future = {
            let mut kernel = self.kernel.borrow_mut();
            let slot = kernel.process_mut(process);
            slot.target = None;
            let future = match slot.future.take() {
                Some(future) => future,
                None if slot.alive => return Err(Error::ProcessRunning(process)),
                None => return Ok(()),
            };
            kernel.active_process = Some(process);
            future
        };
        let waker = futures::task::noop_waker();
        let poll = future.as_mut().poll(&mut Context::from_waker(&waker));
        let mut kernel = self.kernel.borrow_mut();
        kernel.active_process = None;
        match poll {
            Poll::Ready(outcome) => {
                let time = kernel.scheduler.time();
                let slot = kernel.process_mut(process);
                slot.alive = false;
                slot.interrupt = None;
                let event = slot.event;
                match &outcome {
                    Ok(_) => log::debug!("[{}] {} finished", time, process),
                    Err(err) => log::debug!("[{}] {} failed: {}", time, process, err),
                }
                // Locals of the process, such as request guards, go out of scope before
                // anyone waiting for the process hears about it.
                drop(kernel);
                drop(future);
                self.kernel
                    .borrow_mut()
                    .trigger(event, outcome, Priority::Normal)
            }
            Poll::Pending => {
                let slot = kernel.process_mut(process);
                slot.future = Some(future);
                if slot.target.is_none() {
                    return Err(Error::InvalidYield(process));
                }
                Ok(())
            }
        }
    }

    /// Schedules an interrupt of `process`.
    pub(crate) fn interrupt(&self, process: ProcessId, cause: Cause) -> Result<(), Error> {
        let mut kernel = self.kernel.borrow_mut();
        if !kernel.process(process).alive {
            return Err(Error::DeadProcess(process));
        }
        if kernel.active_process == Some(process) {
            return Err(Error::SelfInterrupt(process));
        }
        log::debug!(
            "[{}] Interrupting {} ({})",
            kernel.scheduler.time(),
            process,
            cause
        );
        let failure = Error::Interrupt(Interrupt { process, cause });
        let event = kernel.new_event(EventState::Triggered(Err(failure)));
        let slot = kernel.slot_mut(event);
        slot.defused = true;
        slot.callbacks.push(Callback::Interrupt(process));
        kernel.schedule(event, Priority::Urgent, 0.0);
        Ok(())
    }

    /// Throws the failure of `event` into `process`, unless it terminated in the meantime.
    pub(crate) fn deliver_interrupt(&self, event: EventId, process: ProcessId) -> Result<(), Error> {
        {
            let mut kernel = self.kernel.borrow_mut();
            if !kernel.process(process).alive {
                log::trace!("Dropping interrupt of terminated {}", process);
                return Ok(());
            }
            let failure = match kernel.slot(event).state.failure() {
                Some(failure) => failure.clone(),
                None => return Ok(()),
            };
            if let Some(target) = kernel.process_mut(process).target.take() {
                kernel
                    .slot_mut(target)
                    .callbacks
                    .retain(|callback| !matches!(callback, Callback::Resume(p) if *p == process));
            }
            kernel.process_mut(process).interrupt = Some(failure);
        }
        self.resume(process)
    }
}
