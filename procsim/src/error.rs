//! Errors raised by the kernel and failures propagated between processes.

use std::fmt;

use crate::{EventId, ProcessId};

/// Any error produced by the simulation.
///
/// The same type serves three purposes: it reports misuse of the API at the offending call
/// (e.g., a negative delay), it reports protocol violations discovered while resuming processes,
/// and it is the failure value carried by failed events. The last one is why it is [`Clone`]:
/// every process waiting for a failed event receives its own copy.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Delay is negative or not a number.
    #[error("negative delay: {0}")]
    NegativeDelay(f64),

    /// Event has been already triggered, and cannot be triggered again.
    #[error("{0} has already been triggered")]
    AlreadyTriggered(EventId),

    /// Event has not been triggered yet, so it has no value.
    #[error("value of {0} is not yet available")]
    NotTriggered(EventId),

    /// Event has already been processed, so it will never invoke new callbacks.
    #[error("{0} has already been processed")]
    AlreadyProcessed(EventId),

    /// No more events are scheduled.
    #[error("no scheduled events left")]
    EmptySchedule,

    /// Bound passed to `run_until` is not in the future.
    #[error("until ({until}) must be greater than the current simulation time ({now})")]
    InvalidUntil {
        /// Requested bound.
        until: f64,
        /// Simulation time at the moment of the call.
        now: f64,
    },

    /// Schedule ran empty before the awaited event was triggered.
    #[error("no scheduled events left but {0} was not triggered")]
    UntilNotTriggered(EventId),

    /// Process has already terminated.
    #[error("{0} has terminated and cannot be interrupted")]
    DeadProcess(ProcessId),

    /// Process tried to interrupt itself.
    #[error("{0} is not allowed to interrupt itself")]
    SelfInterrupt(ProcessId),

    /// Process awaited an event while still waiting for another one.
    #[error("{process} awaits {event} while still waiting for {target}")]
    AlreadyWaiting {
        /// Process that awaited.
        process: ProcessId,
        /// Event that the process tried to await.
        event: EventId,
        /// Event the process is already waiting for.
        target: EventId,
    },

    /// Process suspended on something that is not a simulation event.
    #[error("{0} suspended without awaiting a simulation event")]
    InvalidYield(ProcessId),

    /// Process was resumed while it was already running.
    #[error("{0} is already running")]
    ProcessRunning(ProcessId),

    /// Event was awaited outside of any process.
    #[error("events can only be awaited from within a process")]
    NoActiveProcess,

    /// Capacity of a resource must be positive.
    #[error("capacity must be positive")]
    InvalidCapacity,

    /// Amount put into or taken from a container must be positive.
    #[error("amount must be positive, got {0}")]
    InvalidAmount(f64),

    /// Initial content of a resource does not fit within its capacity.
    #[error("invalid initial content: {0}")]
    InvalidInit(String),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Process was interrupted.
    #[error(transparent)]
    Interrupt(#[from] Interrupt),

    /// User-defined failure, optionally caused by another error.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
        /// Error that caused this one.
        #[source]
        cause: Option<Box<Error>>,
    },
}

impl Error {
    /// Constructs a user-defined failure.
    #[must_use]
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed {
            message: message.into(),
            cause: None,
        }
    }

    /// Constructs a user-defined failure that was caused by `cause`.
    #[must_use]
    pub fn caused_by<S: Into<String>>(message: S, cause: Error) -> Self {
        Self::Failed {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Returns the interrupt if this error is one.
    #[must_use]
    pub fn as_interrupt(&self) -> Option<&Interrupt> {
        match self {
            Self::Interrupt(interrupt) => Some(interrupt),
            _ => None,
        }
    }

    /// Walks the chain of causes, starting with this error.
    pub fn chain(&self) -> impl Iterator<Item = &Error> {
        std::iter::successors(Some(self), |err| match err {
            Self::Failed {
                cause: Some(cause), ..
            } => Some(cause.as_ref()),
            _ => None,
        })
    }
}

/// Information about a resource holder being evicted by a more important request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preempted {
    /// Process that requested the resource, if it was requested from within a process.
    pub by: Option<ProcessId>,
    /// Time at which the evicted holder acquired the resource.
    pub usage_since: f64,
}

impl fmt::Display for Preempted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.by {
            Some(by) => write!(f, "preempted by {} since {}", by, self.usage_since),
            None => write!(f, "preempted since {}", self.usage_since),
        }
    }
}

/// Reason given for an interrupt.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause {
    /// No reason given.
    None,
    /// Free-form message.
    Message(String),
    /// Resource holder was preempted.
    Preempted(Preempted),
}

impl Default for Cause {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "no cause"),
            Self::Message(message) => write!(f, "{}", message),
            Self::Preempted(preempted) => write!(f, "{}", preempted),
        }
    }
}

impl From<&str> for Cause {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<Preempted> for Cause {
    fn from(preempted: Preempted) -> Self {
        Self::Preempted(preempted)
    }
}

impl From<()> for Cause {
    fn from(_: ()) -> Self {
        Self::None
    }
}

/// Exception thrown into a process that was waiting for an event.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{process} interrupted: {cause}")]
pub struct Interrupt {
    /// Interrupted process.
    pub process: ProcessId,
    /// Reason of the interrupt.
    pub cause: Cause,
}
