//! Resources with a limited number of usage slots.

use std::fmt;
use std::future::IntoFuture;
use std::ops::Deref;

use ordered_float::OrderedFloat;

use super::{BaseResource, Cancel, Discipline, PutEvent};
use crate::{Environment, Error, Event, EventFuture, EventId, Preempted, ProcessId, Waitable};

/// Ordering of requests: the lower, the more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RequestKey {
    priority: i64,
    time: OrderedFloat<f64>,
    no_preempt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Fifo,
    Priority,
    Preemptive,
}

pub(crate) struct SlotRequest {
    event: EventId,
    process: Option<ProcessId>,
    key: RequestKey,
}

pub(crate) struct SlotRelease {
    event: EventId,
    request: EventId,
}

struct Holder {
    request: EventId,
    process: Option<ProcessId>,
    key: RequestKey,
    usage_since: f64,
}

pub(crate) struct Slots {
    capacity: usize,
    users: Vec<Holder>,
    policy: Policy,
}

impl Slots {
    fn preempt(&mut self, env: &Environment, request: &SlotRequest) {
        let (position, holder) = match self
            .users
            .iter()
            .enumerate()
            .max_by_key(|(_, holder)| holder.key)
        {
            Some(max) => max,
            None => return,
        };
        if holder.key <= request.key {
            return;
        }
        let holder = self.users.remove(position);
        log::debug!(
            "[{}] Request {} preempts {}",
            env.now(),
            request.event,
            holder.request
        );
        let preempted = Preempted {
            by: request.process,
            usage_since: holder.usage_since,
        };
        let interrupted = match holder.process {
            Some(process) => env.interrupt(process, preempted.into()),
            None => Ok(()),
        };
        if let Err(err) = interrupted {
            log::warn!("Evicted {} without interrupt: {}", holder.request, err);
        }
    }
}

impl Discipline for Slots {
    type Put = SlotRequest;
    type Get = SlotRelease;

    fn put_event(put: &SlotRequest) -> EventId {
        put.event
    }

    fn get_event(get: &SlotRelease) -> EventId {
        get.event
    }

    fn enqueue_put(&self, queue: &mut Vec<SlotRequest>, put: SlotRequest) {
        if self.policy == Policy::Fifo {
            queue.push(put);
        } else {
            let position = queue.partition_point(|queued| queued.key <= put.key);
            queue.insert(position, put);
        }
    }

    fn do_put(&mut self, env: &Environment, put: &mut SlotRequest) -> bool {
        if self.policy == Policy::Preemptive
            && self.users.len() >= self.capacity
            && !put.key.no_preempt
        {
            self.preempt(env, put);
        }
        if self.users.len() < self.capacity {
            log::debug!("[{}] Granted request {}", env.now(), put.event);
            self.users.push(Holder {
                request: put.event,
                process: put.process,
                key: put.key,
                usage_since: env.now(),
            });
            env.grant(put.event, ());
            true
        } else {
            false
        }
    }

    fn do_get(&mut self, env: &Environment, get: &mut SlotRelease) -> bool {
        if let Some(position) = self.users.iter().position(|h| h.request == get.request) {
            self.users.remove(position);
            log::debug!("[{}] Released request {}", env.now(), get.request);
        }
        env.grant(get.event, ());
        true
    }
}

/// A request for a slot of a resource.
///
/// The request is granted once its event succeeds, and the slot is held until the request is
/// released. Dropping the request releases the slot, or withdraws the request if it has not
/// been granted yet.
///
/// ```
/// # use procsim::{Environment, Error, Resource};
/// let env = Environment::new();
/// let resource = Resource::new(&env, 1)?;
/// let user = env.process({
///     let env = env.clone();
///     let resource = resource.clone();
///     async move {
///         let request = resource.request();
///         (&request).await?;
///         env.timeout(2.0)?.await?;
///         Ok(env.now())
///     }
/// });
/// let waiter = env.process({
///     let env = env.clone();
///     let resource = resource.clone();
///     async move {
///         let request = resource.request();
///         (&request).await?;
///         Ok(env.now())
///     }
/// });
/// env.run()?;
/// assert_eq!(user.value()?, 2.0);
/// assert_eq!(waiter.value()?, 2.0);
/// # Ok::<(), Error>(())
/// ```
pub struct Request {
    request: PutEvent,
    resource: BaseResource<Slots>,
    released: bool,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("event", &self.request.id())
            .field("released", &self.released)
            .finish()
    }
}

impl Request {
    /// Releases the slot, returning the event triggered once it is released.
    pub fn release(mut self) -> Event<()> {
        self.released = true;
        self.do_release()
    }

    fn do_release(&self) -> Event<()> {
        let env = self.resource.env();
        let event = env.event::<()>();
        let release = SlotRelease {
            event: event.id(),
            request: self.request.id(),
        };
        let release = self.resource.get(event, release);
        Event::clone(&release)
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.request.is_triggered() {
            let _ = self.do_release();
        } else {
            self.request.cancel();
        }
    }
}

impl Cancel for Request {
    fn cancel(&self) {
        self.request.cancel();
    }
}

impl Deref for Request {
    type Target = Event<()>;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

impl Waitable for Request {
    fn event_id(&self) -> EventId {
        self.request.id()
    }
}

impl IntoFuture for &Request {
    type Output = Result<(), Error>;
    type IntoFuture = EventFuture<()>;

    fn into_future(self) -> Self::IntoFuture {
        (&self.request).into_future()
    }
}

macro_rules! slot_resource {
    ($(#[$meta:meta])* $name:ident, $policy:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            base: BaseResource<Slots>,
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("capacity", &self.capacity())
                    .field("count", &self.count())
                    .field("queued", &self.queue_len())
                    .finish()
            }
        }

        impl $name {
            /// Constructs a resource with `capacity` slots.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidCapacity`] if `capacity` is 0.
            pub fn new(env: &Environment, capacity: usize) -> Result<Self, Error> {
                if capacity == 0 {
                    return Err(Error::InvalidCapacity);
                }
                let slots = Slots {
                    capacity,
                    users: Vec::new(),
                    policy: $policy,
                };
                Ok(Self {
                    base: BaseResource::new(env, slots),
                })
            }

            /// Number of slots.
            #[must_use]
            pub fn capacity(&self) -> usize {
                self.base.inspect(|slots| slots.capacity)
            }

            /// Number of slots in use.
            #[must_use]
            pub fn count(&self) -> usize {
                self.base.inspect(|slots| slots.users.len())
            }

            /// Requests currently holding a slot, in the order they were granted.
            #[must_use]
            pub fn users(&self) -> Vec<EventId> {
                self.base
                    .inspect(|slots| slots.users.iter().map(|h| h.request).collect())
            }

            /// Requests waiting for a slot, in the order they will be considered.
            #[must_use]
            pub fn queue(&self) -> Vec<EventId> {
                self.base.put_queue()
            }

            /// Number of requests waiting for a slot.
            #[must_use]
            pub fn queue_len(&self) -> usize {
                self.base.put_queue_len()
            }

            fn make_request(&self, priority: i64, preempt: bool) -> Request {
                let env = self.base.env();
                let event = env.event::<()>();
                let request = SlotRequest {
                    event: event.id(),
                    process: env.active_process(),
                    key: RequestKey {
                        priority,
                        time: OrderedFloat(env.now()),
                        no_preempt: !preempt,
                    },
                };
                Request {
                    request: self.base.put(event, request),
                    resource: self.base.clone(),
                    released: false,
                }
            }
        }
    };
}

slot_resource!(
    /// Resource with a number of slots shared by processes, granted in the order of requests.
    Resource,
    Policy::Fifo
);

slot_resource!(
    /// Resource whose waiting requests are granted in order of priority, and then in the order
    /// they were made. Lower values mean higher priority.
    PriorityResource,
    Policy::Priority
);

slot_resource!(
    /// Priority resource where an important request may evict a less important holder.
    ///
    /// When all slots are taken, a preempting request evicts the holder with the greatest
    /// `(priority, request time, !preempt)` key, if that key is greater than its own. The
    /// process that made the evicted request is interrupted with [`Cause::Preempted`].
    ///
    /// [`Cause::Preempted`]: crate::Cause::Preempted
    PreemptiveResource,
    Policy::Preemptive
);

impl Resource {
    /// Requests a slot.
    #[must_use]
    pub fn request(&self) -> Request {
        self.make_request(0, false)
    }
}

impl PriorityResource {
    /// Requests a slot with the given priority.
    #[must_use]
    pub fn request(&self, priority: i64) -> Request {
        self.make_request(priority, false)
    }
}

impl PreemptiveResource {
    /// Requests a slot with the given priority. If `preempt` is set, the request may evict a
    /// less important holder.
    #[must_use]
    pub fn request(&self, priority: i64, preempt: bool) -> Request {
        self.make_request(priority, preempt)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Cause;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_zero_capacity() {
        let env = Environment::new();
        assert_eq!(Resource::new(&env, 0).unwrap_err(), Error::InvalidCapacity);
        assert!(PriorityResource::new(&env, 0).is_err());
        assert!(PreemptiveResource::new(&env, 0).is_err());
    }

    #[test]
    fn test_fifo_grants() {
        let env = Environment::new();
        let resource = Resource::new(&env, 2).unwrap();
        let requests: Vec<_> = (0..4).map(|_| resource.request()).collect();
        assert_eq!(resource.count(), 2);
        assert_eq!(resource.users(), vec![requests[0].id(), requests[1].id()]);
        assert_eq!(resource.queue(), vec![requests[2].id(), requests[3].id()]);

        let mut requests = requests.into_iter();
        let first = requests.next().unwrap();
        let release = first.release();
        assert!(release.is_triggered());
        assert_eq!(resource.count(), 1);
        env.run().unwrap();
        assert_eq!(resource.count(), 2);
        assert_eq!(resource.queue_len(), 1);
    }

    #[test]
    fn test_drop_cancels_or_releases() {
        let env = Environment::new();
        let resource = Resource::new(&env, 1).unwrap();
        let held = resource.request();
        let queued = resource.request();
        drop(queued);
        assert_eq!(resource.queue_len(), 0);
        drop(held);
        assert_eq!(resource.count(), 0);
        env.run().unwrap();
    }

    #[test]
    fn test_priority_order() {
        let env = Environment::new();
        let resource = PriorityResource::new(&env, 1).unwrap();
        let held = resource.request(0);
        let low = resource.request(5);
        let high = resource.request(-1);
        let tie = resource.request(-1);
        assert_eq!(resource.queue(), vec![high.id(), tie.id(), low.id()]);
        drop(held);
        env.run().unwrap();
        assert!(high.is_triggered());
        assert!(!tie.is_triggered());
        assert!(!low.is_triggered());
    }

    #[test]
    fn test_preemption() {
        let env = Environment::new();
        let resource = PreemptiveResource::new(&env, 1).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let victim = env.process({
            let env = env.clone();
            let resource = resource.clone();
            let log = Rc::clone(&log);
            async move {
                let request = resource.request(1, true);
                (&request).await?;
                match env.timeout(10.0)?.await {
                    Err(Error::Interrupt(interrupt)) => {
                        log.borrow_mut().push((env.now(), interrupt.cause));
                    }
                    other => other?,
                }
                Ok(())
            }
        });
        let intruder = env.process({
            let env = env.clone();
            let resource = resource.clone();
            async move {
                env.timeout(2.0)?.await?;
                let request = resource.request(0, true);
                (&request).await?;
                Ok(env.now())
            }
        });
        env.run().unwrap();
        assert_eq!(intruder.value(), Ok(2.0));
        assert!(victim.is_ok().unwrap());
        assert_eq!(
            *log.borrow(),
            vec![(
                2.0,
                Cause::Preempted(Preempted {
                    by: Some(intruder.pid()),
                    usage_since: 0.0
                })
            )]
        );
    }

    #[test]
    fn test_no_preemption_of_more_important_holder() {
        let env = Environment::new();
        let resource = PreemptiveResource::new(&env, 1).unwrap();
        let held = resource.request(0, true);
        let equal = resource.request(0, true);
        let weaker = resource.request(1, true);
        assert!(held.is_triggered());
        assert!(!equal.is_triggered());
        assert!(!weaker.is_triggered());
        assert_eq!(resource.users(), vec![held.id()]);
        assert_eq!(resource.queue(), vec![equal.id(), weaker.id()]);
    }

    #[test]
    fn test_preempting_holder_without_process() {
        let env = Environment::new();
        let resource = PreemptiveResource::new(&env, 1).unwrap();
        let held = resource.request(3, true);
        let urgent = resource.request(0, true);
        assert!(held.is_triggered());
        assert!(urgent.is_triggered());
        assert_eq!(resource.users(), vec![urgent.id()]);
        drop(held);
        assert_eq!(resource.users(), vec![urgent.id()]);
        env.run().unwrap();
    }
}
