//! Shared resources processes can queue up for.
//!
//! Every resource keeps two queues: one for put requests and one for get requests. Whenever a
//! request is made, the matching queue is scanned, and the discipline of the resource decides
//! which requests are granted. Once a granted put (get) request is processed, the get (put)
//! queue is scanned again, since the put (get) may have made room for it.
//!
//! Put and get handles can be awaited like any other event, and they can be canceled while they
//! are still waiting in the queue:
//!
//! ```
//! # use procsim::{Environment, Error, Store};
//! let env = Environment::new();
//! let store = Store::new(&env, 1)?;
//! let full = store.put("first");
//! let queued = store.put("second");
//! assert!(full.is_triggered());
//! assert!(!queued.is_triggered());
//! assert_eq!(store.put_queue_len(), 1);
//! {
//!     let _scoped = queued.scoped();
//! }
//! assert_eq!(store.put_queue_len(), 0);
//! # Ok::<(), Error>(())
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::IntoFuture;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use crate::event::Callback;
use crate::{Environment, Error, Event, EventFuture, EventId, Waitable};

mod container;
mod resource;
mod store;

pub use container::Container;
pub use resource::{PreemptiveResource, PriorityResource, Request, Resource};
pub use store::{FilterStore, Store};

/// Decides which queued requests of a resource are granted.
///
/// The hooks grant a request by triggering its event with `Environment::grant`. They return
/// whether the scan of the queue should proceed to the next request.
pub(crate) trait Discipline: 'static {
    type Put: 'static;
    type Get: 'static;

    fn put_event(put: &Self::Put) -> EventId;
    fn get_event(get: &Self::Get) -> EventId;

    fn enqueue_put(&self, queue: &mut Vec<Self::Put>, put: Self::Put) {
        queue.push(put);
    }

    fn do_put(&mut self, env: &Environment, put: &mut Self::Put) -> bool;
    fn do_get(&mut self, env: &Environment, get: &mut Self::Get) -> bool;
}

pub(crate) struct Queues<D: Discipline> {
    pub(crate) discipline: D,
    put_queue: Vec<D::Put>,
    get_queue: Vec<D::Get>,
}

/// Removes canceled requests from the queues of a resource, whatever its discipline.
trait CancelQueue {
    fn cancel_put(&self, event: EventId);
    fn cancel_get(&self, event: EventId);
}

impl<D: Discipline> CancelQueue for RefCell<Queues<D>> {
    fn cancel_put(&self, event: EventId) {
        let mut queues = self.borrow_mut();
        let len = queues.put_queue.len();
        queues.put_queue.retain(|put| D::put_event(put) != event);
        if queues.put_queue.len() < len {
            log::debug!("Canceled put request {}", event);
        }
    }

    fn cancel_get(&self, event: EventId) {
        let mut queues = self.borrow_mut();
        let len = queues.get_queue.len();
        queues.get_queue.retain(|get| D::get_event(get) != event);
        if queues.get_queue.len() < len {
            log::debug!("Canceled get request {}", event);
        }
    }
}

/// Queues of a resource shared between all its handles.
pub(crate) struct BaseResource<D: Discipline> {
    env: Environment,
    shared: Rc<RefCell<Queues<D>>>,
}

impl<D: Discipline> Clone for BaseResource<D> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<D: Discipline> BaseResource<D> {
    pub(crate) fn new(env: &Environment, discipline: D) -> Self {
        Self {
            env: env.clone(),
            shared: Rc::new(RefCell::new(Queues {
                discipline,
                put_queue: Vec::new(),
                get_queue: Vec::new(),
            })),
        }
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.env
    }

    /// Inspects the state of the discipline.
    pub(crate) fn inspect<R, F: FnOnce(&D) -> R>(&self, f: F) -> R {
        f(&self.shared.borrow().discipline)
    }

    pub(crate) fn put_queue(&self) -> Vec<EventId> {
        self.shared
            .borrow()
            .put_queue
            .iter()
            .map(D::put_event)
            .collect()
    }

    pub(crate) fn put_queue_len(&self) -> usize {
        self.shared.borrow().put_queue.len()
    }

    pub(crate) fn get_queue_len(&self) -> usize {
        self.shared.borrow().get_queue.len()
    }

    fn cancel_handle(&self) -> Weak<dyn CancelQueue> {
        let shared: Rc<dyn CancelQueue> = self.shared.clone();
        Rc::downgrade(&shared)
    }

    /// Enqueues a put request whose event is `event`, and tries to grant it right away.
    pub(crate) fn put(&self, event: Event<()>, put: D::Put) -> PutEvent {
        {
            let mut queues = self.shared.borrow_mut();
            let queues = &mut *queues;
            queues.discipline.enqueue_put(&mut queues.put_queue, put);
        }
        let shared = Rc::downgrade(&self.shared);
        self.observe(event.id(), move |env| {
            if let Some(shared) = shared.upgrade() {
                trigger_get(env, &shared);
            }
        });
        trigger_put(&self.env, &self.shared);
        PutEvent {
            event,
            queue: self.cancel_handle(),
        }
    }

    /// Enqueues a get request whose event is `event`, and tries to grant it right away.
    pub(crate) fn get<T>(&self, event: Event<T>, get: D::Get) -> GetEvent<T> {
        self.shared.borrow_mut().get_queue.push(get);
        let shared = Rc::downgrade(&self.shared);
        self.observe(event.id(), move |env| {
            if let Some(shared) = shared.upgrade() {
                trigger_put(env, &shared);
            }
        });
        trigger_get(&self.env, &self.shared);
        GetEvent {
            event,
            queue: self.cancel_handle(),
        }
    }

    fn observe<F: FnOnce(&Environment) + 'static>(&self, event: EventId, f: F) {
        let observer = Callback::Observer(Box::new(move |env, _| f(env)));
        self.env
            .kernel
            .borrow_mut()
            .slot_mut(event)
            .callbacks
            .push(observer);
    }
}

fn trigger_put<D: Discipline>(env: &Environment, shared: &RefCell<Queues<D>>) {
    let mut queues = shared.borrow_mut();
    let queues = &mut *queues;
    let mut idx = 0;
    while idx < queues.put_queue.len() {
        let put = &mut queues.put_queue[idx];
        if env.is_triggered(D::put_event(put)) {
            queues.put_queue.remove(idx);
            continue;
        }
        let proceed = queues.discipline.do_put(env, put);
        if env.is_triggered(D::put_event(put)) {
            queues.put_queue.remove(idx);
        } else {
            idx += 1;
        }
        if !proceed {
            break;
        }
    }
}

fn trigger_get<D: Discipline>(env: &Environment, shared: &RefCell<Queues<D>>) {
    let mut queues = shared.borrow_mut();
    let queues = &mut *queues;
    let mut idx = 0;
    while idx < queues.get_queue.len() {
        let get = &mut queues.get_queue[idx];
        if env.is_triggered(D::get_event(get)) {
            queues.get_queue.remove(idx);
            continue;
        }
        let proceed = queues.discipline.do_get(env, get);
        if env.is_triggered(D::get_event(get)) {
            queues.get_queue.remove(idx);
        } else {
            idx += 1;
        }
        if !proceed {
            break;
        }
    }
}

/// Requests that can be withdrawn from the queue of a resource.
pub trait Cancel {
    /// Withdraws the request if it has not been granted yet. No-op otherwise.
    fn cancel(&self);
}

/// Cancels the wrapped request when dropped.
///
/// Useful when a process may be interrupted while waiting for a resource: the request does not
/// linger in the queue after the process gave up on it.
#[derive(Debug)]
pub struct Scoped<R: Cancel>(R);

impl<R: Cancel> Deref for Scoped<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R: Cancel> Drop for Scoped<R> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl<R: Cancel + Waitable> Waitable for Scoped<R> {
    fn event_id(&self) -> EventId {
        self.0.event_id()
    }
}

/// Request to put something into a resource.
#[derive(Clone)]
pub struct PutEvent {
    event: Event<()>,
    queue: Weak<dyn CancelQueue>,
}

impl fmt::Debug for PutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PutEvent").field(&self.event.id()).finish()
    }
}

impl PutEvent {
    /// Wraps the request in a guard canceling it when dropped.
    #[must_use]
    pub fn scoped(self) -> Scoped<Self> {
        Scoped(self)
    }
}

impl Cancel for PutEvent {
    fn cancel(&self) {
        if self.event.is_triggered() {
            return;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.cancel_put(self.event.id());
        }
    }
}

impl Deref for PutEvent {
    type Target = Event<()>;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl Waitable for PutEvent {
    fn event_id(&self) -> EventId {
        self.event.id()
    }
}

impl IntoFuture for PutEvent {
    type Output = Result<(), Error>;
    type IntoFuture = EventFuture<()>;

    fn into_future(self) -> Self::IntoFuture {
        self.event.into_future()
    }
}

impl IntoFuture for &PutEvent {
    type Output = Result<(), Error>;
    type IntoFuture = EventFuture<()>;

    fn into_future(self) -> Self::IntoFuture {
        (&self.event).into_future()
    }
}

/// Request to get something out of a resource, resolving to what was taken.
pub struct GetEvent<T> {
    event: Event<T>,
    queue: Weak<dyn CancelQueue>,
}

impl<T> Clone for GetEvent<T> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            queue: Weak::clone(&self.queue),
        }
    }
}

impl<T> fmt::Debug for GetEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GetEvent").field(&self.event.id()).finish()
    }
}

impl<T> GetEvent<T> {
    /// Wraps the request in a guard canceling it when dropped.
    #[must_use]
    pub fn scoped(self) -> Scoped<Self> {
        Scoped(self)
    }
}

impl<T> Cancel for GetEvent<T> {
    fn cancel(&self) {
        if self.event.is_triggered() {
            return;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.cancel_get(self.event.id());
        }
    }
}

impl<T> Deref for GetEvent<T> {
    type Target = Event<T>;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl<T> Waitable for GetEvent<T> {
    fn event_id(&self) -> EventId {
        self.event.id()
    }
}

impl<T: Clone + 'static> IntoFuture for GetEvent<T> {
    type Output = Result<T, Error>;
    type IntoFuture = EventFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.event.into_future()
    }
}

impl<T: Clone + 'static> IntoFuture for &GetEvent<T> {
    type Output = Result<T, Error>;
    type IntoFuture = EventFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        (&self.event).into_future()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Counter that accepts puts only while below its limit and gets only while above zero.
    struct Counter {
        limit: usize,
        value: usize,
    }

    impl Discipline for Counter {
        type Put = EventId;
        type Get = EventId;

        fn put_event(put: &EventId) -> EventId {
            *put
        }

        fn get_event(get: &EventId) -> EventId {
            *get
        }

        fn do_put(&mut self, env: &Environment, put: &mut EventId) -> bool {
            if self.value < self.limit {
                self.value += 1;
                env.grant(*put, ());
                true
            } else {
                false
            }
        }

        fn do_get(&mut self, env: &Environment, get: &mut EventId) -> bool {
            if self.value > 0 {
                self.value -= 1;
                env.grant(*get, ());
                true
            } else {
                false
            }
        }
    }

    fn counter(env: &Environment, limit: usize) -> BaseResource<Counter> {
        BaseResource::new(env, Counter { limit, value: 0 })
    }

    fn put(resource: &BaseResource<Counter>) -> PutEvent {
        let event = resource.env().event();
        let id = event.id();
        resource.put(event, id)
    }

    fn get(resource: &BaseResource<Counter>) -> GetEvent<()> {
        let event = resource.env().event();
        let id = event.id();
        resource.get(event, id)
    }

    #[test]
    fn test_put_granted_until_full() {
        let env = Environment::new();
        let resource = counter(&env, 2);
        let puts: Vec<_> = (0..3).map(|_| put(&resource)).collect();
        assert!(puts[0].is_triggered());
        assert!(puts[1].is_triggered());
        assert!(!puts[2].is_triggered());
        assert_eq!(resource.put_queue(), vec![puts[2].id()]);
        assert_eq!(resource.inspect(|c| c.value), 2);
    }

    #[test]
    fn test_processed_get_rescans_puts() {
        let env = Environment::new();
        let resource = counter(&env, 1);
        let first = put(&resource);
        let second = put(&resource);
        let taken = get(&resource);
        assert!(first.is_triggered());
        assert!(taken.is_triggered());
        assert!(!second.is_triggered());
        env.run().unwrap();
        assert!(second.is_processed());
        assert_eq!(resource.put_queue_len(), 0);
        assert_eq!(resource.inspect(|c| c.value), 1);
    }

    #[test]
    fn test_processed_put_rescans_gets() {
        let env = Environment::new();
        let resource = counter(&env, 1);
        let waiting = get(&resource);
        assert_eq!(resource.get_queue_len(), 1);
        let _ = put(&resource);
        assert!(!waiting.is_triggered());
        env.step().unwrap();
        assert!(waiting.is_triggered());
        assert_eq!(resource.get_queue_len(), 0);
    }

    #[test]
    fn test_cancel() {
        let env = Environment::new();
        let resource = counter(&env, 0);
        let queued = put(&resource);
        let waiting = get(&resource);
        queued.cancel();
        assert_eq!(resource.put_queue_len(), 0);
        {
            let _waiting = waiting.clone().scoped();
            assert_eq!(resource.get_queue_len(), 1);
        }
        assert_eq!(resource.get_queue_len(), 0);
        assert!(!queued.is_triggered());
        assert!(!waiting.is_triggered());
    }

    #[test]
    fn test_granted_request_is_not_canceled() {
        let env = Environment::new();
        let resource = counter(&env, 1);
        let granted = put(&resource);
        granted.cancel();
        drop(granted.clone().scoped());
        assert!(granted.is_triggered());
        assert_eq!(resource.inspect(|c| c.value), 1);
    }

    #[test]
    fn test_triggered_elsewhere_is_skipped() {
        let env = Environment::new();
        let resource = counter(&env, 0);
        let queued = put(&resource);
        queued.succeed(()).unwrap();
        let late = put(&resource);
        assert_eq!(resource.put_queue(), vec![late.id()]);
        assert_eq!(resource.inspect(|c| c.value), 0);
    }
}
