//! Events composed of other events.
//!
//! A [`Condition`] waits for its sub-events and triggers as soon as its predicate holds, or as
//! soon as any of its sub-events fails. Conditions are usually built with the `&` (all of) and
//! `|` (any of) operators:
//!
//! ```
//! # use procsim::{Environment, Error};
//! let env = Environment::new();
//! let fast = env.timeout_with(1.0, "fast")?;
//! let slow = env.timeout_with(2.0, "slow")?;
//! let both = fast.clone() & slow.clone();
//! let value = env.run_until_event(&both)?;
//! assert_eq!(env.now(), 2.0);
//! assert_eq!(value.get(&fast), Some("fast"));
//! assert_eq!(value.get(&slow), Some("slow"));
//! # Ok::<(), Error>(())
//! ```

use std::fmt;
use std::future::IntoFuture;
use std::ops::{BitAnd, BitOr, Deref};
use std::rc::Rc;

use derive_more::{Display, From, Into};

use crate::environment::Kernel;
use crate::event::{downcast, Callback, EventState, Value};
use crate::{Environment, Error, Event, EventFuture, EventId, Priority, Process, Waitable};

#[derive(From, Into, Debug, PartialEq, Eq, Copy, Clone, Hash, Display)]
#[display(fmt = "condition#{}", _0)]
pub(crate) struct ConditionId(usize);

/// Predicate deciding when a condition triggers, given its sub-events and the number of
/// sub-events processed so far.
pub type Evaluate = fn(&[EventId], usize) -> bool;

/// Kind of a condition.
#[derive(Clone, Copy)]
pub enum ConditionKind {
    /// Triggers once all sub-events are processed.
    All,
    /// Triggers once any sub-event is processed, or immediately if there are none.
    Any,
    /// Triggers once the predicate holds.
    Custom(Evaluate),
}

impl fmt::Debug for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Any => write!(f, "Any"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl PartialEq for ConditionKind {
    /// Custom conditions are never equal to anything, so they are never merged.
    fn eq(&self, other: &Self) -> bool {
        matches!((self, other), (Self::All, Self::All) | (Self::Any, Self::Any))
    }
}

impl ConditionKind {
    fn evaluate(self, events: &[EventId], count: usize) -> bool {
        match self {
            Self::All => count == events.len(),
            Self::Any => count > 0 || events.is_empty(),
            Self::Custom(evaluate) => evaluate(events, count),
        }
    }
}

pub(crate) struct ConditionSlot {
    event: EventId,
    kind: ConditionKind,
    events: Vec<EventId>,
    count: usize,
}

/// Values of the sub-events of a condition that had been processed by the time it triggered,
/// in the order in which they were declared.
///
/// Nested conditions do not appear themselves: their processed sub-events are flattened in
/// their place.
#[derive(Clone, Default)]
pub struct ConditionValue {
    entries: Vec<(EventId, Value)>,
}

impl fmt::Debug for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.events()).finish()
    }
}

impl ConditionValue {
    fn push(&mut self, event: EventId, value: Value) {
        if !self.entries.iter().any(|(id, _)| *id == event) {
            self.entries.push((event, value));
        }
    }

    /// Returns the value of `event`, if it is part of this result.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the value type of `event`, which can only happen if `event` is an
    /// [`EventId`] paired with the wrong type.
    #[must_use]
    pub fn get<T: Clone + 'static, W: Waitable>(&self, event: &W) -> Option<T> {
        let id = event.event_id();
        self.entries
            .iter()
            .find(|(event, _)| *event == id)
            .map(|(_, value)| downcast(value))
    }

    /// Checks if `event` is part of this result.
    #[must_use]
    pub fn contains<W: Waitable>(&self, event: &W) -> bool {
        let id = event.event_id();
        self.entries.iter().any(|(event, _)| *event == id)
    }

    /// Iterates over the events in this result, in declaration order.
    pub fn events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.entries.iter().map(|(event, _)| *event)
    }

    /// Number of events in this result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if no events are in this result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Kernel {
    fn condition(&self, condition: ConditionId) -> &ConditionSlot {
        &self.conditions[usize::from(condition)]
    }

    fn condition_mut(&mut self, condition: ConditionId) -> &mut ConditionSlot {
        &mut self.conditions[usize::from(condition)]
    }

    fn new_condition(&mut self, kind: ConditionKind, events: &[EventId]) -> ConditionId {
        let event = self.new_event(EventState::Pending);
        let condition = ConditionId::from(self.conditions.len());
        self.slot_mut(event).condition = Some(condition);
        self.conditions.push(ConditionSlot {
            event,
            kind,
            events: Vec::new(),
            count: 0,
        });
        if events.is_empty() {
            self.settle_condition(condition, Ok(Rc::new(ConditionValue::default())));
        }
        for &sub in events {
            self.extend_condition(condition, sub);
        }
        condition
    }

    /// Adds `sub` to the sub-events of `condition`.
    fn extend_condition(&mut self, condition: ConditionId, sub: EventId) {
        self.condition_mut(condition).events.push(sub);
        if self.slot(sub).is_processed() {
            self.check_condition(condition, sub);
        } else {
            self.slot_mut(sub)
                .callbacks
                .push(Callback::Condition(condition));
        }
    }

    fn settle_condition(&mut self, condition: ConditionId, outcome: Result<Value, Error>) {
        let event = self.condition(condition).event;
        log::trace!(
            "[{}] {} settled: ok={}",
            self.scheduler.time(),
            condition,
            outcome.is_ok()
        );
        self.trigger(event, outcome, Priority::Normal)
            .expect("conditions settle only once");
    }

    /// Records that `sub` has been processed, and triggers `condition` if it is due.
    pub(crate) fn check_condition(&mut self, condition: ConditionId, sub: EventId) {
        let failure = self.slot(sub).state.failure().cloned();
        if failure.is_some() {
            self.slot_mut(sub).defused = true;
        }
        let event = self.condition(condition).event;
        if !self.slot(event).is_pending() {
            return;
        }
        let slot = self.condition_mut(condition);
        slot.count += 1;
        if let Some(failure) = failure {
            self.settle_condition(condition, Err(failure));
        } else if slot.kind.evaluate(&slot.events, slot.count) {
            let value = self.condition_value(condition);
            self.settle_condition(condition, Ok(Rc::new(value)));
        }
    }

    fn condition_value(&self, condition: ConditionId) -> ConditionValue {
        let mut value = ConditionValue::default();
        self.populate_value(condition, &mut value);
        value
    }

    fn populate_value(&self, condition: ConditionId, value: &mut ConditionValue) {
        let own = self.condition(condition).event;
        for &sub in &self.condition(condition).events {
            let slot = self.slot(sub);
            match (slot.condition, &slot.state) {
                (Some(_), _) if sub == own => {}
                (Some(nested), _) => self.populate_value(nested, value),
                (None, EventState::Processed(Ok(sub_value))) => {
                    value.push(sub, Rc::clone(sub_value));
                }
                _ => {}
            }
        }
    }
}

/// A handle to a condition, which is also an event whose value is a [`ConditionValue`].
pub struct Condition {
    event: Event<ConditionValue>,
    id: ConditionId,
}

impl Clone for Condition {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            id: self.id,
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("kind", &self.kind())
            .field("events", &self.events())
            .finish()
    }
}

impl Deref for Condition {
    type Target = Event<ConditionValue>;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl Waitable for Condition {
    fn event_id(&self) -> EventId {
        self.event.id()
    }
}

impl Condition {
    /// Kind of the condition.
    #[must_use]
    pub fn kind(&self) -> ConditionKind {
        self.event.env().kernel.borrow().condition(self.id).kind
    }

    /// Sub-events of the condition.
    #[must_use]
    pub fn events(&self) -> Vec<EventId> {
        self.event
            .env()
            .kernel
            .borrow()
            .condition(self.id)
            .events
            .clone()
    }

    /// Composes this condition with `other`.
    ///
    /// If this condition is of the same kind and has not triggered yet, `other` (or, if it is a
    /// condition of the same kind, its sub-events) is appended to this condition, which is
    /// returned. Otherwise, a new condition of the given kind wrapping both is created.
    fn compose<W: Waitable>(self, kind: ConditionKind, other: &W) -> Self {
        let env = self.event.env().clone();
        let mut kernel = env.kernel.borrow_mut();
        let slot = kernel.condition(self.id);
        if slot.kind != kind || !kernel.slot(slot.event).is_pending() {
            drop(kernel);
            return env.condition(kind, [self.event_id(), other.event_id()]);
        }
        let other = other.event_id();
        let merged = match kernel.slot(other).condition {
            Some(nested)
                if kernel.condition(nested).kind == kind
                    && kernel.slot(other).is_pending()
                    && nested != self.id =>
            {
                kernel.condition(nested).events.clone()
            }
            _ => vec![other],
        };
        for sub in merged {
            kernel.extend_condition(self.id, sub);
        }
        drop(kernel);
        self
    }
}

impl IntoFuture for Condition {
    type Output = Result<ConditionValue, Error>;
    type IntoFuture = EventFuture<ConditionValue>;

    fn into_future(self) -> Self::IntoFuture {
        self.event.into_future()
    }
}

impl IntoFuture for &Condition {
    type Output = Result<ConditionValue, Error>;
    type IntoFuture = EventFuture<ConditionValue>;

    fn into_future(self) -> Self::IntoFuture {
        (&self.event).into_future()
    }
}

impl<W: Waitable> BitAnd<W> for Condition {
    type Output = Condition;

    fn bitand(self, other: W) -> Condition {
        self.compose(ConditionKind::All, &other)
    }
}

impl<W: Waitable> BitOr<W> for Condition {
    type Output = Condition;

    fn bitor(self, other: W) -> Condition {
        self.compose(ConditionKind::Any, &other)
    }
}

macro_rules! compose_ops {
    ($ty:ident) => {
        impl<T, W: Waitable> BitAnd<W> for $ty<T> {
            type Output = Condition;

            fn bitand(self, other: W) -> Condition {
                self.env().all_of([self.event_id(), other.event_id()])
            }
        }

        impl<T, W: Waitable> BitOr<W> for $ty<T> {
            type Output = Condition;

            fn bitor(self, other: W) -> Condition {
                self.env().any_of([self.event_id(), other.event_id()])
            }
        }
    };
}

compose_ops!(Event);
compose_ops!(Process);

impl Environment {
    /// Creates a condition that triggers once `evaluate` holds.
    pub fn condition<I>(&self, kind: ConditionKind, events: I) -> Condition
    where
        I: IntoIterator,
        I::Item: Waitable,
    {
        let events: Vec<EventId> = events.into_iter().map(|e| e.event_id()).collect();
        let id = self.kernel.borrow_mut().new_condition(kind, &events);
        let event = self.kernel.borrow().condition(id).event;
        Condition {
            event: Event::new(self.clone(), event),
            id,
        }
    }

    /// Creates a condition that triggers once all `events` are processed.
    pub fn all_of<I>(&self, events: I) -> Condition
    where
        I: IntoIterator,
        I::Item: Waitable,
    {
        self.condition(ConditionKind::All, events)
    }

    /// Creates a condition that triggers once any of `events` is processed.
    pub fn any_of<I>(&self, events: I) -> Condition
    where
        I: IntoIterator,
        I::Item: Waitable,
    {
        self.condition(ConditionKind::Any, events)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_conditions() {
        let env = Environment::new();
        let all = env.all_of(Vec::<EventId>::new());
        let any = env.any_of(Vec::<EventId>::new());
        assert!(all.is_triggered());
        assert!(any.is_triggered());
        env.run().unwrap();
        assert!(all.value().unwrap().is_empty());
        assert!(any.value().unwrap().is_empty());
        assert_eq!(env.now(), 0.0);
    }

    #[test]
    fn test_all_of_in_declaration_order() {
        let env = Environment::new();
        let late = env.timeout_with(2.0, 'b').unwrap();
        let early = env.timeout_with(1.0, 'a').unwrap();
        let all = env.all_of([&late, &early]);
        let value = env.run_until_event(&all).unwrap();
        assert_eq!(
            value.events().collect::<Vec<_>>(),
            vec![late.id(), early.id()]
        );
        assert_eq!(env.now(), 2.0);
    }

    #[test]
    fn test_any_of_freezes_value() {
        let env = Environment::new();
        let first = env.timeout_with(1.0, 1).unwrap();
        let second = env.timeout_with(2.0, 2).unwrap();
        let any = first.clone() | second.clone();
        let value = env.run_until_event(&any).unwrap();
        assert_eq!(env.now(), 1.0);
        env.run().unwrap();
        let value_later = any.value().unwrap();
        for value in [value, value_later] {
            assert_eq!(value.len(), 1);
            assert_eq!(value.get(&first), Some(1));
            assert!(!value.contains(&second));
        }
    }

    #[test]
    fn test_failure_wins_and_later_failures_are_defused() {
        let env = Environment::new();
        let a = env.event::<()>();
        let b = env.event::<()>();
        let never = env.event::<()>();
        let all = env.all_of([&a, &b, &never]);
        a.fail(Error::failed("first")).unwrap();
        env.step().unwrap();
        assert_eq!(all.value().unwrap_err(), Error::failed("first"));
        all.defuse();
        b.fail(Error::failed("second")).unwrap();
        env.run().unwrap();
        assert_eq!(all.value().unwrap_err(), Error::failed("first"));
    }

    #[test]
    fn test_same_kind_merges_in_place() {
        let env = Environment::new();
        let a = env.timeout(1.0).unwrap();
        let b = env.timeout(2.0).unwrap();
        let c = env.timeout(3.0).unwrap();
        let d = env.timeout(4.0).unwrap();
        let ab = a.clone() & b.clone();
        let id = ab.id();
        let abc = ab & c.clone();
        assert_eq!(abc.id(), id);
        assert_eq!(abc.events(), vec![a.id(), b.id(), c.id()]);
        let cd = env.all_of([&d]);
        let abcd = abc & cd;
        assert_eq!(abcd.id(), id);
        assert_eq!(abcd.events(), vec![a.id(), b.id(), c.id(), d.id()]);
        assert_eq!(env.run_until_event(&abcd).map(|v| v.len()), Ok(4));
        assert_eq!(env.now(), 4.0);
    }

    #[test]
    fn test_different_kinds_nest() {
        let env = Environment::new();
        let a = env.timeout_with(1.0, "a").unwrap();
        let b = env.timeout_with(3.0, "b").unwrap();
        let c = env.timeout_with(2.0, "c").unwrap();
        let either = a.clone() | b.clone();
        let either_id = either.id();
        let nested = either & c.clone();
        assert_ne!(nested.id(), either_id);
        assert_eq!(nested.kind(), ConditionKind::All);
        let value = env.run_until_event(&nested).unwrap();
        assert_eq!(env.now(), 2.0);
        assert_eq!(value.events().collect::<Vec<_>>(), vec![a.id(), c.id()]);
        assert_eq!(value.get(&a), Some("a"));
        assert_eq!(value.get(&c), Some("c"));
    }

    #[test]
    fn test_custom_condition() {
        fn at_least_two(_: &[EventId], count: usize) -> bool {
            count >= 2
        }
        let env = Environment::new();
        let events: Vec<_> = (1..=3)
            .map(|n| env.timeout_with(f64::from(n), n).unwrap())
            .collect();
        let two = env.condition(ConditionKind::Custom(at_least_two), &events);
        let value = env.run_until_event(&two).unwrap();
        assert_eq!(env.now(), 2.0);
        assert_eq!(value.get(&events[0]), Some(1));
        assert_eq!(value.get(&events[1]), Some(2));
        assert_eq!(value.get::<i32, _>(&events[2]), None);
    }

    #[test]
    fn test_processed_sub_events_count_immediately() {
        let env = Environment::new();
        let done = env.timeout_with(0.0, 5_u8).unwrap();
        env.step().unwrap();
        let any = env.any_of([&done]);
        assert!(any.is_triggered());
        assert_eq!(any.value().unwrap().get(&done), Some(5_u8));
    }
}
