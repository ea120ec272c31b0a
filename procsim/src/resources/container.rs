use std::fmt;

use super::{BaseResource, Discipline, GetEvent, PutEvent};
use crate::{Environment, Error, EventId};

pub(crate) struct Transfer {
    event: EventId,
    amount: f64,
}

pub(crate) struct Level {
    capacity: f64,
    level: f64,
}

impl Discipline for Level {
    type Put = Transfer;
    type Get = Transfer;

    fn put_event(put: &Transfer) -> EventId {
        put.event
    }

    fn get_event(get: &Transfer) -> EventId {
        get.event
    }

    fn do_put(&mut self, env: &Environment, put: &mut Transfer) -> bool {
        if self.capacity - self.level >= put.amount {
            self.level += put.amount;
            log::trace!("[{}] Put {} (level: {})", env.now(), put.amount, self.level);
            env.grant(put.event, ());
            true
        } else {
            false
        }
    }

    fn do_get(&mut self, env: &Environment, get: &mut Transfer) -> bool {
        if self.level >= get.amount {
            self.level -= get.amount;
            log::trace!("[{}] Got {} (level: {})", env.now(), get.amount, self.level);
            env.grant(get.event, get.amount);
            true
        } else {
            false
        }
    }
}

/// Resource holding up to `capacity` of some continuous, undistinguishable matter.
///
/// Puts wait until there is enough room, and gets wait until there is enough matter. Both are
/// served in the order they were made.
#[derive(Clone)]
pub struct Container {
    base: BaseResource<Level>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("capacity", &self.capacity())
            .field("level", &self.level())
            .finish()
    }
}

impl Container {
    /// Constructs a container of the given `capacity`, initially filled with `init`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapacity`] if `capacity` is not positive, and
    /// [`Error::InvalidInit`] if `init` is negative or exceeds `capacity`.
    pub fn new(env: &Environment, capacity: f64, init: f64) -> Result<Self, Error> {
        if capacity.is_nan() || capacity <= 0.0 {
            return Err(Error::InvalidCapacity);
        }
        if init.is_nan() || init < 0.0 {
            return Err(Error::InvalidInit(format!("level must be non-negative ({})", init)));
        }
        if init > capacity {
            return Err(Error::InvalidInit(format!(
                "level ({}) exceeds capacity ({})",
                init, capacity
            )));
        }
        let level = Level {
            capacity,
            level: init,
        };
        Ok(Self {
            base: BaseResource::new(env, level),
        })
    }

    /// Maximum level.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.base.inspect(|level| level.capacity)
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> f64 {
        self.base.inspect(|level| level.level)
    }

    /// Number of puts waiting for room.
    #[must_use]
    pub fn put_queue_len(&self) -> usize {
        self.base.put_queue_len()
    }

    /// Number of gets waiting for matter.
    #[must_use]
    pub fn get_queue_len(&self) -> usize {
        self.base.get_queue_len()
    }

    /// Puts `amount` into the container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAmount`] if `amount` is not positive.
    pub fn put(&self, amount: f64) -> Result<PutEvent, Error> {
        let amount = positive(amount)?;
        let event = self.base.env().event();
        let put = Transfer {
            event: event.id(),
            amount,
        };
        Ok(self.base.put(event, put))
    }

    /// Gets `amount` out of the container. The event resolves to the amount taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAmount`] if `amount` is not positive.
    pub fn get(&self, amount: f64) -> Result<GetEvent<f64>, Error> {
        let amount = positive(amount)?;
        let event = self.base.env().event();
        let get = Transfer {
            event: event.id(),
            amount,
        };
        Ok(self.base.get(event, get))
    }
}

fn positive(amount: f64) -> Result<f64, Error> {
    if amount.is_nan() || amount <= 0.0 {
        Err(Error::InvalidAmount(amount))
    } else {
        Ok(amount)
    }
}
