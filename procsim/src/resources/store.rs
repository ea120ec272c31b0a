use std::collections::VecDeque;
use std::fmt;

use super::{BaseResource, Discipline, GetEvent, PutEvent};
use crate::{Environment, Error, EventId};

type Filter<T> = Box<dyn Fn(&T) -> bool>;

pub(crate) struct ItemPut<T> {
    event: EventId,
    item: Option<T>,
}

pub(crate) struct ItemGet<T> {
    event: EventId,
    filter: Option<Filter<T>>,
}

pub(crate) struct Items<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T: 'static> Discipline for Items<T> {
    type Put = ItemPut<T>;
    type Get = ItemGet<T>;

    fn put_event(put: &ItemPut<T>) -> EventId {
        put.event
    }

    fn get_event(get: &ItemGet<T>) -> EventId {
        get.event
    }

    fn do_put(&mut self, env: &Environment, put: &mut ItemPut<T>) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        if let Some(item) = put.item.take() {
            self.items.push_back(item);
            log::trace!("[{}] Stored item of {}", env.now(), put.event);
        }
        env.grant(put.event, ());
        true
    }

    /// A filtered get never blocks the ones behind it, since they may be looking for different
    /// items.
    fn do_get(&mut self, env: &Environment, get: &mut ItemGet<T>) -> bool {
        let position = match &get.filter {
            Some(filter) => self.items.iter().position(|item| filter(item)),
            None if self.items.is_empty() => None,
            None => Some(0),
        };
        match position.and_then(|position| self.items.remove(position)) {
            Some(item) => {
                log::trace!("[{}] Retrieved item for {}", env.now(), get.event);
                env.grant(get.event, item);
                true
            }
            None => get.filter.is_some(),
        }
    }
}

fn new_items<T>(capacity: usize, items: Vec<T>) -> Result<Items<T>, Error> {
    if capacity == 0 {
        return Err(Error::InvalidCapacity);
    }
    if items.len() > capacity {
        return Err(Error::InvalidInit(format!(
            "{} items exceed capacity ({})",
            items.len(),
            capacity
        )));
    }
    Ok(Items {
        capacity,
        items: items.into(),
    })
}

impl<T: 'static> BaseResource<Items<T>> {
    fn put_item(&self, item: T) -> PutEvent {
        let event = self.env().event();
        let put = ItemPut {
            event: event.id(),
            item: Some(item),
        };
        self.put(event, put)
    }

    fn get_item(&self, filter: Option<Filter<T>>) -> GetEvent<T> {
        let event = self.env().event();
        let get = ItemGet {
            event: event.id(),
            filter,
        };
        self.get(event, get)
    }
}

macro_rules! store_common {
    ($name:ident) => {
        impl<T: 'static> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("capacity", &self.base.inspect(|items| items.capacity))
                    .field("len", &self.base.inspect(|items| items.items.len()))
                    .finish()
            }
        }

        impl<T: 'static> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    base: self.base.clone(),
                }
            }
        }

        impl<T: 'static> $name<T> {
            /// Constructs an empty store holding up to `capacity` items.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidCapacity`] if `capacity` is 0.
            pub fn new(env: &Environment, capacity: usize) -> Result<Self, Error> {
                Self::with_items(env, capacity, Vec::new())
            }

            /// Constructs an empty store without a limit on the number of items.
            #[must_use]
            pub fn unbounded(env: &Environment) -> Self {
                Self {
                    base: BaseResource::new(
                        env,
                        Items {
                            capacity: usize::MAX,
                            items: VecDeque::new(),
                        },
                    ),
                }
            }

            /// Constructs a store holding up to `capacity` items, initially holding `items`.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidCapacity`] if `capacity` is 0, and [`Error::InvalidInit`]
            /// if there are more items than `capacity`.
            pub fn with_items(
                env: &Environment,
                capacity: usize,
                items: Vec<T>,
            ) -> Result<Self, Error> {
                Ok(Self {
                    base: BaseResource::new(env, new_items(capacity, items)?),
                })
            }

            /// Maximum number of items.
            #[must_use]
            pub fn capacity(&self) -> usize {
                self.base.inspect(|items| items.capacity)
            }

            /// Number of items in the store.
            #[must_use]
            pub fn len(&self) -> usize {
                self.base.inspect(|items| items.items.len())
            }

            /// Checks if the store holds no items.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Number of puts waiting for room.
            #[must_use]
            pub fn put_queue_len(&self) -> usize {
                self.base.put_queue_len()
            }

            /// Number of gets waiting for an item.
            #[must_use]
            pub fn get_queue_len(&self) -> usize {
                self.base.get_queue_len()
            }

            /// Puts `item` into the store, once there is room for it.
            pub fn put(&self, item: T) -> PutEvent {
                self.base.put_item(item)
            }
        }

        impl<T: Clone + 'static> $name<T> {
            /// Items in the store, in the order they were put.
            #[must_use]
            pub fn items(&self) -> Vec<T> {
                self.base.inspect(|items| items.items.iter().cloned().collect())
            }
        }
    };
}

/// Resource holding up to `capacity` items, retrieved in the order they were put.
///
/// ```
/// # use procsim::{Environment, Error, Store};
/// let env = Environment::new();
/// let store = Store::new(&env, 2)?;
/// let consumer = env.process({
///     let store = store.clone();
///     async move { store.get().await }
/// });
/// let _ = store.put('x');
/// assert_eq!(env.run_until_event(&consumer)?, 'x');
/// # Ok::<(), Error>(())
/// ```
pub struct Store<T: 'static> {
    base: BaseResource<Items<T>>,
}

store_common!(Store);

impl<T: 'static> Store<T> {
    /// Gets the oldest item, once there is one.
    pub fn get(&self) -> GetEvent<T> {
        self.base.get_item(None)
    }
}

/// Store whose gets ask for the first item matching a predicate.
///
/// A get waits until a matching item is available, without holding up gets made after it.
pub struct FilterStore<T: 'static> {
    base: BaseResource<Items<T>>,
}

store_common!(FilterStore);

impl<T: 'static> FilterStore<T> {
    /// Gets the oldest item matching `filter`, once there is one.
    pub fn get<F>(&self, filter: F) -> GetEvent<T>
    where
        F: Fn(&T) -> bool + 'static,
    {
        self.base.get_item(Some(Box::new(filter)))
    }
}
