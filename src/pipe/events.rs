//! Typed listener lists.

use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use crate::scheduler::panic_message;

type Listener<E> = Box<dyn FnMut(&E)>;

/// Callbacks subscribed to one kind of event.
///
/// Listeners added while an event is being emitted are kept but not called
/// for that event. A panicking listener is logged and stays subscribed; the
/// rest still run.
pub(crate) struct Listeners<E> {
    list: RefCell<Vec<Listener<E>>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self { list: RefCell::new(Vec::new()) }
    }
}

impl<E> Listeners<E> {
    pub fn add(&self, listener: Listener<E>) {
        self.list.borrow_mut().push(listener);
    }

    /// Call every listener with `event`. Returns how many were called.
    pub fn emit(&self, event: &E) -> usize {
        let mut current = mem::take(&mut *self.list.borrow_mut());
        for (index, listener) in current.iter_mut().enumerate() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                tracing::warn!(listener = index, panic = %panic_message(&*payload), "pipe listener panicked");
            }
        }
        let called = current.len();

        let mut list = self.list.borrow_mut();
        let added = mem::replace(&mut *list, current);
        list.extend(added);
        called
    }

    pub fn len(&self) -> usize {
        self.list.borrow().len()
    }
}
