//! Explicit observer lists.
//!
//! Collections and live queries own one `Listeners` list per event type.
//! Owners usually keep the list behind a `RefCell`; `snapshot` lets them
//! copy the callbacks out and release the borrow before invoking them, so
//! a callback may subscribe, unsubscribe or write back into its owner.

use alloc::rc::Rc;
use alloc::vec::Vec;

/// Identifies one registered callback.
pub type ListenerId = u64;

/// A registered callback.
pub type Listener<E> = Rc<dyn Fn(&E)>;

pub struct Listeners<E> {
    entries: Vec<(ListenerId, Listener<E>)>,
    next_id: ListenerId,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers `callback` and returns its id.
    pub fn subscribe<F>(&mut self, callback: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, Rc::new(callback)));
        id
    }

    /// Removes a callback. Returns true if it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copies the registered callbacks in registration order.
    pub fn snapshot(&self) -> Vec<Listener<E>> {
        self.entries.iter().map(|(_, cb)| cb.clone()).collect()
    }

    /// Invokes every callback with `event`.
    pub fn emit(&self, event: &E) {
        notify(&self.snapshot(), event);
    }
}

/// Invokes a snapshot of callbacks.
pub fn notify<E>(listeners: &[Listener<E>], event: &E) {
    for listener in listeners {
        listener(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use core::cell::RefCell;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners: Listeners<i32> = Listeners::new();

        let sink = seen.clone();
        let first = listeners.subscribe(move |e| sink.borrow_mut().push(*e));
        let sink = seen.clone();
        listeners.subscribe(move |e| sink.borrow_mut().push(*e * 10));
        assert_eq!(listeners.len(), 2);

        listeners.emit(&1);
        assert_eq!(*seen.borrow(), vec![1, 10]);

        assert!(listeners.unsubscribe(first));
        assert!(!listeners.unsubscribe(first));
        listeners.emit(&2);
        assert_eq!(*seen.borrow(), vec![1, 10, 20]);
    }

    #[test]
    fn test_callback_can_unsubscribe_through_owner() {
        let owner: Rc<RefCell<Listeners<()>>> = Rc::new(RefCell::new(Listeners::new()));
        let hits = Rc::new(RefCell::new(0));

        let weak = Rc::downgrade(&owner);
        let counter = hits.clone();
        let id = Rc::new(RefCell::new(0));
        let own_id = id.clone();
        *id.borrow_mut() = owner.borrow_mut().subscribe(move |_| {
            *counter.borrow_mut() += 1;
            if let Some(owner) = weak.upgrade() {
                owner.borrow_mut().unsubscribe(*own_id.borrow());
            }
        });

        let snapshot = owner.borrow().snapshot();
        notify(&snapshot, &());
        let snapshot = owner.borrow().snapshot();
        notify(&snapshot, &());
        assert_eq!(*hits.borrow(), 1);
        assert!(owner.borrow().is_empty());
    }
}
