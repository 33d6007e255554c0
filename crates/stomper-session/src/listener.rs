//! Observer lists for connection events.

use std::sync::{Arc, Mutex};

use crate::lock;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A list of callbacks for one event kind.
///
/// Callbacks are cloned out of the lock before they run, so a callback may
/// register further listeners (or tear the connection down) without
/// deadlocking.
pub struct Listeners<E: ?Sized> {
    callbacks: Mutex<Vec<Callback<E>>>,
}

impl<E: ?Sized> Listeners<E> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, callback: impl Fn(&E) + Send + Sync + 'static) {
        lock(&self.callbacks).push(Arc::new(callback));
    }

    /// Invokes every callback in registration order. Returns how many ran.
    pub fn emit(&self, event: &E) -> usize {
        let callbacks: Vec<_> = lock(&self.callbacks).clone();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn clear(&self) {
        lock(&self.callbacks).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: ?Sized> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_runs_callbacks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners = Listeners::<u32>::new();
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            listeners.add(move |n: &u32| seen.lock().unwrap().push(format!("{tag}{n}")));
        }

        assert_eq!(listeners.emit(&7), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7"]);
    }

    #[test]
    fn test_emit_allows_registering_from_callback() {
        let listeners = Arc::new(Listeners::<()>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&listeners);
        let counter = Arc::clone(&count);
        listeners.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.add(|_| {});
        });

        listeners.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 2);
    }
}
