//! Minimal reactive container contract
//!
//! [`Settable`] is the only thing the batch manager needs from a store.
//! [`Writable`] is the bundled implementation: a shared value with
//! subscriber callbacks, used by the annotation store and by tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Error returned by a store's `set`
pub type SetError = Box<dyn std::error::Error + Send + Sync>;

/// A container that accepts whole-value writes
pub trait Settable<T>: Send + Sync {
    /// Replace the stored value
    fn set(&self, value: T) -> Result<(), SetError>;
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: Mutex<T>,
    subscribers: Mutex<BTreeMap<u64, Callback<T>>>,
    next_subscriber: AtomicU64,
}

/// Shared value with change notification
///
/// Clones share the same value. Subscribers run synchronously after every
/// write, in subscription order, with the new value borrowed. A callback
/// must not touch the container it is subscribed to.
pub struct Writable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Writable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writable")
            .field("value", &*self.lock_value())
            .finish()
    }
}

impl<T> Writable<T> {
    /// Create a container holding `value`
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(value),
                subscribers: Mutex::new(BTreeMap::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Read the value through a closure
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock_value())
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        *self.lock_value() = value;
        self.notify();
    }

    /// Mutate the value in place and notify subscribers
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.lock_value());
        self.notify();
        result
    }

    /// Mutate the value, notifying subscribers only on success
    ///
    /// The closure must leave the value untouched when it fails.
    pub fn try_update<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E> {
        let result = f(&mut self.lock_value())?;
        self.notify();
        Ok(result)
    }

    /// Register a callback run after every write
    ///
    /// The callback is not invoked for the current value. The returned
    /// [`Subscription`] detaches it when dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: Send + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().insert(id, Arc::new(callback));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .subscribers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                }
            })),
        }
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn notify(&self) {
        let callbacks: Vec<Callback<T>> = self.lock_subscribers().values().cloned().collect();
        if callbacks.is_empty() {
            return;
        }
        let value = self.lock_value();
        for callback in &callbacks {
            callback(&value);
        }
    }

    fn lock_value(&self) -> MutexGuard<'_, T> {
        self.inner.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Writable<T> {
    /// Clone the current value
    pub fn get(&self) -> T {
        self.lock_value().clone()
    }
}

impl<T: Send> Settable<T> for Writable<T> {
    fn set(&self, value: T) -> Result<(), SetError> {
        Writable::set(self, value);
        Ok(())
    }
}

/// Handle that detaches a subscriber when dropped
#[must_use = "dropping a Subscription detaches the callback immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Detach the callback now
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    /// Keep the callback attached for the container's lifetime
    pub fn forget(mut self) {
        self.detach = None;
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}
