//! Single-threaded publish/subscribe primitives.
//!
//! A [`Subject`] publishes values; an [`Observable`] is the subscribing side
//! of the same channel. Subscribing returns a [`Subscription`] guard that
//! unsubscribes when dropped.
//!
//! Subjects can replay their latest value to late subscribers and can carry
//! activation hooks that run when the first subscriber arrives and when the
//! last one leaves. The observed store uses the hooks to start and stop
//! tracking a query only while someone listens.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use tracing::error;

type Callback<T> = Rc<dyn Fn(&T)>;
type Hook<T> = Box<dyn Fn(&Subject<T>)>;

struct Hooks<T> {
    on_active: Hook<T>,
    on_idle: Hook<T>,
}

struct State<T> {
    next_id: u64,
    subscribers: BTreeMap<u64, Callback<T>>,
    latest: Option<T>,
    replay: bool,
    hooks: Option<Rc<Hooks<T>>>,
}

/// Publishing side of a channel.
pub struct Subject<T> {
    inner: Rc<RefCell<State<T>>>,
}

/// Subscribing side of a channel.
pub struct Observable<T> {
    inner: Rc<RefCell<State<T>>>,
}

/// Weak handle to a channel, used by caches that must not keep it alive.
pub(crate) struct WeakSubject<T> {
    inner: Weak<RefCell<State<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("subscribers", &self.inner.borrow().subscribers.len())
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("subscribers", &self.inner.borrow().subscribers.len())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subject<T> {
    fn with_replay(replay: bool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(State {
                next_id: 0,
                subscribers: BTreeMap::new(),
                latest: None,
                replay,
                hooks: None,
            })),
        }
    }

    /// Creates a subject that only delivers future values.
    #[must_use]
    pub fn new() -> Self {
        Self::with_replay(false)
    }

    /// Creates a subject that hands its latest value to new subscribers.
    #[must_use]
    pub fn replaying() -> Self {
        Self::with_replay(true)
    }

    /// Installs activation hooks.
    ///
    /// `on_active` runs when the subscriber count goes from zero to one,
    /// before the new subscriber receives any replayed value. `on_idle` runs
    /// when it drops back to zero.
    #[must_use]
    pub fn with_hooks(
        self,
        on_active: impl Fn(&Subject<T>) + 'static,
        on_idle: impl Fn(&Subject<T>) + 'static,
    ) -> Self {
        self.inner.borrow_mut().hooks = Some(Rc::new(Hooks {
            on_active: Box::new(on_active),
            on_idle: Box::new(on_idle),
        }));
        self
    }

    /// Returns the subscribing side.
    #[must_use]
    pub fn observable(&self) -> Observable<T> {
        Observable {
            inner: Rc::clone(&self.inner),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSubject<T> {
        WeakSubject {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Records a value as the latest without notifying anyone.
    pub fn set_latest(&self, value: T) {
        self.inner.borrow_mut().latest = Some(value);
    }

    /// Publishes a value to every current subscriber.
    ///
    /// A panicking subscriber is logged and skipped; the others are still
    /// notified.
    pub fn emit(&self, value: T)
    where
        T: Clone,
    {
        let callbacks: Vec<Callback<T>> = {
            let mut state = self.inner.borrow_mut();
            if state.replay {
                state.latest = Some(value.clone());
            }
            state.subscribers.values().cloned().collect()
        };
        for callback in &callbacks {
            deliver(callback, &value);
        }
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Checks if two handles refer to the same channel.
    #[must_use]
    pub fn ptr_eq(&self, other: &Subject<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: 'static> WeakSubject<T> {
    pub(crate) fn upgrade(&self) -> Option<Subject<T>> {
        self.inner.upgrade().map(|inner| Subject { inner })
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.inner.strong_count() == 0
    }

    pub(crate) fn points_to(&self, subject: &Subject<T>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&subject.inner))
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Registers a callback.
    ///
    /// If the channel replays and already holds a value, the callback is
    /// invoked with it before this returns.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let callback: Callback<T> = Rc::new(callback);
        let (id, activate) = {
            let mut state = self.inner.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.insert(id, Rc::clone(&callback));
            let activate = if state.subscribers.len() == 1 {
                state.hooks.clone()
            } else {
                None
            };
            (id, activate)
        };

        if let Some(hooks) = activate {
            (hooks.on_active)(&self.subject());
        }

        let replayed = {
            let state = self.inner.borrow();
            if state.replay && state.subscribers.contains_key(&id) {
                state.latest.clone()
            } else {
                None
            }
        };
        if let Some(value) = replayed {
            deliver(&callback, &value);
        }

        let weak = Rc::downgrade(&self.inner);
        Subscription {
            release: Some(Box::new(move || unsubscribe(&weak, id))),
        }
    }

    /// Returns the most recently published value, if the channel replays.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.inner.borrow().latest.clone()
    }
}

impl<T: 'static> Observable<T> {
    fn subject(&self) -> Subject<T> {
        Subject {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Checks if two handles refer to the same channel.
    #[must_use]
    pub fn ptr_eq(&self, other: &Observable<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn deliver<T>(callback: &Callback<T>, value: &T) {
    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        error!("observer callback panicked; continuing with remaining subscribers");
    }
}

fn unsubscribe<T: 'static>(weak: &Weak<RefCell<State<T>>>, id: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let idle = {
        let mut state = inner.borrow_mut();
        if state.subscribers.remove(&id).is_some() && state.subscribers.is_empty() {
            // Hooked channels derive their value on activation.
            if state.hooks.is_some() {
                state.latest = None;
            }
            state.hooks.clone()
        } else {
            None
        }
    };
    if let Some(hooks) = idle {
        (hooks.on_idle)(&Subject { inner });
    }
}

/// Guard returned by [`Observable::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Keeps the callback registered for the lifetime of the channel.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
