//! Tracking consent.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// The user's decision about data collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Consent {
    /// Not decided yet. Events are buffered but not uploadable.
    #[default]
    Pending,
    /// Events may be stored for upload.
    Granted,
    /// Events must not be stored.
    Denied,
}

impl Consent {
    /// All consent values.
    pub const ALL: [Consent; 3] = [Consent::Pending, Consent::Granted, Consent::Denied];
}

impl fmt::Display for Consent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Consent::Pending => "pending",
            Consent::Granted => "granted",
            Consent::Denied => "denied",
        })
    }
}

/// Handle returned by [`ConsentProvider::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(Consent, Consent) + Send + Sync>;

/// A change waiting to be delivered, with the observers registered when it
/// happened.
struct Notification {
    previous: Consent,
    next: Consent,
    observers: Vec<Observer>,
}

struct State {
    current: Consent,
    undelivered: VecDeque<Notification>,
    /// Set while some caller of `set` is running observers.
    dispatching: bool,
}

struct Inner {
    state: Mutex<State>,
    observers: RwLock<Vec<(SubscriptionId, Observer)>>,
    next_id: AtomicU64,
}

/// A process-wide consent value with change notifications.
///
/// Cloning shares the same value. Observers are called with
/// `(previous, next)` for every actual change, in the order the changes
/// happened, and never while any lock of the provider is held: an observer
/// may call [`set`](Self::set), [`subscribe`](Self::subscribe) or
/// [`current`](Self::current) itself.
#[derive(Clone)]
pub struct ConsentProvider {
    inner: Arc<Inner>,
}

impl ConsentProvider {
    /// Creates a provider holding `initial`.
    #[must_use]
    pub fn new(initial: Consent) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    current: initial,
                    undelivered: VecDeque::new(),
                    dispatching: false,
                }),
                observers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the current consent.
    #[must_use]
    pub fn current(&self) -> Consent {
        self.inner.state.lock().current
    }

    /// Changes the consent and notifies observers.
    ///
    /// Setting the current value again notifies nobody. If observers are
    /// already being run (by another thread, or because an observer called
    /// `set`), the change is queued behind the one in progress and delivered
    /// by that caller.
    pub fn set(&self, consent: Consent) {
        let mut state = self.inner.state.lock();

        let previous = std::mem::replace(&mut state.current, consent);
        if previous == consent {
            return;
        }

        let observers = self
            .inner
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        state.undelivered.push_back(Notification {
            previous,
            next: consent,
            observers,
        });
        if state.dispatching {
            return;
        }

        state.dispatching = true;
        while let Some(notification) = state.undelivered.pop_front() {
            MutexGuard::unlocked(&mut state, || notification.deliver());
        }
        state.dispatching = false;
    }

    /// Registers an observer for future changes.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(Consent, Consent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .observers
            .write()
            .push((id, Arc::new(observer)));
        id
    }

    /// Registers an observer and returns the consent it starts from.
    ///
    /// No change can slip between reading the value and registering, and
    /// changes made before the call are never delivered to the observer.
    pub fn subscribe_with_current<F>(&self, observer: F) -> (SubscriptionId, Consent)
    where
        F: Fn(Consent, Consent) + Send + Sync + 'static,
    {
        let state = self.inner.state.lock();
        let id = self.subscribe(observer);
        (id, state.current)
    }

    /// Removes an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.observers.write().retain(|(other, _)| *other != id);
    }
}

impl Notification {
    fn deliver(&self) {
        for observer in &self.observers {
            let call = AssertUnwindSafe(|| observer(self.previous, self.next));
            if panic::catch_unwind(call).is_err() {
                error!(from = %self.previous, to = %self.next, "consent observer panicked");
            }
        }
    }
}

impl Default for ConsentProvider {
    fn default() -> Self {
        Self::new(Consent::default())
    }
}

impl fmt::Debug for ConsentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentProvider")
            .field("current", &self.current())
            .field("observers", &self.inner.observers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_changes_only() {
        let provider = ConsentProvider::new(Consent::Pending);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        provider.subscribe(move |from, to| sink.lock().push((from, to)));

        provider.set(Consent::Pending);
        provider.set(Consent::Granted);
        provider.set(Consent::Granted);
        provider.set(Consent::Denied);

        assert_eq!(
            *seen.lock(),
            vec![
                (Consent::Pending, Consent::Granted),
                (Consent::Granted, Consent::Denied)
            ]
        );
        assert_eq!(provider.current(), Consent::Denied);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let provider = ConsentProvider::default();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = provider.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        provider.set(Consent::Granted);
        provider.unsubscribe(id);
        provider.set(Consent::Denied);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_may_read_current() {
        let provider = ConsentProvider::new(Consent::Pending);
        let inner = provider.clone();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let (_, start) = provider.subscribe_with_current(move |_, _| {
            *sink.lock() = Some(inner.current());
        });

        assert_eq!(start, Consent::Pending);
        provider.set(Consent::Granted);
        assert_eq!(*seen.lock(), Some(Consent::Granted));
    }

    #[test]
    fn observer_may_change_consent_itself() {
        let provider = ConsentProvider::new(Consent::Pending);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reentrant = provider.clone();
        provider.subscribe(move |_, to| {
            if to == Consent::Granted {
                reentrant.set(Consent::Denied);
            }
        });
        let sink = Arc::clone(&seen);
        provider.subscribe(move |from, to| sink.lock().push((from, to)));

        provider.set(Consent::Granted);

        // the nested change waits until the first one reached every observer
        assert_eq!(
            *seen.lock(),
            vec![
                (Consent::Pending, Consent::Granted),
                (Consent::Granted, Consent::Denied)
            ]
        );
        assert_eq!(provider.current(), Consent::Denied);
    }

    #[test]
    fn observer_may_subscribe() {
        let provider = ConsentProvider::new(Consent::Pending);
        let late = Arc::new(Mutex::new(Vec::new()));

        let registrar = provider.clone();
        let sink = Arc::clone(&late);
        provider.subscribe(move |_, to| {
            if to == Consent::Granted {
                let sink = Arc::clone(&sink);
                let (_, start) = registrar.subscribe_with_current(move |from, to| {
                    sink.lock().push((from, to));
                });
                assert_eq!(start, Consent::Granted);
            }
        });

        provider.set(Consent::Granted);
        provider.set(Consent::Denied);

        assert_eq!(*late.lock(), vec![(Consent::Granted, Consent::Denied)]);
    }

    #[test]
    fn panicking_observer_does_not_stop_delivery() {
        let provider = ConsentProvider::new(Consent::Pending);
        provider.subscribe(|_, _| panic!("observer failure"));
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        provider.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        provider.set(Consent::Granted);
        provider.set(Consent::Denied);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clones_share_value() {
        let provider = ConsentProvider::new(Consent::Pending);
        let clone = provider.clone();
        clone.set(Consent::Granted);
        assert_eq!(provider.current(), Consent::Granted);
    }
}
