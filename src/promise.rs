//! The promise core: guarded state machine plus ordered callback dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::Error;

type SuccessFn<T> = Box<dyn FnMut(T) + Send>;
type FailFn = Box<dyn FnMut(Error) + Send>;
type ProgressFn = Box<dyn FnMut(f32) + Send>;
type FinallyFn = Box<dyn FnMut() + Send>;
type ProducerFn<T> = Box<dyn FnOnce(Resolver<T>, ProgressSink<T>) + Send>;
type StartFn = Arc<dyn Fn() + Send + Sync>;

enum State<T> {
    Dormant,
    Pending { progress: f32 },
    Fulfilled { value: T },
    Rejected { error: Error },
}

impl<T> State<T> {
    fn is_dormant(&self) -> bool {
        matches!(self, State::Dormant)
    }

    /// True until the first terminal transition; later settlements are ignored.
    fn is_unsettled(&self) -> bool {
        matches!(self, State::Dormant | State::Pending { .. })
    }
}

/// Registered handlers, one append-only collection per kind.
/// Insertion order is invocation order.
struct Callbacks<T> {
    success: Vec<SuccessFn<T>>,
    fail: Vec<FailFn>,
    progress: Vec<ProgressFn>,
    finally: Vec<FinallyFn>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Callbacks {
            success: Vec::new(),
            fail: Vec::new(),
            progress: Vec::new(),
            finally: Vec::new(),
        }
    }
}

struct Inner<T> {
    state: State<T>,
    callbacks: Callbacks<T>,
    producer: Option<ProducerFn<T>>,
    root_start: Option<StartFn>,
    root_started: Arc<AtomicBool>,
    retries: u32,
}

/// A shareable container for a value that a producer eventually delivers.
///
/// Cloning the handle shares the same underlying promise. All state and
/// callback bookkeeping sits behind one mutex; handlers always run outside
/// of it, on whichever thread triggered the delivery.
///
/// # Examples
///
/// ```
/// use promise_chain::{await_value, Promise};
/// use std::thread;
///
/// let promise = Promise::from_producer(|resolver| {
///     thread::spawn(move || resolver.resolve(String::from("Hi")));
/// });
/// promise.start();
/// println!("Received {:?}", await_value(&promise));
/// ```
pub struct Promise<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

/// Terminal entry points handed to a producer. Holds only a weak
/// back-reference, so a stored producer can never keep its own promise
/// alive.
pub struct Resolver<T> {
    inner: Weak<Mutex<Inner<T>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Fulfills the promise. The first terminal transition wins; anything
    /// after it is ignored.
    pub fn resolve(&self, value: T) {
        match self.inner.upgrade() {
            Some(inner) => Promise { inner }.fulfill(value),
            None => log::warn!("resolve after the promise was dropped"),
        }
    }

    pub fn reject(&self, error: Error) {
        match self.inner.upgrade() {
            Some(inner) => Promise { inner }.reject(error),
            None => log::warn!("reject after the promise was dropped"),
        }
    }
}

/// Progress entry point handed to a producer created with
/// [`Promise::from_progress_producer`].
pub struct ProgressSink<T> {
    inner: Weak<Mutex<Inner<T>>>,
}

impl<T> Clone for ProgressSink<T> {
    fn clone(&self) -> Self {
        ProgressSink {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ProgressSink<T> {
    /// Reports a progress fraction in `[0, 1]`. A report of `0` only moves
    /// the stored state; it is never dispatched to observers.
    pub fn report(&self, fraction: f32) {
        match self.inner.upgrade() {
            Some(inner) => Promise { inner }.set_progress(fraction),
            None => log::trace!("progress after the promise was dropped"),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// A dormant promise with no producer; settle it with [`Promise::fulfill`]
    /// or [`Promise::reject`].
    pub fn empty() -> Self {
        Self::with_state(State::Dormant)
    }

    /// A promise born fulfilled. Observers attached later fire immediately.
    pub fn resolved(value: T) -> Self {
        Self::with_state(State::Fulfilled { value })
    }

    /// A promise born rejected.
    pub fn rejected(error: Error) -> Self {
        Self::with_state(State::Rejected { error })
    }

    /// A dormant promise whose producer runs on first start. The producer
    /// may settle synchronously on the starting thread or hand the
    /// [`Resolver`] to other threads; the promise does not care which.
    pub fn from_producer<F>(produce: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        let promise = Self::empty();
        promise.inner.lock().unwrap().producer =
            Some(Box::new(move |resolver, _progress| produce(resolver)));
        promise
    }

    /// Like [`Promise::from_producer`], for producers that also report
    /// progress.
    pub fn from_progress_producer<F>(produce: F) -> Self
    where
        F: FnOnce(Resolver<T>, ProgressSink<T>) + Send + 'static,
    {
        let promise = Self::empty();
        promise.inner.lock().unwrap().producer = Some(Box::new(produce));
        promise
    }

    fn with_state(state: State<T>) -> Self {
        Promise {
            inner: Arc::new(Mutex::new(Inner {
                state,
                callbacks: Callbacks::default(),
                producer: None,
                root_start: None,
                root_started: Arc::new(AtomicBool::new(false)),
                retries: 0,
            })),
        }
    }

    /// Starts the promise, and with it the whole pipeline it belongs to:
    /// the root producer is triggered at most once no matter how many
    /// derived promises are started independently. Idempotent.
    pub fn start(&self) {
        self.try_start_root();
        self.start_local();
    }

    fn try_start_root(&self) {
        let (trigger, flag) = {
            let inner = self.inner.lock().unwrap();
            (inner.root_start.clone(), inner.root_started.clone())
        };
        if !flag.swap(true, Ordering::SeqCst) {
            if let Some(trigger) = trigger {
                trigger();
            }
        }
    }

    fn start_local(&self) {
        let producer = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_dormant() {
                return;
            }
            inner.state = State::Pending { progress: 0.0 };
            inner.producer.take()
        };
        if let Some(produce) = producer {
            log::trace!("running producer");
            let resolver = Resolver {
                inner: Arc::downgrade(&self.inner),
            };
            let sink = ProgressSink {
                inner: Arc::downgrade(&self.inner),
            };
            produce(resolver, sink);
        }
    }

    /// Settles the promise with `value` and invokes every registered
    /// success handler in registration order, then the finally handlers.
    /// A no-op once the promise is already settled.
    pub fn fulfill(&self, value: T) {
        let callbacks = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_unsettled() {
                return;
            }
            inner.state = State::Fulfilled {
                value: value.clone(),
            };
            inner.producer = None;
            inner.root_start = None;
            std::mem::take(&mut inner.callbacks)
        };
        log::trace!("promise fulfilled");
        let Callbacks {
            mut success,
            mut finally,
            ..
        } = callbacks;
        for handler in &mut success {
            handler(value.clone());
        }
        for handler in &mut finally {
            handler();
        }
    }

    /// Settles the promise with `error` and invokes every registered
    /// failure handler in registration order, then the finally handlers.
    /// With a retry budget (`set_retries`) the handler collections survive
    /// for a future retry settlement instead of being cleared.
    pub fn reject(&self, error: Error) {
        let (mut callbacks, keep) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_unsettled() {
                return;
            }
            inner.state = State::Rejected {
                error: error.clone(),
            };
            let keep = inner.retries > 0;
            if !keep {
                inner.producer = None;
                inner.root_start = None;
            }
            (std::mem::take(&mut inner.callbacks), keep)
        };
        log::trace!("promise rejected: {error}");
        for handler in &mut callbacks.fail {
            handler(error.clone());
        }
        for handler in &mut callbacks.finally {
            handler();
        }
        if keep {
            // A terminal state blocks new registrations, so the collections
            // are still empty and the survivors keep their original order.
            self.inner.lock().unwrap().callbacks = callbacks;
        }
    }

    /// Records a progress fraction and dispatches it to the registered
    /// progress handlers. `0` is the no-signal default and is never
    /// dispatched. No effect once settled.
    pub fn set_progress(&self, fraction: f32) {
        let mut handlers = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_unsettled() {
                return;
            }
            inner.state = State::Pending { progress: fraction };
            if fraction == 0.0 {
                return;
            }
            std::mem::take(&mut inner.callbacks.progress)
        };
        for handler in &mut handlers {
            handler(fraction);
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_unsettled() || inner.retries > 0 {
            // Handlers attached during dispatch queue up behind the originals.
            let newcomers = std::mem::replace(&mut inner.callbacks.progress, handlers);
            inner.callbacks.progress.extend(newcomers);
        }
    }

    /// Attach-or-fire for a full observer triple. On a settled promise the
    /// matching handler runs immediately on the calling thread and nothing
    /// is registered; otherwise all three are appended for later dispatch.
    pub fn observe<S, F, P>(&self, success: S, failure: F, progress: P)
    where
        S: FnMut(T) + Send + 'static,
        F: FnMut(Error) + Send + 'static,
        P: FnMut(f32) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            State::Fulfilled { value } => {
                let value = value.clone();
                drop(inner);
                let mut success = success;
                success(value);
            }
            State::Rejected { error } => {
                let error = error.clone();
                drop(inner);
                let mut failure = failure;
                failure(error);
            }
            State::Dormant | State::Pending { .. } => {
                inner.callbacks.success.push(Box::new(success));
                inner.callbacks.fail.push(Box::new(failure));
                inner.callbacks.progress.push(Box::new(progress));
            }
        }
    }

    pub fn on_success<F>(&self, handler: F) -> &Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            State::Fulfilled { value } => {
                let value = value.clone();
                drop(inner);
                let mut handler = handler;
                handler(value);
            }
            State::Rejected { .. } => {}
            State::Dormant | State::Pending { .. } => {
                inner.callbacks.success.push(Box::new(handler));
            }
        }
        self
    }

    pub fn on_failure<F>(&self, handler: F) -> &Self
    where
        F: FnMut(Error) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            State::Rejected { error } => {
                let error = error.clone();
                drop(inner);
                let mut handler = handler;
                handler(error);
            }
            State::Fulfilled { .. } => {}
            State::Dormant | State::Pending { .. } => {
                inner.callbacks.fail.push(Box::new(handler));
            }
        }
        self
    }

    /// Progress handlers only ever see future non-zero ticks; attaching to
    /// a settled promise registers nothing.
    pub fn on_progress<F>(&self, handler: F) -> &Self
    where
        F: FnMut(f32) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_unsettled() {
            inner.callbacks.progress.push(Box::new(handler));
        }
        self
    }

    /// Runs on either terminal settlement, after the success or failure
    /// handlers. Fires immediately if the promise is already settled.
    pub fn on_finally<F>(&self, handler: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_unsettled() {
            inner.callbacks.finally.push(Box::new(handler));
        } else {
            drop(inner);
            let mut handler = handler;
            handler();
        }
        self
    }

    pub fn is_started(&self) -> bool {
        !self.inner.lock().unwrap().state.is_dormant()
    }

    /// The last reported progress fraction, while the promise is pending.
    pub fn current_progress(&self) -> Option<f32> {
        match self.inner.lock().unwrap().state {
            State::Pending { progress } => Some(progress),
            _ => None,
        }
    }

    /// Retry budget: while above zero, a rejection leaves every registered
    /// handler in place for a future retry settlement. No retry driver is
    /// provided here; this is the knob one would build it on.
    pub fn set_retries(&self, count: u32) {
        self.inner.lock().unwrap().retries = count;
    }

    /// Returns a settled promise to dormant so it can be driven again.
    /// The hook a retry driver would use.
    #[allow(dead_code)]
    pub(crate) fn reset(&self) {
        self.inner.lock().unwrap().state = State::Dormant;
    }

    /// A fresh promise wired into this one's pipeline: it inherits the root
    /// start trigger (or adopts this promise's start as the trigger if this
    /// is the root) and the shared root-started flag.
    pub(crate) fn new_linked(&self) -> Promise<T> {
        let linked = Promise::empty();
        let (root_start, root_started) = {
            let inner = self.inner.lock().unwrap();
            let trigger = inner.root_start.clone().unwrap_or_else(|| {
                let origin = self.clone();
                Arc::new(move || origin.start()) as StartFn
            });
            (trigger, inner.root_started.clone())
        };
        {
            let mut inner = linked.inner.lock().unwrap();
            inner.root_start = Some(root_start);
            inner.root_started = root_started;
        }
        linked
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Clone) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value| sink.lock().unwrap().push(value))
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let promise: Promise<i32> = Promise::empty();
        let (seen, record) = recorder::<&'static str>();
        let first = record.clone();
        let second = record.clone();
        promise.on_success(move |_| first("first"));
        promise.on_success(move |_| second("second"));
        promise.on_finally(move || record("finally"));
        promise.fulfill(1);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "finally"]);
    }

    #[test]
    fn attach_after_fulfill_fires_immediately() {
        let promise = Promise::resolved(7);
        let (seen, record) = recorder();
        promise.on_success(move |value| record(value));
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn attach_after_reject_fires_immediately() {
        let promise: Promise<i32> = Promise::rejected(Arc::new(Boom));
        let (seen, record) = recorder();
        promise.on_failure(move |error| record(error.to_string()));
        assert_eq!(*seen.lock().unwrap(), vec!["boom".to_string()]);
    }

    #[test]
    fn first_settlement_wins() {
        let promise: Promise<i32> = Promise::empty();
        let (values, record_value) = recorder();
        let (errors, record_error) = recorder();
        promise.on_success(move |value| record_value(value));
        promise.on_failure(move |error| record_error(error.to_string()));
        promise.fulfill(1);
        promise.reject(Arc::new(Boom));
        promise.fulfill(2);
        assert_eq!(*values.lock().unwrap(), vec![1]);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn progress_zero_is_never_dispatched() {
        let promise: Promise<i32> = Promise::empty();
        let (ticks, record) = recorder();
        promise.on_progress(move |fraction| record(fraction));
        promise.set_progress(0.0);
        promise.set_progress(0.5);
        assert_eq!(*ticks.lock().unwrap(), vec![0.5]);
        assert_eq!(promise.current_progress(), Some(0.5));
    }

    #[test]
    fn rejection_fires_failure_then_finally() {
        let promise: Promise<i32> = Promise::empty();
        let (seen, record) = recorder::<&'static str>();
        let on_fail = record.clone();
        let (values, record_value) = recorder();
        promise.on_success(move |value| record_value(value));
        promise.on_failure(move |_| on_fail("fail"));
        promise.on_finally(move || record("finally"));
        promise.reject(Arc::new(Boom));
        assert_eq!(*seen.lock().unwrap(), vec!["fail", "finally"]);
        assert!(values.lock().unwrap().is_empty());
    }

    #[test]
    fn producer_runs_once_on_first_start() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let promise = Promise::from_producer(move |resolver| {
            counter.fetch_add(1, Ordering::SeqCst);
            resolver.resolve(42);
        });
        let (values, record) = recorder();
        promise.on_success(move |value| record(value));
        promise.start();
        promise.start();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*values.lock().unwrap(), vec![42]);
    }

    #[test]
    fn progress_producer_reports_then_resolves() {
        let promise = Promise::from_progress_producer(|resolver, progress| {
            progress.report(0.5);
            resolver.resolve(42);
        });
        let (ticks, record_tick) = recorder();
        let (values, record_value) = recorder();
        promise.on_progress(move |fraction| record_tick(fraction));
        promise.on_success(move |value| record_value(value));
        promise.start();
        assert_eq!(*ticks.lock().unwrap(), vec![0.5]);
        assert_eq!(*values.lock().unwrap(), vec![42]);
    }

    #[test]
    fn retry_budget_keeps_handlers_across_rejections() {
        let promise: Promise<i32> = Promise::empty();
        promise.set_retries(1);
        let (errors, record) = recorder();
        promise.on_failure(move |error| record(error.to_string()));
        promise.reject(Arc::new(Boom));
        promise.reset();
        promise.reject(Arc::new(Boom));
        assert_eq!(errors.lock().unwrap().len(), 2);
    }

    #[test]
    fn settle_after_drop_is_ignored() {
        let promise: Promise<i32> = Promise::empty();
        let resolver = Resolver {
            inner: Arc::downgrade(&promise.inner),
        };
        drop(promise);
        resolver.resolve(1);
    }
}
