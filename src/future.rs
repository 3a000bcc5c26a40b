//! `Future` adapter over an observed promise.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::promise::Promise;
use crate::WaitError;

/// Awaitable view of a promise.
///
/// # Examples
///
/// ```
/// use futures::executor::block_on;
/// use promise_chain::Promise;
/// use std::thread;
///
/// let promise = Promise::empty();
/// let waiter = promise.waiter();
/// let task = thread::spawn(move || {
///     block_on(async {
///         println!("Received {:?}", waiter.await.unwrap());
///     })
/// });
/// promise.fulfill(String::from("🍓"));
/// task.join().expect("The waiter thread has panicked");
/// ```
pub struct Waiter<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

struct Shared<T> {
    outcome: Option<Result<T, WaitError>>,
    waker: Option<Waker>,
}

/// Dropped together with the observer closures; if they go away without
/// ever delivering, the waiter is woken as abandoned.
struct SettleGuard<T>(Arc<Mutex<Shared<T>>>);

impl<T> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        let mut shared = self.0.lock().unwrap();
        if shared.outcome.is_none() {
            shared.outcome = Some(Err(WaitError::Abandoned));
            if let Some(waker) = shared.waker.take() {
                waker.wake();
            }
        }
    }
}

fn deliver<T>(shared: &Mutex<Shared<T>>, outcome: Result<T, WaitError>) {
    let mut shared = shared.lock().unwrap();
    if shared.outcome.is_none() {
        shared.outcome = Some(outcome);
    }
    if let Some(waker) = shared.waker.take() {
        waker.wake();
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// An awaitable view of this promise. Works before or after settlement;
    /// a promise dropped while unsettled resolves the waiter with
    /// [`WaitError::Abandoned`].
    pub fn waiter(&self) -> Waiter<T> {
        let shared = Arc::new(Mutex::new(Shared {
            outcome: None,
            waker: None,
        }));
        let guard = Arc::new(SettleGuard(shared.clone()));
        let success_slot = shared.clone();
        let success_guard = guard.clone();
        let failure_slot = shared.clone();
        self.observe(
            move |value| {
                let _ = &success_guard;
                deliver(&success_slot, Ok(value));
            },
            move |error| {
                let _ = &guard;
                deliver(&failure_slot, Err(WaitError::Rejected(error)));
            },
            |_fraction| {},
        );
        Waiter { shared }
    }
}

impl<T> Future for Waiter<T> {
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.lock().unwrap();
        match shared.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                shared.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn waiter_sees_value_resolved_from_another_thread() {
        let promise = Promise::empty();
        let waiter = promise.waiter();
        let task = thread::spawn(move || block_on(async { waiter.await }));
        promise.fulfill(String::from("🍓"));
        assert_eq!(task.join().unwrap().unwrap(), "🍓");
    }

    #[test]
    fn waiter_sees_rejection() {
        let promise: Promise<i32> = Promise::empty();
        let waiter = promise.waiter();
        promise.reject(Arc::new(Boom));
        match block_on(waiter) {
            Err(WaitError::Rejected(error)) => assert_eq!(error.to_string(), "boom"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn dropping_an_unsettled_promise_abandons_the_waiter() {
        let promise: Promise<i32> = Promise::empty();
        let waiter = promise.waiter();
        drop(promise);
        assert!(matches!(block_on(waiter), Err(WaitError::Abandoned)));
    }
}
