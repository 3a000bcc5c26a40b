//! Blocking retrieval, backed by a std mpsc channel.

use std::sync::mpsc;

use crate::promise::Promise;
use crate::{Error, WaitError};

/// Blocks the calling thread until the promise settles, then returns the
/// delivered value or the stored error.
///
/// The observer pair parks on a channel `recv`, so the wait never polls.
/// An already-settled promise returns immediately. If every handle to the
/// promise is dropped before it settles, the wait ends with
/// [`WaitError::Abandoned`].
///
/// The promise's handlers run on whichever thread settles it. Do not call
/// this from that same dispatch context (for example from inside another
/// handler of the same promise): the settling thread would be waiting on
/// itself and deadlock.
///
/// # Examples
///
/// ```
/// use promise_chain::{await_value, Promise};
/// use std::thread;
///
/// let promise = Promise::empty();
/// let producer = promise.clone();
/// thread::spawn(move || producer.fulfill(String::from("🍓")));
/// println!("Received {:?}", await_value(&promise).unwrap());
/// ```
pub fn await_value<T>(promise: &Promise<T>) -> Result<T, WaitError>
where
    T: Clone + Send + 'static,
{
    let (sender, receiver) = mpsc::channel::<Result<T, Error>>();
    let fail_sender = sender.clone();
    promise.observe(
        move |value| {
            let _ = sender.send(Ok(value));
        },
        move |error| {
            let _ = fail_sender.send(Err(error));
        },
        |_fraction| {},
    );
    match receiver.recv() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(WaitError::Rejected(error)),
        // The promise dropped its callbacks, and with them our senders,
        // without ever delivering.
        Err(_) => Err(WaitError::Abandoned),
    }
}
