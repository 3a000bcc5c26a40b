//! Chainable callback promises.
//!
//! A [`Promise`] holds a value that a producer will eventually deliver.
//! Observers attach success, failure, progress and finally handlers before
//! or after delivery; whichever side arrives second still sees exactly one
//! invocation. Promises compose into pipelines with [`Promise::chain`] and
//! [`Promise::progress`], and starting any link of a pipeline runs the
//! original producer exactly once.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{await_value, Promise};
//! use std::thread;
//!
//! let promise = Promise::from_producer(|resolver| {
//!     thread::spawn(move || resolver.resolve(String::from("🍓")));
//! });
//! promise.start();
//! println!("Received {:?}", await_value(&promise).unwrap());
//! ```

use std::sync::Arc;

mod chain;
pub mod future;
pub mod promise;
pub mod wait;

pub use crate::future::Waiter;
pub use crate::promise::{ProgressSink, Promise, Resolver};
pub use crate::wait::await_value;

/// The error currency carried by a rejected promise.
///
/// The library never inspects it; it is stored once and handed verbatim to
/// every registered failure handler, which is why it is reference-counted.
pub type Error = Arc<dyn std::error::Error + Send + Sync>;

/// Why a blocking or async wait came back without a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WaitError {
    /// The promise was rejected; carries the producer's error.
    #[error("promise rejected: {0}")]
    Rejected(Error),
    /// Every handle to the promise was dropped before it settled.
    #[error("promise dropped before settling")]
    Abandoned,
}
