//! Derived promises: value-inspecting chains and progress taps.

use crate::promise::Promise;

impl<T: Clone + Send + 'static> Promise<T> {
    /// A new promise linked downstream of this one. On success the side
    /// effect runs first, then the linked promise is fulfilled with the
    /// same value; rejection and progress pass through unchanged.
    ///
    /// Chaining starts nothing: start any link (or the tail) and the root
    /// producer runs exactly once for the whole pipeline.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_chain::Promise;
    ///
    /// let fetched = Promise::resolved(String::from("body"));
    /// let logged = fetched.chain(|body| println!("got {body}"));
    /// logged.on_success(|body| assert_eq!(body, "body"));
    /// ```
    pub fn chain<F>(&self, mut side_effect: F) -> Promise<T>
    where
        F: FnMut(T) + Send + 'static,
    {
        let linked = self.new_linked();
        let on_success = linked.clone();
        let on_failure = linked.clone();
        let on_progress = linked.clone();
        self.observe(
            move |value: T| {
                side_effect(value.clone());
                on_success.fulfill(value);
            },
            move |error| on_failure.reject(error),
            move |fraction| on_progress.set_progress(fraction),
        );
        linked
    }

    /// A new linked promise whose observer sees every non-zero progress
    /// tick of this one before it is forwarded downstream. Starts the
    /// pipeline eagerly, so the producer is already running when this
    /// returns.
    pub fn progress<F>(&self, mut observer: F) -> Promise<T>
    where
        F: FnMut(f32) + Send + 'static,
    {
        self.start();
        let linked = self.new_linked();
        let on_success = linked.clone();
        let on_failure = linked.clone();
        let on_progress = linked.clone();
        self.observe(
            move |value| on_success.fulfill(value),
            move |error| on_failure.reject(error),
            move |fraction| {
                observer(fraction);
                on_progress.set_progress(fraction);
            },
        );
        linked.start();
        linked
    }
}
