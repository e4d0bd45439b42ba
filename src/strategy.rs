use futures::{executor::block_on, future::BoxFuture};

/// How resolution is driven.
///
/// Resolution itself is a single asynchronous routine.
/// [`Blocking`] drives it to completion on the calling thread,
/// [`Awaiting`] hands the future to the caller.
pub trait Strategy {
    type Output<T: Send + 'static>;

    fn execute<T: Send + 'static>(future: BoxFuture<'static, T>) -> Self::Output<T>;
}

/// Runs resolution on the calling thread.
/// Pending factories and lifecycle hooks are driven to completion before returning,
/// so it must not be used from inside an async runtime worker.
pub struct Blocking;

impl Strategy for Blocking {
    type Output<T: Send + 'static> = T;

    #[inline]
    fn execute<T: Send + 'static>(future: BoxFuture<'static, T>) -> T {
        block_on(future)
    }
}

pub struct Awaiting;

impl Strategy for Awaiting {
    type Output<T: Send + 'static> = BoxFuture<'static, T>;

    #[inline]
    fn execute<T: Send + 'static>(future: BoxFuture<'static, T>) -> BoxFuture<'static, T> {
        future
    }
}
