use futures::future::{self, BoxFuture, Either, Ready};
use std::{
    fmt::{self, Debug, Formatter},
    future::{Future, IntoFuture},
};

/// Result of work that may complete either immediately or later.
///
/// Synchronous code inspects [`Outcome::Ready`] without an executor,
/// asynchronous code simply `.await`s the outcome.
pub enum Outcome<T, E> {
    Ready(Result<T, E>),
    Pending(BoxFuture<'static, Result<T, E>>),
}

impl<T, E> Outcome<T, E> {
    #[inline]
    #[must_use]
    pub const fn ready(result: Result<T, E>) -> Self {
        Self::Ready(result)
    }

    #[inline]
    #[must_use]
    pub const fn ok(value: T) -> Self {
        Self::Ready(Ok(value))
    }

    #[inline]
    #[must_use]
    pub const fn err(err: E) -> Self {
        Self::Ready(Err(err))
    }

    #[inline]
    #[must_use]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    #[inline]
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Takes the result if it's already available
    ///
    /// # Errors
    /// Returns the outcome back if it's still pending
    #[inline]
    pub fn into_ready(self) -> Result<Result<T, E>, Self> {
        match self {
            Self::Ready(result) => Ok(result),
            pending @ Self::Pending(_) => Err(pending),
        }
    }
}

impl<T, E> Outcome<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Chains `f` after the outcome, staying synchronous while both sides are ready
    pub fn then<U, F>(self, f: F) -> Outcome<U, E>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, E>) -> Outcome<U, E> + Send + 'static,
    {
        match self {
            Self::Ready(result) => f(result),
            Self::Pending(future) => Outcome::Pending(Box::pin(async move { f(future.await).await })),
        }
    }

    pub fn and_then<U, F>(self, f: F) -> Outcome<U, E>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Outcome<U, E> + Send + 'static,
    {
        self.then(|result| match result {
            Ok(value) => f(value),
            Err(err) => Outcome::Ready(Err(err)),
        })
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U, E>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(|value| Outcome::Ready(Ok(f(value))))
    }

    pub fn map_err<E2, F>(self, f: F) -> Outcome<T, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        match self {
            Self::Ready(result) => Outcome::Ready(result.map_err(f)),
            Self::Pending(future) => Outcome::Pending(Box::pin(async move { future.await.map_err(f) })),
        }
    }
}

impl<T, E> IntoFuture for Outcome<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Either<Ready<Result<T, E>>, BoxFuture<'static, Result<T, E>>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Ready(result) => Either::Left(future::ready(result)),
            Self::Pending(future) => Either::Right(future),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Self::Ready(result)
    }
}

impl<T: Debug, E: Debug> Debug for Outcome<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}
