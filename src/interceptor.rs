use futures::future::{BoxFuture, FutureExt as _, Shared};
use parking_lot::Mutex;
use std::{
    any::Any,
    borrow::Cow,
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, debug_span};

use crate::{
    annotation::AnnotationArgs,
    any::{TypeInfo, Value},
    errors::InvokeErrorKind,
    outcome::Outcome,
};

/// Arguments of an intercepted call
pub type Args = Vec<Value>;

type Handler = Arc<dyn Fn(Args) -> Outcome<Value, InvokeErrorKind> + Send + Sync>;

/// Wraps calls of an annotated method.
///
/// Implementors receive a [`Method`] handle, call [`Method::invoke`] to continue the chain
/// and may replace the result with [`Method::transform`].
/// Skipping `invoke` short-circuits every inner step and the method itself.
pub trait Interceptor: Send + Sync + 'static {
    /// Marks the whole chain asynchronous up front
    fn is_async(&self) -> bool {
        false
    }

    /// # Errors
    /// Errors are propagated to the caller of the intercepted method
    fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind>;
}

#[derive(Clone)]
pub(crate) struct Step {
    name: &'static str,
    interceptor: Arc<dyn Interceptor>,
    args: AnnotationArgs,
}

impl Step {
    pub(crate) fn new(name: &'static str, interceptor: Arc<dyn Interceptor>, args: AnnotationArgs) -> Self {
        Self { name, interceptor, args }
    }
}

/// Interceptor steps of one method, outermost first
pub(crate) struct Chain {
    method: Cow<'static, str>,
    steps: Box<[Step]>,
    is_async: AtomicBool,
}

impl Chain {
    pub(crate) fn new(method: Cow<'static, str>, steps: Vec<Step>, handler_is_async: bool) -> Self {
        let is_async = handler_is_async || steps.iter().any(|step| step.interceptor.is_async());
        Self {
            method,
            steps: steps.into_boxed_slice(),
            is_async: AtomicBool::new(is_async),
        }
    }

    #[inline]
    fn is_async(&self) -> bool {
        self.is_async.load(Ordering::Acquire)
    }

    /// The flag only goes from sync to async
    fn promote(&self) {
        if !self.is_async.swap(true, Ordering::AcqRel) {
            debug!(method = %self.method, "Chain became asynchronous");
        }
    }
}

/// Interceptor chains installed into an instance, keyed by method name
#[derive(Clone, Default)]
pub struct Interceptors {
    chains: Arc<BTreeMap<Cow<'static, str>, Arc<Chain>>>,
}

impl Interceptors {
    pub(crate) fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self {
            chains: Arc::new(
                chains
                    .into_iter()
                    .map(|chain| (chain.method.clone(), Arc::new(chain)))
                    .collect(),
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.chains.contains_key(method)
    }

    /// Whether calls of `method` currently return pending outcomes
    #[must_use]
    pub fn is_async(&self, method: &str) -> bool {
        self.chains.get(method).is_some_and(|chain| chain.is_async())
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(|method| &**method)
    }

    /// Calls `handler` through the chain of `method`, or directly if it has none.
    ///
    /// The outcome is ready while the chain is synchronous. Once any step
    /// returns a pending outcome the chain is promoted for good
    /// and later calls return a pending outcome wrapping the whole chain.
    pub fn call<H>(&self, method: &str, args: Args, handler: H) -> Outcome<Value, InvokeErrorKind>
    where
        H: Fn(Args) -> Outcome<Value, InvokeErrorKind> + Send + Sync + 'static,
    {
        let Some(chain) = self.chains.get(method) else {
            return handler(args);
        };

        let span = debug_span!("call", method, steps = chain.steps.len());
        let _guard = span.enter();

        let execution = Arc::new(Execution::new(chain.clone(), Arc::new(handler), args));
        if chain.is_async() {
            debug!("Running asynchronously");
            return Outcome::pending(async move {
                execution.run(0).await?;
                execution.result()
            });
        }

        let finished = execution.clone();
        execution.run(0).and_then(move |()| Outcome::ready(finished.result()))
    }
}

impl Debug for Interceptors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.chains.keys()).finish()
    }
}

type StepRun = Shared<BoxFuture<'static, Result<Value, InvokeErrorKind>>>;

#[derive(Clone)]
enum StepState {
    Idle,
    /// The rest of the chain is running synchronously
    Running,
    /// The rest of the chain is pending, later calls await the same run
    Pending(StepRun),
    Done(Result<Value, InvokeErrorKind>),
}

/// State of one call travelling through a chain
struct Execution {
    chain: Arc<Chain>,
    handler: Handler,
    args: Mutex<Args>,
    result: Mutex<Option<Value>>,
    states: Mutex<Vec<StepState>>,
}

impl Execution {
    fn new(chain: Arc<Chain>, handler: Handler, args: Args) -> Self {
        let states = vec![StepState::Idle; chain.steps.len()];
        Self {
            chain,
            handler,
            args: Mutex::new(args),
            result: Mutex::new(None),
            states: Mutex::new(states),
        }
    }

    /// Runs step `index`, or the method itself past the last step
    fn run(self: &Arc<Self>, index: usize) -> Outcome<(), InvokeErrorKind> {
        let outcome = match self.chain.steps.get(index) {
            Some(step) => step.interceptor.invoke(Method {
                execution: self.clone(),
                index,
                name: step.name,
                args: step.args.clone(),
            }),
            None => {
                let args = self.args.lock().clone();
                let execution = self.clone();
                (self.handler)(args).map(move |value| {
                    *execution.result.lock() = Some(value);
                })
            }
        };

        if outcome.is_pending() {
            self.chain.promote();
        }
        outcome
    }

    fn result(&self) -> Result<Value, InvokeErrorKind> {
        self.result
            .lock()
            .clone()
            .ok_or_else(|| InvokeErrorKind::AsyncContractViolation {
                method: self.chain.method.clone(),
            })
    }
}

/// Handle given to an [`Interceptor`] for one call
pub struct Method {
    execution: Arc<Execution>,
    index: usize,
    name: &'static str,
    args: AnnotationArgs,
}

impl Method {
    /// Name of the intercepted method
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.execution.chain.method
    }

    /// Name of the annotation kind that installed this step
    #[inline]
    #[must_use]
    pub const fn interceptor(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub fn args(&self) -> Args {
        self.execution.args.lock().clone()
    }

    /// Arguments of the annotation record that installed this step
    #[inline]
    #[must_use]
    pub const fn decorator_args(&self) -> &AnnotationArgs {
        &self.args
    }

    /// Current result, as set by the method or by a `transform`
    #[inline]
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        self.execution.result.lock().clone()
    }

    /// Call argument `index` as a `T`
    ///
    /// # Errors
    /// Returns [`InvokeErrorKind::InvalidArgument`] if the argument is missing or isn't a `T`
    pub fn arg<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, InvokeErrorKind> {
        self.execution
            .args
            .lock()
            .get(index)
            .cloned()
            .and_then(|arg| arg.downcast::<T>().ok())
            .ok_or_else(|| InvokeErrorKind::InvalidArgument {
                method: self.execution.chain.method.clone(),
                index,
                expected: TypeInfo::of::<T>(),
            })
    }

    pub fn transform<T: Any + Send + Sync>(&self, value: T) {
        self.transform_value(Arc::new(value));
    }

    pub fn transform_value(&self, value: Value) {
        *self.execution.result.lock() = Some(value);
    }

    /// Runs the rest of the chain and returns the result.
    /// Repeated calls from the same step don't run it again,
    /// calls made while it's pending await the same run.
    pub fn invoke(&self) -> Outcome<Value, InvokeErrorKind> {
        {
            let mut states = self.execution.states.lock();
            match &states[self.index] {
                StepState::Done(result) => return Outcome::ready(result.clone()),
                StepState::Pending(run) => return Outcome::pending(run.clone()),
                StepState::Running => return Outcome::ready(self.execution.result()),
                StepState::Idle => {}
            }
            states[self.index] = StepState::Running;
        }

        let execution = self.execution.clone();
        let index = self.index;
        let outcome = self.execution.run(index + 1).then(move |result| {
            let result = result.and_then(|()| execution.result());
            execution.states.lock()[index] = StepState::Done(result.clone());
            Outcome::ready(result)
        });

        match outcome {
            Outcome::Pending(future) => {
                let run = future.shared();
                let mut states = self.execution.states.lock();
                if matches!(states[index], StepState::Running) {
                    states[index] = StepState::Pending(run.clone());
                }
                Outcome::pending(run)
            }
            ready @ Outcome::Ready(_) => ready,
        }
    }

    /// Replaces the call arguments before running the rest of the chain
    pub fn invoke_with_args(&self, args: Args) -> Outcome<Value, InvokeErrorKind> {
        if matches!(self.execution.states.lock()[self.index], StepState::Idle) {
            *self.execution.args.lock() = args;
        }
        self.invoke()
    }
}

impl Debug for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name())
            .field("interceptor", &self.name)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Args, Chain, Interceptor, Interceptors, Method, Step};
    use crate::{
        annotation::AnnotationArgs,
        any::{TypeInfo, Value},
        errors::InvokeErrorKind,
        outcome::Outcome,
    };

    use parking_lot::Mutex;
    use std::{
        sync::{
            atomic::{AtomicU8, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tracing_test::traced_test;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Record {
        label: &'static str,
        log: Log,
    }

    impl Interceptor for Record {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            let label = self.label;
            let log = self.log.clone();
            method.invoke().map(move |value| {
                log.lock().push(label.to_owned());
                let value = value.downcast::<String>().map_or_else(|_| String::new(), |value| (*value).clone());
                method.transform(format!("{value}:{label}"));
            })
        }
    }

    struct Skip;

    impl Interceptor for Skip {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            method.transform(String::from("skipped"));
            Outcome::ok(())
        }
    }

    struct Forget;

    impl Interceptor for Forget {
        fn invoke(&self, _: Method) -> Outcome<(), InvokeErrorKind> {
            Outcome::ok(())
        }
    }

    struct Twice;

    impl Interceptor for Twice {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            let _ = method.invoke();
            method.invoke().map(|_| ())
        }
    }

    struct Sleep;

    impl Interceptor for Sleep {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            Outcome::pending(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                method.invoke().await?;
                Ok(())
            })
        }
    }

    struct Overlap;

    impl Interceptor for Overlap {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            let first = method.invoke();
            let second = method.invoke();
            Outcome::pending(async move {
                let first = first.await?;
                let second = second.await?;
                assert!(Arc::ptr_eq(&first, &second));
                Ok(())
            })
        }
    }

    fn step(interceptor: impl Interceptor) -> Step {
        Step::new("Test", Arc::new(interceptor), AnnotationArgs::empty())
    }

    fn interceptors(steps: Vec<Step>, handler_is_async: bool) -> Interceptors {
        Interceptors::new([Chain::new("run".into(), steps, handler_is_async)])
    }

    fn handler(calls: Arc<AtomicU8>) -> impl Fn(Args) -> Outcome<Value, InvokeErrorKind> + Send + Sync + 'static {
        move |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            let name = args.first().and_then(|arg| arg.downcast_ref::<&str>()).copied().unwrap_or("none");
            Outcome::ok(Arc::new(String::from(name)) as Value)
        }
    }

    fn string(value: &Value) -> String {
        value.downcast_ref::<String>().cloned().unwrap()
    }

    #[test]
    #[traced_test]
    fn test_order_and_transform() {
        let log = Log::default();
        let calls = Arc::new(AtomicU8::new(0));
        let interceptors = interceptors(
            vec![
                step(Record { label: "outer", log: log.clone() }),
                step(Record { label: "inner", log: log.clone() }),
            ],
            false,
        );

        let outcome = interceptors.call("run", vec![Arc::new("call") as Value], handler(calls.clone()));
        assert!(!outcome.is_pending());

        let value = outcome.into_ready().unwrap().unwrap();
        assert_eq!(string(&value), "call:inner:outer");
        assert_eq!(*log.lock(), ["inner", "outer"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_short_circuit() {
        let calls = Arc::new(AtomicU8::new(0));
        let interceptors = interceptors(vec![step(Skip), step(Twice)], false);

        let value = interceptors.call("run", Vec::new(), handler(calls.clone())).into_ready().unwrap().unwrap();

        assert_eq!(string(&value), "skipped");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn test_invoke_is_memoized() {
        let calls = Arc::new(AtomicU8::new(0));
        let interceptors = interceptors(vec![step(Twice)], false);

        let value = interceptors.call("run", Vec::new(), handler(calls.clone())).into_ready().unwrap().unwrap();

        assert_eq!(string(&value), "none");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_missing_value() {
        let interceptors = interceptors(vec![step(Forget)], false);

        let result = interceptors.call("run", Vec::new(), handler(Arc::default())).into_ready().unwrap();

        assert!(matches!(result, Err(InvokeErrorKind::AsyncContractViolation { method }) if method == "run"));
    }

    #[test]
    #[traced_test]
    fn test_without_chain() {
        let calls = Arc::new(AtomicU8::new(0));
        let interceptors = Interceptors::default();

        let value = interceptors.call("run", Vec::new(), handler(calls.clone())).into_ready().unwrap().unwrap();

        assert_eq!(string(&value), "none");
        assert!(!interceptors.contains("run"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_promotion() {
        let log = Log::default();
        let calls = Arc::new(AtomicU8::new(0));
        let interceptors = interceptors(vec![step(Record { label: "outer", log: log.clone() })], false);

        let pending = Arc::new(AtomicU8::new(0));
        let async_handler = {
            let pending = pending.clone();
            let sync = handler(calls.clone());
            move |args: Args| {
                if pending.fetch_add(1, Ordering::SeqCst) == 0 {
                    sync(args)
                } else {
                    let outcome = sync(args);
                    Outcome::pending(async move { outcome.await })
                }
            }
        };
        let async_handler = Arc::new(async_handler);

        let handler = async_handler.clone();
        let first = interceptors.call("run", Vec::new(), move |args| handler(args));
        assert!(!first.is_pending());
        assert!(!interceptors.is_async("run"));

        let handler = async_handler.clone();
        let second = interceptors.call("run", Vec::new(), move |args| handler(args));
        assert!(second.is_pending());
        assert!(interceptors.is_async("run"));
        assert_eq!(string(&second.await.unwrap()), "none:outer");

        let handler = async_handler.clone();
        let third = interceptors.call("run", Vec::new(), move |args| handler(args));
        assert!(third.is_pending());
        assert_eq!(string(&third.await.unwrap()), "none:outer");
        assert_eq!(*log.lock(), ["outer", "outer", "outer"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_async_interceptor() {
        let log = Log::default();
        let interceptors = interceptors(vec![step(Record { label: "outer", log: log.clone() }), step(Sleep)], false);

        let outcome = interceptors.call("run", vec![Arc::new("call") as Value], handler(Arc::default()));
        assert!(outcome.is_pending());
        assert_eq!(string(&outcome.await.unwrap()), "call:outer");
        assert!(interceptors.is_async("run"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_pending_invoke_is_shared() {
        let calls = Arc::new(AtomicU8::new(0));
        let interceptors = interceptors(vec![step(Overlap), step(Sleep)], false);

        let outcome = interceptors.call("run", vec![Arc::new("call") as Value], handler(calls.clone()));
        assert!(outcome.is_pending());
        assert_eq!(string(&outcome.await.unwrap()), "call");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_declared_async_handler() {
        let interceptors = interceptors(vec![step(Forget)], true);

        let outcome = interceptors.call("run", Vec::new(), handler(Arc::default()));
        assert!(outcome.is_pending());
        assert!(matches!(outcome.await, Err(InvokeErrorKind::AsyncContractViolation { .. })));
    }
}
