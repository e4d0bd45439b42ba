use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use tracing::{debug, debug_span, error, info_span, warn, Instrument as _};

use crate::{
    any::{value_type_id, TypeInfo, Value},
    class::{Arguments, Class, Instantiation, Property},
    config::Config,
    errors::{InjectorErrorKind, Named, ResolveErrorKind},
    interceptor::{Chain, Interceptors, Step},
    provider::{ProviderKind, ProviderRecord},
    registry::Registry,
    strategy::{Awaiting, Blocking, Strategy},
    token::Token,
};

#[derive(Default)]
struct State {
    providers: BTreeMap<Token, Value>,
    parent: Option<Injector>,
    children: Vec<Injector>,
    name: Option<Token>,
}

struct InjectorInner {
    state: Mutex<State>,
    registry: Arc<Registry>,
    config: Config,
}

/// Hierarchical table of resolved instances.
///
/// Lookups fall back to the parent chain, registration is always local.
/// Cloning gives another handle to the same injector.
///
/// A parent keeps its children alive and a child keeps its parent alive,
/// so an attached subtree lives until it's detached or destroyed.
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

impl Injector {
    /// Root injector over the global registry
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_config(Registry::global(), Config::default())
    }

    #[must_use]
    pub fn new_with_config(registry: Arc<Registry>, config: Config) -> Self {
        Self {
            inner: Arc::new(InjectorInner {
                state: Mutex::new(State::default()),
                registry,
                config,
            }),
        }
    }

    /// Empty child sharing the registry and config of this injector
    #[must_use]
    pub fn child(&self) -> Self {
        let child = self.scratch();
        self.inner.state.lock().children.push(child.clone());
        child
    }

    /// Empty scope looking up through this injector without being listed among its children
    fn scratch(&self) -> Self {
        let scratch = Self::new_with_config(self.inner.registry.clone(), self.inner.config.clone());
        scratch.inner.state.lock().parent = Some(self.clone());
        scratch
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Creates a root injector over the global registry and resolves `provider` into it.
    /// The injector is named after the provider's token.
    ///
    /// # Errors
    /// Returns an error if the provider or one of its dependencies can't be resolved
    pub fn create_and_resolve(provider: impl Into<ProviderRecord>, providers: Vec<ProviderRecord>) -> Result<Self, ResolveErrorKind> {
        Self::create_and_resolve_with::<Blocking>(Self::new(), provider, providers)
    }

    /// Same as [`Injector::create_and_resolve`], awaiting pending factories and hooks
    pub fn create_and_resolve_async(
        provider: impl Into<ProviderRecord>,
        providers: Vec<ProviderRecord>,
    ) -> BoxFuture<'static, Result<Self, ResolveErrorKind>> {
        Self::create_and_resolve_with::<Awaiting>(Self::new(), provider, providers)
    }

    /// Creates a child of `parent` and resolves `provider` into it
    ///
    /// # Errors
    /// Returns an error if the provider or one of its dependencies can't be resolved
    pub fn create_and_resolve_child(
        parent: &Self,
        provider: impl Into<ProviderRecord>,
        providers: Vec<ProviderRecord>,
    ) -> Result<Self, ResolveErrorKind> {
        Self::create_and_resolve_with::<Blocking>(parent.child(), provider, providers)
    }

    pub fn create_and_resolve_child_async(
        parent: &Self,
        provider: impl Into<ProviderRecord>,
        providers: Vec<ProviderRecord>,
    ) -> BoxFuture<'static, Result<Self, ResolveErrorKind>> {
        Self::create_and_resolve_with::<Awaiting>(parent.child(), provider, providers)
    }

    /// Names `injector` after `provider` and resolves the provider into it, driven by `S`
    pub fn create_and_resolve_with<S: Strategy>(
        injector: Self,
        provider: impl Into<ProviderRecord>,
        providers: Vec<ProviderRecord>,
    ) -> S::Output<Result<Self, ResolveErrorKind>> {
        let provider = provider.into();
        S::execute(Box::pin(async move {
            injector.set_name(provider.provide.clone())?;
            injector.resolve_with_providers(provider, providers).await?;
            Ok::<_, ResolveErrorKind>(injector)
        }))
    }

    /// Resolves `provider` into this injector after `providers`
    ///
    /// # Errors
    /// Returns an error if the provider or one of its dependencies can't be resolved
    pub fn resolve(&self, provider: impl Into<ProviderRecord>, providers: Vec<ProviderRecord>) -> Result<Value, ResolveErrorKind> {
        Blocking::execute(self.resolve_with_providers(provider.into(), providers))
    }

    pub fn resolve_async(
        &self,
        provider: impl Into<ProviderRecord>,
        providers: Vec<ProviderRecord>,
    ) -> BoxFuture<'static, Result<Value, ResolveErrorKind>> {
        self.resolve_with_providers(provider.into(), providers)
    }

    pub(crate) fn resolve_with_providers(
        &self,
        provider: ProviderRecord,
        providers: Vec<ProviderRecord>,
    ) -> BoxFuture<'static, Result<Value, ResolveErrorKind>> {
        let injector = self.clone();
        let span = debug_span!("resolve", token = %provider.provide, injector = %injector.display_name());

        Box::pin(
            async move {
                for extra in providers {
                    injector.resolve_record(extra).await?;
                }
                injector.resolve_record(provider).await
            }
            .instrument(span),
        )
    }

    /// Materializes one provider into this injector
    fn resolve_record(&self, provider: ProviderRecord) -> BoxFuture<'static, Result<Value, ResolveErrorKind>> {
        let injector = self.clone();

        Box::pin(async move {
            if let Some(value) = injector.local(&provider.provide) {
                debug!(token = %provider.provide, "Already resolved");
                return Ok(value);
            }

            let ProviderRecord { provide, kind, providers } = provider;
            match kind {
                ProviderKind::Value(value) => injector.register(provide, value),
                ProviderKind::Factory(factory) => {
                    let (scope, args) = injector.resolve_dependencies(providers).await?;
                    let value = factory(args).await.map_err(|err| {
                        error!("{}", err);
                        ResolveErrorKind::factory(err)
                    })?;
                    drop(scope);

                    debug!(token = %provide, "Factory called");
                    injector.register(provide, value)
                }
                ProviderKind::Class(class) => {
                    let value = injector.construct(class, providers).await?;
                    let value = injector.register(provide, value)?;

                    (class.after_construct)(value.clone()).await.map_err(|err| {
                        error!("{}", err);
                        ResolveErrorKind::factory(err)
                    })?;
                    Ok(value)
                }
            }
        })
    }

    /// Resolves sub-providers in a scratch child.
    /// Returns the scope to look dependencies up in, with their instances in order.
    async fn resolve_dependencies(&self, providers: Vec<ProviderRecord>) -> Result<(Self, Arguments), ResolveErrorKind> {
        if providers.is_empty() {
            return Ok((self.clone(), Arguments::default()));
        }

        let scratch = self.scratch();
        let mut values = Vec::with_capacity(providers.len());
        let mut tokens = Vec::with_capacity(providers.len());
        for provider in providers {
            tokens.push(provider.provide.clone());
            values.push(scratch.resolve_record(provider).await.map_err(ResolveErrorKind::deps)?);
        }
        Ok((scratch, Arguments::new(values, tokens)))
    }

    async fn construct(&self, class: Class, providers: Vec<ProviderRecord>) -> Result<Value, ResolveErrorKind> {
        let registry = self.inner.registry.clone();
        let (scope, _) = self.resolve_dependencies(providers).await?;

        let tokens = registry.constructor_tokens(&class)?;
        let mut values = Vec::with_capacity(tokens.len());
        for token in &tokens {
            values.push(scope.get(token, Some(&class))?);
        }

        let injections = registry.injected_properties(&class)?;
        let mut properties = Vec::with_capacity(injections.len());
        for injection in injections {
            let value = self.get(&injection.token, Some(&class))?;
            properties.push(Property {
                key: injection.key,
                token: injection.token,
                value,
                is_mutable: injection.is_mutable,
            });
        }

        let interceptors = self.interceptors(&class).await?;

        let value = (class.instantiate)(Instantiation {
            args: Arguments::new(values, tokens),
            properties,
            interceptors,
        })
        .map_err(|err| {
            error!("{}", err);
            ResolveErrorKind::factory(err)
        })?;

        debug!(class = class.name(), "Constructed");
        Ok(value)
    }

    /// Builds the interceptor chains of every intercepted method of `class`
    async fn interceptors(&self, class: &Class) -> Result<Interceptors, ResolveErrorKind> {
        let registry = self.inner.registry.clone();
        let methods = registry.intercepted_methods(class)?;
        if methods.is_empty() {
            return Ok(Interceptors::default());
        }

        let mut chains = Vec::with_capacity(methods.len());
        for (method, records) in methods {
            let mut steps = Vec::with_capacity(records.len());
            for record in records {
                let Some(binding) = record.annotation.binding() else {
                    continue;
                };

                let interceptor_class = (binding.class)();
                let instance = match self.find(&interceptor_class.token()) {
                    Some(instance) => instance,
                    None => self
                        .resolve_record(interceptor_class.into())
                        .await
                        .map_err(ResolveErrorKind::deps)?,
                };
                let interceptor = (binding.cast)(instance.clone()).ok_or_else(|| ResolveErrorKind::IncorrectType {
                    token: interceptor_class.token(),
                    expected: interceptor_class.type_info(),
                    actual: value_type_id(&instance),
                })?;

                steps.push(Step::new(record.annotation.name(), interceptor, record.args));
            }

            let handler_is_async = registry.signature(class, &method)?.is_some_and(|signature| signature.is_async);
            chains.push(Chain::new(method, steps, handler_is_async));
        }

        debug!(class = class.name(), methods = chains.len(), "Interceptors built");
        Ok(Interceptors::new(chains))
    }

    /// Registers a freshly built instance.
    /// If the token got registered meanwhile, the registered instance wins.
    fn register(&self, token: Token, value: Value) -> Result<Value, ResolveErrorKind> {
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.providers.get(&token) {
            if !self.inner.config.is_mutable(&token) {
                warn!(%token, "Resolved concurrently, keeping the first instance");
                return Ok(existing.clone());
            }
        }
        state.providers.insert(token, value.clone());
        Ok(value)
    }

    fn local(&self, token: &Token) -> Option<Value> {
        self.inner.state.lock().providers.get(token).cloned()
    }

    fn find(&self, token: &Token) -> Option<Value> {
        let mut current = self.clone();
        loop {
            let (value, parent) = {
                let state = current.inner.state.lock();
                (state.providers.get(token).cloned(), state.parent.clone())
            };
            if value.is_some() {
                return value;
            }
            current = parent?;
        }
    }

    /// Looks `token` up in this injector, then along the parent chain
    ///
    /// # Errors
    /// Returns [`ResolveErrorKind::ProviderNotFound`] if no injector of the chain has it
    pub fn get(&self, token: &Token, requested_by: Option<&Class>) -> Result<Value, ResolveErrorKind> {
        let span = info_span!("get", %token);
        let _guard = span.enter();

        if let Some(value) = self.find(token) {
            debug!("Found");
            return Ok(value);
        }

        let err = ResolveErrorKind::ProviderNotFound {
            token: token.clone(),
            requested_by: requested_by.map(Class::type_info),
            injector: self.name(),
        };
        error!("{}", err);
        Err(err)
    }

    /// # Errors
    /// Returns an error if the token can't be found or isn't a `T`
    pub fn get_as<T: Send + Sync + 'static>(&self, token: &Token) -> Result<Arc<T>, ResolveErrorKind> {
        let value = self.get(token, None)?;
        let actual = value_type_id(&value);
        value.downcast::<T>().map_err(|_| {
            let err = ResolveErrorKind::IncorrectType {
                token: token.clone(),
                expected: TypeInfo::of::<T>(),
                actual,
            };
            error!("{}", err);
            err
        })
    }

    /// Instance registered under the type of `T`
    ///
    /// # Errors
    /// Returns an error if `T` can't be found
    pub fn get_type<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveErrorKind> {
        self.get_as(&Token::of::<T>())
    }

    /// Whether `token` is registered in this injector, parents aren't checked
    #[must_use]
    pub fn has(&self, token: &Token) -> bool {
        self.inner.state.lock().providers.contains_key(token)
    }

    /// # Errors
    /// Returns [`InjectorErrorKind::ImmutableProvider`] if the token is registered and isn't mutable
    pub fn set(&self, token: Token, value: Value) -> Result<(), InjectorErrorKind> {
        let mut state = self.inner.state.lock();
        if state.providers.contains_key(&token) && !self.inner.config.is_mutable(&token) {
            let err = InjectorErrorKind::ImmutableProvider { token };
            error!("{}", err);
            return Err(err);
        }

        debug!(%token, "Registered");
        state.providers.insert(token, value);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> Option<Token> {
        self.inner.state.lock().name.clone()
    }

    fn display_name(&self) -> String {
        Named(&self.name()).to_string()
    }

    /// Setting the same name again is a no-op
    ///
    /// # Errors
    /// Returns [`InjectorErrorKind::NameAlreadySet`] if the injector has another name
    pub fn set_name(&self, name: Token) -> Result<(), InjectorErrorKind> {
        let mut state = self.inner.state.lock();
        if let Some(current) = state.name.clone() {
            if current == name {
                return Ok(());
            }
            let err = InjectorErrorKind::NameAlreadySet { current, requested: name };
            error!("{}", err);
            return Err(err);
        }

        state.name = Some(name);
        Ok(())
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner.state.lock().parent.clone()
    }

    /// Attached children, in attachment order
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.inner.state.lock().children.clone()
    }

    /// Attaching to the current parent again is a no-op
    ///
    /// # Errors
    /// Returns an error if the injector has another parent or `parent` is one of its descendants
    pub fn set_parent(&self, parent: &Self) -> Result<(), InjectorErrorKind> {
        if let Some(current) = self.parent() {
            if current.ptr_eq(parent) {
                return Ok(());
            }
            let err = InjectorErrorKind::ParentAlreadySet { injector: self.name() };
            error!("{}", err);
            return Err(err);
        }

        let mut ancestor = Some(parent.clone());
        while let Some(current) = ancestor {
            if current.ptr_eq(self) {
                let err = InjectorErrorKind::CyclicParent { injector: self.name() };
                error!("{}", err);
                return Err(err);
            }
            ancestor = current.parent();
        }

        self.inner.state.lock().parent = Some(parent.clone());
        parent.inner.state.lock().children.push(self.clone());
        Ok(())
    }

    /// # Errors
    /// Returns an error if `child` has another parent or is an ancestor of this injector
    #[inline]
    pub fn attach_child(&self, child: &Self) -> Result<(), InjectorErrorKind> {
        child.set_parent(self)
    }

    /// Unlinks this injector from its parent
    pub fn detach(&self) {
        let Some(parent) = self.inner.state.lock().parent.take() else {
            return;
        };
        parent
            .inner
            .state
            .lock()
            .children
            .retain(|child| !child.ptr_eq(self));
    }

    /// Detaches from the parent and forgets every registered instance and child.
    /// Children stay usable. Destroying twice is a no-op.
    pub fn destroy(&self) {
        self.detach();

        let mut state = self.inner.state.lock();
        state.providers.clear();
        state.children.clear();

        debug!(injector = %Named(&state.name), "Destroyed");
    }

    /// This injector and its descendants holding `token` locally, in depth-first pre-order.
    /// Scratch scopes of sub-providers aren't children and aren't searched.
    #[must_use]
    pub fn find_injectors_holding(&self, token: &Token) -> Vec<Self> {
        let mut found = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(injector) = stack.pop() {
            if injector.has(token) {
                found.push(injector.clone());
            }
            stack.extend(injector.children().into_iter().rev());
        }
        found
    }

    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Injector {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Injector {}

impl Debug for Injector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Injector")
            .field("name", &state.name)
            .field("tokens", &state.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
