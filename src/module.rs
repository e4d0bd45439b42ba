use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, info_span, Instrument as _};

use crate::{
    annotation::Annotation,
    any::Value,
    class::{ClassBuilder, Injectable},
    config::Config,
    errors::{AnnotationErrorKind, ModuleErrorKind, ResolveErrorKind},
    injector::Injector,
    provider::{merge_favoring_left, merge_favoring_right, normalize_providers, ProviderRecord},
    registry::Registry,
    strategy::{Awaiting, Blocking, Strategy},
    token::Token,
};

/// Class kind marking a module. Its arguments are [`ModuleDeclaration`].
pub const MODULE: Annotation = Annotation::class::<ModuleDeclaration>("Module");

/// What a module owns, imports and exposes
#[derive(Debug, Clone, Default)]
pub struct ModuleDeclaration {
    pub imports: Vec<ProviderRecord>,
    /// Tokens of own providers visible to importing modules
    pub exports: Vec<Token>,
    pub providers: Vec<ProviderRecord>,
    /// Providers resolved once and visible to every module, read from root modules only
    pub shared_providers: Vec<ProviderRecord>,
}

impl ModuleDeclaration {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn imports<P: Into<ProviderRecord>>(mut self, imports: impl IntoIterator<Item = P>) -> Self {
        self.imports.extend(normalize_providers(imports));
        self
    }

    #[must_use]
    pub fn exports<T: Into<Token>>(mut self, exports: impl IntoIterator<Item = T>) -> Self {
        self.exports.extend(exports.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn providers<P: Into<ProviderRecord>>(mut self, providers: impl IntoIterator<Item = P>) -> Self {
        self.providers.extend(normalize_providers(providers));
        self
    }

    #[must_use]
    pub fn shared_providers<P: Into<ProviderRecord>>(mut self, providers: impl IntoIterator<Item = P>) -> Self {
        self.shared_providers.extend(normalize_providers(providers));
        self
    }
}

impl<T: Injectable> ClassBuilder<T> {
    /// Declares the class as a module
    ///
    /// # Errors
    /// Never fails for the built-in kind, kept fallible to chain with other declarations
    pub fn module(&mut self, declaration: ModuleDeclaration) -> Result<&mut Self, AnnotationErrorKind> {
        self.annotate(&MODULE, declaration)
    }
}

fn declaration_of(registry: &Registry, module: &ProviderRecord) -> Result<ModuleDeclaration, ModuleErrorKind> {
    let not_a_module = || {
        let err = ModuleErrorKind::NotAModule {
            module: module.provide.clone(),
        };
        error!("{}", err);
        err
    };

    let class = module.class_ref().ok_or_else(not_a_module)?;
    let record = registry.class_metadata(&MODULE, class)?.ok_or_else(not_a_module)?;
    record.args.get::<ModuleDeclaration>().cloned().ok_or_else(not_a_module)
}

/// Entry points composing a root module into a [`ModuleGraph`]
pub struct ModuleComposer;

impl ModuleComposer {
    /// Composes `root` and its imports over the global registry.
    /// `mutable_tokens` applies to every module injector and to the shared one.
    ///
    /// # Errors
    /// Returns an error if a module can't be composed or one of its providers can't be resolved
    pub fn create_and_resolve(
        root: impl Into<ProviderRecord>,
        shared_providers: Vec<ProviderRecord>,
        mutable_tokens: impl IntoIterator<Item = Token>,
    ) -> Result<ModuleGraph, ModuleErrorKind> {
        Self::create_and_resolve_with::<Blocking>(Registry::global(), root, shared_providers, mutable_tokens)
    }

    pub fn create_and_resolve_async(
        root: impl Into<ProviderRecord>,
        shared_providers: Vec<ProviderRecord>,
        mutable_tokens: impl IntoIterator<Item = Token>,
    ) -> BoxFuture<'static, Result<ModuleGraph, ModuleErrorKind>> {
        Self::create_and_resolve_with::<Awaiting>(Registry::global(), root, shared_providers, mutable_tokens)
    }

    pub fn create_and_resolve_with<S: Strategy>(
        registry: Arc<Registry>,
        root: impl Into<ProviderRecord>,
        shared_providers: Vec<ProviderRecord>,
        mutable_tokens: impl IntoIterator<Item = Token>,
    ) -> S::Output<Result<ModuleGraph, ModuleErrorKind>> {
        let root = root.into();
        let config = Config::with_mutable_tokens(mutable_tokens);

        S::execute(Box::pin(async move {
            let shared = Injector::new_with_config(registry.clone(), config.clone());
            shared.set_name(Token::name("shared"))?;

            let graph = ModuleGraph {
                inner: Arc::new(GraphInner {
                    registry,
                    config,
                    shared,
                    state: Mutex::new(GraphState::default()),
                }),
            };
            graph.share(shared_providers).await?;
            graph.compose_root(root).await?;

            Ok::<_, ModuleErrorKind>(graph)
        }))
    }
}

#[derive(Default)]
struct GraphState {
    shared_tokens: Vec<Token>,
    injectors: BTreeMap<Token, Injector>,
    metadata: BTreeMap<Token, ModuleDeclaration>,
}

struct GraphInner {
    registry: Arc<Registry>,
    config: Config,
    shared: Injector,
    state: Mutex<GraphState>,
}

/// Named injectors of composed modules, keyed by module token.
/// Module injectors aren't nested, they only share the shared-provider injector.
#[derive(Clone)]
pub struct ModuleGraph {
    inner: Arc<GraphInner>,
}

impl ModuleGraph {
    /// Module instance
    ///
    /// # Errors
    /// Returns [`ModuleErrorKind::NotFound`] if the module isn't composed in this graph
    pub fn get(&self, module: impl Into<Token>) -> Result<Value, ModuleErrorKind> {
        let module = module.into();
        let injector = self.get_injector(module.clone())?;
        Ok(injector.get(&module, None)?)
    }

    /// # Errors
    /// Returns an error if the module isn't composed or isn't a `T`
    pub fn get_as<T: Send + Sync + 'static>(&self, module: impl Into<Token>) -> Result<Arc<T>, ModuleErrorKind> {
        let module = module.into();
        let injector = self.get_injector(module.clone())?;
        Ok(injector.get_as::<T>(&module)?)
    }

    /// # Errors
    /// Returns [`ModuleErrorKind::NotFound`] if the module isn't composed in this graph
    pub fn get_injector(&self, module: impl Into<Token>) -> Result<Injector, ModuleErrorKind> {
        let module = module.into();
        self.injector(&module).ok_or_else(|| {
            let err = ModuleErrorKind::NotFound { module };
            error!("{}", err);
            err
        })
    }

    #[must_use]
    pub fn has(&self, module: impl Into<Token>) -> bool {
        self.inner.state.lock().injectors.contains_key(&module.into())
    }

    /// Destroys the module injector and forgets the module.
    /// Modules importing it keep the instances they already received.
    pub fn remove(&self, module: impl Into<Token>) -> bool {
        let module = module.into();
        let removed = {
            let mut state = self.inner.state.lock();
            state.metadata.remove(&module);
            state.injectors.remove(&module)
        };

        match removed {
            Some(injector) => {
                injector.destroy();
                debug!(%module, "Module removed");
                true
            }
            None => false,
        }
    }

    /// Declarations of every composed module
    #[must_use]
    pub fn get_all_metadata(&self) -> BTreeMap<Token, ModuleDeclaration> {
        self.inner.state.lock().metadata.clone()
    }

    #[inline]
    #[must_use]
    pub fn shared_injector(&self) -> &Injector {
        &self.inner.shared
    }

    /// Composes another root module into this graph
    ///
    /// # Errors
    /// Returns [`ModuleErrorKind::AlreadyInitialized`] if the module is already composed
    pub fn resolve(&self, module: impl Into<ProviderRecord>) -> Result<Injector, ModuleErrorKind> {
        self.resolve_with::<Blocking>(module)
    }

    pub fn resolve_async(&self, module: impl Into<ProviderRecord>) -> BoxFuture<'static, Result<Injector, ModuleErrorKind>> {
        self.resolve_with::<Awaiting>(module)
    }

    pub fn resolve_with<S: Strategy>(&self, module: impl Into<ProviderRecord>) -> S::Output<Result<Injector, ModuleErrorKind>> {
        let graph = self.clone();
        let module = module.into();
        S::execute(Box::pin(async move { graph.compose_root(module).await }))
    }

    fn injector(&self, module: &Token) -> Option<Injector> {
        self.inner.state.lock().injectors.get(module).cloned()
    }

    fn metadata(&self, module: &Token) -> Option<ModuleDeclaration> {
        self.inner.state.lock().metadata.get(module).cloned()
    }

    /// Resolves shared providers into the shared injector, the first provider of a token wins
    async fn share(&self, providers: Vec<ProviderRecord>) -> Result<(), ModuleErrorKind> {
        for provider in providers {
            let token = provider.provide.clone();
            if self.inner.shared.has(&token) {
                continue;
            }

            self.inner.shared.resolve_with_providers(provider, Vec::new()).await?;
            self.inner.state.lock().shared_tokens.push(token);
        }
        Ok(())
    }

    /// Shared instances as value records
    fn shared_records(&self) -> Result<Vec<ProviderRecord>, ResolveErrorKind> {
        let tokens = self.inner.state.lock().shared_tokens.clone();
        tokens
            .into_iter()
            .map(|token| {
                let value = self.inner.shared.get(&token, None)?;
                Ok(ProviderRecord::shared(token, value))
            })
            .collect()
    }

    async fn compose_root(&self, root: ProviderRecord) -> Result<Injector, ModuleErrorKind> {
        if self.injector(&root.provide).is_some() {
            let err = ModuleErrorKind::AlreadyInitialized { module: root.provide };
            error!("{}", err);
            return Err(err);
        }

        let declaration = declaration_of(&self.inner.registry, &root)?;
        self.share(declaration.shared_providers).await?;
        self.compose(root, Vec::new()).await
    }

    fn compose(&self, module: ProviderRecord, path: Vec<Token>) -> BoxFuture<'static, Result<Injector, ModuleErrorKind>> {
        let graph = self.clone();
        let span = info_span!("compose", module = %module.provide);

        Box::pin(
            async move {
                let token = module.provide.clone();
                if let Some(injector) = graph.injector(&token) {
                    debug!("Already composed");
                    return Ok(injector);
                }
                if path.contains(&token) {
                    let mut chain = path;
                    chain.push(token);
                    let err = ModuleErrorKind::CyclicImport { chain };
                    error!("{}", err);
                    return Err(err);
                }

                let declaration = declaration_of(&graph.inner.registry, &module)?;
                let mut path = path;
                path.push(token.clone());

                let mut imported = Vec::new();
                for import in &declaration.imports {
                    let import_injector = graph.compose(import.clone(), path.clone()).await?;
                    let exports = graph
                        .metadata(&import.provide)
                        .map(|import| import.exports)
                        .unwrap_or_default();
                    for export in exports {
                        let value = import_injector.get(&export, None)?;
                        imported.push(ProviderRecord::shared(export, value));
                    }
                }

                // Own providers win over imported ones, shared ones win over both
                let providers = merge_favoring_left(declaration.providers.clone(), imported);
                let mut providers = merge_favoring_right(providers, graph.shared_records()?);
                // Live instances first, so own providers may depend on them
                providers.sort_by_key(|provider| !provider.is_value());

                let injector = Injector::new_with_config(graph.inner.registry.clone(), graph.inner.config.clone());
                injector.set_name(token.clone())?;
                injector.resolve_with_providers(module, providers).await?;

                {
                    let mut state = graph.inner.state.lock();
                    state.injectors.insert(token.clone(), injector.clone());
                    state.metadata.insert(token, declaration);
                }

                debug!("Module composed");
                Ok::<_, ModuleErrorKind>(injector)
            }
            .instrument(span),
        )
    }
}
