//! Application bootstrap and lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::ApplicationOptions;
use crate::container::Container;
use crate::context::{ContextId, ContextIdFactory, ContextIdStrategy};
use crate::error::{DiError, DiResult};
use crate::graph_inspector::SerializedGraph;
use crate::injector::{InstanceLoader, LazyModuleLoader};
use crate::lifecycle::{call_module_hook, order_for_hook, LifecycleHook};
use crate::module::definition::{ModuleDef, ModuleImport, ModuleType};
use crate::module::Module;
use crate::module_ref::{GetOptions, IntrospectionResult, ModuleRef, ResolveOptions};
use crate::token::{token_of, InjectionToken};

/// Builder for an [`ApplicationContext`].
pub struct ApplicationBuilder {
    root: ModuleImport,
    options: ApplicationOptions,
    overrides: Vec<(ModuleType, Arc<dyn Fn() -> ModuleImport + Send + Sync>)>,
    strategy: Option<Arc<dyn ContextIdStrategy>>,
}

impl ApplicationBuilder {
    pub fn options(mut self, options: ApplicationOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace every import of module `M` with `replacement()` during scanning.
    pub fn override_module<M, F>(mut self, replacement: F) -> Self
    where
        M: ModuleDef + Default,
        F: Fn() -> ModuleImport + Send + Sync + 'static,
    {
        self.overrides.push((ModuleType::of::<M>(), Arc::new(replacement)));
        self
    }

    /// Strategy used by [`ContextIdFactory::get_by_request`].
    pub fn context_id_strategy(mut self, strategy: impl ContextIdStrategy + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Scans the graph from the root module and instantiates every static provider.
    pub async fn build(self) -> DiResult<ApplicationContext> {
        let abort = self.options.abort_on_error;
        match self.bootstrap().await {
            Ok(context) => Ok(context),
            Err(err) if abort => {
                error!(error = %err, "bootstrap failed; aborting");
                std::process::exit(1);
            }
            Err(err) => Err(err),
        }
    }

    async fn bootstrap(self) -> DiResult<ApplicationContext> {
        let container = Container::new(self.options);
        for (module, replacement) in self.overrides {
            container.add_override(module, replacement);
        }
        if let Some(strategy) = self.strategy {
            container.context_id_factory().apply_shared(strategy);
        }

        let root = crate::scanner::DependenciesScanner::new(container.clone())
            .scan(self.root)
            .await?;
        InstanceLoader::new(&container)
            .create_instances_of_dependencies(&container.modules())
            .await?;
        info!(root = root.name(), modules = container.modules().len(), "application context ready");
        Ok(ApplicationContext {
            root_ref: root.module_ref(),
            root,
            container,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

/// A bootstrapped module graph.
///
/// ```rust
/// use ferrous_modules::{ApplicationContext, ModuleDef, ModuleMetadata, Provider};
///
/// struct Greeter { greeting: &'static str }
///
/// #[derive(Default)]
/// struct AppModule;
///
/// impl ModuleDef for AppModule {
///     fn metadata() -> ModuleMetadata {
///         ModuleMetadata::new().provider(Provider::class(|_| Ok(Greeter { greeting: "hello" })))
///     }
/// }
///
/// # futures::executor::block_on(async {
/// let app = ApplicationContext::create::<AppModule>().await.unwrap();
/// let greeter = app.get::<Greeter>().unwrap();
/// assert_eq!(greeter.greeting, "hello");
/// # });
/// ```
pub struct ApplicationContext {
    container: Arc<Container>,
    root: Arc<Module>,
    root_ref: ModuleRef,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl ApplicationContext {
    pub fn builder(root: impl Into<ModuleImport>) -> ApplicationBuilder {
        ApplicationBuilder {
            root: root.into(),
            options: ApplicationOptions::default(),
            overrides: Vec::new(),
            strategy: None,
        }
    }

    /// Bootstraps `M` with default options.
    pub async fn create<M: ModuleDef + Default>() -> DiResult<Self> {
        Self::builder(ModuleImport::of::<M>()).build().await
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn root(&self) -> &Arc<Module> {
        &self.root
    }

    pub fn module_ref(&self) -> &ModuleRef {
        &self.root_ref
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        self.root_ref.get::<T>()
    }

    pub fn get_with<T: Send + Sync + 'static>(&self, token: impl Into<InjectionToken>, options: GetOptions) -> DiResult<Arc<T>> {
        self.root_ref.get_with(token, options)
    }

    pub fn get_all<T: Send + Sync + 'static>(&self, token: impl Into<InjectionToken>) -> DiResult<Vec<Arc<T>>> {
        self.root_ref.get_all(token, GetOptions::default())
    }

    pub async fn resolve<T: Send + Sync + 'static>(&self, context: Option<&ContextId>) -> DiResult<Arc<T>> {
        self.root_ref.resolve::<T>(context).await
    }

    pub async fn resolve_with<T: Send + Sync + 'static>(
        &self,
        token: impl Into<InjectionToken>,
        context: Option<&ContextId>,
        options: ResolveOptions,
    ) -> DiResult<Arc<T>> {
        self.root_ref.resolve_with(token, context, options).await
    }

    pub fn register_request_by_context_id<R: Send + Sync + 'static>(&self, request: Arc<R>, context: &ContextId) -> DiResult<()> {
        self.root_ref.register_request_by_context_id(request, context)
    }

    pub fn introspect(&self, token: impl Into<InjectionToken>) -> DiResult<IntrospectionResult> {
        self.root_ref.introspect(token)
    }

    /// [`ModuleRef`] of the first module registered for class `M`.
    pub fn select<M: ModuleDef + Default>(&self) -> DiResult<ModuleRef> {
        self.container
            .module_by_type(ModuleType::of::<M>())
            .map(|module| module.module_ref())
            .ok_or_else(|| DiError::UnknownModule {
                module: token_of::<M>().display_name(),
            })
    }

    pub fn context_id_factory(&self) -> &ContextIdFactory {
        self.container.context_id_factory()
    }

    pub fn lazy_module_loader(&self) -> LazyModuleLoader {
        LazyModuleLoader::new(Arc::downgrade(&self.container))
    }

    /// Graph recorded when snapshots are enabled.
    pub fn snapshot(&self) -> Option<SerializedGraph> {
        self.container.inspector().graph()
    }

    /// Drops every instance created under `context`. Returns how many were removed.
    pub fn release_context(&self, context: &ContextId) -> usize {
        let removed: usize = self
            .container
            .modules()
            .iter()
            .flat_map(|module| module.wrappers())
            .map(|wrapper| wrapper.remove_instances_by_context_id(context))
            .sum();
        debug!(context = context.id(), removed, "context released");
        removed
    }

    /// Runs module-init then bootstrap hooks, deepest modules first. Idempotent.
    pub async fn init(&self) -> DiResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for hook in [LifecycleHook::ModuleInit, LifecycleHook::ApplicationBootstrap] {
            self.call_hook(hook).await?;
        }
        Ok(())
    }

    /// Runs the teardown hooks, root module first. Idempotent.
    pub async fn close(&self) -> DiResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for hook in [
            LifecycleHook::ModuleDestroy,
            LifecycleHook::BeforeApplicationShutdown,
            LifecycleHook::ApplicationShutdown,
        ] {
            self.call_hook(hook).await?;
        }
        Ok(())
    }

    async fn call_hook(&self, hook: LifecycleHook) -> DiResult<()> {
        debug!(%hook, "calling lifecycle hook");
        for module in order_for_hook(self.container.modules(), hook) {
            call_module_hook(&module, hook).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("root", &self.root.name())
            .field("container", &self.container)
            .finish()
    }
}
