//! Handle for reaching providers from outside constructor injection.

use std::sync::{Arc, Weak};
use tracing::trace;

use crate::container::{request_token, Container};
use crate::context::{ContextId, ContextIdFactory, STATIC_CONTEXT};
use crate::dependency::{downcast, AnyArc};
use crate::error::{DependencyContext, DiError, DiResult};
use crate::injector::{Collection, InstanceKey, InstanceLink, InstanceWrapper};
use crate::module::Module;
use crate::provider::{ClassProvider, Provider};
use crate::scope::Scope;
use crate::token::{token_of, InjectionToken};

#[derive(Debug, Default, Clone, Copy)]
pub struct GetOptions {
    /// Only consider providers registered by this module.
    pub strict: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveOptions {
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrospectionResult {
    pub scope: Scope,
}

/// Per-module accessor for the container.
///
/// `get` returns static singletons synchronously; `resolve` builds request
/// and transient instances under a context id. Both search the whole graph
/// unless `strict` is set, in which case only this module's own providers
/// are considered.
#[derive(Clone)]
pub struct ModuleRef {
    module: Weak<Module>,
    container: Weak<Container>,
}

impl ModuleRef {
    pub(crate) fn new(module: Weak<Module>, container: Weak<Container>) -> Self {
        Self { module, container }
    }

    fn parts(&self) -> DiResult<(Arc<Module>, Arc<Container>)> {
        let module = self.module.upgrade().ok_or_else(|| DiError::UnknownModule {
            module: "<dropped>".to_string(),
        })?;
        let container = self.container.upgrade().ok_or_else(|| DiError::UnknownModule {
            module: module.name().to_string(),
        })?;
        Ok((module, container))
    }

    pub fn module(&self) -> Option<Arc<Module>> {
        self.module.upgrade()
    }

    fn links_for(&self, token: &InjectionToken, strict: bool, each: bool) -> DiResult<Vec<InstanceLink>> {
        let (module, container) = self.parts()?;
        let links = container.links();
        if each {
            let all = links.find_all(token)?;
            return Ok(all
                .iter()
                .filter(|link| !strict || &*link.module_id == module.id())
                .cloned()
                .collect());
        }
        let module_id = strict.then(|| module.id());
        Ok(vec![links.find(token, module_id)?.clone()])
    }

    fn prepare(&self, container: &Container, wrapper: &Arc<InstanceWrapper>) -> DiResult<()> {
        let host = wrapper.host().ok_or_else(|| DiError::UnknownElement {
            token: wrapper.name().to_string(),
        })?;
        container.injector().inspect(wrapper, &host)
    }

    fn get_static(&self, container: &Container, link: &InstanceLink) -> DiResult<AnyArc> {
        let wrapper = &link.wrapper;
        self.prepare(container, wrapper)?;
        if wrapper.is_transient() || !wrapper.is_dependency_tree_static() {
            return Err(DiError::InvalidClassScope {
                token: link.token.display_name(),
            });
        }
        wrapper.static_instance().ok_or_else(|| {
            DiError::undefined(
                wrapper.name(),
                DependencyContext::property("instance", wrapper.name()),
                link.module().map(|module| module.name().to_string()),
            )
        })
    }

    /// Static instance registered under type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        self.get_with(token_of::<T>(), GetOptions::default())
    }

    pub fn get_with<T: Send + Sync + 'static>(
        &self,
        token: impl Into<InjectionToken>,
        options: GetOptions,
    ) -> DiResult<Arc<T>> {
        let token = token.into();
        let (_, container) = self.parts()?;
        let links = self.links_for(&token, options.strict, false)?;
        let link = links.first().ok_or_else(|| DiError::UnknownElement {
            token: token.display_name(),
        })?;
        downcast(self.get_static(&container, link)?, &token.display_name())
    }

    /// Every static instance registered under `token`.
    pub fn get_all<T: Send + Sync + 'static>(
        &self,
        token: impl Into<InjectionToken>,
        options: GetOptions,
    ) -> DiResult<Vec<Arc<T>>> {
        let token = token.into();
        let (_, container) = self.parts()?;
        self.links_for(&token, options.strict, true)?
            .iter()
            .map(|link| downcast(self.get_static(&container, link)?, &token.display_name()))
            .collect()
    }

    /// Builds (or reuses) the instance of type `T` for `context`; without a
    /// context a fresh one is created, so each call yields a new instance
    /// for scoped providers.
    pub async fn resolve<T: Send + Sync + 'static>(&self, context: Option<&ContextId>) -> DiResult<Arc<T>> {
        self.resolve_with(token_of::<T>(), context, ResolveOptions::default()).await
    }

    pub async fn resolve_with<T: Send + Sync + 'static>(
        &self,
        token: impl Into<InjectionToken>,
        context: Option<&ContextId>,
        options: ResolveOptions,
    ) -> DiResult<Arc<T>> {
        let token = token.into();
        let link = self
            .links_for(&token, options.strict, false)?
            .into_iter()
            .next()
            .ok_or_else(|| DiError::UnknownElement {
                token: token.display_name(),
            })?;
        let context = context.cloned().unwrap_or_else(ContextIdFactory::create);
        let instance = self.resolve_link(&link, &context).await?;
        downcast(instance, &token.display_name())
    }

    pub async fn resolve_all<T: Send + Sync + 'static>(
        &self,
        token: impl Into<InjectionToken>,
        context: Option<&ContextId>,
        options: ResolveOptions,
    ) -> DiResult<Vec<Arc<T>>> {
        let token = token.into();
        let context = context.cloned().unwrap_or_else(ContextIdFactory::create);
        let mut instances = Vec::new();
        for link in self.links_for(&token, options.strict, true)? {
            let instance = self.resolve_link(&link, &context).await?;
            instances.push(downcast(instance, &token.display_name())?);
        }
        Ok(instances)
    }

    async fn resolve_link(&self, link: &InstanceLink, context: &ContextId) -> DiResult<AnyArc> {
        let (_, container) = self.parts()?;
        self.prepare(&container, &link.wrapper)?;
        trace!(token = %link.token, context = context.id(), "resolving");
        container.injector().load_per_context(&link.wrapper, context).await
    }

    /// Makes `request` the value of `REQUEST` for `context`.
    pub fn register_request_by_context_id<R: Send + Sync + 'static>(&self, request: Arc<R>, context: &ContextId) -> DiResult<()> {
        let (_, container) = self.parts()?;
        let core = container.core_module().ok_or_else(|| DiError::UnknownElement {
            token: request_token().display_name(),
        })?;
        let wrapper = core.provider(&request_token()).ok_or_else(|| DiError::UnknownElement {
            token: request_token().display_name(),
        })?;
        wrapper.set_instance(InstanceKey::Context(context.id()), request);
        Ok(())
    }

    /// Effective scope of the provider behind `token`.
    pub fn introspect(&self, token: impl Into<InjectionToken>) -> DiResult<IntrospectionResult> {
        let token = token.into();
        let (_, container) = self.parts()?;
        let link = container.links().find(&token, None)?.clone();
        self.prepare(&container, &link.wrapper)?;
        let scope = if !link.wrapper.is_dependency_tree_static() {
            Scope::Request
        } else if link.wrapper.is_transient() {
            Scope::Transient
        } else {
            Scope::Default
        };
        Ok(IntrospectionResult { scope })
    }

    /// Instantiates a class that is not registered, injecting its
    /// dependencies from this module. Nothing is cached.
    pub async fn create<T: Send + Sync + 'static>(
        &self,
        provider: ClassProvider<T>,
        context: Option<&ContextId>,
    ) -> DiResult<Arc<T>> {
        let (module, container) = self.parts()?;
        let definition = provider.into_definition();
        let name = definition.class_name;
        let wrapper = InstanceWrapper::from_provider(Provider::Class(definition), Collection::Provider, Arc::downgrade(&module));
        container.injector().inspect(&wrapper, &module)?;
        let context = match context {
            Some(context) => context.clone(),
            None if wrapper.is_dependency_tree_static() => STATIC_CONTEXT.clone(),
            None => ContextIdFactory::create(),
        };
        let instance = container.injector().load_per_context(&wrapper, &context).await?;
        downcast(instance, name)
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.module.upgrade().map(|module| module.name());
        f.debug_struct("ModuleRef").field("module", &name).finish()
    }
}
