//! Dependency lookup across module boundaries and instance construction.

mod instance_links_host;
mod instance_loader;
mod instance_wrapper;
mod lazy_module_loader;

pub use instance_links_host::{InstanceLink, InstanceLinksHost, LinkOptions, Links};
pub use instance_loader::InstanceLoader;
pub use instance_wrapper::{Collection, InstancePerContext, InstanceWrapper};
pub use lazy_module_loader::{LazyModuleLoader, LazyModuleLoaderOptions};

pub(crate) use instance_wrapper::{Begin, DependencySite, InstanceKey, ResolvedDependency, WrapperKind};

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::context::{ContextId, HostComponentInfo, STATIC_CONTEXT, STATIC_CONTEXT_ID};
use crate::dependency::{AnyArc, Arguments, Injected};
use crate::error::{DependencyContext, DiError, DiResult};
use crate::internal::{ResolutionPath, SettlementSignal};
use crate::module::Module;
use crate::token::InjectionToken;
use instance_wrapper::PendingConstruction;

/// The consumer a dependency is being resolved for.
#[derive(Clone)]
pub(crate) struct Inquirer {
    wrapper: Arc<InstanceWrapper>,
    entry_id: u64,
}

/// Finds providers through the module graph and builds their instances.
///
/// Lookup is synchronous and only reads the graph. Construction is async;
/// each (wrapper, context) pair is built at most once and concurrent callers
/// share the pending result.
#[derive(Debug, Default, Clone, Copy)]
pub struct Injector;

impl Injector {
    pub fn new() -> Self {
        Self
    }

    /// Bootstrap pass: builds `wrapper` under the static context.
    ///
    /// Transient providers and providers with a request-scoped tree are only
    /// checked for resolvable dependencies.
    pub(crate) async fn load_static(&self, wrapper: &Arc<InstanceWrapper>) -> DiResult<()> {
        let module = host_of(wrapper)?;
        self.inspect(wrapper, &module)?;
        if wrapper.is_transient() || !wrapper.is_dependency_tree_static() {
            trace!(provider = wrapper.name(), "skipped in static pass");
            return Ok(());
        }
        self.load_instance(wrapper.clone(), STATIC_CONTEXT.clone(), None, ResolutionPath::new())
            .await
            .map(|_| ())
    }

    /// Resolves `wrapper` under `context` as a direct (non-injected) request.
    pub(crate) async fn load_per_context(&self, wrapper: &Arc<InstanceWrapper>, context: &ContextId) -> DiResult<AnyArc> {
        self.load_instance(wrapper.clone(), context.clone(), None, ResolutionPath::new())
            .await?
            .ok_or_else(|| DiError::InvalidClassScope {
                token: wrapper.name().to_string(),
            })
    }

    /// Records the wrappers `wrapper` depends on, transitively.
    ///
    /// The record is installed before recursing, so cyclic graphs terminate.
    pub(crate) fn inspect(&self, wrapper: &Arc<InstanceWrapper>, module: &Arc<Module>) -> DiResult<()> {
        if wrapper.dependencies().is_some() {
            return Ok(());
        }
        let dependencies = self.lookup_dependencies(wrapper, module)?;
        let targets: Vec<Arc<InstanceWrapper>> = dependencies.iter().filter_map(ResolvedDependency::target).collect();
        wrapper.record_dependencies(dependencies);
        for target in targets {
            if let Some(host) = target.host() {
                self.inspect(&target, &host)?;
            }
        }
        Ok(())
    }

    fn lookup_dependencies(&self, wrapper: &Arc<InstanceWrapper>, module: &Arc<Module>) -> DiResult<Vec<ResolvedDependency>> {
        let (inject, properties) = wrapper.declared_dependencies();
        let names: Vec<String> = inject.iter().map(|dependency| dependency.display_name()).collect();
        let mut resolved = Vec::with_capacity(inject.len() + properties.len());

        for (index, dependency) in inject.iter().enumerate() {
            let context = DependencyContext::parameter(index, names[index].clone(), names.clone());
            let target = self.lookup_optional(module, wrapper, &dependency.resolve_token(), dependency.is_optional(), context)?;
            resolved.push(ResolvedDependency {
                site: DependencySite::Parameter(index),
                dependency: dependency.clone(),
                target: target.as_ref().map(Arc::downgrade),
            });
        }
        for property in properties {
            let dependency = &property.dependency;
            let context = DependencyContext::property(property.key, dependency.display_name());
            let target = self.lookup_optional(module, wrapper, &dependency.resolve_token(), dependency.is_optional(), context)?;
            resolved.push(ResolvedDependency {
                site: DependencySite::Property(property.key),
                dependency: dependency.clone(),
                target: target.as_ref().map(Arc::downgrade),
            });
        }
        Ok(resolved)
    }

    fn lookup_optional(
        &self,
        module: &Arc<Module>,
        wrapper: &InstanceWrapper,
        token: &InjectionToken,
        optional: bool,
        context: DependencyContext,
    ) -> DiResult<Option<Arc<InstanceWrapper>>> {
        match self.lookup_component(module, wrapper, token, context) {
            Ok(found) => Ok(Some(found)),
            Err(error) if optional && error.is_unresolvable() => {
                trace!(provider = wrapper.name(), token = %token, "optional dependency absent");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Finds `token` for a provider of `module`: own providers first, then
    /// the exports reachable through its imports.
    pub(crate) fn lookup_component(
        &self,
        module: &Arc<Module>,
        wrapper: &InstanceWrapper,
        token: &InjectionToken,
        context: DependencyContext,
    ) -> DiResult<Arc<InstanceWrapper>> {
        let unknown = || DiError::UnknownDependencies {
            type_name: wrapper.name().to_string(),
            context: context.clone(),
            module: Some(module.name().to_string()),
        };
        if wrapper.token() == token {
            return Err(unknown());
        }
        if let Some(found) = module.provider(token) {
            return Ok(found);
        }
        let mut visited = HashSet::new();
        match self.lookup_in_imports(module, token, &mut visited, false) {
            Some(found) => {
                trace!(provider = wrapper.name(), token = %token, "found in imported module");
                Ok(found)
            }
            None => Err(unknown()),
        }
    }

    /// Depth-first search through imports.
    ///
    /// Below the first level only imported modules that the parent re-exports
    /// are followed. A match requires the module to both export and provide
    /// the token.
    pub(crate) fn lookup_in_imports(
        &self,
        module: &Arc<Module>,
        token: &InjectionToken,
        visited: &mut HashSet<String>,
        traversing: bool,
    ) -> Option<Arc<InstanceWrapper>> {
        let mut children = module.imports();
        if traversing {
            children.retain(|child| module.exports_contains(&child.metatype().token()));
        }
        for child in children {
            if !visited.insert(child.id().to_string()) {
                continue;
            }
            if child.exports_contains(token) {
                if let Some(found) = child.provider(token) {
                    return Some(found);
                }
            }
            if let Some(found) = self.lookup_in_imports(&child, token, visited, true) {
                return Some(found);
            }
        }
        None
    }

    /// Key of the instance `wrapper` should use under `context`, or `None`
    /// when it cannot live there (a request-scoped tree under the static context).
    pub(crate) fn instance_key(
        &self,
        wrapper: &InstanceWrapper,
        context: &ContextId,
        inquirer: Option<&Inquirer>,
    ) -> Option<InstanceKey> {
        let tree_static = wrapper.is_dependency_tree_static();
        if wrapper.is_transient() {
            let inquirer_static = inquirer.map(|inquirer| inquirer.wrapper.is_dependency_tree_static());
            let context = if tree_static && inquirer_static == Some(true) {
                STATIC_CONTEXT_ID
            } else {
                self.effective_context(wrapper, context).id()
            };
            if !tree_static && context == STATIC_CONTEXT_ID {
                return None;
            }
            return Some(InstanceKey::Transient {
                context,
                inquirer: inquirer.map(|inquirer| inquirer.entry_id),
            });
        }
        if tree_static {
            return Some(InstanceKey::Context(STATIC_CONTEXT_ID));
        }
        let context = self.effective_context(wrapper, context);
        if context.is_static() {
            None
        } else {
            Some(InstanceKey::Context(context.id()))
        }
    }

    // Durable trees collapse onto the context chosen by the strategy.
    fn effective_context(&self, wrapper: &InstanceWrapper, context: &ContextId) -> ContextId {
        if wrapper.is_request_provider() || !context.has_parent_resolver() {
            return context.clone();
        }
        let durable = wrapper.is_dependency_tree_durable();
        let host = HostComponentInfo {
            token: wrapper.token().clone(),
            is_tree_durable: durable,
        };
        match context.get_parent(&host) {
            Some(parent) if durable => parent,
            Some(parent) => {
                if parent != *context {
                    warn!(
                        provider = wrapper.name(),
                        "strategy returned a shared context for a non-durable tree; using the request context"
                    );
                }
                context.clone()
            }
            None => context.clone(),
        }
    }

    fn load_instance<'a>(
        &'a self,
        wrapper: Arc<InstanceWrapper>,
        context: ContextId,
        inquirer: Option<Inquirer>,
        path: ResolutionPath,
    ) -> BoxFuture<'a, DiResult<Option<AnyArc>>> {
        async move {
            let module = host_of(&wrapper)?;
            self.inspect(&wrapper, &module)?;
            let Some(key) = self.instance_key(&wrapper, &context, inquirer.as_ref()) else {
                return Ok(None);
            };
            let entry = wrapper.entry(key);
            let construction = match entry.begin(wrapper.name()) {
                Begin::Resolved(instance) => return Ok(Some(instance)),
                Begin::Pending { done, signal } => {
                    let waits_on_us = inquirer
                        .as_ref()
                        .is_some_and(|inquirer| signal.is_cycle(inquirer.wrapper.id()));
                    if path.contains(module.id(), wrapper.token()) || waits_on_us {
                        return Err(DiError::CircularDependency {
                            path: path.cycle(wrapper.name()),
                        });
                    }
                    return done.await.map(Some);
                }
                Begin::Started(construction) => construction,
            };
            // Transient entries are keyed per inquirer, so a transient cycle
            // never meets a pending entry and only shows up on the path.
            if path.contains(module.id(), wrapper.token()) || path.exceeds_max_depth() {
                let error = DiError::CircularDependency {
                    path: path.cycle(wrapper.name()),
                };
                construction.fail(error.clone());
                return Err(error);
            }

            let self_inquirer = Inquirer {
                wrapper: wrapper.clone(),
                entry_id: construction.entry_id(),
            };
            match self.instantiate(&wrapper, &module, &context, &construction, &path).await {
                Ok((instance, forwards)) => {
                    debug!(provider = wrapper.name(), module = module.name(), context = context.id(), "instance created");
                    construction.complete(instance.clone());
                    for target in forwards {
                        self.load_forward(target, &context, &self_inquirer, &path).await?;
                    }
                    Ok(Some(instance))
                }
                Err(error) => {
                    construction.fail(error.clone());
                    Err(error)
                }
            }
        }
        .boxed()
    }

    async fn instantiate(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &Arc<Module>,
        context: &ContextId,
        construction: &PendingConstruction,
        path: &ResolutionPath,
    ) -> DiResult<(AnyArc, Vec<Arc<InstanceWrapper>>)> {
        let undefined = |key: &str| {
            DiError::undefined(
                wrapper.name(),
                DependencyContext::property(key, wrapper.name()),
                Some(module.name().to_string()),
            )
        };
        let construct = match wrapper.kind() {
            WrapperKind::Class { construct, .. } | WrapperKind::Factory { construct, .. } => construct.clone(),
            WrapperKind::Request => {
                let payload = context.payload().cloned().ok_or_else(|| undefined("request"))?;
                return Ok((payload, Vec::new()));
            }
            WrapperKind::Value | WrapperKind::Module { .. } => {
                let instance = wrapper.static_instance().ok_or_else(|| undefined("value"))?;
                return Ok((instance, Vec::new()));
            }
        };

        let child_path = path.push(module.id_arc(), wrapper.token().clone(), wrapper.name().to_string());
        let inquirer = Inquirer {
            wrapper: wrapper.clone(),
            entry_id: construction.entry_id(),
        };
        let dependencies = wrapper.dependencies().unwrap_or(&[]);
        let (parameters, properties): (Vec<&ResolvedDependency>, Vec<&ResolvedDependency>) = dependencies
            .iter()
            .partition(|dependency| matches!(dependency.site, DependencySite::Parameter(_)));

        let signal = construction.signal();
        let values = try_join_all(parameters.iter().map(|dependency| {
            self.resolve_dependency(dependency, wrapper, module, context, &inquirer, &child_path, signal)
        }))
        .await?;
        let property_values = try_join_all(properties.iter().map(|dependency| {
            self.resolve_dependency(dependency, wrapper, module, context, &inquirer, &child_path, signal)
        }))
        .await?;

        construction.mark_constructor_called();
        let names = parameters.iter().map(|dependency| dependency.dependency.display_name()).collect();
        let instance = construct(Arguments::new(wrapper.name().to_string(), names, values)).await?;

        if let WrapperKind::Class { properties: setters, .. } = wrapper.kind() {
            for (dependency, value) in properties.iter().zip(property_values) {
                let DependencySite::Property(key) = dependency.site else {
                    continue;
                };
                let Some(setter) = setters.iter().find(|setter| setter.key == key) else {
                    continue;
                };
                match value {
                    Injected::Deferred(slot) => {
                        let apply = setter.apply.clone();
                        let target = instance.clone();
                        let provider = wrapper.name().to_string();
                        slot.on_fill(move |value| {
                            if let Err(error) = apply(&target, Injected::Instance(value.clone())) {
                                warn!(provider = %provider, property = key, %error, "forward property not applied");
                            }
                        });
                    }
                    value => (setter.apply)(&instance, value)?,
                }
            }
        }

        let forwards = dependencies
            .iter()
            .filter(|dependency| dependency.dependency.is_forward())
            .filter_map(ResolvedDependency::target)
            .collect();
        Ok((instance, forwards))
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_dependency(
        &self,
        dependency: &ResolvedDependency,
        wrapper: &InstanceWrapper,
        module: &Module,
        context: &ContextId,
        inquirer: &Inquirer,
        path: &ResolutionPath,
        signal: &SettlementSignal,
    ) -> DiResult<Injected> {
        let undefined = || {
            let context = match dependency.site {
                DependencySite::Parameter(index) => {
                    DependencyContext::parameter(index, dependency.dependency.display_name(), Vec::new())
                }
                DependencySite::Property(key) => DependencyContext::property(key, dependency.dependency.display_name()),
            };
            DiError::undefined(wrapper.name(), context, Some(module.name().to_string()))
        };
        let Some(target) = dependency.target() else {
            return if dependency.dependency.is_optional() {
                Ok(Injected::Absent)
            } else {
                Err(undefined())
            };
        };

        if dependency.dependency.is_forward() {
            return match self.instance_key(&target, context, Some(inquirer)) {
                Some(key) => Ok(Injected::Deferred(target.entry(key).slot())),
                None if dependency.dependency.is_optional() => Ok(Injected::Absent),
                None => Err(undefined()),
            };
        }

        signal.insert_ref(target.id());
        match self
            .load_instance(target, context.clone(), Some(inquirer.clone()), path.clone())
            .await?
        {
            Some(instance) => Ok(Injected::Instance(instance)),
            None if dependency.dependency.is_optional() => Ok(Injected::Absent),
            None => Err(undefined()),
        }
    }

    // Forward targets are built after their consumer; an entry already
    // pending belongs to an ancestor and fills the slot when it completes.
    async fn load_forward(
        &self,
        target: Arc<InstanceWrapper>,
        context: &ContextId,
        inquirer: &Inquirer,
        path: &ResolutionPath,
    ) -> DiResult<()> {
        let Some(key) = self.instance_key(&target, context, Some(inquirer)) else {
            return Ok(());
        };
        let entry = target.entry(key);
        if entry.is_pending() || entry.is_resolved() {
            return Ok(());
        }
        self.load_instance(target, context.clone(), Some(inquirer.clone()), path.clone())
            .await
            .map(|_| ())
    }
}

fn host_of(wrapper: &InstanceWrapper) -> DiResult<Arc<Module>> {
    wrapper.host().ok_or_else(|| DiError::UnknownElement {
        token: wrapper.name().to_string(),
    })
}
