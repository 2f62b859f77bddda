//! Lifecycle hooks and the module walkers that call them.

use futures::future::{try_join_all, BoxFuture};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dependency::AnyArc;
use crate::error::DiResult;
use crate::injector::InstanceWrapper;
use crate::module::Module;

/// Points in the application lifecycle a provider can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    ModuleInit,
    ApplicationBootstrap,
    ModuleDestroy,
    BeforeApplicationShutdown,
    ApplicationShutdown,
}

impl LifecycleHook {
    /// Teardown hooks walk modules from the root outwards.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            LifecycleHook::ModuleDestroy
                | LifecycleHook::BeforeApplicationShutdown
                | LifecycleHook::ApplicationShutdown
        )
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleHook::ModuleInit => "onModuleInit",
            LifecycleHook::ApplicationBootstrap => "onApplicationBootstrap",
            LifecycleHook::ModuleDestroy => "onModuleDestroy",
            LifecycleHook::BeforeApplicationShutdown => "beforeApplicationShutdown",
            LifecycleHook::ApplicationShutdown => "onApplicationShutdown",
        };
        f.write_str(name)
    }
}

pub(crate) type HookFn = Arc<dyn Fn(AnyArc) -> BoxFuture<'static, DiResult<()>> + Send + Sync>;

/// Hooks registered on one provider.
#[derive(Clone, Default)]
pub(crate) struct HookSet {
    hooks: HashMap<LifecycleHook, HookFn>,
}

impl HookSet {
    pub(crate) fn insert(&mut self, hook: LifecycleHook, f: HookFn) {
        self.hooks.insert(hook, f);
    }

    pub(crate) fn get(&self, hook: LifecycleHook) -> Option<&HookFn> {
        self.hooks.get(&hook)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

fn call_on(wrapper: &InstanceWrapper, instance: AnyArc, hook: LifecycleHook) -> Option<BoxFuture<'static, DiResult<()>>> {
    wrapper.hooks().get(hook).map(|f| f(instance))
}

/// Runs `hook` on every static instance of `module`.
///
/// Controllers, non-alias providers and injectables whose tree is static run
/// first and concurrently, then every transient instance created under the
/// static context, then the module class itself.
pub(crate) async fn call_module_hook(module: &Arc<Module>, hook: LifecycleHook) -> DiResult<()> {
    let (module_class, providers): (Vec<_>, Vec<_>) = module
        .get_non_alias_providers()
        .into_iter()
        .partition(|(_, wrapper)| wrapper.is_module_class());

    let wrappers: Vec<Arc<InstanceWrapper>> = module
        .controllers()
        .into_iter()
        .chain(providers)
        .chain(module.injectables())
        .map(|(_, wrapper)| wrapper)
        .filter(|wrapper| !wrapper.hooks().is_empty() && wrapper.is_dependency_tree_static())
        .collect();

    let non_transient = wrappers
        .iter()
        .filter(|wrapper| !wrapper.is_transient())
        .filter_map(|wrapper| {
            wrapper
                .static_instance()
                .and_then(|instance| call_on(wrapper, instance, hook))
        });
    try_join_all(non_transient).await?;

    let transient = wrappers
        .iter()
        .filter(|wrapper| wrapper.is_transient())
        .flat_map(|wrapper| {
            wrapper
                .static_transient_instances()
                .into_iter()
                .filter_map(move |instance| call_on(wrapper, instance, hook))
        });
    try_join_all(transient).await?;

    if let Some((_, wrapper)) = module_class.first() {
        if let Some(definition) = wrapper.module_definition() {
            match hook {
                LifecycleHook::ModuleInit => definition.on_module_init().await?,
                LifecycleHook::ApplicationBootstrap => definition.on_application_bootstrap().await?,
                LifecycleHook::ModuleDestroy => definition.on_module_destroy().await?,
                LifecycleHook::BeforeApplicationShutdown => {
                    definition.before_application_shutdown().await?
                }
                LifecycleHook::ApplicationShutdown => definition.on_application_shutdown().await?,
            }
        }
    }
    Ok(())
}

/// Orders modules for `hook`: deepest first for startup, root first for teardown.
pub(crate) fn order_for_hook(mut modules: Vec<Arc<Module>>, hook: LifecycleHook) -> Vec<Arc<Module>> {
    modules.sort_by(|a, b| b.distance().cmp(&a.distance()));
    if hook.is_teardown() {
        modules.reverse();
    }
    modules
}
