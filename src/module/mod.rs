//! Module graph nodes and the pieces that identify and compile them.

pub mod compiler;
pub mod definition;
pub(crate) mod registry;
pub mod token_factory;

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;
use uuid::Uuid;

use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::injector::{Collection, InstanceWrapper};
use crate::module_ref::ModuleRef;
use crate::provider::Provider;
use crate::token::{token_of, InjectionToken};
use definition::ModuleType;
use registry::WrapperRegistry;

/// One node of the module graph.
///
/// Owns its wrappers; imports are weak edges because the container owns
/// every module.
pub struct Module {
    id: Arc<str>,
    token: String,
    metatype: ModuleType,
    is_global: bool,
    distance: AtomicUsize,
    providers: RwLock<WrapperRegistry>,
    injectables: RwLock<WrapperRegistry>,
    controllers: RwLock<WrapperRegistry>,
    imports: RwLock<Vec<Weak<Module>>>,
    exports: RwLock<HashSet<InjectionToken>>,
    module_ref: ModuleRef,
}

impl Module {
    pub(crate) fn new(
        metatype: ModuleType,
        token: String,
        is_global: bool,
        container: Weak<Container>,
    ) -> Arc<Self> {
        let module = Arc::new_cyclic(|this: &Weak<Module>| Self {
            id: Arc::from(Uuid::new_v4().to_string()),
            token,
            metatype,
            is_global,
            distance: AtomicUsize::new(0),
            providers: RwLock::new(WrapperRegistry::default()),
            injectables: RwLock::new(WrapperRegistry::default()),
            controllers: RwLock::new(WrapperRegistry::default()),
            imports: RwLock::new(Vec::new()),
            exports: RwLock::new(HashSet::new()),
            module_ref: ModuleRef::new(this.clone(), container),
        });
        module.add_core_providers();
        module
    }

    // The module class always comes first; lifecycle walks rely on it.
    fn add_core_providers(self: &Arc<Self>) {
        let mut providers = self.providers.write();
        providers.insert(InstanceWrapper::for_module(self.metatype, Arc::downgrade(self)));
        providers.insert(InstanceWrapper::from_provider(
            Provider::value(token_of::<ModuleRef>(), self.module_ref.clone()),
            Collection::Provider,
            Arc::downgrade(self),
        ));
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn id_arc(&self) -> Arc<str> {
        self.id.clone()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn metatype(&self) -> ModuleType {
        self.metatype
    }

    pub fn name(&self) -> &'static str {
        self.metatype.name()
    }

    pub fn is_global(&self) -> bool {
        self.is_global
    }

    pub fn distance(&self) -> usize {
        self.distance.load(Ordering::Relaxed)
    }

    pub(crate) fn set_distance(&self, distance: usize) {
        self.distance.store(distance, Ordering::Relaxed);
    }

    pub fn module_ref(&self) -> ModuleRef {
        self.module_ref.clone()
    }

    pub(crate) fn add_provider(self: &Arc<Self>, provider: Provider) -> InjectionToken {
        let wrapper = InstanceWrapper::from_provider(provider, Collection::Provider, Arc::downgrade(self));
        self.add_wrapper(wrapper)
    }

    pub(crate) fn add_wrapper(&self, wrapper: Arc<InstanceWrapper>) -> InjectionToken {
        let token = wrapper.token().clone();
        trace!(module = self.name(), token = %token, "provider registered");
        self.providers.write().insert(wrapper);
        token
    }

    pub(crate) fn add_injectable(self: &Arc<Self>, provider: Provider) -> InjectionToken {
        let wrapper = InstanceWrapper::from_provider(provider, Collection::Injectable, Arc::downgrade(self));
        let token = wrapper.token().clone();
        self.injectables.write().insert(wrapper);
        token
    }

    pub(crate) fn add_controller(self: &Arc<Self>, provider: Provider) -> InjectionToken {
        let wrapper = InstanceWrapper::from_provider(provider, Collection::Controller, Arc::downgrade(self));
        let token = wrapper.token().clone();
        self.controllers.write().insert(wrapper);
        token
    }

    /// Adds an import edge; self-imports and duplicates are ignored.
    pub(crate) fn add_import(&self, module: &Arc<Module>) {
        if module.id == self.id {
            return;
        }
        let mut imports = self.imports.write();
        let known = imports
            .iter()
            .filter_map(Weak::upgrade)
            .any(|existing| existing.id == module.id);
        if !known {
            imports.push(Arc::downgrade(module));
        }
    }

    /// Drops edges to any module in `removed`, and edges whose target is gone.
    pub(crate) fn remove_imports(&self, removed: &HashSet<&str>) {
        self.imports
            .write()
            .retain(|import| import.upgrade().is_some_and(|module| !removed.contains(module.id())));
    }

    /// Exports a provider of this module or re-exports an imported module.
    pub(crate) fn add_export(&self, token: InjectionToken) -> DiResult<()> {
        let is_provider = self.providers.read().contains(&token);
        let is_import = self
            .imports()
            .iter()
            .any(|module| module.metatype.token() == token);
        if !is_provider && !is_import {
            return Err(DiError::UnknownExport {
                token: token.display_name(),
                module: self.name().to_string(),
            });
        }
        self.exports.write().insert(token);
        Ok(())
    }

    pub fn provider(&self, token: &InjectionToken) -> Option<Arc<InstanceWrapper>> {
        self.providers.read().get(token)
    }

    pub fn has_provider(&self, token: &InjectionToken) -> bool {
        self.providers.read().contains(token)
    }

    pub fn providers(&self) -> Vec<(InjectionToken, Arc<InstanceWrapper>)> {
        self.providers.read().entries()
    }

    pub fn injectables(&self) -> Vec<(InjectionToken, Arc<InstanceWrapper>)> {
        self.injectables.read().entries()
    }

    pub fn controllers(&self) -> Vec<(InjectionToken, Arc<InstanceWrapper>)> {
        self.controllers.read().entries()
    }

    /// Providers minus aliases. The module class stays first.
    pub fn get_non_alias_providers(&self) -> Vec<(InjectionToken, Arc<InstanceWrapper>)> {
        self.providers
            .read()
            .entries()
            .into_iter()
            .filter(|(_, wrapper)| !wrapper.is_alias())
            .collect()
    }

    /// Every wrapper of the three collections, providers first.
    pub(crate) fn wrappers(&self) -> Vec<Arc<InstanceWrapper>> {
        let mut wrappers: Vec<Arc<InstanceWrapper>> = self.providers.read().wrappers().cloned().collect();
        wrappers.extend(self.injectables.read().wrappers().cloned());
        wrappers.extend(self.controllers.read().wrappers().cloned());
        wrappers
    }

    pub fn imports(&self) -> Vec<Arc<Module>> {
        self.imports.read().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn exports(&self) -> Vec<InjectionToken> {
        self.exports.read().iter().cloned().collect()
    }

    pub fn exports_contains(&self, token: &InjectionToken) -> bool {
        self.exports.read().contains(token)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("id", &self.id)
            .field("global", &self.is_global)
            .field("distance", &self.distance())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::definition::{ModuleDef, ModuleMetadata};

    #[derive(Default)]
    struct UsersModule;

    impl ModuleDef for UsersModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
        }
    }

    #[derive(Default)]
    struct SharedModule;

    impl ModuleDef for SharedModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
        }
    }

    fn module<M: ModuleDef + Default>() -> Arc<Module> {
        Module::new(ModuleType::of::<M>(), "token".into(), false, Weak::new())
    }

    #[test]
    fn core_providers_come_first() {
        let users = module::<UsersModule>();
        let providers = users.providers();
        assert_eq!(providers[0].0, token_of::<UsersModule>());
        assert_eq!(providers[1].0, token_of::<ModuleRef>());
        assert!(providers[0].1.static_instance().is_some());
    }

    #[test]
    fn exports_must_be_providers_or_imports() {
        let users = module::<UsersModule>();
        let shared = module::<SharedModule>();
        users.add_provider(Provider::value("DB", 1u8));

        assert!(users.add_export("DB".into()).is_ok());
        assert!(matches!(
            users.add_export(token_of::<SharedModule>()),
            Err(DiError::UnknownExport { .. })
        ));

        users.add_import(&shared);
        users.add_import(&shared);
        users.add_import(&users);
        assert_eq!(users.imports().len(), 1);
        assert!(users.add_export(token_of::<SharedModule>()).is_ok());
        assert!(users.exports_contains(&"DB".into()));
    }

    #[test]
    fn aliases_are_not_lifecycle_targets() {
        let users = module::<UsersModule>();
        users.add_provider(Provider::value("DB", 1u8));
        users.add_provider(Provider::existing("ALIAS", "DB"));
        let tokens: Vec<_> = users
            .get_non_alias_providers()
            .into_iter()
            .map(|(token, _)| token)
            .collect();
        assert!(!tokens.contains(&InjectionToken::from("ALIAS")));
        assert_eq!(tokens.len(), 3);
    }
}
