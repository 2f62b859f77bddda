//! Per-provider record: declaration, scope and per-context instance states.

use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::context::{ContextId, STATIC_CONTEXT_ID};
use crate::dependency::{AnyArc, Arguments, Dependency};
use crate::error::{DiError, DiResult};
use crate::internal::{InstanceSlot, SettlementSignal};
use crate::lifecycle::HookSet;
use crate::module::definition::{ModuleDef, ModuleType};
use crate::module::Module;
use crate::provider::{Constructor, PropertyDependency, Provider};
use crate::scope::Scope;
use crate::token::{short_type_name, InjectionToken};

static NEXT_WRAPPER: AtomicU64 = AtomicU64::new(1);
static NEXT_ENTRY: AtomicU64 = AtomicU64::new(1);

pub(crate) type DonePromise = Shared<BoxFuture<'static, DiResult<AnyArc>>>;

/// Which registry of its host module a wrapper lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Provider,
    Injectable,
    Controller,
}

/// Address of one instance inside a wrapper.
///
/// Transient instances are additionally keyed by the entry of the consumer
/// they were injected into; `None` marks a direct `resolve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum InstanceKey {
    Context(u64),
    Transient { context: u64, inquirer: Option<u64> },
}

impl InstanceKey {
    fn context(&self) -> u64 {
        match self {
            InstanceKey::Context(context) => *context,
            InstanceKey::Transient { context, .. } => *context,
        }
    }
}

pub(crate) enum WrapperKind {
    Class {
        construct: Constructor,
        inject: Vec<Dependency>,
        properties: Vec<PropertyDependency>,
    },
    Factory {
        construct: Constructor,
        inject: Vec<Dependency>,
    },
    Value,
    Module {
        definition: Arc<dyn ModuleDef>,
    },
    /// The `REQUEST` token; instances are registered per context.
    Request,
}

/// Where a recorded dependency is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DependencySite {
    Parameter(usize),
    Property(&'static str),
}

/// A declared dependency after module-boundary lookup.
pub(crate) struct ResolvedDependency {
    pub(crate) site: DependencySite,
    pub(crate) dependency: Dependency,
    pub(crate) target: Option<Weak<InstanceWrapper>>,
}

impl ResolvedDependency {
    pub(crate) fn target(&self) -> Option<Arc<InstanceWrapper>> {
        self.target.as_ref().and_then(Weak::upgrade)
    }
}

enum EntryState {
    Empty,
    Pending {
        done: DonePromise,
        signal: Arc<SettlementSignal>,
        constructor_called: bool,
    },
    Resolved {
        constructor_called: bool,
    },
}

/// Instance state for one (wrapper, context) pair.
///
/// Moves Empty → Pending → Resolved. A failed construction returns the entry
/// to Empty so the next resolution retries.
pub struct InstancePerContext {
    id: u64,
    slot: InstanceSlot,
    state: Mutex<EntryState>,
}

pub(crate) enum Begin {
    Resolved(AnyArc),
    Pending {
        done: DonePromise,
        signal: Arc<SettlementSignal>,
    },
    Started(PendingConstruction),
}

impl InstancePerContext {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ENTRY.fetch_add(1, Ordering::Relaxed),
            slot: InstanceSlot::new(),
            state: Mutex::new(EntryState::Empty),
        })
    }

    fn resolved(instance: AnyArc) -> Arc<Self> {
        let entry = Self::empty();
        entry.slot.fill(instance);
        *entry.state.lock() = EntryState::Resolved {
            constructor_called: false,
        };
        entry
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn instance(&self) -> Option<AnyArc> {
        if self.is_resolved() {
            self.slot.get()
        } else {
            None
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), EntryState::Resolved { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), EntryState::Pending { .. })
    }

    pub fn is_constructor_called(&self) -> bool {
        match *self.state.lock() {
            EntryState::Empty => false,
            EntryState::Pending { constructor_called, .. } => constructor_called,
            EntryState::Resolved { constructor_called } => constructor_called,
        }
    }

    /// Shared completion future while a construction is in flight.
    pub fn done(&self) -> Option<impl std::future::Future<Output = DiResult<AnyArc>>> {
        match &*self.state.lock() {
            EntryState::Pending { done, .. } => Some(done.clone()),
            _ => None,
        }
    }

    pub(crate) fn slot(&self) -> InstanceSlot {
        self.slot.clone()
    }

    /// Claims the entry for construction, or reports who already owns it.
    ///
    /// The Pending state is installed under the lock before the caller awaits
    /// anything, so concurrent callers always attach to the same construction.
    pub(crate) fn begin(self: &Arc<Self>, provider: &str) -> Begin {
        let mut state = self.state.lock();
        match &*state {
            EntryState::Resolved { .. } => {
                if let Some(instance) = self.slot.get() {
                    return Begin::Resolved(instance);
                }
            }
            EntryState::Pending { done, signal, .. } => {
                return Begin::Pending {
                    done: done.clone(),
                    signal: signal.clone(),
                };
            }
            EntryState::Empty => {}
        }

        let (sender, receiver) = oneshot::channel::<DiResult<AnyArc>>();
        let aborted = provider.to_string();
        let done: DonePromise = receiver
            .map(move |result| {
                result.unwrap_or_else(|_| Err(DiError::ConstructionAborted { provider: aborted }))
            })
            .boxed()
            .shared();
        let signal = Arc::new(SettlementSignal::default());
        *state = EntryState::Pending {
            done,
            signal: signal.clone(),
            constructor_called: false,
        };
        Begin::Started(PendingConstruction {
            entry: self.clone(),
            sender: Some(sender),
            signal,
        })
    }
}

/// Ownership of an in-flight construction.
///
/// Dropping it without calling `complete` or `fail` resets the entry and
/// wakes waiters with `ConstructionAborted`.
pub(crate) struct PendingConstruction {
    entry: Arc<InstancePerContext>,
    sender: Option<oneshot::Sender<DiResult<AnyArc>>>,
    signal: Arc<SettlementSignal>,
}

impl PendingConstruction {
    pub(crate) fn entry_id(&self) -> u64 {
        self.entry.id
    }

    pub(crate) fn signal(&self) -> &Arc<SettlementSignal> {
        &self.signal
    }

    pub(crate) fn mark_constructor_called(&self) {
        if let EntryState::Pending { constructor_called, .. } = &mut *self.entry.state.lock() {
            *constructor_called = true;
        }
    }

    pub(crate) fn complete(mut self, instance: AnyArc) {
        // Fill before flipping to Resolved: readers that see Resolved always find the instance.
        self.entry.slot.fill(instance.clone());
        *self.entry.state.lock() = EntryState::Resolved {
            constructor_called: true,
        };
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Ok(instance));
        }
    }

    pub(crate) fn fail(mut self, error: DiError) {
        *self.entry.state.lock() = EntryState::Empty;
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(error));
        }
    }
}

impl Drop for PendingConstruction {
    fn drop(&mut self) {
        if self.sender.is_some() {
            let mut state = self.entry.state.lock();
            if matches!(*state, EntryState::Pending { .. }) {
                *state = EntryState::Empty;
            }
        }
    }
}

/// Record of one provider inside its host module.
pub struct InstanceWrapper {
    id: u64,
    token: InjectionToken,
    name: String,
    kind: WrapperKind,
    scope: Scope,
    durable: bool,
    is_alias: bool,
    collection: Collection,
    host: Weak<Module>,
    hooks: HookSet,
    values: Mutex<HashMap<InstanceKey, Arc<InstancePerContext>>>,
    dependencies: OnceCell<Vec<ResolvedDependency>>,
    tree_static: OnceCell<bool>,
    tree_durable: OnceCell<bool>,
}

impl InstanceWrapper {
    fn build(
        token: InjectionToken,
        name: String,
        kind: WrapperKind,
        collection: Collection,
        host: Weak<Module>,
    ) -> Self {
        Self {
            id: NEXT_WRAPPER.fetch_add(1, Ordering::Relaxed),
            token,
            name,
            kind,
            scope: Scope::Default,
            durable: false,
            is_alias: false,
            collection,
            host,
            hooks: HookSet::default(),
            values: Mutex::new(HashMap::new()),
            dependencies: OnceCell::new(),
            tree_static: OnceCell::new(),
            tree_durable: OnceCell::new(),
        }
    }

    pub(crate) fn from_provider(provider: Provider, collection: Collection, host: Weak<Module>) -> Arc<Self> {
        match provider {
            Provider::Class(def) => {
                let name = if matches!(&def.token, InjectionToken::Type(_, name) if *name == def.class_name) {
                    short_type_name(def.class_name).to_string()
                } else {
                    def.token.display_name()
                };
                let mut wrapper = Self::build(
                    def.token,
                    name,
                    WrapperKind::Class {
                        construct: def.construct,
                        inject: def.inject,
                        properties: def.properties,
                    },
                    collection,
                    host,
                );
                wrapper.scope = def.scope.scope;
                wrapper.durable = def.scope.durable;
                wrapper.hooks = def.hooks;
                Arc::new(wrapper)
            }
            Provider::Factory(def) => {
                let name = def.token.display_name();
                let mut wrapper = Self::build(
                    def.token,
                    name,
                    WrapperKind::Factory {
                        construct: def.construct,
                        inject: def.inject,
                    },
                    collection,
                    host,
                );
                wrapper.scope = def.scope.scope;
                wrapper.durable = def.scope.durable;
                wrapper.hooks = def.hooks;
                Arc::new(wrapper)
            }
            Provider::Value(def) => {
                let name = def.token.display_name();
                let wrapper = Self::build(def.token, name, WrapperKind::Value, collection, host);
                wrapper.install_static(def.value);
                Arc::new(wrapper)
            }
            Provider::Existing(def) => {
                let name = def.token.display_name();
                let alias = def.existing.display_name();
                let construct: Constructor = Arc::new(move |args: Arguments| {
                    let instance = args.raw(0).ok_or_else(|| DiError::UnknownElement { token: alias.clone() });
                    futures::future::ready(instance).boxed()
                });
                let mut wrapper = Self::build(
                    def.token,
                    name,
                    WrapperKind::Factory {
                        construct,
                        inject: vec![Dependency::token(def.existing)],
                    },
                    collection,
                    host,
                );
                wrapper.is_alias = true;
                Arc::new(wrapper)
            }
        }
    }

    pub(crate) fn for_module(module_type: ModuleType, host: Weak<Module>) -> Arc<Self> {
        let (instance, definition) = module_type.instantiate();
        let wrapper = Self::build(
            module_type.token(),
            module_type.name().to_string(),
            WrapperKind::Module { definition },
            Collection::Provider,
            host,
        );
        wrapper.install_static(instance);
        Arc::new(wrapper)
    }

    pub(crate) fn request_provider(token: InjectionToken, host: Weak<Module>) -> Arc<Self> {
        let name = token.display_name();
        let mut wrapper = Self::build(token, name, WrapperKind::Request, Collection::Provider, host);
        wrapper.scope = Scope::Request;
        wrapper.durable = true;
        Arc::new(wrapper)
    }

    fn install_static(&self, instance: AnyArc) {
        let _ = self.dependencies.set(Vec::new());
        self.values.lock().insert(
            InstanceKey::Context(STATIC_CONTEXT_ID),
            InstancePerContext::resolved(instance),
        );
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &InjectionToken {
        &self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_transient(&self) -> bool {
        self.scope == Scope::Transient
    }

    pub fn is_alias(&self) -> bool {
        self.is_alias
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn host(&self) -> Option<Arc<Module>> {
        self.host.upgrade()
    }

    pub(crate) fn kind(&self) -> &WrapperKind {
        &self.kind
    }

    pub(crate) fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub(crate) fn is_module_class(&self) -> bool {
        matches!(self.kind, WrapperKind::Module { .. })
    }

    pub(crate) fn is_request_provider(&self) -> bool {
        matches!(self.kind, WrapperKind::Request)
    }

    pub(crate) fn module_definition(&self) -> Option<Arc<dyn ModuleDef>> {
        match &self.kind {
            WrapperKind::Module { definition } => Some(definition.clone()),
            _ => None,
        }
    }

    /// Constructor parameters followed by property dependencies, as declared.
    pub(crate) fn declared_dependencies(&self) -> (&[Dependency], &[PropertyDependency]) {
        match &self.kind {
            WrapperKind::Class { inject, properties, .. } => (inject.as_slice(), properties.as_slice()),
            WrapperKind::Factory { inject, .. } => (inject.as_slice(), &[][..]),
            _ => (&[][..], &[][..]),
        }
    }

    pub(crate) fn dependencies(&self) -> Option<&[ResolvedDependency]> {
        self.dependencies.get().map(Vec::as_slice)
    }

    pub(crate) fn record_dependencies(&self, dependencies: Vec<ResolvedDependency>) {
        let _ = self.dependencies.set(dependencies);
    }

    /// Wrappers this one was found to depend on.
    pub fn dependency_wrappers(&self) -> Vec<Arc<InstanceWrapper>> {
        self.dependencies()
            .map(|deps| deps.iter().filter_map(ResolvedDependency::target).collect())
            .unwrap_or_default()
    }

    /// `(target, optional, forward)` for each dependency found by lookup.
    pub(crate) fn resolved_edges(&self) -> Vec<(Arc<InstanceWrapper>, bool, bool)> {
        self.dependencies()
            .map(|deps| {
                deps.iter()
                    .filter_map(|dep| {
                        dep.target()
                            .map(|target| (target, dep.dependency.is_optional(), dep.dependency.is_forward()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `true` when this wrapper and everything it transitively depends on can
    /// live under the static context. Memoized once dependencies are known.
    pub fn is_dependency_tree_static(&self) -> bool {
        self.tree_static_inner(&mut Vec::new())
    }

    fn tree_static_inner(&self, registry: &mut Vec<u64>) -> bool {
        if let Some(value) = self.tree_static.get() {
            return *value;
        }
        if self.scope == Scope::Request {
            let _ = self.tree_static.set(false);
            return false;
        }
        if registry.contains(&self.id) {
            return true;
        }
        let Some(dependencies) = self.dependencies.get() else {
            return true;
        };
        registry.push(self.id);
        let is_static = dependencies
            .iter()
            .filter_map(ResolvedDependency::target)
            .all(|dependency| dependency.tree_static_inner(registry));
        let _ = self.tree_static.set(is_static);
        is_static
    }

    /// `true` when every non-static dependency in the tree is durable.
    pub fn is_dependency_tree_durable(&self) -> bool {
        self.tree_durable_inner(&mut Vec::new())
    }

    fn tree_durable_inner(&self, registry: &mut Vec<u64>) -> bool {
        if let Some(value) = self.tree_durable.get() {
            return *value;
        }
        if self.scope == Scope::Request {
            let _ = self.tree_durable.set(self.durable);
            return self.durable;
        }
        if registry.contains(&self.id) {
            return true;
        }
        let Some(dependencies) = self.dependencies.get() else {
            return true;
        };
        registry.push(self.id);
        let non_durable = dependencies
            .iter()
            .filter_map(ResolvedDependency::target)
            .any(|dependency| !dependency.is_dependency_tree_static() && !dependency.tree_durable_inner(registry));
        let _ = self.tree_durable.set(!non_durable);
        !non_durable
    }

    /// Returns the entry for `key`, creating an Empty one if needed.
    pub(crate) fn entry(&self, key: InstanceKey) -> Arc<InstancePerContext> {
        self.values
            .lock()
            .entry(key)
            .or_insert_with(InstancePerContext::empty)
            .clone()
    }

    /// Installs a resolved instance, replacing any previous entry for `key`.
    pub(crate) fn set_instance(&self, key: InstanceKey, instance: AnyArc) {
        self.values.lock().insert(key, InstancePerContext::resolved(instance));
    }

    /// Creates the static-context placeholder ahead of construction.
    pub(crate) fn create_prototype(&self) {
        if !self.is_transient() {
            self.entry(InstanceKey::Context(STATIC_CONTEXT_ID));
        }
    }

    pub fn has_prototype(&self) -> bool {
        self.values
            .lock()
            .contains_key(&InstanceKey::Context(STATIC_CONTEXT_ID))
    }

    /// Instance state for a non-transient wrapper under `context`.
    pub fn instance_by_context_id(&self, context: &ContextId) -> Option<Arc<InstancePerContext>> {
        self.values
            .lock()
            .get(&InstanceKey::Context(context.id()))
            .cloned()
    }

    /// The resolved singleton, if any.
    pub fn static_instance(&self) -> Option<AnyArc> {
        self.values
            .lock()
            .get(&InstanceKey::Context(STATIC_CONTEXT_ID))
            .and_then(|entry| entry.instance())
    }

    /// Every transient instance created under the static context.
    pub fn static_transient_instances(&self) -> Vec<AnyArc> {
        self.transient_instances(STATIC_CONTEXT_ID)
    }

    pub fn transient_instances_by_context_id(&self, context: &ContextId) -> Vec<AnyArc> {
        self.transient_instances(context.id())
    }

    fn transient_instances(&self, context: u64) -> Vec<AnyArc> {
        let mut entries: Vec<Arc<InstancePerContext>> = self
            .values
            .lock()
            .iter()
            .filter(|(key, _)| matches!(key, InstanceKey::Transient { context: c, .. } if *c == context))
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries.into_iter().filter_map(|entry| entry.instance()).collect()
    }

    /// Drops every entry bound to `context`. Static entries are never removed.
    pub fn remove_instances_by_context_id(&self, context: &ContextId) -> usize {
        if context.is_static() {
            return 0;
        }
        let mut values = self.values.lock();
        let before = values.len();
        if values.remove(&InstanceKey::Context(context.id())).is_none() && self.is_transient() {
            values.retain(|key, _| key.context() != context.id());
        }
        before - values.len()
    }
}

impl std::fmt::Debug for InstanceWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceWrapper")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("scope", &self.scope)
            .field("durable", &self.durable)
            .field("alias", &self.is_alias)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_wrapper(value: u32) -> Arc<InstanceWrapper> {
        InstanceWrapper::from_provider(Provider::value("N", value), Collection::Provider, Weak::new())
    }

    fn request_wrapper() -> Arc<InstanceWrapper> {
        let provider = Provider::class(|_| Ok(1u8)).scope(Scope::Request).into();
        InstanceWrapper::from_provider(provider, Collection::Provider, Weak::new())
    }

    #[test]
    fn value_wrappers_start_resolved() {
        let wrapper = value_wrapper(4);
        let instance = wrapper.static_instance().and_then(|v| v.downcast::<u32>().ok());
        assert_eq!(instance.as_deref(), Some(&4));
        assert!(wrapper.is_dependency_tree_static());
    }

    #[test]
    fn request_scope_is_never_static() {
        let wrapper = request_wrapper();
        assert!(!wrapper.is_dependency_tree_static());
        assert!(!wrapper.is_dependency_tree_durable());
    }

    #[tokio::test]
    async fn pending_entry_is_shared_until_completion() {
        let wrapper = request_wrapper();
        let entry = wrapper.entry(InstanceKey::Context(42));

        let construction = match entry.begin("Service") {
            Begin::Started(construction) => construction,
            _ => panic!("first caller must start the construction"),
        };
        assert!(entry.is_pending());

        let done = match entry.begin("Service") {
            Begin::Pending { done, .. } => done,
            _ => panic!("second caller must observe pending"),
        };

        construction.complete(Arc::new(9u8));
        let value = done.await.unwrap().downcast::<u8>().unwrap();
        assert_eq!(*value, 9);
        assert!(entry.is_resolved());
        assert!(entry.is_constructor_called());
        assert!(matches!(entry.begin("Service"), Begin::Resolved(_)));
    }

    #[tokio::test]
    async fn failure_resets_and_dropping_aborts() {
        let wrapper = request_wrapper();
        let entry = wrapper.entry(InstanceKey::Context(7));

        let Begin::Started(construction) = entry.begin("Service") else {
            panic!("expected start");
        };
        let Begin::Pending { done, .. } = entry.begin("Service") else {
            panic!("expected pending");
        };
        construction.fail(DiError::UnknownElement { token: "X".into() });
        assert!(matches!(done.await, Err(DiError::UnknownElement { .. })));
        assert!(!entry.is_pending());

        let Begin::Started(construction) = entry.begin("Service") else {
            panic!("expected retry");
        };
        let Begin::Pending { done, .. } = entry.begin("Service") else {
            panic!("expected pending");
        };
        drop(construction);
        assert!(matches!(done.await, Err(DiError::ConstructionAborted { .. })));
    }

    #[test]
    fn context_entries_are_removable() {
        let wrapper = request_wrapper();
        let context = crate::context::ContextIdFactory::create();
        wrapper.set_instance(InstanceKey::Context(context.id()), Arc::new(1u8));
        assert!(wrapper.instance_by_context_id(&context).is_some());
        assert_eq!(wrapper.remove_instances_by_context_id(&context), 1);
        assert!(wrapper.instance_by_context_id(&context).is_none());
    }
}
