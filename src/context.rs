//! Context ids: the key under which request-scoped instances live.

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::dependency::{downcast, AnyArc};
use crate::token::InjectionToken;

pub const STATIC_CONTEXT_ID: u64 = 1;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(STATIC_CONTEXT_ID + 1);

/// The context every singleton lives in.
pub static STATIC_CONTEXT: Lazy<ContextId> = Lazy::new(|| ContextId::from_parts(STATIC_CONTEXT_ID, None, None));

/// Passed to a parent resolver for each provider being resolved.
#[derive(Debug, Clone)]
pub struct HostComponentInfo {
    pub token: InjectionToken,
    /// `true` when every request-scoped dependency in the provider's tree is durable.
    pub is_tree_durable: bool,
}

pub type ResolveParentFn = Arc<dyn Fn(&HostComponentInfo) -> ContextId + Send + Sync>;

/// Opaque per-request key. Equality is by id.
#[derive(Clone)]
pub struct ContextId {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    payload: Option<AnyArc>,
    get_parent: Option<ResolveParentFn>,
}

impl ContextId {
    fn from_parts(id: u64, payload: Option<AnyArc>, get_parent: Option<ResolveParentFn>) -> Self {
        Self {
            inner: Arc::new(ContextInner { id, payload, get_parent }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_static(&self) -> bool {
        self.inner.id == STATIC_CONTEXT_ID
    }

    pub fn payload(&self) -> Option<&AnyArc> {
        self.inner.payload.as_ref()
    }

    pub fn payload_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.payload()
            .and_then(|payload| downcast::<T>(payload.clone(), "payload").ok())
    }

    /// The context `host` should be resolved under, if a strategy installed a resolver.
    pub fn get_parent(&self, host: &HostComponentInfo) -> Option<ContextId> {
        self.inner.get_parent.as_ref().map(|resolve| resolve(host))
    }

    pub(crate) fn has_parent_resolver(&self) -> bool {
        self.inner.get_parent.is_some()
    }

    fn with_resolver(&self, resolver: ContextIdResolver) -> Self {
        let (payload, resolve) = match resolver {
            ContextIdResolver::Resolve(resolve) => (None, resolve),
            ContextIdResolver::WithPayload { payload, resolve } => (Some(payload), resolve),
        };
        Self::from_parts(self.inner.id, payload, Some(resolve))
    }
}

impl PartialEq for ContextId {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ContextId {}

impl std::hash::Hash for ContextId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextId")
            .field("id", &self.inner.id)
            .field("payload", &self.inner.payload.is_some())
            .field("durable", &self.inner.get_parent.is_some())
            .finish()
    }
}

/// What a strategy returns for a fresh context id.
pub enum ContextIdResolver {
    Resolve(ResolveParentFn),
    WithPayload { payload: AnyArc, resolve: ResolveParentFn },
}

impl ContextIdResolver {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(&HostComponentInfo) -> ContextId + Send + Sync + 'static,
    {
        ContextIdResolver::Resolve(Arc::new(resolve))
    }

    /// Resolver whose payload is injected wherever `REQUEST` is requested.
    pub fn with_payload<T, F>(payload: T, resolve: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&HostComponentInfo) -> ContextId + Send + Sync + 'static,
    {
        ContextIdResolver::WithPayload {
            payload: Arc::new(payload),
            resolve: Arc::new(resolve),
        }
    }
}

/// Decides how a request's context id maps onto shared (durable) subtrees.
///
/// ```rust
/// use ferrous_modules::context::{
///     ContextCarrier, ContextId, ContextIdFactory, ContextIdResolver, ContextIdStrategy, ContextSlot,
/// };
/// use std::any::Any;
/// use std::collections::HashMap;
/// use parking_lot::Mutex;
///
/// struct Request { tenant: String, slot: ContextSlot }
///
/// impl ContextCarrier for Request {
///     fn context_slot(&self) -> &ContextSlot { &self.slot }
///     fn as_any(&self) -> &dyn Any { self }
/// }
///
/// #[derive(Default)]
/// struct TenantStrategy { tenants: Mutex<HashMap<String, ContextId>> }
///
/// impl ContextIdStrategy for TenantStrategy {
///     fn attach(&self, context_id: &ContextId, request: &dyn ContextCarrier) -> Option<ContextIdResolver> {
///         let tenant = request.as_any().downcast_ref::<Request>()?.tenant.clone();
///         let tenant_context = self
///             .tenants
///             .lock()
///             .entry(tenant)
///             .or_insert_with(ContextIdFactory::create)
///             .clone();
///         let own = context_id.clone();
///         Some(ContextIdResolver::new(move |host| {
///             if host.is_tree_durable { tenant_context.clone() } else { own.clone() }
///         }))
///     }
/// }
/// ```
pub trait ContextIdStrategy: Send + Sync {
    fn attach(&self, context_id: &ContextId, request: &dyn ContextCarrier) -> Option<ContextIdResolver>;
}

/// Request objects that can carry a context id.
pub trait ContextCarrier: Send + Sync {
    /// Where the context id assigned to this request is stashed.
    fn context_slot(&self) -> &ContextSlot;

    /// Nested request object under `property`, checked for an existing id.
    fn inspect(&self, _property: &str) -> Option<&dyn ContextCarrier> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Write-once holder for a request's context id.
#[derive(Default)]
pub struct ContextSlot(OnceCell<ContextId>);

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&ContextId> {
        self.0.get()
    }

    fn set(&self, context_id: ContextId) -> ContextId {
        self.0.get_or_init(|| context_id).clone()
    }
}

/// Creates context ids and maps requests onto them.
#[derive(Default)]
pub struct ContextIdFactory {
    strategy: RwLock<Option<Arc<dyn ContextIdStrategy>>>,
}

impl ContextIdFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh id, distinct from every other id in the process.
    pub fn create() -> ContextId {
        ContextId::from_parts(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed), None, None)
    }

    /// Install the strategy used by [`get_by_request`](Self::get_by_request).
    pub fn apply(&self, strategy: impl ContextIdStrategy + 'static) {
        self.apply_shared(Arc::new(strategy));
    }

    pub fn apply_shared(&self, strategy: Arc<dyn ContextIdStrategy>) {
        *self.strategy.write() = Some(strategy);
    }

    pub fn has_strategy(&self) -> bool {
        self.strategy.read().is_some()
    }

    /// Context id for `request`, stable across calls for the same request.
    ///
    /// An id already stashed on the request, or on one of the nested objects
    /// named by `properties`, is reused. Otherwise a new id is created, the
    /// strategy (if any) attaches its resolver, and the result is stashed.
    pub fn get_by_request(&self, request: &dyn ContextCarrier, properties: &[&str]) -> ContextId {
        if let Some(existing) = request.context_slot().get() {
            return existing.clone();
        }
        for property in properties {
            if let Some(existing) = request.inspect(property).and_then(|nested| nested.context_slot().get()) {
                return existing.clone();
            }
        }

        let context_id = Self::create();
        let strategy = self.strategy.read().clone();
        let context_id = match strategy.and_then(|strategy| strategy.attach(&context_id, request)) {
            Some(resolver) => context_id.with_resolver(resolver),
            None => context_id,
        };
        debug!(context = context_id.id(), "context id assigned to request");
        request.context_slot().set(context_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Message {
        slot: ContextSlot,
        envelope: Option<Box<Message>>,
    }

    impl ContextCarrier for Message {
        fn context_slot(&self) -> &ContextSlot {
            &self.slot
        }

        fn inspect(&self, property: &str) -> Option<&dyn ContextCarrier> {
            match property {
                "envelope" => self.envelope.as_deref().map(|m| m as &dyn ContextCarrier),
                _ => None,
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Fixed(ContextId);

    impl ContextIdStrategy for Fixed {
        fn attach(&self, _: &ContextId, _: &dyn ContextCarrier) -> Option<ContextIdResolver> {
            let parent = self.0.clone();
            Some(ContextIdResolver::with_payload("tenant-a", move |_| parent.clone()))
        }
    }

    fn message() -> Message {
        Message {
            slot: ContextSlot::new(),
            envelope: None,
        }
    }

    #[test]
    fn ids_are_unique_and_not_static() {
        let a = ContextIdFactory::create();
        let b = ContextIdFactory::create();
        assert_ne!(a, b);
        assert!(!a.is_static());
        assert!(STATIC_CONTEXT.is_static());
    }

    #[test]
    fn same_request_gets_same_id() {
        let factory = ContextIdFactory::new();
        let request = message();
        let first = factory.get_by_request(&request, &[]);
        let second = factory.get_by_request(&request, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn nested_carrier_id_is_reused() {
        let factory = ContextIdFactory::new();
        let inner = message();
        let assigned = factory.get_by_request(&inner, &[]);
        let outer = Message {
            slot: ContextSlot::new(),
            envelope: Some(Box::new(inner)),
        };
        assert_eq!(factory.get_by_request(&outer, &["envelope"]), assigned);
        assert_ne!(factory.get_by_request(&message(), &["envelope"]), assigned);
    }

    #[test]
    fn strategy_installs_resolver_and_payload() {
        let factory = ContextIdFactory::new();
        let tenant = ContextIdFactory::create();
        factory.apply(Fixed(tenant.clone()));

        let context = factory.get_by_request(&message(), &[]);
        let host = HostComponentInfo {
            token: "Svc".into(),
            is_tree_durable: true,
        };
        assert_eq!(context.get_parent(&host), Some(tenant));
        assert_eq!(context.payload_as::<&str>().as_deref(), Some(&"tenant-a"));
    }
}
