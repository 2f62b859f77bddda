//! Provider declarations.
//!
//! A provider tells a module how to produce the instance behind a token:
//! construct a class from injected arguments, call a factory, hand out a
//! ready value, or alias another token.

use futures::future::{ready, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dependency::{downcast, AnyArc, Arguments, Dependency, Injected};
use crate::error::{DiError, DiResult};
use crate::lifecycle::{HookFn, HookSet, LifecycleHook};
use crate::scope::{Scope, ScopeOptions};
use crate::token::{short_type_name, token_of, InjectionToken};

pub(crate) type Constructor = Arc<dyn Fn(Arguments) -> BoxFuture<'static, DiResult<AnyArc>> + Send + Sync>;
pub(crate) type PropertySetter = Arc<dyn Fn(&AnyArc, Injected) -> DiResult<()> + Send + Sync>;

fn opaque_value<T: ?Sized>() -> JsonValue {
    JsonValue::String(format!("<{}>", type_name::<T>()))
}

/// Property dependency: `{key, token, optional}` plus the setter that stores it.
#[derive(Clone)]
pub(crate) struct PropertyDependency {
    pub(crate) key: &'static str,
    pub(crate) dependency: Dependency,
    pub(crate) apply: PropertySetter,
}

#[derive(Clone)]
pub struct ClassDefinition {
    pub(crate) token: InjectionToken,
    pub(crate) class_name: &'static str,
    pub(crate) inject: Vec<Dependency>,
    pub(crate) properties: Vec<PropertyDependency>,
    pub(crate) construct: Constructor,
    pub(crate) scope: ScopeOptions,
    pub(crate) hooks: HookSet,
}

#[derive(Clone)]
pub struct FactoryDefinition {
    pub(crate) token: InjectionToken,
    pub(crate) factory_name: &'static str,
    pub(crate) inject: Vec<Dependency>,
    pub(crate) construct: Constructor,
    pub(crate) scope: ScopeOptions,
    pub(crate) hooks: HookSet,
}

#[derive(Clone)]
pub struct ValueDefinition {
    pub(crate) token: InjectionToken,
    pub(crate) value: AnyArc,
    pub(crate) fingerprint: JsonValue,
}

#[derive(Clone)]
pub struct ExistingDefinition {
    pub(crate) token: InjectionToken,
    pub(crate) existing: InjectionToken,
}

/// Tagged union of provider kinds.
#[derive(Clone)]
pub enum Provider {
    Class(ClassDefinition),
    Value(ValueDefinition),
    Factory(FactoryDefinition),
    Existing(ExistingDefinition),
}

impl Provider {
    /// Class provider built by a synchronous constructor.
    ///
    /// ```rust
    /// use ferrous_modules::{Dependency, Provider, Scope};
    /// use std::sync::Arc;
    ///
    /// struct Config { url: String }
    /// struct Repository { config: Arc<Config> }
    ///
    /// let provider: Provider = Provider::class(|args| {
    ///     Ok(Repository { config: args.get::<Config>(0)? })
    /// })
    /// .inject([Dependency::on::<Config>()])
    /// .scope(Scope::Request)
    /// .into();
    ///
    /// assert_eq!(provider.token().display_name(), "Repository");
    /// assert_eq!(provider.scope().scope, Scope::Request);
    /// ```
    pub fn class<T, F>(construct: F) -> ClassProvider<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> DiResult<T> + Send + Sync + 'static,
    {
        ClassProvider::from_constructor(sync_constructor(construct))
    }

    /// Class provider whose constructor awaits.
    pub fn class_async<T, F, Fut>(construct: F) -> ClassProvider<T>
    where
        T: Send + Sync + 'static,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<T>> + Send + 'static,
    {
        ClassProvider::from_constructor(async_constructor(construct))
    }

    pub fn factory<T, F>(token: impl Into<InjectionToken>, construct: F) -> FactoryProvider<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&Arguments) -> DiResult<T> + Send + Sync + 'static,
    {
        FactoryProvider::from_constructor(token.into(), type_name::<F>(), sync_constructor(construct))
    }

    pub fn factory_async<T, F, Fut>(token: impl Into<InjectionToken>, construct: F) -> FactoryProvider<T>
    where
        T: Send + Sync + 'static,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<T>> + Send + 'static,
    {
        FactoryProvider::from_constructor(token.into(), type_name::<F>(), async_constructor(construct))
    }

    /// Ready-made value. Only its token and type take part in dynamic-module
    /// identity; use [`Provider::serializable_value`] or
    /// [`DynamicModule::with_options`](crate::DynamicModule::with_options) to
    /// tell registrations apart by content.
    pub fn value<T: Send + Sync + 'static>(token: impl Into<InjectionToken>, value: T) -> Self {
        Self::shared(token, Arc::new(value))
    }

    /// Already shared value.
    pub fn shared<T: Send + Sync + 'static>(token: impl Into<InjectionToken>, value: Arc<T>) -> Self {
        let token = token.into();
        let fingerprint = json!({
            "provide": token.canonical(),
            "useValue": opaque_value::<T>(),
        });
        Provider::Value(ValueDefinition {
            token,
            value,
            fingerprint,
        })
    }

    /// Value whose serialized form takes part in dynamic-module identity, so
    /// two modules declaring equal values collapse into one.
    pub fn serializable_value<T>(token: impl Into<InjectionToken>, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        let token = token.into();
        let serialized = serde_json::to_value(&value).unwrap_or_else(|_| opaque_value::<T>());
        let fingerprint = json!({ "provide": token.canonical(), "useValue": serialized });
        Provider::Value(ValueDefinition {
            token,
            value: Arc::new(value),
            fingerprint,
        })
    }

    /// Alias: resolving `token` yields the instance behind `existing`.
    pub fn existing(token: impl Into<InjectionToken>, existing: impl Into<InjectionToken>) -> Self {
        Provider::Existing(ExistingDefinition {
            token: token.into(),
            existing: existing.into(),
        })
    }

    pub fn token(&self) -> &InjectionToken {
        match self {
            Provider::Class(def) => &def.token,
            Provider::Value(def) => &def.token,
            Provider::Factory(def) => &def.token,
            Provider::Existing(def) => &def.token,
        }
    }

    pub fn scope(&self) -> ScopeOptions {
        match self {
            Provider::Class(def) => def.scope,
            Provider::Factory(def) => def.scope,
            Provider::Value(_) | Provider::Existing(_) => ScopeOptions::default(),
        }
    }

    /// Canonical description used when hashing dynamic modules.
    pub(crate) fn fingerprint(&self) -> JsonValue {
        match self {
            Provider::Class(def) => json!({
                "provide": def.token.canonical(),
                "useClass": def.class_name,
                "inject": def.inject.iter().map(Dependency::canonical).collect::<Vec<_>>(),
                "scope": def.scope.scope,
                "durable": def.scope.durable,
            }),
            Provider::Factory(def) => json!({
                "provide": def.token.canonical(),
                "useFactory": def.factory_name,
                "inject": def.inject.iter().map(Dependency::canonical).collect::<Vec<_>>(),
                "scope": def.scope.scope,
                "durable": def.scope.durable,
            }),
            Provider::Value(def) => def.fingerprint.clone(),
            Provider::Existing(def) => json!({
                "provide": def.token.canonical(),
                "useExisting": def.existing.canonical(),
            }),
        }
    }
}

fn sync_constructor<T, F>(construct: F) -> Constructor
where
    T: Send + Sync + 'static,
    F: Fn(&Arguments) -> DiResult<T> + Send + Sync + 'static,
{
    Arc::new(move |args: Arguments| {
        let instance = construct(&args).map(|value| Arc::new(value) as AnyArc);
        ready(instance).boxed()
    })
}

fn async_constructor<T, F, Fut>(construct: F) -> Constructor
where
    T: Send + Sync + 'static,
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DiResult<T>> + Send + 'static,
{
    Arc::new(move |args: Arguments| {
        construct(args)
            .map(|result| result.map(|value| Arc::new(value) as AnyArc))
            .boxed()
    })
}

fn typed_hook<T, F, Fut>(f: F) -> HookFn
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DiResult<()>> + Send + 'static,
{
    Arc::new(move |instance: AnyArc| -> BoxFuture<'static, DiResult<()>> {
        match instance.downcast::<T>() {
            Ok(this) => f(this).boxed(),
            Err(_) => ready(Ok(())).boxed(),
        }
    })
}

/// Builder for a class provider producing `T`.
pub struct ClassProvider<T> {
    definition: ClassDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ClassProvider<T> {
    fn from_constructor(construct: Constructor) -> Self {
        Self {
            definition: ClassDefinition {
                token: token_of::<T>(),
                class_name: type_name::<T>(),
                inject: Vec::new(),
                properties: Vec::new(),
                construct,
                scope: ScopeOptions::default(),
                hooks: HookSet::default(),
            },
            _marker: PhantomData,
        }
    }

    /// Register the class under another token (`useClass`).
    pub fn provide(mut self, token: impl Into<InjectionToken>) -> Self {
        self.definition.token = token.into();
        self
    }

    /// Positional constructor dependencies, in `Arguments` order.
    pub fn inject(mut self, dependencies: impl IntoIterator<Item = Dependency>) -> Self {
        self.definition.inject = dependencies.into_iter().collect();
        self
    }

    /// Property dependency applied after construction.
    ///
    /// The setter receives `None` when an optional dependency cannot be
    /// resolved. Forward-referenced properties are set once their target exists.
    pub fn property<P, F>(mut self, key: &'static str, dependency: Dependency, apply: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&T, Option<Arc<P>>) + Send + Sync + 'static,
    {
        let setter: PropertySetter = Arc::new(move |instance: &AnyArc, injected: Injected| {
            let target = instance.downcast_ref::<T>().ok_or_else(|| DiError::TypeMismatch {
                token: short_type_name(type_name::<T>()).to_string(),
                expected: type_name::<T>(),
            })?;
            let value = match injected {
                Injected::Instance(value) => Some(downcast::<P>(value, key)?),
                Injected::Deferred(slot) => match slot.get() {
                    Some(value) => Some(downcast::<P>(value, key)?),
                    None => None,
                },
                Injected::Absent => None,
            };
            apply(target, value);
            Ok(())
        });
        self.definition.properties.push(PropertyDependency {
            key,
            dependency,
            apply: setter,
        });
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.definition.scope.scope = scope;
        self
    }

    /// Mark a request-scoped provider durable.
    pub fn durable(mut self, durable: bool) -> Self {
        self.definition.scope.durable = durable;
        self
    }

    /// Register a lifecycle hook on the constructed instance.
    pub fn on<F, Fut>(mut self, hook: LifecycleHook, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<()>> + Send + 'static,
    {
        self.definition.hooks.insert(hook, typed_hook::<T, _, _>(f));
        self
    }

    pub(crate) fn into_definition(self) -> ClassDefinition {
        self.definition
    }
}

impl<T: Send + Sync + 'static> From<ClassProvider<T>> for Provider {
    fn from(provider: ClassProvider<T>) -> Self {
        Provider::Class(provider.definition)
    }
}

/// Builder for a factory provider producing `T`.
pub struct FactoryProvider<T> {
    definition: FactoryDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> FactoryProvider<T> {
    fn from_constructor(token: InjectionToken, factory_name: &'static str, construct: Constructor) -> Self {
        Self {
            definition: FactoryDefinition {
                token,
                factory_name,
                inject: Vec::new(),
                construct,
                scope: ScopeOptions::default(),
                hooks: HookSet::default(),
            },
            _marker: PhantomData,
        }
    }

    pub fn inject(mut self, dependencies: impl IntoIterator<Item = Dependency>) -> Self {
        self.definition.inject = dependencies.into_iter().collect();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.definition.scope.scope = scope;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.definition.scope.durable = durable;
        self
    }

    pub fn on<F, Fut>(mut self, hook: LifecycleHook, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<()>> + Send + 'static,
    {
        self.definition.hooks.insert(hook, typed_hook::<T, _, _>(f));
        self
    }
}

impl<T: Send + Sync + 'static> From<FactoryProvider<T>> for Provider {
    fn from(provider: FactoryProvider<T>) -> Self {
        Provider::Factory(provider.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Service;

    #[derive(Serialize)]
    struct Options {
        url: &'static str,
    }

    #[test]
    fn class_defaults_to_its_type_token() {
        let provider: Provider = Provider::class(|_| Ok(Service)).into();
        assert_eq!(provider.token(), &token_of::<Service>());
        assert_eq!(provider.scope(), ScopeOptions::default());
    }

    #[test]
    fn serializable_values_share_fingerprints() {
        let a = Provider::serializable_value("OPTIONS", Options { url: "db" });
        let b = Provider::serializable_value("OPTIONS", Options { url: "db" });
        let c = Provider::serializable_value("OPTIONS", Options { url: "cache" });
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn opaque_values_fingerprint_by_token_and_type() {
        let a = Provider::value("N", 1u8);
        let b = Provider::value("N", 2u8);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), Provider::value("N", 1u16).fingerprint());
        assert_ne!(a.fingerprint(), Provider::value("M", 1u8).fingerprint());
    }

    #[test]
    fn factory_scope_and_inject_are_recorded() {
        let provider: Provider = Provider::factory("CONN", |_| Ok(3u16))
            .inject([Dependency::token("URL").optional()])
            .scope(Scope::Transient)
            .into();
        assert_eq!(provider.scope().scope, Scope::Transient);
        assert_eq!(provider.fingerprint()["inject"], json!(["URL"]));
    }
}
