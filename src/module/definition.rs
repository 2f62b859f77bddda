//! Module declarations: module classes, their metadata and import forms.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::{type_name, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::dependency::AnyArc;
use crate::error::DiResult;
use crate::provider::Provider;
use crate::token::{short_type_name, token_of, InjectionToken};

/// A module class.
///
/// `metadata` declares what the module imports, provides and exports. The
/// hook methods run during [`ApplicationContext::init`](crate::ApplicationContext::init)
/// and [`ApplicationContext::close`](crate::ApplicationContext::close).
///
/// ```rust
/// use ferrous_modules::{ModuleDef, ModuleMetadata, Provider};
///
/// struct Clock;
///
/// #[derive(Default)]
/// struct ClockModule;
///
/// impl ModuleDef for ClockModule {
///     fn metadata() -> ModuleMetadata {
///         ModuleMetadata::new()
///             .provider(Provider::class(|_| Ok(Clock)))
///             .export(ferrous_modules::token_of::<Clock>())
///     }
/// }
/// ```
#[async_trait]
pub trait ModuleDef: Send + Sync + 'static {
    fn metadata() -> ModuleMetadata
    where
        Self: Sized;

    async fn on_module_init(&self) -> DiResult<()> {
        Ok(())
    }

    async fn on_application_bootstrap(&self) -> DiResult<()> {
        Ok(())
    }

    async fn on_module_destroy(&self) -> DiResult<()> {
        Ok(())
    }

    async fn before_application_shutdown(&self) -> DiResult<()> {
        Ok(())
    }

    async fn on_application_shutdown(&self) -> DiResult<()> {
        Ok(())
    }
}

pub(crate) type ModuleInstance = (AnyArc, Arc<dyn ModuleDef>);

/// Runtime reference to a module class.
#[derive(Clone, Copy)]
pub struct ModuleType {
    type_id: TypeId,
    type_name: &'static str,
    metadata: fn() -> ModuleMetadata,
    instantiate: fn() -> ModuleInstance,
}

fn instantiate<M: ModuleDef + Default>() -> ModuleInstance {
    let module = Arc::new(M::default());
    (module.clone(), module)
}

impl ModuleType {
    pub fn of<M: ModuleDef + Default>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            type_name: type_name::<M>(),
            metadata: M::metadata,
            instantiate: instantiate::<M>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Short class name.
    pub fn name(&self) -> &'static str {
        short_type_name(self.type_name)
    }

    /// Fully qualified class name.
    pub fn class_name(&self) -> &'static str {
        self.type_name
    }

    /// Token of the module class itself, used for re-exports and injection.
    pub fn token(&self) -> InjectionToken {
        InjectionToken::Type(self.type_id, self.type_name)
    }

    pub fn metadata(&self) -> ModuleMetadata {
        (self.metadata)()
    }

    pub(crate) fn instantiate(&self) -> ModuleInstance {
        (self.instantiate)()
    }
}

impl PartialEq for ModuleType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ModuleType {}

impl fmt::Debug for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleType({})", self.name())
    }
}

/// `{imports, providers, controllers, injectables, exports}` of a module.
#[derive(Default)]
pub struct ModuleMetadata {
    pub(crate) imports: Vec<ModuleImport>,
    pub(crate) providers: Vec<Provider>,
    pub(crate) controllers: Vec<Provider>,
    pub(crate) injectables: Vec<Provider>,
    pub(crate) exports: Vec<InjectionToken>,
    pub(crate) global: bool,
}

impl ModuleMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import(mut self, import: impl Into<ModuleImport>) -> Self {
        self.imports.push(import.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<Provider>) -> Self {
        self.providers.push(provider.into());
        self
    }

    pub fn controller(mut self, controller: impl Into<Provider>) -> Self {
        self.controllers.push(controller.into());
        self
    }

    /// Enhancer-style provider kept apart from the exportable providers.
    pub fn injectable(mut self, injectable: impl Into<Provider>) -> Self {
        self.injectables.push(injectable.into());
        self
    }

    pub fn export(mut self, token: impl Into<InjectionToken>) -> Self {
        self.exports.push(token.into());
        self
    }

    /// Re-export an imported module.
    pub fn export_module<M: ModuleDef>(mut self) -> Self {
        self.exports.push(token_of::<M>());
        self
    }

    /// Make the module's exports visible to every module without importing it.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub(crate) fn merge(&mut self, other: ModuleMetadata) {
        self.imports.extend(other.imports);
        self.providers.extend(other.providers);
        self.controllers.extend(other.controllers);
        self.injectables.extend(other.injectables);
        self.exports.extend(other.exports);
        self.global |= other.global;
    }
}

/// A module class plus metadata supplied at the call site.
///
/// Two dynamic modules of the same class with equal metadata and options
/// compile to the same graph node.
pub struct DynamicModule {
    pub(crate) module: ModuleType,
    pub(crate) global: Option<bool>,
    pub(crate) metadata: ModuleMetadata,
    pub(crate) options: Option<JsonValue>,
}

impl DynamicModule {
    pub fn new<M: ModuleDef + Default>(metadata: ModuleMetadata) -> Self {
        Self {
            module: ModuleType::of::<M>(),
            global: None,
            metadata,
            options: None,
        }
    }

    /// Override the class-level global flag.
    pub fn global(mut self, global: bool) -> Self {
        self.global = Some(global);
        self
    }

    /// Attach options that take part in the module's identity.
    pub fn with_options<O: Serialize>(mut self, options: &O) -> Self {
        self.options = serde_json::to_value(options).ok();
        self
    }

    pub fn module(&self) -> ModuleType {
        self.module
    }
}

/// Lazily evaluated module import.
#[derive(Clone)]
pub struct ForwardModule {
    resolve: Arc<dyn Fn() -> ModuleImport + Send + Sync>,
    description: &'static str,
}

impl ForwardModule {
    pub(crate) fn resolve(&self) -> ModuleImport {
        (self.resolve)()
    }

    pub(crate) fn description(&self) -> &'static str {
        self.description
    }
}

/// Anything that can appear in `imports`.
pub enum ModuleImport {
    Static(ModuleType),
    Dynamic(DynamicModule),
    Forward(ForwardModule),
    Deferred(BoxFuture<'static, DiResult<ModuleImport>>),
}

impl ModuleImport {
    pub fn of<M: ModuleDef + Default>() -> Self {
        ModuleImport::Static(ModuleType::of::<M>())
    }

    /// Async dynamic module, awaited once at scan time.
    pub fn deferred<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = DiResult<ModuleImport>> + Send + 'static,
    {
        ModuleImport::Deferred(future.boxed())
    }
}

impl From<ModuleType> for ModuleImport {
    fn from(module: ModuleType) -> Self {
        ModuleImport::Static(module)
    }
}

impl From<DynamicModule> for ModuleImport {
    fn from(module: DynamicModule) -> Self {
        ModuleImport::Dynamic(module)
    }
}

impl From<ForwardModule> for ModuleImport {
    fn from(module: ForwardModule) -> Self {
        ModuleImport::Forward(module)
    }
}

impl fmt::Debug for ModuleImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleImport::Static(module) => write!(f, "Static({})", module.name()),
            ModuleImport::Dynamic(module) => write!(f, "Dynamic({})", module.module.name()),
            ModuleImport::Forward(module) => write!(f, "Forward({})", module.description),
            ModuleImport::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Import a module that is declared later or imports the current one.
pub fn forward_module<F>(resolve: F) -> ForwardModule
where
    F: Fn() -> ModuleImport + Send + Sync + 'static,
{
    ForwardModule {
        resolve: Arc::new(resolve),
        description: type_name::<F>(),
    }
}
