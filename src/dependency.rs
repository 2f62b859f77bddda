//! Dependency descriptors and the values handed to constructors.

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{DependencyContext, DiError, DiResult};
use crate::internal::InstanceSlot;
use crate::token::{token_of, InjectionToken};

/// Type-erased shared instance.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Deferred token evaluation used to break declaration or dependency cycles.
#[derive(Clone)]
pub struct ForwardRef {
    resolve: Arc<dyn Fn() -> InjectionToken + Send + Sync>,
    description: &'static str,
}

impl ForwardRef {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn() -> InjectionToken + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
            description: type_name::<F>(),
        }
    }

    pub fn token(&self) -> InjectionToken {
        (self.resolve)()
    }

    /// Source-level identity of the closure; stable across calls.
    pub fn description(&self) -> &'static str {
        self.description
    }
}

impl fmt::Debug for ForwardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForwardRef({})", self.description)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum DependencyToken {
    Token(InjectionToken),
    Forward(ForwardRef),
}

/// One constructor parameter or property dependency: `{token, optional}`.
///
/// ```rust
/// use ferrous_modules::{Dependency, token_of};
///
/// struct Config;
///
/// let dep = Dependency::on::<Config>().optional();
/// assert!(dep.is_optional());
/// assert_eq!(dep.display_name(), "Config");
/// ```
#[derive(Clone, Debug)]
pub struct Dependency {
    pub(crate) token: DependencyToken,
    pub(crate) optional: bool,
}

impl Dependency {
    /// Depend on the provider registered under type `T`.
    pub fn on<T: ?Sized + 'static>() -> Self {
        Self::token(token_of::<T>())
    }

    pub fn token(token: impl Into<InjectionToken>) -> Self {
        Self {
            token: DependencyToken::Token(token.into()),
            optional: false,
        }
    }

    /// Depend on a token evaluated lazily; the constructor receives a [`Deferred`]
    /// handle that is filled once the target exists.
    pub fn forward<F>(resolve: F) -> Self
    where
        F: Fn() -> InjectionToken + Send + Sync + 'static,
    {
        Self {
            token: DependencyToken::Forward(ForwardRef::new(resolve)),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_forward(&self) -> bool {
        matches!(self.token, DependencyToken::Forward(_))
    }

    /// Evaluates the token, calling the forward closure if needed.
    pub fn resolve_token(&self) -> InjectionToken {
        match &self.token {
            DependencyToken::Token(token) => token.clone(),
            DependencyToken::Forward(forward) => forward.token(),
        }
    }

    pub fn display_name(&self) -> String {
        self.resolve_token().display_name()
    }

    pub(crate) fn canonical(&self) -> String {
        match &self.token {
            DependencyToken::Token(token) => token.canonical(),
            DependencyToken::Forward(forward) => forward.description().to_string(),
        }
    }
}

impl From<InjectionToken> for Dependency {
    fn from(token: InjectionToken) -> Self {
        Dependency::token(token)
    }
}

/// A resolved dependency value.
#[derive(Clone)]
pub(crate) enum Injected {
    Instance(AnyArc),
    Deferred(InstanceSlot),
    Absent,
}

/// Positional dependencies passed to a class constructor or factory.
pub struct Arguments {
    provider: String,
    names: Vec<String>,
    values: Vec<Injected>,
}

impl Arguments {
    pub(crate) fn new(provider: String, names: Vec<String>, values: Vec<Injected>) -> Self {
        Self {
            provider,
            names,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn name(&self, index: usize) -> &str {
        self.names.get(index).map(String::as_str).unwrap_or("?")
    }

    fn context(&self, index: usize) -> DependencyContext {
        DependencyContext::parameter(index, self.name(index), self.names.clone())
    }

    /// Required dependency at `index`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> DiResult<Arc<T>> {
        match self.optional::<T>(index)? {
            Some(value) => Ok(value),
            None => Err(DiError::undefined(&self.provider, self.context(index), None)),
        }
    }

    /// Optional dependency at `index`; `None` when it could not be resolved.
    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> DiResult<Option<Arc<T>>> {
        match self.values.get(index) {
            Some(Injected::Instance(value)) => downcast(value.clone(), self.name(index)).map(Some),
            Some(Injected::Deferred(slot)) => match slot.get() {
                Some(value) => downcast(value, self.name(index)).map(Some),
                None => Err(DiError::undefined(&self.provider, self.context(index), None)),
            },
            Some(Injected::Absent) => Ok(None),
            None => Err(DiError::undefined(&self.provider, self.context(index), None)),
        }
    }

    /// Untyped instance at `index`, used for aliases.
    pub(crate) fn raw(&self, index: usize) -> Option<AnyArc> {
        match self.values.get(index) {
            Some(Injected::Instance(value)) => Some(value.clone()),
            Some(Injected::Deferred(slot)) => slot.get(),
            _ => None,
        }
    }

    /// Forward-referenced dependency at `index`.
    pub fn deferred<T: Send + Sync + 'static>(&self, index: usize) -> DiResult<Deferred<T>> {
        match self.values.get(index) {
            Some(Injected::Deferred(slot)) => Ok(Deferred::new(slot.clone(), self.name(index).to_string())),
            Some(Injected::Instance(value)) => {
                let slot = InstanceSlot::new();
                slot.fill(value.clone());
                Ok(Deferred::new(slot, self.name(index).to_string()))
            }
            _ => Err(DiError::undefined(&self.provider, self.context(index), None)),
        }
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(value: AnyArc, token: &str) -> DiResult<Arc<T>> {
    value.downcast::<T>().map_err(|_| DiError::TypeMismatch {
        token: token.to_string(),
        expected: type_name::<T>(),
    })
}

/// Handle to a forward-referenced instance.
///
/// Reading it inside the constructor fails with `UndefinedDependency`; once
/// the dependency cycle has been built it yields the shared instance.
pub struct Deferred<T> {
    slot: InstanceSlot,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Deferred<T> {
    pub(crate) fn new(slot: InstanceSlot, name: String) -> Self {
        Self {
            slot,
            name,
            _marker: PhantomData,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.is_filled()
    }

    pub fn get(&self) -> DiResult<Arc<T>> {
        match self.slot.get() {
            Some(value) => downcast(value, &self.name),
            None => Err(DiError::undefined(
                &self.name,
                DependencyContext::property("forward", self.name.clone()),
                None,
            )),
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("name", &self.name)
            .field("resolved", &self.slot.is_filled())
            .finish()
    }
}
