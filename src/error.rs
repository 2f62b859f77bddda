//! Error types for module-graph resolution.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Describes the dependency that failed to resolve.
///
/// Exactly one of `index` (constructor parameter) or `key` (property) is set.
/// `dependencies` holds the display names of every constructor parameter so the
/// failing position can be rendered as `Service(Config, ?, Cache)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyContext {
    pub index: Option<usize>,
    pub key: Option<String>,
    pub name: String,
    pub dependencies: Vec<String>,
}

impl DependencyContext {
    /// Context for a positional constructor dependency.
    pub fn parameter(index: usize, name: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            index: Some(index),
            key: None,
            name: name.into(),
            dependencies,
        }
    }

    /// Context for a property dependency.
    pub fn property(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index: None,
            key: Some(key.into()),
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    fn signature(&self) -> String {
        match self.index {
            Some(index) => self
                .dependencies
                .iter()
                .enumerate()
                .map(|(i, name)| if i == index { "?" } else { name.as_str() })
                .collect::<Vec<_>>()
                .join(", "),
            None => String::new(),
        }
    }

    fn position(&self) -> String {
        match (&self.index, &self.key) {
            (Some(index), _) => format!("the argument {} at index [{}]", self.name, index),
            (None, Some(key)) => format!("the property \"{}\" ({})", key, self.name),
            (None, None) => format!("the dependency {}", self.name),
        }
    }
}

impl fmt::Display for DependencyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}); {}", self.signature(), self.position())
    }
}

fn module_scope(module: &Option<String>) -> String {
    match module {
        Some(name) => format!("is available in the {} context", name),
        None => "is available in the current context".to_string(),
    }
}

/// Module-graph resolution errors.
///
/// Every variant is `Clone` so one failed construction can be reported to all
/// callers waiting on it.
#[derive(thiserror::Error, Debug, Clone)]
pub enum DiError {
    /// A token could not be found along the module's reachable import path.
    #[error("cannot resolve dependencies of {type_name} {context}: make sure it {}", module_scope(.module))]
    UnknownDependencies {
        type_name: String,
        context: DependencyContext,
        module: Option<String>,
    },
    /// A dependency cycle without a forward reference.
    #[error("circular dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },
    /// Synchronous access to a request- or transient-scoped provider.
    #[error("{token} is scoped (request or transient); use resolve() instead of get()")]
    InvalidClassScope { token: String },
    /// The token is not registered anywhere in the container.
    #[error("{token} could not be found in the container")]
    UnknownElement { token: String },
    /// A dependency was reachable but produced no value.
    #[error("dependency of {type_name} {context} is undefined: it {}; this usually means a forward reference was read before its target was built", module_scope(.module))]
    UndefinedDependency {
        type_name: String,
        context: DependencyContext,
        module: Option<String>,
    },
    /// A module exports a token that is neither its own provider nor an imported module.
    #[error("{module} cannot export {token}: it is neither a provider of the module nor an imported module")]
    UnknownExport { token: String, module: String },
    /// A module class is not part of the graph.
    #[error("module {module} is not registered in the container")]
    UnknownModule { module: String },
    /// The resolved instance is not of the requested type.
    #[error("type mismatch for {token}: expected {expected}")]
    TypeMismatch { token: String, expected: &'static str },
    /// A constructor or factory returned an error of its own.
    #[error("provider {provider} failed to construct")]
    ProviderFailed {
        provider: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },
    /// An in-flight construction was dropped before it completed.
    #[error("construction of {provider} was aborted before completion")]
    ConstructionAborted { provider: String },
}

impl DiError {
    /// Wraps an application error raised by a provider's constructor.
    pub fn provider_failed<E>(provider: impl Into<String>, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        DiError::ProviderFailed {
            provider: provider.into(),
            source: Arc::new(error),
        }
    }

    pub(crate) fn undefined(type_name: &str, context: DependencyContext, module: Option<String>) -> Self {
        DiError::UndefinedDependency {
            type_name: type_name.to_string(),
            context,
            module,
        }
    }

    /// Returns `true` for the lookup failures an optional dependency absorbs.
    pub fn is_unresolvable(&self) -> bool {
        matches!(
            self,
            DiError::UnknownDependencies { .. } | DiError::UnknownElement { .. }
        )
    }
}

/// Result type for module-graph operations.
pub type DiResult<T> = Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dependencies_renders_signature() {
        let err = DiError::UnknownDependencies {
            type_name: "CatsService".into(),
            context: DependencyContext::parameter(
                1,
                "CatsRepository",
                vec!["Config".into(), "CatsRepository".into()],
            ),
            module: Some("CatsModule".into()),
        };
        let message = err.to_string();
        assert!(message.contains("CatsService (Config, ?)"));
        assert!(message.contains("CatsRepository at index [1]"));
        assert!(message.contains("CatsModule context"));
    }

    #[test]
    fn property_context_names_the_key() {
        let context = DependencyContext::property("logger", "Logger");
        assert!(context.to_string().contains("\"logger\""));
    }

    #[test]
    fn circular_path_is_joined() {
        let err = DiError::CircularDependency {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: A -> B -> A");
    }

    #[test]
    fn provider_failure_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = DiError::provider_failed("Db", io);
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
        assert!(!err.is_unresolvable());
    }
}
