//! Provider scopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider lifetime.
///
/// - **Default**: one instance for the whole application, cached under the
///   static context.
/// - **Request**: one instance per context id (usually one external call),
///   unless a durable strategy collapses several contexts into one subtree.
/// - **Transient**: one instance per resolution site; every consumer that
///   injects it receives its own copy.
///
/// Scope propagates: a Default provider that transitively depends on a
/// Request provider is itself resolved per context.
///
/// ```rust
/// use ferrous_modules::Scope;
///
/// assert_eq!(Scope::default(), Scope::Default);
/// assert_eq!(Scope::Request.to_string(), "request");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Default,
    Request,
    Transient,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Default => "default",
            Scope::Request => "request",
            Scope::Transient => "transient",
        };
        f.write_str(name)
    }
}

/// Scope declared by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeOptions {
    pub scope: Scope,
    /// Only meaningful for [`Scope::Request`].
    pub durable: bool,
}
