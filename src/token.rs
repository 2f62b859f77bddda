//! Injection tokens.

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier a provider is registered under.
///
/// Tokens are either a Rust type (the "class reference"), a string name, or a
/// [`Symbol`]. Type tokens compare by `TypeId` only; the stored name is for
/// diagnostics.
///
/// ```rust
/// use ferrous_modules::{token_of, InjectionToken, Symbol};
///
/// struct Database;
///
/// assert_eq!(token_of::<Database>(), token_of::<Database>());
/// assert_eq!(InjectionToken::from("CONFIG"), InjectionToken::name("CONFIG"));
///
/// let a = Symbol::new("cache");
/// let b = Symbol::new("cache");
/// assert_ne!(InjectionToken::from(a), InjectionToken::from(b));
/// ```
#[derive(Clone)]
pub enum InjectionToken {
    Type(TypeId, &'static str),
    Name(Arc<str>),
    Symbol(Symbol),
}

impl InjectionToken {
    /// String token.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        InjectionToken::Name(name.into())
    }

    /// Human-readable name used in error messages.
    pub fn display_name(&self) -> String {
        match self {
            InjectionToken::Type(_, name) => short_type_name(name).to_string(),
            InjectionToken::Name(name) => name.to_string(),
            InjectionToken::Symbol(symbol) => symbol.to_string(),
        }
    }

    /// Stable textual form used when fingerprinting dynamic modules.
    pub(crate) fn canonical(&self) -> String {
        match self {
            InjectionToken::Type(_, name) => (*name).to_string(),
            InjectionToken::Name(name) => name.to_string(),
            InjectionToken::Symbol(symbol) => format!("{}#{}", symbol, symbol.id),
        }
    }

    pub fn is_type<T: 'static>(&self) -> bool {
        matches!(self, InjectionToken::Type(id, _) if *id == TypeId::of::<T>())
    }
}

impl PartialEq for InjectionToken {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (InjectionToken::Type(a, _), InjectionToken::Type(b, _)) => a == b,
            (InjectionToken::Name(a), InjectionToken::Name(b)) => a == b,
            (InjectionToken::Symbol(a), InjectionToken::Symbol(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for InjectionToken {}

impl Hash for InjectionToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            InjectionToken::Type(id, _) => id.hash(state),
            InjectionToken::Name(name) => name.hash(state),
            InjectionToken::Symbol(symbol) => symbol.id.hash(state),
        }
    }
}

impl fmt::Debug for InjectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionToken::Type(_, name) => write!(f, "Type({})", name),
            InjectionToken::Name(name) => write!(f, "Name({:?})", name),
            InjectionToken::Symbol(symbol) => write!(f, "{}", symbol),
        }
    }
}

impl fmt::Display for InjectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl From<&str> for InjectionToken {
    fn from(name: &str) -> Self {
        InjectionToken::Name(Arc::from(name))
    }
}

impl From<String> for InjectionToken {
    fn from(name: String) -> Self {
        InjectionToken::Name(Arc::from(name))
    }
}

impl From<Symbol> for InjectionToken {
    fn from(symbol: Symbol) -> Self {
        InjectionToken::Symbol(symbol)
    }
}

impl From<&InjectionToken> for InjectionToken {
    fn from(token: &InjectionToken) -> Self {
        token.clone()
    }
}

/// Type token for `T`.
pub fn token_of<T: ?Sized + 'static>() -> InjectionToken {
    InjectionToken::Type(TypeId::of::<T>(), type_name::<T>())
}

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// Unique token with a description; two symbols with the same description differ.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    pub fn new(description: impl Into<Arc<str>>) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})#{}", self.description, self.id)
    }
}

/// Strips the module path from a `type_name` while keeping generic arguments readable.
pub(crate) fn short_type_name(name: &str) -> &str {
    let base = match name.find('<') {
        Some(generic) => &name[..generic],
        None => name,
    };
    match base.rfind("::") {
        Some(pos) => &name[pos + 2..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Alpha;
    struct Beta;

    #[test]
    fn type_tokens_compare_by_type_id() {
        assert_eq!(token_of::<Alpha>(), token_of::<Alpha>());
        assert_ne!(token_of::<Alpha>(), token_of::<Beta>());
        assert!(token_of::<Alpha>().is_type::<Alpha>());
    }

    #[test]
    fn names_and_symbols_hash_consistently() {
        let symbol = Symbol::new("queue");
        let mut map = HashMap::new();
        map.insert(InjectionToken::from("CONFIG"), 1);
        map.insert(InjectionToken::from(symbol.clone()), 2);
        map.insert(token_of::<Alpha>(), 3);

        assert_eq!(map.get(&InjectionToken::name("CONFIG")), Some(&1));
        assert_eq!(map.get(&InjectionToken::from(symbol)), Some(&2));
        assert_eq!(map.get(&InjectionToken::from(Symbol::new("queue"))), None);
        assert_eq!(map.get(&token_of::<Alpha>()), Some(&3));
    }

    #[test]
    fn display_names_are_short() {
        assert_eq!(token_of::<Alpha>().display_name(), "Alpha");
        assert_eq!(short_type_name("alloc::vec::Vec<core::primitive::u8>"), "Vec<core::primitive::u8>");
        assert_eq!(InjectionToken::from(Symbol::new("db")).display_name(), "Symbol(db)");
    }
}
