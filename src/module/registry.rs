//! Insertion-ordered wrapper storage.

use std::collections::HashMap;
use std::sync::Arc;

use crate::injector::InstanceWrapper;
use crate::token::InjectionToken;

/// Wrappers of one collection (providers, injectables or controllers).
///
/// Keeps declaration order for lifecycle walks; re-registering a token
/// replaces the wrapper in place.
#[derive(Default)]
pub(crate) struct WrapperRegistry {
    entries: Vec<(InjectionToken, Arc<InstanceWrapper>)>,
    index: HashMap<InjectionToken, usize>,
}

impl WrapperRegistry {
    pub(crate) fn insert(&mut self, wrapper: Arc<InstanceWrapper>) {
        let token = wrapper.token().clone();
        match self.index.get(&token) {
            Some(&position) => self.entries[position] = (token, wrapper),
            None => {
                self.index.insert(token.clone(), self.entries.len());
                self.entries.push((token, wrapper));
            }
        }
    }

    pub(crate) fn get(&self, token: &InjectionToken) -> Option<Arc<InstanceWrapper>> {
        self.index
            .get(token)
            .and_then(|&position| self.entries.get(position))
            .map(|(_, wrapper)| wrapper.clone())
    }

    pub(crate) fn contains(&self, token: &InjectionToken) -> bool {
        self.index.contains_key(token)
    }

    pub(crate) fn entries(&self) -> Vec<(InjectionToken, Arc<InstanceWrapper>)> {
        self.entries.clone()
    }

    pub(crate) fn wrappers(&self) -> impl Iterator<Item = &Arc<InstanceWrapper>> {
        self.entries.iter().map(|(_, wrapper)| wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::Collection;
    use crate::provider::Provider;
    use std::sync::Weak;

    fn wrapper(token: &str, value: u8) -> Arc<InstanceWrapper> {
        InstanceWrapper::from_provider(Provider::value(token, value), Collection::Provider, Weak::new())
    }

    #[test]
    fn replacement_keeps_position() {
        let mut registry = WrapperRegistry::default();
        registry.insert(wrapper("A", 1));
        registry.insert(wrapper("B", 2));
        let replacement = wrapper("A", 3);
        registry.insert(replacement.clone());

        assert_eq!(registry.entries().len(), 2);
        let order: Vec<String> = registry.entries().iter().map(|(t, _)| t.display_name()).collect();
        assert_eq!(order, vec!["A", "B"]);
        let current = registry.get(&InjectionToken::from("A")).unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }
}
