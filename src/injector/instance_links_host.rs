//! Global token index used by `get`/`resolve` from outside the graph.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::{Collection, InstanceWrapper};
use crate::error::{DiError, DiResult};
use crate::module::Module;
use crate::token::InjectionToken;

/// Where one registration of a token lives.
#[derive(Clone)]
pub struct InstanceLink {
    pub token: InjectionToken,
    pub wrapper: Arc<InstanceWrapper>,
    pub collection: Collection,
    pub module_id: Arc<str>,
    pub(crate) module: Weak<Module>,
}

impl InstanceLink {
    pub fn module(&self) -> Option<Arc<Module>> {
        self.module.upgrade()
    }
}

impl std::fmt::Debug for InstanceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLink")
            .field("token", &self.token)
            .field("collection", &self.collection)
            .field("module_id", &self.module_id)
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinkOptions<'a> {
    /// Restrict to links registered by this module.
    pub module_id: Option<&'a str>,
    /// Return every link instead of one.
    pub each: bool,
}

#[derive(Debug)]
pub enum Links<'a> {
    One(&'a InstanceLink),
    Each(&'a [InstanceLink]),
}

/// Token → every (wrapper, module) registering it, in module order.
#[derive(Debug, Default)]
pub struct InstanceLinksHost {
    links: HashMap<InjectionToken, Vec<InstanceLink>>,
}

impl InstanceLinksHost {
    pub fn new(modules: &[Arc<Module>]) -> Self {
        let mut links: HashMap<InjectionToken, Vec<InstanceLink>> = HashMap::new();
        for module in modules {
            let collections = [
                (Collection::Provider, module.providers()),
                (Collection::Injectable, module.injectables()),
                (Collection::Controller, module.controllers()),
            ];
            for (collection, entries) in collections {
                for (token, wrapper) in entries {
                    links.entry(token.clone()).or_default().push(InstanceLink {
                        token,
                        wrapper,
                        collection,
                        module_id: module.id_arc(),
                        module: Arc::downgrade(module),
                    });
                }
            }
        }
        Self { links }
    }

    /// With `each` every link is returned. With a module id the link from
    /// that module is returned; otherwise the most recently registered one.
    pub fn get(&self, token: &InjectionToken, options: LinkOptions<'_>) -> DiResult<Links<'_>> {
        let links = self
            .links
            .get(token)
            .filter(|links| !links.is_empty())
            .ok_or_else(|| unknown(token))?;
        if options.each {
            return Ok(Links::Each(links));
        }
        let link = match options.module_id {
            Some(module_id) => links.iter().find(|link| &*link.module_id == module_id),
            None => links.last(),
        };
        link.map(Links::One).ok_or_else(|| unknown(token))
    }

    pub fn find(&self, token: &InjectionToken, module_id: Option<&str>) -> DiResult<&InstanceLink> {
        match self.get(token, LinkOptions { module_id, each: false })? {
            Links::One(link) => Ok(link),
            Links::Each(links) => links.last().ok_or_else(|| unknown(token)),
        }
    }

    pub fn find_all(&self, token: &InjectionToken) -> DiResult<&[InstanceLink]> {
        match self.get(token, LinkOptions { module_id: None, each: true })? {
            Links::Each(links) => Ok(links),
            Links::One(link) => Ok(std::slice::from_ref(link)),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

fn unknown(token: &InjectionToken) -> DiError {
    DiError::UnknownElement {
        token: token.display_name(),
    }
}
