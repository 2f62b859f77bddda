//! Walks imports from the root module and fills the container.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::container::Container;
use crate::error::DiResult;
use crate::module::definition::ModuleImport;
use crate::module::Module;

/// Result of a module scan.
pub struct ScanOutcome {
    /// Module the scan started from.
    pub root: Arc<Module>,
    /// Modules that were not in the container before, in discovery order.
    pub inserted: Vec<Arc<Module>>,
}

pub struct DependenciesScanner {
    container: Arc<Container>,
}

impl DependenciesScanner {
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }

    /// Full bootstrap scan: core module, every reachable module, their
    /// providers and exports, distances, then global bindings.
    pub async fn scan(&self, root: ModuleImport) -> DiResult<Arc<Module>> {
        self.container.register_core_module().await?;
        let outcome = self.scan_for_modules(root).await?;
        self.scan_modules_for_dependencies(&outcome.inserted)?;
        self.calculate_modules_distance(&outcome.root);
        self.container.bind_global_scope();
        self.container.refresh_links();
        debug!(modules = outcome.inserted.len(), root = outcome.root.name(), "module graph scanned");
        Ok(outcome.root)
    }

    /// Depth-first walk over imports. Modules already in the container are
    /// neither re-inserted nor re-walked.
    pub async fn scan_for_modules(&self, import: ModuleImport) -> DiResult<ScanOutcome> {
        let mut inserted = Vec::new();
        let root = self.insert_or_find(import, &mut inserted).await?;
        Ok(ScanOutcome { root, inserted })
    }

    fn insert_or_find<'a>(
        &'a self,
        import: ModuleImport,
        inserted: &'a mut Vec<Arc<Module>>,
    ) -> BoxFuture<'a, DiResult<Arc<Module>>> {
        async move {
            let compiler = self.container.compiler();
            let mut compiled = compiler.compile(import).await?;
            if let Some(replacement) = self.container.override_for(compiled.module_type) {
                trace!(module = compiled.module_type.name(), "module overridden");
                compiled = compiler.compile(replacement).await?;
            }
            if let Some(existing) = self.container.module(&compiled.token) {
                return Ok(existing);
            }

            let (module, imports) = self.container.add_module(compiled);
            inserted.push(module.clone());
            let mut import_tokens = Vec::with_capacity(imports.len());
            for import in imports {
                let child = self.insert_or_find(import, &mut *inserted).await?;
                import_tokens.push(child.token().to_string());
            }
            self.container.set_declared_imports(module.token(), import_tokens);
            Ok(module)
        }
        .boxed()
    }

    /// Links imports, then registers providers, injectables, controllers and
    /// exports of each module from its stored declaration.
    pub fn scan_modules_for_dependencies(&self, modules: &[Arc<Module>]) -> DiResult<()> {
        for module in modules {
            let Some(declaration) = self.container.take_declaration(module.token()) else {
                continue;
            };
            for token in &declaration.imports {
                if let Some(imported) = self.container.module(token) {
                    module.add_import(&imported);
                }
            }
            let metadata = declaration.metadata;
            for provider in metadata.providers {
                module.add_provider(provider);
            }
            for injectable in metadata.injectables {
                module.add_injectable(injectable);
            }
            for controller in metadata.controllers {
                module.add_controller(controller);
            }
            for export in metadata.exports {
                module.add_export(export)?;
            }
        }
        Ok(())
    }

    /// Each module's distance is the longest acyclic import path from the root.
    pub fn calculate_modules_distance(&self, root: &Arc<Module>) {
        self.calculate_distance_from(root, 0);
    }

    /// Places `root` at least `distance` deep and pushes its imports below it.
    /// Lazily loaded subgraphs hang off the application root at distance 1.
    pub fn calculate_distance_from(&self, root: &Arc<Module>, distance: usize) {
        if distance > root.distance() {
            root.set_distance(distance);
        }
        let mut visiting = HashSet::new();
        visiting.insert(root.id().to_string());
        Self::assign_distance(root, root.distance().saturating_add(1), &mut visiting);
    }

    fn assign_distance(module: &Arc<Module>, depth: usize, visiting: &mut HashSet<String>) {
        for imported in module.imports() {
            if imported.is_global() && imported.distance() == usize::MAX {
                continue;
            }
            if !visiting.insert(imported.id().to_string()) {
                continue;
            }
            if depth > imported.distance() {
                imported.set_distance(depth);
            }
            Self::assign_distance(&imported, depth + 1, visiting);
            visiting.remove(imported.id());
        }
    }
}
