//! Loading modules after bootstrap.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::InstanceLoader;
use crate::container::Container;
use crate::error::{DiError, DiResult};
use crate::module::definition::ModuleImport;
use crate::module::Module;
use crate::module_ref::ModuleRef;
use crate::scanner::DependenciesScanner;

#[derive(Debug, Clone, Copy)]
pub struct LazyModuleLoaderOptions {
    /// Log "dependencies initialized" for each loaded module.
    pub logger: bool,
}

impl Default for LazyModuleLoaderOptions {
    fn default() -> Self {
        Self { logger: true }
    }
}

/// Adds modules to a running application.
///
/// Loading a module that is already part of the graph returns its existing
/// [`ModuleRef`] without rebuilding anything.
#[derive(Clone)]
pub struct LazyModuleLoader {
    container: Weak<Container>,
}

impl LazyModuleLoader {
    pub(crate) fn new(container: Weak<Container>) -> Self {
        Self { container }
    }

    pub async fn load<F, Fut>(&self, loader: F, options: LazyModuleLoaderOptions) -> DiResult<ModuleRef>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ModuleImport>,
    {
        let container = self.container.upgrade().ok_or_else(|| DiError::UnknownModule {
            module: "application".to_string(),
        })?;
        let import = loader().await;

        // Concurrent loads of the same module must not observe it half-built.
        let _guard = container.lazy_lock().lock().await;
        let known: HashSet<String> = container.modules().iter().map(|module| module.token().to_string()).collect();
        match load_subgraph(&container, import, options).await {
            Ok(module_ref) => Ok(module_ref),
            Err(error) => {
                // A failed load leaves nothing behind, so a retry scans afresh.
                let added: Vec<Arc<Module>> = container
                    .modules()
                    .into_iter()
                    .filter(|module| !known.contains(module.token()))
                    .collect();
                warn!(modules = added.len(), %error, "lazy load failed; rolling back");
                container.remove_modules(&added);
                Err(error)
            }
        }
    }
}

async fn load_subgraph(
    container: &Arc<Container>,
    import: ModuleImport,
    options: LazyModuleLoaderOptions,
) -> DiResult<ModuleRef> {
    let scanner = DependenciesScanner::new(container.clone());
    let outcome = scanner.scan_for_modules(import).await?;
    if outcome.inserted.is_empty() {
        debug!(module = outcome.root.name(), "module already loaded");
        return Ok(outcome.root.module_ref());
    }

    scanner.scan_modules_for_dependencies(&outcome.inserted)?;
    scanner.calculate_distance_from(&outcome.root, 1);
    container.bind_global_modules(&outcome.inserted);
    container.bind_new_globals(&outcome.inserted);
    container.refresh_links();
    load_instances(container, &outcome.inserted, options).await?;
    Ok(outcome.root.module_ref())
}

async fn load_instances(
    container: &Arc<Container>,
    modules: &[Arc<Module>],
    options: LazyModuleLoaderOptions,
) -> DiResult<()> {
    InstanceLoader::new(container)
        .with_logging(options.logger)
        .create_instances_of_dependencies(modules)
        .await
}

impl std::fmt::Debug for LazyModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyModuleLoader").finish_non_exhaustive()
    }
}
