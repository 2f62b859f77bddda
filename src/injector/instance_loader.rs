//! Bootstrap pass: builds every static instance of a set of modules.

use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{error, info};

use super::{Injector, InstanceWrapper};
use crate::container::Container;
use crate::error::DiResult;
use crate::module::Module;

pub struct InstanceLoader<'a> {
    container: &'a Container,
    injector: Injector,
    log: bool,
}

impl<'a> InstanceLoader<'a> {
    pub fn new(container: &'a Container) -> Self {
        Self {
            container,
            injector: Injector::new(),
            log: true,
        }
    }

    /// Suppress the per-module "dependencies initialized" line.
    pub fn with_logging(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    /// Creates prototypes, then instances, for `modules`.
    ///
    /// On failure a partial graph is recorded (when snapshots are enabled)
    /// and the error is returned unchanged.
    pub async fn create_instances_of_dependencies(&self, modules: &[Arc<Module>]) -> DiResult<()> {
        self.create_prototypes(modules);
        let inspector = self.container.inspector();
        if self.container.options().preview {
            inspector.inspect_modules(modules);
            return Ok(());
        }
        match self.create_instances(modules).await {
            Ok(()) => {
                inspector.inspect_modules(modules);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to instantiate module graph");
                inspector.inspect_modules(modules);
                inspector.register_partial(&err);
                Err(err)
            }
        }
    }

    pub fn create_prototypes(&self, modules: &[Arc<Module>]) {
        for module in modules {
            for wrapper in module.wrappers() {
                wrapper.create_prototype();
            }
        }
    }

    /// Modules load concurrently; inside a module providers, injectables and
    /// controllers load in that order.
    pub async fn create_instances(&self, modules: &[Arc<Module>]) -> DiResult<()> {
        let results = join_all(modules.iter().map(|module| self.create_module_instances(module))).await;
        results.into_iter().collect()
    }

    async fn create_module_instances(&self, module: &Arc<Module>) -> DiResult<()> {
        let providers = module.providers();
        let injectables = module.injectables();
        let controllers = module.controllers();
        for entries in [providers, injectables, controllers] {
            let wrappers: Vec<Arc<InstanceWrapper>> = entries.into_iter().map(|(_, wrapper)| wrapper).collect();
            try_join_all(wrappers.iter().map(|wrapper| self.injector.load_static(wrapper))).await?;
        }
        if self.log {
            info!(module = module.name(), "dependencies initialized");
        }
        Ok(())
    }
}
