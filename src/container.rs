//! The module container: owns every module of an application.

use futures::lock::Mutex as AsyncMutex;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::config::ApplicationOptions;
use crate::context::ContextIdFactory;
use crate::error::DiResult;
use crate::graph_inspector::GraphInspector;
use crate::injector::{Injector, InstanceLinksHost, InstanceWrapper, LazyModuleLoader};
use crate::module::compiler::{CompiledModule, ModuleCompiler};
use crate::module::definition::{ModuleDef, ModuleImport, ModuleMetadata, ModuleType};
use crate::module::Module;
use crate::provider::Provider;
use crate::token::{token_of, InjectionToken};

/// Token under which the current request object is injected.
pub const REQUEST: &str = "REQUEST";

pub(crate) fn request_token() -> InjectionToken {
    InjectionToken::from(REQUEST)
}

/// Global module holding the framework providers.
#[derive(Default)]
pub(crate) struct InternalCoreModule;

impl ModuleDef for InternalCoreModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new().global()
    }
}

/// What a scanned module declared, kept until its providers are registered.
pub(crate) struct ModuleDeclaration {
    pub(crate) imports: Vec<String>,
    pub(crate) metadata: ModuleMetadata,
}

pub(crate) type OverrideFn = Arc<dyn Fn() -> ModuleImport + Send + Sync>;

#[derive(Default)]
struct ModuleTable {
    modules: Vec<Arc<Module>>,
    by_token: HashMap<String, usize>,
}

pub struct Container {
    modules: RwLock<ModuleTable>,
    declarations: Mutex<HashMap<String, ModuleDeclaration>>,
    overrides: RwLock<Vec<(ModuleType, OverrideFn)>>,
    compiler: ModuleCompiler,
    context_ids: ContextIdFactory,
    inspector: GraphInspector,
    options: ApplicationOptions,
    links: RwLock<Option<Arc<InstanceLinksHost>>>,
    lazy_lock: AsyncMutex<()>,
    self_ref: Weak<Container>,
}

impl Container {
    pub fn new(options: ApplicationOptions) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            modules: RwLock::new(ModuleTable::default()),
            declarations: Mutex::new(HashMap::new()),
            overrides: RwLock::new(Vec::new()),
            compiler: ModuleCompiler::new(),
            context_ids: ContextIdFactory::new(),
            inspector: GraphInspector::new(options.snapshot),
            options,
            links: RwLock::new(None),
            lazy_lock: AsyncMutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn options(&self) -> &ApplicationOptions {
        &self.options
    }

    pub fn compiler(&self) -> &ModuleCompiler {
        &self.compiler
    }

    pub fn context_id_factory(&self) -> &ContextIdFactory {
        &self.context_ids
    }

    pub fn inspector(&self) -> &GraphInspector {
        &self.inspector
    }

    pub fn injector(&self) -> Injector {
        Injector::new()
    }

    pub(crate) fn lazy_lock(&self) -> &AsyncMutex<()> {
        &self.lazy_lock
    }

    pub(crate) fn add_override(&self, module: ModuleType, replacement: OverrideFn) {
        self.overrides.write().push((module, replacement));
    }

    pub(crate) fn override_for(&self, module: ModuleType) -> Option<ModuleImport> {
        self.overrides
            .read()
            .iter()
            .find(|(original, _)| *original == module)
            .map(|(_, replacement)| replacement())
    }

    /// Inserts a compiled module and returns it with the imports still to walk.
    ///
    /// The class metadata is merged with any dynamic metadata; providers are
    /// registered later from the stored declaration.
    pub(crate) fn add_module(&self, compiled: CompiledModule) -> (Arc<Module>, Vec<ModuleImport>) {
        let mut metadata = compiled.module_type.metadata();
        if let Some(dynamic) = compiled.dynamic_metadata {
            metadata.merge(dynamic);
        }
        let is_global = compiled.global_override.unwrap_or(metadata.global);
        let imports = std::mem::take(&mut metadata.imports);

        let module = Module::new(compiled.module_type, compiled.token.clone(), is_global, self.self_ref.clone());
        trace!(module = module.name(), global = is_global, "module inserted");
        {
            let mut table = self.modules.write();
            let index = table.modules.len();
            table.by_token.insert(compiled.token.clone(), index);
            table.modules.push(module.clone());
        }
        self.declarations.lock().insert(
            compiled.token,
            ModuleDeclaration {
                imports: Vec::new(),
                metadata,
            },
        );
        (module, imports)
    }

    pub(crate) fn set_declared_imports(&self, token: &str, imports: Vec<String>) {
        if let Some(declaration) = self.declarations.lock().get_mut(token) {
            declaration.imports = imports;
        }
    }

    pub(crate) fn take_declaration(&self, token: &str) -> Option<ModuleDeclaration> {
        self.declarations.lock().remove(token)
    }

    /// Registers the global core module providing `REQUEST` and the lazy loader.
    pub(crate) async fn register_core_module(&self) -> DiResult<()> {
        if self.core_module().is_some() {
            return Ok(());
        }
        let compiled = self.compiler.compile(ModuleImport::of::<InternalCoreModule>()).await?;
        let (core, _) = self.add_module(compiled);
        self.take_declaration(core.token());
        core.set_distance(usize::MAX);

        core.add_wrapper(InstanceWrapper::request_provider(request_token(), Arc::downgrade(&core)));
        core.add_provider(Provider::value(
            token_of::<LazyModuleLoader>(),
            LazyModuleLoader::new(self.self_ref.clone()),
        ));
        core.add_export(request_token())?;
        core.add_export(token_of::<LazyModuleLoader>())?;
        Ok(())
    }

    pub fn core_module(&self) -> Option<Arc<Module>> {
        self.module_by_type(ModuleType::of::<InternalCoreModule>())
    }

    pub fn module(&self, token: &str) -> Option<Arc<Module>> {
        let table = self.modules.read();
        table
            .by_token
            .get(token)
            .and_then(|&index| table.modules.get(index))
            .cloned()
    }

    /// First module registered for class `module` (static or dynamic).
    pub fn module_by_type(&self, module: ModuleType) -> Option<Arc<Module>> {
        self.modules
            .read()
            .modules
            .iter()
            .find(|candidate| candidate.metatype() == module)
            .cloned()
    }

    /// Every module, in insertion order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().modules.clone()
    }

    fn global_modules(&self) -> Vec<Arc<Module>> {
        self.modules
            .read()
            .modules
            .iter()
            .filter(|module| module.is_global())
            .cloned()
            .collect()
    }

    /// Adds every global module as an import of every module.
    pub(crate) fn bind_global_scope(&self) {
        self.bind_global_modules(&self.modules());
    }

    pub(crate) fn bind_global_modules(&self, modules: &[Arc<Module>]) {
        let globals = self.global_modules();
        for module in modules {
            for global in &globals {
                module.add_import(global);
            }
        }
    }

    /// Binds freshly loaded global modules into every other module.
    pub(crate) fn bind_new_globals(&self, inserted: &[Arc<Module>]) {
        let globals: Vec<&Arc<Module>> = inserted.iter().filter(|module| module.is_global()).collect();
        if globals.is_empty() {
            return;
        }
        for module in self.modules() {
            for global in &globals {
                module.add_import(global);
            }
        }
    }

    /// Takes `removed` back out of the graph, with every import edge pointing
    /// at them, and rebuilds the token index.
    pub(crate) fn remove_modules(&self, removed: &[Arc<Module>]) {
        if removed.is_empty() {
            return;
        }
        let tokens: HashSet<&str> = removed.iter().map(|module| module.token()).collect();
        let ids: HashSet<&str> = removed.iter().map(|module| module.id()).collect();
        {
            let mut table = self.modules.write();
            table.modules.retain(|module| !tokens.contains(module.token()));
            let by_token: HashMap<String, usize> = table
                .modules
                .iter()
                .enumerate()
                .map(|(index, module)| (module.token().to_string(), index))
                .collect();
            table.by_token = by_token;
        }
        {
            let mut declarations = self.declarations.lock();
            for token in &tokens {
                declarations.remove(*token);
            }
        }
        for module in self.modules() {
            module.remove_imports(&ids);
        }
        debug!(modules = removed.len(), "modules removed");
        self.refresh_links();
    }

    /// Shared token index; built on first use and after each graph change.
    pub fn links(&self) -> Arc<InstanceLinksHost> {
        if let Some(links) = self.links.read().as_ref() {
            return links.clone();
        }
        self.refresh_links()
    }

    pub(crate) fn refresh_links(&self) -> Arc<InstanceLinksHost> {
        let links = Arc::new(InstanceLinksHost::new(&self.modules()));
        *self.links.write() = Some(links.clone());
        links
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("modules", &self.modules.read().modules.len())
            .field("options", &self.options)
            .finish()
    }
}
