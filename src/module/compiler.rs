//! Turns a module import into `{type, token, dynamic metadata}`.

use super::definition::{ModuleImport, ModuleMetadata, ModuleType};
use super::token_factory::TokenFactory;
use crate::error::DiResult;

/// Result of compiling one import.
pub struct CompiledModule {
    pub module_type: ModuleType,
    pub token: String,
    pub dynamic_metadata: Option<ModuleMetadata>,
    /// Global flag set on a dynamic module, overriding the class metadata.
    pub global_override: Option<bool>,
}

#[derive(Default)]
pub struct ModuleCompiler {
    token_factory: TokenFactory,
}

impl ModuleCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_factory(&self) -> &TokenFactory {
        &self.token_factory
    }

    /// Awaits async imports and unwraps forward references before computing
    /// the module token.
    pub async fn compile(&self, import: ModuleImport) -> DiResult<CompiledModule> {
        let mut import = import;
        loop {
            import = match import {
                ModuleImport::Deferred(future) => future.await?,
                ModuleImport::Forward(forward) => forward.resolve(),
                ModuleImport::Static(module_type) => {
                    return Ok(CompiledModule {
                        module_type,
                        token: self.token_factory.create(module_type, None),
                        dynamic_metadata: None,
                        global_override: None,
                    });
                }
                ModuleImport::Dynamic(dynamic) => {
                    let token = self.token_factory.create(dynamic.module, Some(&dynamic));
                    return Ok(CompiledModule {
                        module_type: dynamic.module,
                        token,
                        dynamic_metadata: Some(dynamic.metadata),
                        global_override: dynamic.global,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::definition::{forward_module, DynamicModule, ModuleDef};

    #[derive(Default)]
    struct CatsModule;

    impl ModuleDef for CatsModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
        }
    }

    #[tokio::test]
    async fn static_forward_and_deferred_agree() {
        let compiler = ModuleCompiler::new();
        let direct = compiler.compile(ModuleImport::of::<CatsModule>()).await.unwrap();
        let forward = compiler
            .compile(forward_module(|| ModuleImport::of::<CatsModule>()).into())
            .await
            .unwrap();
        let deferred = compiler
            .compile(ModuleImport::deferred(async { Ok(ModuleImport::of::<CatsModule>()) }))
            .await
            .unwrap();

        assert_eq!(direct.token, forward.token);
        assert_eq!(direct.token, deferred.token);
        assert!(direct.dynamic_metadata.is_none());
    }

    #[tokio::test]
    async fn dynamic_module_carries_metadata() {
        let compiler = ModuleCompiler::new();
        let compiled = compiler
            .compile(DynamicModule::new::<CatsModule>(ModuleMetadata::new().export("X")).global(true).into())
            .await
            .unwrap();
        assert_eq!(compiled.module_type, ModuleType::of::<CatsModule>());
        assert_eq!(compiled.global_override, Some(true));
        assert_eq!(compiled.dynamic_metadata.map(|m| m.exports.len()), Some(1));
    }
}
