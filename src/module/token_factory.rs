//! Deterministic module identity.

use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::any::TypeId;
use std::collections::HashMap;
use uuid::Uuid;

use super::definition::{DynamicModule, ModuleImport, ModuleMetadata, ModuleType};
use crate::provider::Provider;

/// Produces the token identifying a compiled module.
///
/// Every module class gets a random id on first sight, cached so later calls
/// for the same class agree. Static modules hash `"{id}_{class}"`; dynamic
/// modules hash a canonical JSON rendering of their metadata, so deep-equal
/// declarations collapse to one token.
#[derive(Default)]
pub struct TokenFactory {
    module_ids: Mutex<HashMap<TypeId, String>>,
    static_tokens: Mutex<HashMap<String, String>>,
}

impl TokenFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, module: ModuleType, dynamic: Option<&DynamicModule>) -> String {
        let module_id = self.module_id(module);
        match dynamic {
            None => self.static_module_token(&module_id, module.class_name()),
            Some(dynamic) => {
                let opaque = json!({
                    "id": module_id,
                    "module": module.class_name(),
                    "dynamic": canonical_dynamic(dynamic),
                });
                hash_string(&serde_json::to_string(&opaque).unwrap_or_default())
            }
        }
    }

    pub fn static_module_token(&self, module_id: &str, class_name: &str) -> String {
        let key = format!("{}_{}", module_id, class_name);
        self.static_tokens
            .lock()
            .entry(key)
            .or_insert_with_key(|key| hash_string(key))
            .clone()
    }

    /// Random id for the module class, stable for the life of the factory.
    pub fn module_id(&self, module: ModuleType) -> String {
        self.module_ids
            .lock()
            .entry(module.type_id())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }
}

fn hash_string(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn canonical_dynamic(dynamic: &DynamicModule) -> JsonValue {
    let mut value = canonical_metadata(&dynamic.metadata);
    value["globalOverride"] = json!(dynamic.global);
    value["options"] = dynamic.options.clone().unwrap_or(JsonValue::Null);
    value
}

fn canonical_metadata(metadata: &ModuleMetadata) -> JsonValue {
    json!({
        "imports": metadata.imports.iter().map(canonical_import).collect::<Vec<_>>(),
        "providers": metadata.providers.iter().map(Provider::fingerprint).collect::<Vec<_>>(),
        "controllers": metadata.controllers.iter().map(Provider::fingerprint).collect::<Vec<_>>(),
        "injectables": metadata.injectables.iter().map(Provider::fingerprint).collect::<Vec<_>>(),
        "exports": metadata.exports.iter().map(|token| token.canonical()).collect::<Vec<_>>(),
        "global": metadata.global,
    })
}

// Forward imports render as the closure's identity and are never evaluated,
// so a module importing itself through one still terminates.
fn canonical_import(import: &ModuleImport) -> JsonValue {
    match import {
        ModuleImport::Static(module) => json!(module.class_name()),
        ModuleImport::Dynamic(dynamic) => json!({
            "module": dynamic.module.class_name(),
            "dynamic": canonical_dynamic(dynamic),
        }),
        ModuleImport::Forward(forward) => json!(forward.description()),
        // Unresolved async imports all render alike.
        ModuleImport::Deferred(_) => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::definition::{forward_module, ModuleDef};
    use serde::Serialize;

    #[derive(Default)]
    struct ConfigModule;

    impl ModuleDef for ConfigModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
        }
    }

    #[derive(Default)]
    struct OtherModule;

    impl ModuleDef for OtherModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
        }
    }

    #[derive(Serialize, Clone)]
    struct Options {
        folder: &'static str,
    }

    fn config(folder: &'static str) -> DynamicModule {
        let options = Options { folder };
        DynamicModule::new::<ConfigModule>(
            ModuleMetadata::new().provider(Provider::serializable_value("CONFIG_OPTIONS", options.clone())),
        )
        .with_options(&options)
    }

    #[test]
    fn module_id_is_cached_per_class() {
        let factory = TokenFactory::new();
        let a = factory.module_id(ModuleType::of::<ConfigModule>());
        let b = factory.module_id(ModuleType::of::<ConfigModule>());
        let c = factory.module_id(ModuleType::of::<OtherModule>());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn static_tokens_are_stable_and_distinct() {
        let factory = TokenFactory::new();
        let a = factory.create(ModuleType::of::<ConfigModule>(), None);
        assert_eq!(a, factory.create(ModuleType::of::<ConfigModule>(), None));
        assert_ne!(a, factory.create(ModuleType::of::<OtherModule>(), None));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn deep_equal_dynamic_modules_collapse() {
        let factory = TokenFactory::new();
        let module = ModuleType::of::<ConfigModule>();
        let first = factory.create(module, Some(&config("./env")));
        let second = factory.create(module, Some(&config("./env")));
        let other = factory.create(module, Some(&config("./other")));
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_ne!(first, factory.create(module, None));
    }

    #[test]
    fn opaque_values_and_async_imports_hash_alike() {
        let register = || {
            DynamicModule::new::<ConfigModule>(
                ModuleMetadata::new()
                    .import(ModuleImport::deferred(async { Ok(ModuleImport::of::<OtherModule>()) }))
                    .provider(Provider::value("URL", String::from("postgres://db"))),
            )
        };
        let factory = TokenFactory::new();
        let module = ModuleType::of::<ConfigModule>();
        assert_eq!(
            factory.create(module, Some(&register())),
            factory.create(module, Some(&register()))
        );
    }

    #[test]
    fn self_referencing_forward_import_terminates() {
        let factory = TokenFactory::new();
        let dynamic = DynamicModule::new::<ConfigModule>(
            ModuleMetadata::new().import(forward_module(|| ModuleImport::of::<ConfigModule>())),
        );
        let token = factory.create(ModuleType::of::<ConfigModule>(), Some(&dynamic));
        assert_eq!(token.len(), 64);
    }
}
