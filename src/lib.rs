//! # ferrous-modules
//!
//! Module-graph dependency injection for async Rust.
//!
//! Applications are assembled from modules. Each module declares the
//! providers it owns, the modules it imports and the tokens it exports; a
//! provider can only inject what its own module provides or what an imported
//! module exports.
//!
//! ## Features
//!
//! - **Scopes**: singleton (Default), per-request (Request) and per-consumer (Transient) providers
//! - **Scope propagation**: a singleton that depends on a request-scoped provider becomes request-scoped
//! - **Dynamic modules**: modules configured at the import site, deduplicated by content
//! - **Durable trees**: a [`ContextIdStrategy`] can share request-scoped instances across requests (per tenant, say)
//! - **Forward references**: constructor and property cycles broken explicitly with [`Deferred`] handles
//! - **Lazy loading**: add modules to a running application with [`LazyModuleLoader`]
//! - **Lifecycle hooks**: init, bootstrap and shutdown hooks ordered by module depth
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_modules::{ApplicationContext, Dependency, ModuleDef, ModuleMetadata, Provider, token_of};
//! use std::sync::Arc;
//!
//! struct Database { url: String }
//! struct UserService { db: Arc<Database> }
//!
//! #[derive(Default)]
//! struct DatabaseModule;
//!
//! impl ModuleDef for DatabaseModule {
//!     fn metadata() -> ModuleMetadata {
//!         ModuleMetadata::new()
//!             .provider(Provider::class(|_| Ok(Database { url: "postgres://localhost".into() })))
//!             .export(token_of::<Database>())
//!     }
//! }
//!
//! #[derive(Default)]
//! struct AppModule;
//!
//! impl ModuleDef for AppModule {
//!     fn metadata() -> ModuleMetadata {
//!         ModuleMetadata::new()
//!             .import(ferrous_modules::ModuleImport::of::<DatabaseModule>())
//!             .provider(
//!                 Provider::class(|args| Ok(UserService { db: args.get::<Database>(0)? }))
//!                     .inject([Dependency::on::<Database>()]),
//!             )
//!     }
//! }
//!
//! # futures::executor::block_on(async {
//! let app = ApplicationContext::create::<AppModule>().await.unwrap();
//! let users = app.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! # });
//! ```
//!
//! ## Request scope
//!
//! ```rust
//! use ferrous_modules::{ApplicationContext, ContextIdFactory, ModuleDef, ModuleMetadata, Provider, Scope};
//! use std::sync::Arc;
//!
//! struct RequestState;
//!
//! #[derive(Default)]
//! struct AppModule;
//!
//! impl ModuleDef for AppModule {
//!     fn metadata() -> ModuleMetadata {
//!         ModuleMetadata::new().provider(Provider::class(|_| Ok(RequestState)).scope(Scope::Request))
//!     }
//! }
//!
//! # futures::executor::block_on(async {
//! let app = ApplicationContext::create::<AppModule>().await.unwrap();
//! assert!(app.get::<RequestState>().is_err());
//!
//! let context = ContextIdFactory::create();
//! let a = app.resolve::<RequestState>(Some(&context)).await.unwrap();
//! let b = app.resolve::<RequestState>(Some(&context)).await.unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! # });
//! ```

pub mod application;
pub mod config;
pub mod container;
pub mod context;
pub mod dependency;
pub mod error;
pub mod graph_inspector;
pub mod injector;
pub mod lifecycle;
pub mod module;
pub mod module_ref;
pub mod provider;
pub mod scanner;
pub mod scope;
pub mod token;

mod internal;

pub use application::{ApplicationBuilder, ApplicationContext};
pub use config::ApplicationOptions;
pub use container::{Container, REQUEST};
pub use context::{
    ContextCarrier, ContextId, ContextIdFactory, ContextIdResolver, ContextIdStrategy, ContextSlot,
    HostComponentInfo, STATIC_CONTEXT,
};
pub use dependency::{AnyArc, Arguments, Deferred, Dependency, ForwardRef};
pub use error::{DependencyContext, DiError, DiResult};
pub use graph_inspector::{GraphInspector, SerializedGraph};
pub use injector::{
    Collection, Injector, InstanceLinksHost, InstanceLoader, InstanceWrapper, LazyModuleLoader,
    LazyModuleLoaderOptions,
};
pub use lifecycle::LifecycleHook;
pub use module::compiler::{CompiledModule, ModuleCompiler};
pub use module::definition::{forward_module, DynamicModule, ForwardModule, ModuleDef, ModuleImport, ModuleMetadata, ModuleType};
pub use module::token_factory::TokenFactory;
pub use module::Module;
pub use module_ref::{GetOptions, IntrospectionResult, ModuleRef, ResolveOptions};
pub use provider::{ClassProvider, FactoryProvider, Provider};
pub use scanner::{DependenciesScanner, ScanOutcome};
pub use scope::{Scope, ScopeOptions};
pub use token::{token_of, InjectionToken, Symbol};

/// Async trait support for [`ModuleDef`] hook implementations.
pub use async_trait::async_trait;
