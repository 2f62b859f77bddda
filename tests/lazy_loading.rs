use ferrous_modules::{
    token_of, ApplicationContext, Dependency, DiError, DynamicModule, LazyModuleLoader, LazyModuleLoaderOptions,
    ModuleDef, ModuleImport, ModuleMetadata, Provider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Config;

#[derive(Default)]
struct ConfigModule;

impl ModuleDef for ConfigModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new()
            .provider(Provider::class(|_| Ok(Config)))
            .export(token_of::<Config>())
    }
}

struct Reports {
    config: Arc<Config>,
}

#[derive(Default)]
struct ReportsModule;

impl ModuleDef for ReportsModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new().import(ModuleImport::of::<ConfigModule>()).provider(
            Provider::class(|args| Ok(Reports { config: args.get(0)? })).inject([Dependency::on::<Config>()]),
        )
    }
}

struct Scheduler {
    loader: Arc<LazyModuleLoader>,
}

#[derive(Default)]
struct AppModule;

impl ModuleDef for AppModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new().import(ModuleImport::of::<ConfigModule>()).provider(
            Provider::class(|args| Ok(Scheduler { loader: args.get(0)? })).inject([Dependency::on::<LazyModuleLoader>()]),
        )
    }
}

#[tokio::test]
async fn lazy_modules_join_the_running_graph_once() {
    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let loader = app.lazy_module_loader();
    assert!(app.get::<Reports>().is_err());

    let first = loader
        .load(|| async { ModuleImport::of::<ReportsModule>() }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();
    let reports = first.get::<Reports>().unwrap();

    // The already-loaded ConfigModule is reused, not rebuilt.
    assert!(Arc::ptr_eq(&reports.config, &app.get::<Config>().unwrap()));
    assert!(Arc::ptr_eq(&reports, &app.get::<Reports>().unwrap()));

    let second = loader
        .load(
            || async { ModuleImport::of::<ReportsModule>() },
            LazyModuleLoaderOptions { logger: false },
        )
        .await
        .unwrap();
    assert_eq!(first.module().unwrap().id(), second.module().unwrap().id());
    assert!(Arc::ptr_eq(&reports, &second.get::<Reports>().unwrap()));
}

#[tokio::test]
async fn the_loader_is_injectable() {
    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let scheduler = app.get::<Scheduler>().unwrap();

    let reports = scheduler
        .loader
        .load(|| async { ModuleImport::of::<ReportsModule>() }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();
    assert!(reports.get::<Reports>().is_ok());
}

#[tokio::test]
async fn module_ref_creates_unregistered_classes() {
    struct Exporter {
        config: Arc<Config>,
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let a = app
        .module_ref()
        .create(
            Provider::class(|args| Ok(Exporter { config: args.get(0)? })).inject([Dependency::on::<Config>()]),
            None,
        )
        .await
        .unwrap();
    let b = app
        .module_ref()
        .create(
            Provider::class(|args| Ok(Exporter { config: args.get(0)? })).inject([Dependency::on::<Config>()]),
            None,
        )
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a.config, &b.config));
    assert!(app.get::<Exporter>().is_err());
}

#[tokio::test]
async fn lazily_loaded_modules_sit_below_the_root() {
    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let reports = app
        .lazy_module_loader()
        .load(|| async { ModuleImport::of::<ReportsModule>() }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();

    let reports = reports.module().unwrap();
    let config = app.select::<ConfigModule>().unwrap().module().unwrap();
    assert_eq!(app.root().distance(), 0);
    assert_eq!(reports.distance(), 1);
    assert!(config.distance() > reports.distance());
}

#[tokio::test]
async fn equal_dynamic_modules_load_once() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Connection {
        url: Arc<String>,
    }

    #[derive(Default)]
    struct DatabaseModule;

    impl ModuleDef for DatabaseModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
        }
    }

    fn database(url: &str) -> DynamicModule {
        DynamicModule::new::<DatabaseModule>(
            ModuleMetadata::new()
                .provider(Provider::value("DATABASE_URL", url.to_string()))
                .provider(
                    Provider::class(|args| {
                        BUILT.fetch_add(1, Ordering::SeqCst);
                        Ok(Connection { url: args.get(0)? })
                    })
                    .inject([Dependency::token("DATABASE_URL")]),
                )
                .export(token_of::<Connection>()),
        )
        .with_options(&url)
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let loader = app.lazy_module_loader();
    let first = loader
        .load(|| async { ModuleImport::from(database("db")) }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();
    let second = loader
        .load(|| async { ModuleImport::from(database("db")) }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();

    assert_eq!(first.module().unwrap().id(), second.module().unwrap().id());
    assert!(Arc::ptr_eq(
        &first.get::<Connection>().unwrap(),
        &second.get::<Connection>().unwrap()
    ));
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);

    let other = loader
        .load(|| async { ModuleImport::from(database("replica")) }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();
    assert_ne!(first.module().unwrap().id(), other.module().unwrap().id());
    assert_eq!(other.get::<Connection>().unwrap().url.as_str(), "replica");
}

#[tokio::test]
async fn failed_lazy_load_can_be_retried() {
    static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, thiserror::Error)]
    #[error("warming up")]
    struct WarmingUp;

    struct Flaky;

    #[derive(Default)]
    struct FlakyModule;

    impl ModuleDef for FlakyModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
                .import(ModuleImport::of::<ConfigModule>())
                .provider(Provider::class(|_| {
                    if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(DiError::provider_failed("Flaky", WarmingUp));
                    }
                    Ok(Flaky)
                }))
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let loader = app.lazy_module_loader();
    let modules = app.container().modules().len();

    let failed = loader
        .load(|| async { ModuleImport::of::<FlakyModule>() }, LazyModuleLoaderOptions::default())
        .await;
    assert!(matches!(failed, Err(DiError::ProviderFailed { .. })));
    assert_eq!(app.container().modules().len(), modules);
    assert!(app.select::<FlakyModule>().is_err());

    let flaky = loader
        .load(|| async { ModuleImport::of::<FlakyModule>() }, LazyModuleLoaderOptions::default())
        .await
        .unwrap();
    assert!(flaky.get::<Flaky>().is_ok());
    assert!(app.get::<Flaky>().is_ok());
    assert_eq!(ATTEMPTS.load(Ordering::SeqCst), 2);
}
