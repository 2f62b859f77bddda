use ferrous_modules::{
    token_of, ApplicationContext, ApplicationOptions, Dependency, DiError, ModuleDef, ModuleImport, ModuleMetadata,
    Provider,
};
use std::sync::atomic::{AtomicUsize, Ordering};

struct Engine;
struct Car;

#[derive(Default)]
struct EngineModule;

impl ModuleDef for EngineModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new()
            .provider(Provider::class(|_| Ok(Engine)))
            .export(token_of::<Engine>())
    }
}

#[derive(Default)]
struct GarageModule;

impl ModuleDef for GarageModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new().import(ModuleImport::of::<EngineModule>()).provider(
            Provider::class(|args| {
                args.get::<Engine>(0)?;
                Ok(Car)
            })
            .inject([Dependency::on::<Engine>()]),
        )
    }
}

#[tokio::test]
async fn preview_wires_without_constructing() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Probe;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(Provider::class(|_| {
                BUILT.fetch_add(1, Ordering::SeqCst);
                Ok(Probe)
            }))
        }
    }

    let app = ApplicationContext::builder(ModuleImport::of::<AppModule>())
        .options(ApplicationOptions::new().preview(true))
        .build()
        .await
        .unwrap();

    assert_eq!(BUILT.load(Ordering::SeqCst), 0);
    assert!(matches!(app.get::<Probe>(), Err(DiError::UndefinedDependency { .. })));
}

#[tokio::test]
async fn snapshot_records_modules_and_edges() {
    let app = ApplicationContext::builder(ModuleImport::of::<GarageModule>())
        .options(ApplicationOptions::new().snapshot(true))
        .build()
        .await
        .unwrap();

    let graph = app.snapshot().expect("snapshot enabled");
    let labels: Vec<&str> = graph.nodes.values().map(|node| node.label.as_str()).collect();
    assert!(labels.contains(&"GarageModule"));
    assert!(labels.contains(&"EngineModule"));
    assert!(labels.contains(&"Car"));
    assert!(!graph.edges.is_empty());

    let json = graph.to_json().unwrap();
    assert!(json.contains("\"status\": \"complete\""));
    assert!(graph.to_dot().starts_with("digraph Modules"));
}

#[tokio::test]
async fn snapshots_are_off_by_default() {
    let app = ApplicationContext::create::<GarageModule>().await.unwrap();
    assert!(app.snapshot().is_none());
    assert!(app.get::<Car>().is_ok());
}
