use ferrous_modules::{
    ApplicationContext, ContextIdFactory, DiError, ModuleDef, ModuleMetadata, Provider, Scope,
};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn concurrent_resolves_share_one_construction() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Connection;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(
                Provider::class_async(|_| async {
                    BUILT.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Connection)
                })
                .scope(Scope::Request),
            )
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let context = ContextIdFactory::create();
    let resolved = join_all((0..16).map(|_| app.resolve::<Connection>(Some(&context)))).await;

    let first = resolved[0].as_ref().unwrap().clone();
    for connection in &resolved {
        assert!(Arc::ptr_eq(connection.as_ref().unwrap(), &first));
    }
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_resolves_across_tasks() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Session;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(
                Provider::class_async(|_| async {
                    BUILT.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(Session)
                })
                .scope(Scope::Request),
            )
        }
    }

    let app = Arc::new(ApplicationContext::create::<AppModule>().await.unwrap());
    let contexts: Vec<_> = (0..4).map(|_| ContextIdFactory::create()).collect();

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let app = app.clone();
            let context = contexts[i % contexts.len()].clone();
            tokio::spawn(async move { app.resolve::<Session>(Some(&context)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(BUILT.load(Ordering::SeqCst), contexts.len());
}

#[tokio::test]
async fn failed_construction_can_be_retried() {
    static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, thiserror::Error)]
    #[error("upstream unavailable")]
    struct Unavailable;

    #[derive(Debug)]
    struct Client;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(
                Provider::class(|_| {
                    if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(DiError::provider_failed("Client", Unavailable));
                    }
                    Ok(Client)
                })
                .scope(Scope::Request),
            )
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let context = ContextIdFactory::create();

    let err = app.resolve::<Client>(Some(&context)).await.unwrap_err();
    assert!(matches!(err, DiError::ProviderFailed { .. }));
    assert!(app.resolve::<Client>(Some(&context)).await.is_ok());
}

#[tokio::test]
async fn bootstrap_failure_is_returned() {
    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    struct Storage;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(Provider::class(|_| -> ferrous_modules::DiResult<Storage> {
                Err(DiError::provider_failed("Storage", DiskFull))
            }))
        }
    }

    let err = ApplicationContext::create::<AppModule>().await.unwrap_err();
    assert!(err.to_string().contains("Storage"));
}
