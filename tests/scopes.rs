use ferrous_modules::{
    ApplicationContext, ContextIdFactory, Dependency, DiError, ModuleDef, ModuleMetadata, Provider, Scope,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn default_scope_is_a_singleton() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Clock;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(Provider::class(|_| {
                BUILT.fetch_add(1, Ordering::SeqCst);
                Ok(Clock)
            }))
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let a = app.get::<Clock>().unwrap();
    let b = app.get::<Clock>().unwrap();
    let c = app.resolve::<Clock>(None).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert_eq!(BUILT.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_scope_is_per_context() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct RequestState {
        id: usize,
    }

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(
                Provider::class(|_| {
                    Ok(RequestState {
                        id: BUILT.fetch_add(1, Ordering::SeqCst) + 1,
                    })
                })
                .scope(Scope::Request),
            )
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    assert_eq!(BUILT.load(Ordering::SeqCst), 0, "request providers are not built at bootstrap");
    assert!(matches!(app.get::<RequestState>(), Err(DiError::InvalidClassScope { .. })));

    let first = ContextIdFactory::create();
    let second = ContextIdFactory::create();
    let a1 = app.resolve::<RequestState>(Some(&first)).await.unwrap();
    let a2 = app.resolve::<RequestState>(Some(&first)).await.unwrap();
    let b = app.resolve::<RequestState>(Some(&second)).await.unwrap();

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));
    assert_ne!(a1.id, b.id);
}

#[tokio::test]
async fn request_scope_propagates_to_consumers() {
    struct RequestState;
    struct Handler {
        state: Arc<RequestState>,
    }

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
                .provider(Provider::class(|_| Ok(RequestState)).scope(Scope::Request))
                .provider(
                    Provider::class(|args| {
                        Ok(Handler {
                            state: args.get::<RequestState>(0)?,
                        })
                    })
                    .inject([Dependency::on::<RequestState>()]),
                )
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    assert!(matches!(app.get::<Handler>(), Err(DiError::InvalidClassScope { .. })));
    assert_eq!(
        app.introspect(ferrous_modules::token_of::<Handler>()).unwrap().scope,
        Scope::Request
    );

    let context = ContextIdFactory::create();
    let handler = app.resolve::<Handler>(Some(&context)).await.unwrap();
    let state = app.resolve::<RequestState>(Some(&context)).await.unwrap();
    assert!(Arc::ptr_eq(&handler.state, &state));

    let other = app.resolve::<Handler>(None).await.unwrap();
    assert!(!Arc::ptr_eq(&handler, &other));
}

#[tokio::test]
async fn transient_instances_are_per_consumer() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Logger;
    struct Orders {
        logger: Arc<Logger>,
    }
    struct Payments {
        logger: Arc<Logger>,
    }

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new()
                .provider(
                    Provider::class(|_| {
                        BUILT.fetch_add(1, Ordering::SeqCst);
                        Ok(Logger)
                    })
                    .scope(Scope::Transient),
                )
                .provider(
                    Provider::class(|args| Ok(Orders { logger: args.get(0)? })).inject([Dependency::on::<Logger>()]),
                )
                .provider(
                    Provider::class(|args| Ok(Payments { logger: args.get(0)? })).inject([Dependency::on::<Logger>()]),
                )
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let orders = app.get::<Orders>().unwrap();
    let payments = app.get::<Payments>().unwrap();

    assert!(!Arc::ptr_eq(&orders.logger, &payments.logger));
    assert_eq!(BUILT.load(Ordering::SeqCst), 2);
    assert!(matches!(app.get::<Logger>(), Err(DiError::InvalidClassScope { .. })));
    assert_eq!(
        app.introspect(ferrous_modules::token_of::<Logger>()).unwrap().scope,
        Scope::Transient
    );

    let direct_a = app.resolve::<Logger>(None).await.unwrap();
    let direct_b = app.resolve::<Logger>(None).await.unwrap();
    assert!(!Arc::ptr_eq(&direct_a, &direct_b));
}

#[tokio::test]
async fn released_contexts_rebuild() {
    struct Session;

    #[derive(Default)]
    struct AppModule;

    impl ModuleDef for AppModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().provider(Provider::class(|_| Ok(Session)).scope(Scope::Request))
        }
    }

    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let context = ContextIdFactory::create();
    let before = app.resolve::<Session>(Some(&context)).await.unwrap();

    assert_eq!(app.release_context(&context), 1);
    let after = app.resolve::<Session>(Some(&context)).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}
