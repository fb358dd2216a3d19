//! Exposed-module resolver tests
//!
//! Unknown paths, federated providers, cycles, depth limits and caller
//! cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use federation_runtime::federation::transport::StaticContainer;
use federation_runtime::{FederationConfig, FederationError, Module, ModuleFactory};

#[tokio::test]
async fn test_unknown_exposed_path_is_not_memoized() {
    let fixture = FederationFixture::new();
    fixture
        .publish_static(
            // ./Legacy is declared but the entry no longer serves it
            manifest("catalog", &["./ProductList", "./Legacy"], vec![]),
            StaticContainer::builder()
                .expose("./ProductList", echo_factory("catalog/ProductList"))
                .build(),
        )
        .await;
    let session = fixture.session().await;

    let err = session.resolve_module("catalog", "./Missing").await.unwrap_err();
    assert!(matches!(
        err,
        FederationError::UnknownExposedPath { ref container_id, ref exposed_path }
            if container_id == "catalog" && exposed_path == "./Missing"
    ));

    let rejected = session.resolve_module("catalog", "./Legacy").await.unwrap_err();
    assert!(matches!(rejected, FederationError::UnknownExposedPath { .. }));
    assert!(!rejected.is_container_failure());

    // The container is unaffected
    let module = session.resolve_module("catalog", "./ProductList").await.unwrap();
    assert_eq!(module.id(), "catalog/ProductList");
    assert_eq!(fixture.manifest_fetches("catalog").await, 1);
}

#[tokio::test]
async fn test_factory_failure_is_instantiation_error() {
    let fixture = FederationFixture::new();
    fixture
        .publish_static(
            manifest("catalog", &["./Broken"], vec![]),
            StaticContainer::builder()
                .expose("./Broken", ModuleFactory::new(|_| Err("render failed".to_string())))
                .build(),
        )
        .await;
    let session = fixture.session().await;

    let err = session.resolve_module("catalog", "./Broken").await.unwrap_err();
    match err {
        FederationError::ModuleInstantiation { exposed_path, reason, .. } => {
            assert_eq!(exposed_path, "./Broken");
            assert_eq!(reason, "render failed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_federated_provider_resolves_through_host() {
    let fixture = FederationFixture::new();
    let runtime_module = Module::new("host/ui-runtime", "ui-runtime 3.2.1".to_string());
    fixture
        .publish_static(
            manifest("host", &["./ui-runtime"], vec![]),
            StaticContainer::builder()
                .expose("./ui-runtime", ModuleFactory::ready(runtime_module.clone()))
                .build(),
        )
        .await;
    fixture
        .publish_static(
            manifest(
                "cart",
                &["./Cart"],
                vec![federated("ui-runtime", "^3.0.0", "3.2.1", true, "host", "./ui-runtime")],
            ),
            StaticContainer::builder().expose("./Cart", echo_factory("cart/Cart")).build(),
        )
        .await;
    let session = fixture.session().await;

    let cart = session.resolve_module("cart", "./Cart").await.unwrap();
    let ui = deps_of(&cart).get("ui-runtime").unwrap();
    assert!(ui.ptr_eq(&runtime_module));
    assert_eq!(ui.downcast_ref::<String>().unwrap(), "ui-runtime 3.2.1");

    let providers = session.shared_scope().providers("ui-runtime").await;
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].registered_by(), "cart");
    assert_eq!(providers[0].load_attempts(), 1);

    session.resolve_module("cart", "./Cart").await.unwrap();
    assert_eq!(providers[0].load_attempts(), 1);
    assert_eq!(fixture.manifest_fetches("host").await, 1);
}

#[tokio::test]
async fn test_self_cycle_detected() {
    let fixture = FederationFixture::new();
    fixture
        .publish_static(
            manifest("x", &["./A", "./B"], vec![federated("dep", "*", "1.0.0", false, "x", "./B")]),
            StaticContainer::builder()
                .expose("./A", echo_factory("x/A"))
                .expose("./B", echo_factory("x/B"))
                .build(),
        )
        .await;
    let session = fixture.session().await;

    let err = session.resolve_module("x", "./A").await.unwrap_err();
    match err {
        FederationError::SharedDependencyCycle { chain } => assert_eq!(chain, vec!["x", "x"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_two_container_cycle_detected() {
    let fixture = FederationFixture::new();
    fixture
        .publish_static(
            manifest("x", &["./A"], vec![federated("from-y", "*", "1.0.0", false, "y", "./B")]),
            StaticContainer::builder().expose("./A", echo_factory("x/A")).build(),
        )
        .await;
    fixture
        .publish_static(
            manifest("y", &["./B"], vec![federated("from-x", "*", "1.0.0", false, "x", "./A")]),
            StaticContainer::builder().expose("./B", echo_factory("y/B")).build(),
        )
        .await;
    let session = fixture.session().await;

    let result = tokio::time::timeout(Duration::from_secs(5), session.resolve_module("x", "./A"))
        .await
        .expect("cycle detection terminates");
    match result.unwrap_err() {
        FederationError::SharedDependencyCycle { chain } => assert_eq!(chain, vec!["x", "y", "x"]),
        other => panic!("unexpected error: {other}"),
    }

    // Entering the cycle from the other side reports its own chain
    match session.resolve_module("y", "./B").await.unwrap_err() {
        FederationError::SharedDependencyCycle { chain } => assert_eq!(chain, vec!["y", "x", "y"]),
        other => panic!("unexpected error: {other}"),
    }
}

fn assert_closed_cycle(result: Result<Module, FederationError>) {
    match result {
        Err(FederationError::SharedDependencyCycle { chain }) => {
            let (last, rest) = chain.split_last().expect("cycle chain is non-empty");
            assert!(rest.contains(last), "chain {:?} does not close", chain);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(module) => panic!("cycle resolved to {}", module.id()),
    }
}

#[tokio::test]
async fn test_concurrent_three_container_cycle_terminates() {
    let fixture = FederationFixture::with_latency(Duration::from_millis(40));
    // x -> y -> z -> x
    for (id, next) in [("x", "y"), ("y", "z"), ("z", "x")] {
        fixture
            .publish_static(
                manifest(
                    id,
                    &["./M"],
                    vec![federated(&format!("from-{}", next), "*", "1.0.0", false, next, "./M")],
                ),
                StaticContainer::builder().expose("./M", echo_factory(id)).build(),
            )
            .await;
    }
    let session = Arc::new(fixture.session().await);

    for _round in 0..2 {
        let tasks: Vec<_> = ["x", "y", "z"]
            .into_iter()
            .map(|root| {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    tokio::time::timeout(Duration::from_secs(5), session.resolve_module(root, "./M"))
                        .await
                })
            })
            .collect();

        for task in tasks {
            let result = task.await.unwrap().expect("cycle detection terminates");
            assert_closed_cycle(result);
        }
    }

    // Containers themselves loaded once and stay usable
    for id in ["x", "y", "z"] {
        assert_eq!(fixture.manifest_fetches(id).await, 1);
    }
}

#[tokio::test]
async fn test_resolution_depth_is_bounded() {
    let fixture = FederationFixture::new();
    // c0 -> c1 -> c2 -> c3
    for i in 0..4 {
        let id = format!("c{}", i);
        let shared = if i < 3 {
            vec![federated(&format!("dep{}", i), "*", "1.0.0", false, &format!("c{}", i + 1), "./M")]
        } else {
            vec![]
        };
        fixture
            .publish_static(
                manifest(&id, &["./M"], shared),
                StaticContainer::builder().expose("./M", echo_factory(&id)).build(),
            )
            .await;
    }

    let shallow = fixture
        .session_with(FederationConfig {
            max_resolution_depth: 2,
            ..FederationConfig::default()
        })
        .await;
    let err = shallow.resolve_module("c0", "./M").await.unwrap_err();
    assert!(matches!(err, FederationError::ResolutionDepthExceeded { depth: 2 }));

    let deep = fixture.session().await;
    let module = deep.resolve_module("c0", "./M").await.unwrap();
    let c1 = deps_of(&module).get("dep0").unwrap();
    assert_eq!(c1.id(), "c1");
}

#[tokio::test]
async fn test_abandoned_request_does_not_cancel_shared_load() {
    let fixture = FederationFixture::with_latency(Duration::from_millis(40));
    let ui = CountingFactory::with_delay("ui-runtime", Duration::from_millis(40));
    fixture
        .publish_static(
            manifest("catalog", &["./ProductList"], vec![shared("ui-runtime", "^3.0.0", "3.2.1", true)]),
            StaticContainer::builder()
                .expose("./ProductList", echo_factory("catalog/ProductList"))
                .provide("ui-runtime", ui.factory.clone())
                .build(),
        )
        .await;
    let session = Arc::new(fixture.session().await);

    let abandoned = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.resolve_module("catalog", "./ProductList").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    abandoned.abort();

    session.resolve_module("catalog", "./ProductList").await.unwrap();
    assert_eq!(fixture.manifest_fetches("catalog").await, 1);
    assert_eq!(fixture.entry_loads("catalog").await, 1);
    assert_eq!(ui.loads(), 1);
}
