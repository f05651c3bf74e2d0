use dispatch::{BackendPool, Capability, DispatchError, PoolConfig, Task};
use std::time::Duration;

mod mock_backend;
use mock_backend::{registry, ScriptedBackend};

#[tokio::test(start_paused = true)]
async fn timed_out_backend_is_skipped() {
    let pool = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["m1"]).hanging().into_client())
        .with_backend("b", ScriptedBackend::new(&["m1"]).into_client());

    let task = Task::generate("hi").require(Capability::Chat);
    let selection = pool.select_backend(&task.constraints, &[]).await.unwrap();

    assert_eq!(selection.backend.name(), "b");
    assert_eq!(selection.model, "m1");
    assert_eq!(
        selection.skipped,
        vec![DispatchError::BackendTimeout {
            backend: "a".into(),
            after: Duration::from_secs(5),
        }]
    );
    assert!(!pool.backend("a").unwrap().is_live());
    assert!(pool.backend("b").unwrap().is_live());
}

#[tokio::test(start_paused = true)]
async fn unresponsive_backend_is_tried_after_live_ones() {
    let pool = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["m1"]).hanging().into_client())
        .with_backend("b", ScriptedBackend::new(&["m1"]).into_client());
    let task = Task::generate("hi");

    let first = pool.select_backend(&task.constraints, &[]).await.unwrap();
    assert_eq!(first.backend.name(), "b");
    assert_eq!(first.skipped.len(), 1);

    let started = tokio::time::Instant::now();
    let second = pool.select_backend(&task.constraints, &[]).await.unwrap();
    assert_eq!(second.backend.name(), "b");
    assert!(second.skipped.is_empty());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn least_loaded_backend_goes_first() {
    let pool = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["m1"]).into_client())
        .with_backend("b", ScriptedBackend::new(&["m1"]).into_client());
    let task = Task::generate("hi");

    let busy = pool.backend("a").unwrap().begin();
    assert_eq!(busy.backend().load(), 1);
    let selection = pool.select_backend(&task.constraints, &[]).await.unwrap();
    assert_eq!(selection.backend.name(), "b");

    drop(busy);
    assert_eq!(pool.backend("a").unwrap().load(), 0);
    let selection = pool.select_backend(&task.constraints, &[]).await.unwrap();
    assert_eq!(selection.backend.name(), "a");
}

#[tokio::test]
async fn selection_is_first_fit_in_load_order() {
    let pool = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["m2"]).into_client())
        .with_backend("b", ScriptedBackend::new(&["m1", "m2"]).into_client());
    let task = Task::chat(vec![]).require(Capability::Chat);

    let selection = pool.select_backend(&task.constraints, &[]).await.unwrap();
    assert_eq!(selection.backend.name(), "a");
    assert_eq!(selection.model, "m2");

    let selection = pool
        .select_backend(&task.constraints, &["a".to_string()])
        .await
        .unwrap();
    assert_eq!(selection.backend.name(), "b");
    assert_eq!(selection.model, "m1");
}

#[tokio::test]
async fn distinguishes_missing_models_from_missing_backends() {
    let task = Task::generate("hi").require(Capability::Vision);

    let answering = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["m1", "e1"]).into_client());
    let err = answering.select_backend(&task.constraints, &[]).await.err();
    assert_eq!(err, Some(DispatchError::NoSuitableModel));

    let silent = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["m1"]).unreachable().into_client());
    let err = silent.select_backend(&task.constraints, &[]).await.err();
    assert_eq!(err, Some(DispatchError::NoAvailableBackend));

    let empty = BackendPool::new(registry());
    let err = empty.select_backend(&task.constraints, &[]).await.err();
    assert_eq!(err, Some(DispatchError::NoAvailableBackend));
}

#[tokio::test]
async fn unconstrained_tasks_match_any_registered_model() {
    let pool = BackendPool::new(registry())
        .with_backend("a", ScriptedBackend::new(&["unknown", "e1"]).into_client());
    let task = Task::generate("hi");
    let selection = pool.select_backend(&task.constraints, &[]).await.unwrap();
    assert_eq!(selection.model, "e1");
}

#[tokio::test(start_paused = true)]
async fn probe_reports_each_backend() {
    let config = PoolConfig {
        list_models_timeout_ms: 100,
    };
    let pool = BackendPool::with_config(registry(), config)
        .with_backend("a", ScriptedBackend::new(&["m1"]).hanging().into_client())
        .with_backend("b", ScriptedBackend::new(&["m1", "m2"]).into_client());

    let health = pool.probe().await;
    assert_eq!(health.len(), 2);
    assert_eq!(health[0].name, "a");
    assert!(!health[0].live);
    assert!(health[0].error.is_some());
    assert_eq!(health[1].name, "b");
    assert!(health[1].live);
    assert_eq!(health[1].models, 2);

    let snapshot = pool.snapshot();
    assert_eq!(snapshot[1].models, vec!["m1".to_string(), "m2".to_string()]);
    assert!(snapshot[0].models.is_empty());
    assert_eq!(snapshot[0].load, 0);
}
