use crate::*;

use offload_client::{ExecutionStrategy, FallbackReason, StepOutcome};
use offload_core::config::ClientConfig;
use offload_core::task::DiffusionState;

fn client_config(endpoint: Option<String>, deadline_ms: u64) -> ClientConfig {
    ClientConfig {
        endpoint,
        principal: Some("sim".to_string()),
        deadline_ms,
        ..ClientConfig::default()
    }
}

fn client_registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::with_builtin();
    registry.register(Arc::new(LocalRunner(FAILING)));
    registry.register(Arc::new(LocalRunner(SLOW)));
    Arc::new(registry)
}

fn lattice() -> DiffusionState {
    DiffusionState {
        cells: vec![0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0],
        alpha: 0.4,
        steps: 25,
        elapsed_steps: 0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_diffusion_matches_local() {
    let grid = start_grid("diffusion", |_| {}).await.unwrap();
    let config = client_config(Some(grid.endpoint()), 5_000);
    let mut strategy = ExecutionStrategy::from_config(&config, client_registry())
        .await
        .unwrap();
    assert!(strategy.is_reachable());

    let mut remote_task = lattice().to_payload().unwrap();
    for _ in 0..3 {
        let outcome = strategy.step(&mut remote_task).await.unwrap();
        assert!(outcome.is_remote(), "{outcome:?}");
    }
    assert_eq!(strategy.step_counts(), (3, 0));

    let mut expected = lattice();
    for _ in 0..3 {
        expected.advance();
    }
    let got = DiffusionState::from_payload(&remote_task).unwrap();
    assert_eq!(got.elapsed_steps, 75);
    assert_eq!(got, expected);

    let events = grid.finish().await;
    assert!(events.iter().all(|e| e.user_id == "sim"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_endpoint_runs_locally() {
    // Bind then release a port so nothing listens on it.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = client_config(Some(format!("http://{addr}")), 1_000);
    let mut strategy = ExecutionStrategy::from_config(&config, client_registry())
        .await
        .unwrap();
    assert!(!strategy.is_reachable());

    let mut task = TaskPayload::new(TaskKind::ECHO, b"offline".to_vec());
    let outcome = strategy.step(&mut task).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Local {
            reason: FallbackReason::Unreachable
        }
    );
    assert_eq!(task.body, b"offline".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_grid_lost_after_connect_falls_back() {
    let grid = start_grid("lost", |_| {}).await.unwrap();
    let config = client_config(Some(grid.endpoint()), 2_000);
    let mut strategy = ExecutionStrategy::from_config(&config, client_registry())
        .await
        .unwrap();
    assert!(strategy.is_reachable());
    grid.finish().await;

    let mut task = TaskPayload::new(TaskKind::ECHO, b"after".to_vec());
    let outcome = strategy.step(&mut task).await.unwrap();
    assert!(
        matches!(
            &outcome,
            StepOutcome::Local {
                reason: FallbackReason::Submit(_)
            }
        ),
        "{outcome:?}"
    );
    assert_eq!(strategy.step_counts(), (0, 1));
    assert_eq!(task.body, b"after".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_failure_reruns_locally() {
    let grid = start_grid("remote-failed", |_| {}).await.unwrap();
    let config = client_config(Some(grid.endpoint()), 5_000);
    let mut strategy = ExecutionStrategy::from_config(&config, client_registry())
        .await
        .unwrap();

    let mut task = TaskPayload::new(FAILING, b"retry me".to_vec());
    let outcome = strategy.step(&mut task).await.unwrap();
    match &outcome {
        StepOutcome::Local {
            reason: FallbackReason::RemoteFailed(e),
        } => assert!(e.contains("worker out of memory")),
        other => panic!("expected remote failure fallback, got {other:?}"),
    }
    assert_eq!(task.body, b"local:retry me".to_vec());

    grid.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_falls_back_promptly() {
    let grid = start_grid("client-deadline", |_| {}).await.unwrap();
    let config = client_config(Some(grid.endpoint()), 200);
    let mut strategy = ExecutionStrategy::from_config(&config, client_registry())
        .await
        .unwrap();

    let start = std::time::Instant::now();
    let mut task = TaskPayload::new(SLOW, b"tick".to_vec());
    let outcome = strategy.step(&mut task).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Local {
            reason: FallbackReason::DeadlineExceeded
        }
    );
    assert!(start.elapsed() < Duration::from_millis(1_500));
    assert_eq!(task.body, b"local:tick".to_vec());

    grid.finish().await;
}
