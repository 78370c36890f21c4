use crate::*;

use offload_client::RemoteError;
use offload_core::TaskStatus;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_round_trip() {
    let grid = start_grid("echo", |_| {}).await.unwrap();
    let client = grid.client(Some("alice"));

    let envelope = echo_envelope(b"hello grid");
    let result = run_remote(&client, &envelope).await.unwrap();
    assert_eq!(result.task_id, envelope.task_id);
    assert_eq!(result.status, TaskStatus::Completed);
    assert!(result.elapsed_ms.is_some());

    let payload = TaskPayload::decode(&result.payload.unwrap()).unwrap();
    assert_eq!(payload.kind, TaskKind::ECHO);
    assert_eq!(payload.body, b"hello grid".to_vec());

    // Snapshot agrees with the stream.
    let snapshot: serde_json::Value = reqwest::get(grid.api(&format!("/tasks/{}", envelope.task_id)))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["status"], "completed");

    grid.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_starts_with_queued_or_later() {
    let grid = start_grid("stream-order", |_| {}).await.unwrap();
    let client = grid.client(None);

    let payload = TaskPayload::new(SLOW, b"x".to_vec());
    let envelope = TaskEnvelope::new(&payload, Priority::High).unwrap();
    let ack = client.submit(&envelope).await.unwrap();
    assert_eq!(ack.status, TaskStatus::Queued);

    let mut results = client
        .stream_results(&ack.task_id, Duration::from_secs(10))
        .await
        .unwrap();
    let mut statuses = Vec::new();
    while let Some(item) = results.recv().await {
        statuses.push(item.unwrap().status);
    }
    assert!(matches!(statuses[0], TaskStatus::Queued | TaskStatus::Running));
    assert_eq!(*statuses.last().unwrap(), TaskStatus::Completed);
    // Status never regresses along the stream.
    let rank = |s: &TaskStatus| match s {
        TaskStatus::Queued => 0,
        TaskStatus::Running => 1,
        _ => 2,
    };
    assert!(statuses.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])));

    grid.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_closes_at_deadline() {
    let grid = start_grid("deadline", |_| {}).await.unwrap();
    let client = grid.client(None);

    let envelope = TaskEnvelope::new(&TaskPayload::new(SLOW, vec![]), Priority::Normal).unwrap();
    let ack = client.submit(&envelope).await.unwrap();

    let start = std::time::Instant::now();
    let mut results = client
        .stream_results(&ack.task_id, Duration::from_millis(200))
        .await
        .unwrap();
    let mut last = None;
    while let Some(item) = results.recv().await {
        last = Some(item.unwrap());
    }
    assert!(start.elapsed() < Duration::from_millis(1_500));
    assert!(!last.unwrap().status.is_terminal());

    grid.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_task_id_conflicts() {
    let grid = start_grid("duplicate", |_| {}).await.unwrap();
    let client = grid.client(Some("alice"));

    let envelope = echo_envelope(b"once");
    client.submit(&envelope).await.unwrap();
    let err = client.submit(&envelope).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 409, .. }), "{err:?}");

    grid.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_corrupt_and_unknown_payloads_rejected() {
    let grid = start_grid("corrupt", |_| {}).await.unwrap();
    let client = grid.client(Some("alice"));

    let mut corrupt = echo_envelope(b"tamper me");
    let last = corrupt.payload.len() - 1;
    corrupt.payload[last] ^= 0xff;
    let err = client.submit(&corrupt).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 400, .. }), "{err:?}");

    let unknown =
        TaskEnvelope::new(&TaskPayload::new(TaskKind(0x7777), vec![]), Priority::Low).unwrap();
    let err = client.submit(&unknown).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 400, .. }), "{err:?}");

    let events = grid.finish().await;
    let denied = events
        .iter()
        .filter(|e| e.event_type == offload_services::AuditEventType::AccessDenied)
        .count();
    assert_eq!(denied, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_requires_deadline_and_known_task() {
    let grid = start_grid("stream-errors", |_| {}).await.unwrap();

    let resp = reqwest::get(grid.api("/tasks/nope/results")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = reqwest::get(grid.api("/tasks/nope/results?deadline_ms=0")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = reqwest::get(grid.api("/tasks/nope/results?deadline_ms=100")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let resp = reqwest::get(grid.api("/tasks/nope")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    grid.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_and_health() {
    let grid = start_grid("status", |_| {}).await.unwrap();
    let client = grid.client(Some("alice"));
    run_remote(&client, &echo_envelope(b"s")).await.unwrap();

    let health: serde_json::Value = reqwest::get(grid.api("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: serde_json::Value = reqwest::get(grid.api("/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["tasks"]["completed"], 1);
    assert_eq!(status["audit"]["available"], true);
    assert_eq!(status["audit"]["dropped"], 0);
    assert!(status["principal_buckets"].as_u64().unwrap() >= 1);
    assert!(status["kinds"]
        .as_array()
        .unwrap()
        .iter()
        .any(|k| k == "diffusion"));

    grid.finish().await;
}
