use crate::*;

use offload_services::AuditEventType;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_lifecycle_is_audited_in_order() {
    let grid = start_grid("lifecycle", |_| {}).await.unwrap();
    let client = grid.client(Some("alice"));

    let ok = echo_envelope(b"fine");
    run_remote(&client, &ok).await.unwrap();

    let bad = TaskEnvelope::new(&TaskPayload::new(FAILING, vec![]), Priority::Normal).unwrap();
    let failed = run_remote(&client, &bad).await.unwrap();
    assert!(failed.error.unwrap().contains("worker out of memory"));

    let events = grid.finish().await;
    let for_task = |id: &str| -> Vec<AuditEventType> {
        events
            .iter()
            .filter(|e| e.resource == id)
            .map(|e| e.event_type)
            .collect()
    };
    assert_eq!(
        for_task(&ok.task_id),
        vec![AuditEventType::TaskSubmitted, AuditEventType::TaskCompleted]
    );
    assert_eq!(
        for_task(&bad.task_id),
        vec![AuditEventType::TaskSubmitted, AuditEventType::TaskFailed]
    );

    let failure = events
        .iter()
        .find(|e| e.event_type == AuditEventType::TaskFailed)
        .unwrap();
    assert!(!failure.success);
    assert!(failure.details.contains("worker out of memory"));
    assert_eq!(failure.user_id, "alice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unwritable_audit_log_does_not_stop_the_grid() {
    // A directory cannot be opened as the log file.
    let dir = std::env::temp_dir().join(format!("offload-it-{}-audit-dir", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let grid = start_grid("unwritable", |c| c.audit.log_path = dir.clone())
        .await
        .unwrap();
    let client = grid.client(Some("alice"));
    let result = run_remote(&client, &echo_envelope(b"still works")).await.unwrap();
    assert!(result.status.is_terminal());

    let status: serde_json::Value = reqwest::get(grid.api("/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["audit"]["available"], false);
    assert!(status["audit"]["dropped"].as_u64().unwrap() >= 2);

    grid.daemon.shutdown().await;
}
