use crate::*;

use offload_client::RemoteError;
use offload_core::config::BucketLimits;
use offload_services::AuditEventType;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_rate_limit_is_enforced_and_audited() {
    let grid = start_grid("rate-limit", |c| {
        c.admission.operation_overrides.insert(
            "submitTask".to_string(),
            BucketLimits {
                capacity: 3,
                refill_per_sec: 1,
            },
        );
    })
    .await
    .unwrap();
    let client = grid.client(Some("alice"));

    let mut outcomes = Vec::new();
    for i in 0..4 {
        outcomes.push(client.submit(&echo_envelope(format!("{i}").as_bytes())).await);
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 3);
    assert!(
        matches!(&outcomes[3], Err(RemoteError::RateLimited(msg)) if msg.contains("submitTask")),
        "{:?}",
        outcomes[3]
    );

    let events = grid.finish().await;
    let limited: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::SecurityRateLimited)
        .collect();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].user_id, "alice");
    assert_eq!(limited[0].resource, "submitTask");
    assert!(limited[0].remote_address.starts_with("127.0.0.1:"));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == AuditEventType::TaskSubmitted)
            .count(),
        3
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admin_reset_restores_principal() {
    let grid = start_grid("reset", |c| {
        c.admission.principal_capacity = 2;
        c.admission.principal_refill_per_sec = 1;
    })
    .await
    .unwrap();
    let bob = grid.client(Some("bob"));

    bob.submit(&echo_envelope(b"1")).await.unwrap();
    bob.submit(&echo_envelope(b"2")).await.unwrap();
    let err = bob.submit(&echo_envelope(b"3")).await.unwrap_err();
    assert!(matches!(err, RemoteError::RateLimited(_)));

    // Other principals have their own bucket.
    grid.client(Some("carol"))
        .submit(&echo_envelope(b"c"))
        .await
        .unwrap();

    // A throttled principal cannot lift its own limit, and a
    // non-admin is refused.
    let http = reqwest::Client::new();
    let own = http
        .post(grid.api("/admin/rate-limits/bob/reset"))
        .header("x-user-id", "bob")
        .send()
        .await
        .unwrap();
    assert_eq!(own.status().as_u16(), 429);
    let other = http
        .post(grid.api("/admin/rate-limits/bob/reset"))
        .header("x-user-id", "carol")
        .send()
        .await
        .unwrap();
    assert_eq!(other.status().as_u16(), 403);
    let body: serde_json::Value = other.json().await.unwrap();
    assert_eq!(body["kind"], "forbidden");

    let reset: serde_json::Value = http
        .post(grid.api("/admin/rate-limits/bob/reset"))
        .header("x-user-id", "admin")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["reset"], true);

    bob.submit(&echo_envelope(b"4")).await.unwrap();

    let events = grid.finish().await;
    let admin: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::AdminAction)
        .collect();
    assert_eq!(admin.len(), 1);
    assert_eq!(admin[0].user_id, "admin");
    assert_eq!(admin[0].resource, "bob");
    assert!(events.iter().any(|e| e.event_type == AuditEventType::AccessDenied
        && e.user_id == "carol"
        && e.resource == "bob"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_anonymous_callers_skip_principal_pool() {
    let grid = start_grid("anonymous", |c| {
        c.admission.principal_capacity = 1;
        c.admission.principal_refill_per_sec = 1;
    })
    .await
    .unwrap();
    let anon = grid.client(None);

    for i in 0..5 {
        anon.submit(&echo_envelope(format!("a{i}").as_bytes()))
            .await
            .unwrap();
    }

    let events = grid.finish().await;
    assert!(events
        .iter()
        .filter(|e| e.event_type == AuditEventType::TaskSubmitted)
        .all(|e| e.user_id == "anonymous" && e.remote_address != "unknown"));
}
