// ABOUTME: Integration tests exercising the coordinator the way a dispatch layer would.
// ABOUTME: Stress-tests mutual exclusion and FIFO order on a multi-threaded runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use session_coordinator::prelude::*;
use tokio::sync::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A fake single-session engine that fails the test if it is ever entered twice.
#[derive(Default)]
struct Engine {
    busy: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Engine {
    async fn call(&self, session: &str) {
        let flag = {
            let mut busy = self.busy.lock().await;
            busy.entry(session.to_string()).or_default().clone()
        };
        assert!(
            !flag.swap(true, Ordering::SeqCst),
            "engine entered concurrently for session {}",
            session
        );
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        flag.store(false, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_holder_under_contention() {
    init_tracing();
    let coordinator = SessionCoordinator::new();
    let engine = Arc::new(Engine::default());

    let mut handles = Vec::new();
    for i in 0..200 {
        let coordinator = coordinator.clone();
        let engine = Arc::clone(&engine);
        let session = format!("session-{}", i % 4);
        handles.push(tokio::spawn(async move {
            let info = RequestInfo::new(session.clone()).with_request_id(format!("msg-{}", i));
            coordinator
                .run_exclusive(&session, info, engine.call(&session))
                .await
        }));
    }

    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    for key in coordinator.active_keys() {
        assert!(!coordinator.is_locked(&key));
        assert_eq!(coordinator.queue_depth(&key), 0);
    }
    assert!(coordinator.active_request_ids().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handoff_never_exposes_unlocked_session() {
    init_tracing();
    let coordinator = SessionCoordinator::new();
    let engine = Arc::new(Engine::default());

    // Manual acquire/wait/release mixed with run_exclusive on the same key.
    let mut handles = Vec::new();
    for i in 0..100 {
        let coordinator = coordinator.clone();
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let info = RequestInfo::new("hot").with_request_id(format!("m{}", i));
            if i % 2 == 0 {
                coordinator.acquire("hot", info)?.wait().await?;
                engine.call("hot").await;
                coordinator.release("hot");
                Ok::<(), CoordinatorError>(())
            } else {
                coordinator
                    .run_exclusive("hot", info, engine.call("hot"))
                    .await
            }
        }));
    }

    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }
    assert!(!coordinator.is_locked("hot"));
}

#[tokio::test]
async fn test_fifo_order_across_spawned_callers() {
    init_tracing();
    let coordinator = SessionCoordinator::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let holder = match coordinator.acquire("S2", RequestInfo::new("S2")).unwrap() {
        Acquire::Granted(grant) => grant,
        other => panic!("Expected Granted, got {:?}", other),
    };

    let mut handles = Vec::new();
    for name in ["w1", "w2", "w3"] {
        // Enqueue synchronously so arrival order is fixed before any task runs.
        let acquired = coordinator
            .acquire("S2", RequestInfo::new("S2").with_request_id(name))
            .unwrap();
        let coordinator = coordinator.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let grant = acquired.wait().await.unwrap();
            order.lock().await.push(name);
            coordinator.release_grant(&grant).unwrap();
        }));
    }

    coordinator.release_grant(&holder).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().await, vec!["w1", "w2", "w3"]);
    assert!(!coordinator.is_locked("S2"));
}

#[tokio::test]
async fn test_session_deletion_fails_waiting_requests() {
    init_tracing();
    let coordinator = SessionCoordinator::new();
    coordinator
        .acquire("chat-7", RequestInfo::new("chat-7").with_request_id("running"))
        .unwrap();

    let waiting = coordinator
        .acquire("chat-7", RequestInfo::new("chat-7").with_request_id("waiting"))
        .unwrap();
    let waiter = tokio::spawn(waiting.wait());
    tokio::task::yield_now().await;

    assert_eq!(coordinator.clear("chat-7"), 1);

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.is_session_cleared());
    assert!(err.to_string().contains("chat-7"));

    // The deleted session's holder finishing later must not disturb a new session.
    coordinator
        .acquire("chat-7", RequestInfo::new("chat-7").with_request_id("fresh"))
        .unwrap();
    assert_eq!(coordinator.active_request_ids(), vec!["fresh"]);
}

#[tokio::test]
async fn test_heartbeat_reconciliation_finds_orphans() {
    init_tracing();
    let coordinator = SessionCoordinator::new();
    coordinator
        .acquire("S4", RequestInfo::new("S4").with_request_id("m1"))
        .unwrap();
    let _m2 = coordinator
        .acquire("S4", RequestInfo::new("S4").with_request_id("m2"))
        .unwrap();

    // Requests a persistent store still believes are in flight.
    let persisted = ["m1", "m2", "m9"];
    let live = coordinator.active_request_ids();
    let orphans: Vec<_> = persisted
        .iter()
        .filter(|id| !live.iter().any(|live| live == *id))
        .collect();

    assert_eq!(orphans, vec![&"m9"]);
}

#[tokio::test]
async fn test_config_from_json_drives_reaper() {
    init_tracing();
    let config =
        CoordinatorConfig::from_json(r#"{"hold_timeout_ms": 20, "reap_interval_ms": 5}"#).unwrap();
    let coordinator = SessionCoordinator::with_config(config);
    let reaper = coordinator.spawn_reaper().expect("hold timeout configured");

    coordinator
        .acquire("stuck", RequestInfo::new("stuck").with_request_id("never-released"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(!coordinator.is_locked("stuck"));
    reaper.abort();
}
