//! Tests for the semaphore-backed concurrency gate.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use llm_bulkhead::{CancellationToken, ConcurrencyGate, GateRequest, RejectReason, SemaphoreGate};

async fn wait_for_pending(gate: &SemaphoreGate, expected: usize) {
    for _ in 0..1_000 {
        if gate.stats().pending == expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("pending never reached {expected}: {:?}", gate.stats());
}

#[tokio::test]
async fn test_waiters_granted_in_arrival_order() {
    let gate = Arc::new(SemaphoreGate::new(1, 4).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = gate.acquire(GateRequest::default()).await.unwrap();

    let mut waiters = Vec::new();
    for id in 0..3 {
        let waiter_gate = Arc::clone(&gate);
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let slot = waiter_gate.acquire(GateRequest::default()).await.unwrap();
            order.lock().push(id);
            tokio::time::sleep(Duration::from_millis(2)).await;
            slot.release();
        }));
        wait_for_pending(&gate, id + 1).await;
    }

    held.release();
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert_eq!(gate.stats().in_flight, 0);
}

#[tokio::test]
async fn test_new_arrival_does_not_jump_queue() {
    let gate = Arc::new(SemaphoreGate::new(1, 4).unwrap());
    let held = gate.acquire(GateRequest::default()).await.unwrap();

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let queued = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            let slot = gate.acquire(GateRequest::default()).await?;
            let _ = done_rx.await;
            slot.release();
            Ok::<_, RejectReason>(())
        })
    };
    wait_for_pending(&gate, 1).await;

    // The freed permit belongs to the queued waiter, so a fresh caller must wait.
    held.release();
    let late = gate
        .acquire(GateRequest { cancel: None, timeout: Some(Duration::from_millis(10)) })
        .await;
    assert!(matches!(late, Err(RejectReason::Timeout)));

    done_tx.send(()).unwrap();
    assert_eq!(queued.await.unwrap(), Ok(()));
    assert_eq!(gate.stats().in_flight, 0);
}

#[tokio::test]
async fn test_cancel_after_grant_has_no_effect() {
    let gate = SemaphoreGate::new(1, 0).unwrap();
    let cancel = CancellationToken::new();

    let slot = gate
        .acquire(GateRequest { cancel: Some(&cancel), timeout: None })
        .await
        .unwrap();
    cancel.cancel();

    assert!(!slot.is_released());
    assert_eq!(gate.stats().in_flight, 1);
    slot.release();
    assert_eq!(gate.stats().in_flight, 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let gate = SemaphoreGate::new(2, 0).unwrap();
    let slot = gate.acquire(GateRequest::default()).await.unwrap();

    slot.release();
    slot.release();
    drop(slot);

    let stats = gate.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.max_concurrent, 2);
}

#[tokio::test]
async fn test_stats_bounds_under_load() {
    let gate = Arc::new(SemaphoreGate::new(3, 5).unwrap());
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let gate = Arc::clone(&gate);
        tasks.push(tokio::spawn(async move {
            let outcome = gate
                .acquire(GateRequest { cancel: None, timeout: Some(Duration::from_millis(200)) })
                .await;
            let stats = gate.stats();
            assert!(stats.in_flight <= stats.max_concurrent);
            assert!(stats.pending <= stats.max_queue);
            if let Ok(slot) = outcome {
                tokio::time::sleep(Duration::from_millis(5)).await;
                slot.release();
                true
            } else {
                false
            }
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }
    assert!(admitted >= 3);
    let stats = gate.stats();
    assert_eq!((stats.in_flight, stats.pending), (0, 0));
}
