use super::*;
use parking_lot::Mutex;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

fn event(n: u64) -> QueueEvent {
    QueueEvent::new(LifecycleEvent::Admitted, json!({ "n": n }))
}

#[tokio::test]
async fn test_fifo_delivery_per_type() {
    let queue = QueueManager::new(QueueConfig { capacity_per_type: 64 });
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    queue.on(
        LifecycleEvent::Admitted,
        Arc::new(move |ev| {
            sink.lock().push(ev.payload["n"].as_u64().unwrap());
        }),
    );

    for n in 0..20 {
        assert!(queue.enqueue(event(n)));
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_events_before_listener_are_buffered() {
    let queue = QueueManager::new(QueueConfig { capacity_per_type: 8 });

    for n in 0..3 {
        assert!(queue.enqueue(event(n)));
    }

    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    queue.on(
        LifecycleEvent::Admitted,
        Arc::new(move |ev| {
            sink.lock().push(ev.payload["n"].as_u64().unwrap());
        }),
    );

    sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_overflow_is_rejected_and_counted() {
    let queue = QueueManager::new(QueueConfig { capacity_per_type: 2 });

    // No listener attached: the channel is the bounded pre-listener buffer.
    // Capacity 2 plus the one event held by the delivery task.
    let mut accepted = 0;
    for n in 0..10 {
        if queue.enqueue(event(n)) {
            accepted += 1;
        }
    }

    assert!(accepted < 10);
    assert_eq!(queue.dropped(LifecycleEvent::Admitted), 10 - accepted);
}

#[tokio::test]
async fn test_panicking_listener_does_not_block_others() {
    let queue = QueueManager::new(QueueConfig { capacity_per_type: 16 });
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    queue.on(
        LifecycleEvent::Admitted,
        Arc::new(|_| panic!("listener bug")),
    );
    let sink = seen.clone();
    queue.on(
        LifecycleEvent::Admitted,
        Arc::new(move |ev| {
            sink.lock().push(ev.payload["n"].as_u64().unwrap());
        }),
    );

    for n in 0..3 {
        assert!(queue.enqueue(event(n)));
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
    assert_eq!(queue.listener_panics(LifecycleEvent::Admitted), 3);
}

#[tokio::test]
async fn test_off_detaches_listener() {
    let queue = QueueManager::new(QueueConfig { capacity_per_type: 16 });
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let id = queue.on(
        LifecycleEvent::SessionCompleted,
        Arc::new(move |ev| {
            sink.lock().push(ev.payload["n"].as_u64().unwrap());
        }),
    );
    // Keep a second listener attached so delivery keeps draining.
    queue.on(LifecycleEvent::SessionCompleted, Arc::new(|_| {}));

    queue.enqueue(QueueEvent::new(LifecycleEvent::SessionCompleted, json!({ "n": 1 })));
    sleep(Duration::from_millis(30)).await;

    assert!(queue.off(LifecycleEvent::SessionCompleted, id));
    queue.enqueue(QueueEvent::new(LifecycleEvent::SessionCompleted, json!({ "n": 2 })));
    sleep(Duration::from_millis(30)).await;

    assert_eq!(*seen.lock(), vec![1]);
    assert!(!queue.off(LifecycleEvent::SessionCompleted, id));
}

#[tokio::test]
async fn test_cross_type_streams_are_independent() {
    let queue = QueueManager::new(QueueConfig { capacity_per_type: 4 });

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    queue.on(
        LifecycleEvent::CircuitOpened,
        Arc::new(move |ev| {
            sink.lock().push(ev.event_type.to_string());
        }),
    );

    // Admitted has no listener and fills up; CircuitOpened still flows.
    for n in 0..10 {
        queue.enqueue(event(n));
    }
    assert!(queue.enqueue(QueueEvent::new(LifecycleEvent::CircuitOpened, json!({}))));

    sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock(), vec!["circuit_opened".to_string()]);
}
