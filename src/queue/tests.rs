use super::{BackpressurePolicy, DeliveryQueue, EnqueueError, Enqueued};
use crate::decoder::{DecodedReading, decode};
use crate::transport::RawMessage;
use std::sync::Arc;
use std::time::Duration;

fn reading(sequence: u64) -> DecodedReading {
    let payload = format!(r#"{{"seq":{sequence}}}"#);
    decode(RawMessage::new("meters", payload), sequence).unwrap()
}

fn sequences(readings: &[DecodedReading]) -> Vec<u64> {
    readings.iter().map(|r| r.sequence).collect()
}

#[tokio::test]
async fn test_fifo_order_is_preserved() {
    let queue = DeliveryQueue::new(10, BackpressurePolicy::Reject);
    for seq in 0..5 {
        assert!(matches!(queue.enqueue(reading(seq)).unwrap(), Enqueued::Accepted));
    }

    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(queue.dequeue().await.unwrap().sequence);
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
}

#[test]
fn test_reject_policy_hands_back_the_new_reading() {
    let queue = DeliveryQueue::new(3, BackpressurePolicy::Reject);
    for seq in 0..3 {
        queue.enqueue(reading(seq)).unwrap();
    }

    let err = queue.enqueue(reading(3)).unwrap_err();
    assert!(matches!(err, EnqueueError::QueueFull(_)));
    assert_eq!(err.into_reading().sequence, 3);
    assert_eq!(queue.len(), 3);
    assert_eq!(sequences(&queue.take_all()), vec![0, 1, 2]);
}

#[test]
fn test_evict_policy_replaces_the_oldest_reading() {
    let queue = DeliveryQueue::new(3, BackpressurePolicy::EvictOldest);
    for seq in 0..3 {
        queue.enqueue(reading(seq)).unwrap();
    }

    match queue.enqueue(reading(3)).unwrap() {
        Enqueued::Evicted(oldest) => assert_eq!(oldest.sequence, 0),
        Enqueued::Accepted => panic!("expected an eviction"),
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(sequences(&queue.take_all()), vec![1, 2, 3]);
}

#[test]
fn test_queue_never_exceeds_capacity() {
    for policy in [BackpressurePolicy::Reject, BackpressurePolicy::EvictOldest] {
        let queue = DeliveryQueue::new(4, policy);
        for seq in 0..50 {
            let _ = queue.enqueue(reading(seq));
            assert!(queue.len() <= queue.capacity());
        }
        assert_eq!(queue.len(), 4);
    }
}

#[test]
fn test_zero_capacity_is_clamped() {
    let queue = DeliveryQueue::new(0, BackpressurePolicy::Reject);
    assert_eq!(queue.capacity(), 1);
    assert!(queue.enqueue(reading(0)).is_ok());
}

#[tokio::test]
async fn test_dequeue_waits_for_enqueue() {
    let queue = Arc::new(DeliveryQueue::new(2, BackpressurePolicy::Reject));
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!consumer.is_finished());

    queue.enqueue(reading(7)).unwrap();
    let received = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer woke up")
        .unwrap();
    assert_eq!(received.unwrap().sequence, 7);
}

#[tokio::test]
async fn test_multiple_consumers_each_get_distinct_readings() {
    let queue = Arc::new(DeliveryQueue::new(8, BackpressurePolicy::Reject));
    let mut consumers = Vec::new();
    for _ in 0..3 {
        let queue = queue.clone();
        consumers.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(r) = queue.dequeue().await {
                got.push(r.sequence);
            }
            got
        }));
    }

    for seq in 0..6 {
        queue.enqueue(reading(seq)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    all.sort_unstable();
    assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_close_wakes_idle_consumers() {
    let queue = Arc::new(DeliveryQueue::new(2, BackpressurePolicy::Reject));
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.close();
    let received = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer woke up")
        .unwrap();
    assert!(received.is_none());
}

#[tokio::test]
async fn test_closed_queue_drains_remaining_then_ends() {
    let queue = DeliveryQueue::new(4, BackpressurePolicy::Reject);
    queue.enqueue(reading(1)).unwrap();
    queue.enqueue(reading(2)).unwrap();
    queue.close();

    assert!(matches!(queue.enqueue(reading(3)), Err(EnqueueError::Closed(_))));
    assert_eq!(queue.dequeue().await.unwrap().sequence, 1);
    assert_eq!(queue.dequeue().await.unwrap().sequence, 2);
    assert!(queue.dequeue().await.is_none());
}

#[tokio::test]
async fn test_wait_for_capacity_resumes_after_dequeue() {
    let queue = Arc::new(DeliveryQueue::new(1, BackpressurePolicy::Reject));
    queue.enqueue(reading(0)).unwrap();

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.wait_for_capacity().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    queue.dequeue().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter resumed")
        .unwrap();
    assert!(queue.enqueue(reading(1)).is_ok());
}

#[tokio::test]
async fn test_wait_for_capacity_returns_when_closed() {
    let queue = Arc::new(DeliveryQueue::new(1, BackpressurePolicy::Reject));
    queue.enqueue(reading(0)).unwrap();

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.wait_for_capacity().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter resumed")
        .unwrap();
}

#[test]
fn test_policy_names_in_config() {
    let reject: BackpressurePolicy = serde_json::from_str("\"reject\"").unwrap();
    let evict: BackpressurePolicy = serde_json::from_str("\"evict_oldest\"").unwrap();
    assert_eq!(reject, BackpressurePolicy::Reject);
    assert_eq!(evict, BackpressurePolicy::EvictOldest);
}
