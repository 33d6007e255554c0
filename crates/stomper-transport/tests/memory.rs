//! Integration tests for in-memory connection pairs.

use std::sync::Arc;
use std::time::Duration;

use stomper_transport::{Connection, memory};

#[tokio::test]
async fn test_pair_delivers_bytes_in_both_directions() {
    let (a, b) = memory::pair();

    a.send(b"to b").await.unwrap();
    b.send(b"to a").await.unwrap();

    assert_eq!(b.recv().await.unwrap().unwrap(), b"to b");
    assert_eq!(a.recv().await.unwrap().unwrap(), b"to a");
}

#[tokio::test]
async fn test_pair_close_is_observed_by_peer_only() {
    let (a, b) = memory::pair();

    a.close().await.unwrap();
    assert!(b.recv().await.unwrap().is_none());

    // The other direction stays open until b closes too.
    b.send(b"still here").await.unwrap();
    assert_eq!(a.recv().await.unwrap().unwrap(), b"still here");
}

#[tokio::test]
async fn test_pair_with_small_capacity_applies_backpressure() {
    let (a, b) = memory::pair_with_capacity(4);
    let a = Arc::new(a);

    let writer = Arc::clone(&a);
    let write = tokio::spawn(async move { writer.send(b"0123456789").await });

    // The write can't finish until the peer drains the pipe.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!write.is_finished());

    let mut received = Vec::new();
    while received.len() < 10 {
        received.extend(b.recv().await.unwrap().unwrap());
    }
    write.await.unwrap().unwrap();
    assert_eq!(received, b"0123456789");
}

#[test]
fn test_pair_endpoints_have_distinct_ids() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let (a, b) = memory::pair();
        assert_ne!(a.id(), b.id());
    });
}
