/*!
 * Async Collection Integration Tests
 *
 * Capacity ceilings, completion semantics, the blocked-producer handoff
 * scenario, and mixed blocking/suspending producers and consumers
 */

use fairsync::{AddError, AsyncCollection, TakeError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_capacity_one_producer_handoff() {
    let collection = AsyncCollection::with_capacity(1);

    collection.add(1u32, CancellationToken::new()).await.unwrap();

    // A second add blocks at capacity.
    let blocked = tokio::spawn({
        let collection = collection.clone();
        async move { collection.add(2, CancellationToken::new()).await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!blocked.is_finished());
    assert_eq!(collection.len(), 1);

    // Taking the first item releases the blocked producer.
    assert_eq!(collection.take(CancellationToken::new()).await.unwrap(), 1);
    blocked.await.unwrap().unwrap();
    assert_eq!(collection.take(CancellationToken::new()).await.unwrap(), 2);

    // Completed and empty: take fails.
    collection.complete_adding().await;
    assert_eq!(
        collection.take(CancellationToken::new()).await,
        Err(TakeError::Completed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_count_never_exceeds_capacity() {
    const CAP: usize = 4;
    let collection = AsyncCollection::with_capacity(CAP);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let collection = collection.clone();
            tokio::spawn(async move {
                for i in 0..100u32 {
                    collection.add(p * 100 + i, CancellationToken::new()).await.unwrap();
                    assert!(collection.len() <= CAP, "capacity ceiling violated");
                }
            })
        })
        .collect();

    let consumer = tokio::spawn({
        let collection = collection.clone();
        async move {
            let mut total = 0usize;
            while total < 400 {
                collection.take(CancellationToken::new()).await.unwrap();
                assert!(collection.len() <= CAP, "capacity ceiling violated");
                total += 1;
            }
            total
        }
    });

    for producer in producers {
        producer.await.unwrap();
    }
    assert_eq!(consumer.await.unwrap(), 400);
    assert!(collection.is_empty());
}

#[tokio::test]
async fn test_complete_wakes_blocked_producer_and_consumers() {
    let collection = AsyncCollection::with_capacity(1);
    collection.add(0u32, CancellationToken::new()).await.unwrap();

    let producer = tokio::spawn({
        let collection = collection.clone();
        async move { collection.add(1, CancellationToken::new()).await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!producer.is_finished());

    collection.complete_adding().await;

    // The blocked producer observes the completed failure, item returned.
    let err = producer.await.unwrap().unwrap_err();
    assert!(matches!(err, AddError::Completed(1)));

    // Consumers drain the remaining item, then observe completed-and-empty.
    assert_eq!(collection.take(CancellationToken::new()).await, Ok(0));
    assert_eq!(
        collection.take(CancellationToken::new()).await,
        Err(TakeError::Completed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_take_leaves_collection_usable() {
    let collection = AsyncCollection::<u32>::new();
    let cancel = CancellationToken::new();

    let taker = tokio::spawn({
        let collection = collection.clone();
        let cancel = cancel.clone();
        async move { collection.take(cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    assert_eq!(taker.await.unwrap(), Err(TakeError::Cancelled));

    collection.add(3, CancellationToken::new()).await.unwrap();
    assert_eq!(collection.take(CancellationToken::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_output_available_waits_for_first_item() {
    let collection = AsyncCollection::<u32>::new();

    let probe = tokio::spawn({
        let collection = collection.clone();
        async move { collection.output_available(CancellationToken::new()).await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!probe.is_finished());

    collection.add(1, CancellationToken::new()).await.unwrap();
    assert!(probe.await.unwrap().unwrap());
}

#[test]
fn test_blocking_producers_with_consuming_iter() {
    let collection = Arc::new(AsyncCollection::with_capacity(2));

    let producers: Vec<_> = (0..3)
        .map(|p| {
            let collection = Arc::clone(&collection);
            std::thread::spawn(move || {
                for i in 0..20u32 {
                    collection
                        .blocking_add(p * 100 + i, CancellationToken::new())
                        .unwrap();
                }
            })
        })
        .collect();

    let consumer = {
        let collection = Arc::clone(&collection);
        std::thread::spawn(move || collection.consuming_iter().count())
    };

    for producer in producers {
        producer.join().unwrap();
    }
    collection.blocking_complete_adding();
    assert_eq!(consumer.join().unwrap(), 60);
}
