//! Batch DAO tests against a real SQLite database.
//!
//! Tests:
//! - Failing statements do not discard the rest of a batch
//! - Asynchronous writes arrive exactly once, in submission order
//! - An exhausted connection pool drops the batch without failing the caller
//! - Shutdown flushes queued statements

mod common;

use common::{insert_event, wait_for, TestFixture};
use sluice_batch::observability::tracing::init_test_tracing;
use sluice_batch::{
    BatchDao, BatchOutcome, ConnectionProvider, DaoConfig, OverflowPolicy, PoolConfig, PoolManager,
    QueueConfig, SqlStatement, SqlitePoolOptions,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_synchronous_failure_isolation() {
    init_test_tracing();
    let fixture = TestFixture::new();
    let dao = fixture.dao(DaoConfig::default());

    // Duplicate primary key makes the second statement fail
    let outcome = dao.synchronous(&[
        insert_event(1, "first"),
        insert_event(1, "duplicate"),
        SqlStatement::new("INSERT INTO no_such_table VALUES (1)"),
        insert_event(2, "second"),
    ]);

    assert_eq!(outcome, BatchOutcome::Executed { applied: 2, failed: 2 });
    assert_eq!(fixture.event_names(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_synchronous_empty_batch() {
    let fixture = TestFixture::new();
    let dao = fixture.dao(DaoConfig::default());

    assert_eq!(dao.synchronous(&[]), BatchOutcome::Empty);
}

#[tokio::test]
async fn test_asynchronous_preserves_submission_order() {
    let fixture = TestFixture::new();
    let dao = fixture.dao(DaoConfig::default());

    for id in 1..=200 {
        dao.asynchronous(insert_event(id, &format!("event-{id}")))
            .await
            .expect("enqueue failed");
    }

    let delivered = wait_for(Duration::from_secs(5), || fixture.event_count() == 200).await;
    assert!(delivered, "all statements should be executed");

    let expected: Vec<String> = (1..=200).map(|id| format!("event-{id}")).collect();
    assert_eq!(fixture.event_names(), expected);
}

#[tokio::test]
async fn test_async_failure_does_not_stop_worker() {
    let fixture = TestFixture::new();
    let dao = fixture.dao(DaoConfig::default());

    dao.asynchronous(insert_event(1, "a")).await.unwrap();
    dao.asynchronous(insert_event(1, "a-again")).await.unwrap();
    dao.asynchronous(insert_event(2, "b")).await.unwrap();
    dao.shutdown().await;

    assert_eq!(fixture.event_names(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_exhausted_pool_drops_batch() {
    let fixture = TestFixture::new();
    let pool = fixture.pool(SqlitePoolOptions {
        max_size: 1,
        connection_timeout: Duration::from_millis(50),
        ..SqlitePoolOptions::default()
    });
    let dao: BatchDao<_, SqlStatement> =
        BatchDao::new(pool, &PoolManager::new(), DaoConfig::default()).unwrap();
    dao.synchronous(&[SqlStatement::new(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    )]);

    let held = dao.provider().acquire().unwrap();
    let outcome = dao.synchronous(&[insert_event(1, "lost")]);
    drop(held);

    assert_eq!(outcome, BatchOutcome::Dropped { size: 1 });
    assert_eq!(fixture.event_count(), 0);

    // The pool recovers once the connection is back
    let outcome = dao.synchronous(&[insert_event(2, "kept")]);
    assert_eq!(outcome, BatchOutcome::Executed { applied: 1, failed: 0 });
}

#[tokio::test]
async fn test_concurrent_producers_over_capacity() {
    let fixture = TestFixture::new();
    let dao = Arc::new(fixture.dao(DaoConfig {
        queue: QueueConfig {
            channels: 1,
            channel_capacity: 8,
            overflow: OverflowPolicy::Block,
        },
        max_batch_size: 16,
        ..DaoConfig::default()
    }));

    let producers: Vec<_> = (0..4i64)
        .map(|p| {
            let dao = Arc::clone(&dao);
            tokio::spawn(async move {
                for i in 0..50i64 {
                    let id = p * 1000 + i;
                    dao.asynchronous(insert_event(id, &id.to_string()))
                        .await
                        .expect("enqueue failed");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    dao.shutdown().await;

    assert_eq!(fixture.event_count(), 200);
    assert_eq!(dao.pending(), 0);
}

#[tokio::test]
async fn test_multiple_channels_deliver_everything() {
    let fixture = TestFixture::new();
    let dao = fixture.dao(DaoConfig {
        pool: PoolConfig {
            min_workers: 1,
            max_workers: 4,
        },
        queue: QueueConfig {
            channels: 4,
            channel_capacity: 100,
            overflow: OverflowPolicy::Block,
        },
        ..DaoConfig::default()
    });

    for id in 1..=100 {
        dao.asynchronous(insert_event(id, "x")).await.unwrap();
    }
    dao.shutdown().await;

    assert_eq!(fixture.event_count(), 100);
}

#[tokio::test]
async fn test_daos_share_named_pool() {
    let first = TestFixture::new();
    let second = TestFixture::new();
    let pools = PoolManager::new();

    let config = DaoConfig {
        pool_name: "shared".into(),
        ..DaoConfig::default()
    };
    let dao_a: BatchDao<_, SqlStatement> =
        BatchDao::new(first.pool(SqlitePoolOptions::default()), &pools, config.clone()).unwrap();
    let dao_b: BatchDao<_, SqlStatement> =
        BatchDao::new(second.pool(SqlitePoolOptions::default()), &pools, config).unwrap();

    assert!(Arc::ptr_eq(dao_a.pool(), dao_b.pool()));
    assert_eq!(dao_a.pool().active_workers(), 2);

    dao_a.shutdown().await;
    dao_b.shutdown().await;
    assert_eq!(dao_a.pool().active_workers(), 0);
}
