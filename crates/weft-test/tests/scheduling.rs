//! Scheduling and transaction lifecycle across the whole stack.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tokio::time::timeout;
use weft_common::config::SchedulerConfig;
use weft_common::types::{Key, Scope, Value};
use weft_storage::{BackendKind, CursorParams, Record};
use weft_test::{init_tracing, seeded, EventLog, BACKENDS};
use weft_txn::{TransactionManager, TxnError};

const GUARD: Duration = Duration::from_secs(5);

#[tokio::test]
async fn overlapping_writers_run_one_after_another() {
    init_tracing();
    for kind in BACKENDS {
        let tm = TransactionManager::new(seeded(kind));
        let log = EventLog::new();

        let first = {
            let log = log.clone();
            tm.enqueue(Scope::read_write(["odd", "mixed"]), move |txn| async move {
                log.push("w1 start");
                txn.put("odd", Record::new(Key::from_u64(11), Value::from_str("w1")))
                    .await?;
                tokio::task::yield_now().await;
                log.push("w1 end");
                Ok::<_, TxnError>(())
            })
        };
        let second = {
            let log = log.clone();
            tm.enqueue(Scope::read_write(["odd"]), move |txn| async move {
                log.push("w2 start");
                // Sees the first writer's committed row.
                let seen = txn.get("odd", &Key::from_u64(11)).await?.is_some();
                log.push("w2 end");
                Ok::<_, TxnError>(seen)
            })
        };

        timeout(GUARD, first).await.unwrap().unwrap();
        assert!(timeout(GUARD, second).await.unwrap().unwrap(), "{kind}");
        assert_eq!(
            log.snapshot(),
            vec!["w1 start", "w1 end", "w2 start", "w2 end"],
            "{kind}"
        );
    }
}

#[tokio::test]
async fn overlapping_readers_run_together() {
    init_tracing();
    let tm = TransactionManager::new(seeded(BackendKind::Ordered));
    let barrier = Arc::new(Barrier::new(2));

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            tm.enqueue(Scope::read_only(["odd"]), move |txn| async move {
                // Both readers must be running for either to pass.
                barrier.wait().await;
                txn.count("odd", None, &Default::default()).await
            })
        })
        .collect();

    for reader in readers {
        assert_eq!(timeout(GUARD, reader).await.unwrap().unwrap(), 5);
    }
    assert_eq!(tm.scheduler().stats().waited.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn disjoint_writers_run_together() {
    init_tracing();
    let tm = TransactionManager::new(seeded(BackendKind::Table));
    let barrier = Arc::new(Barrier::new(2));

    let writers: Vec<_> = ["odd", "mixed"]
        .into_iter()
        .map(|store| {
            let barrier = Arc::clone(&barrier);
            tm.enqueue(Scope::read_write([store]), move |txn| async move {
                barrier.wait().await;
                txn.delete(store, &Key::from_u64(9)).await
            })
        })
        .collect();

    for writer in writers {
        assert!(timeout(GUARD, writer).await.unwrap().unwrap());
    }
}

#[tokio::test]
async fn queued_writer_holds_back_later_reader() {
    init_tracing();
    let tm = TransactionManager::new(seeded(BackendKind::Ordered));
    let log = EventLog::new();

    let reader = tm.begin(Scope::read_only(["odd"])).await.unwrap();

    let writer = {
        let log = log.clone();
        tm.enqueue(Scope::read_write(["odd"]), move |_txn| async move {
            log.push("writer");
            Ok::<_, TxnError>(())
        })
    };
    let late_reader = {
        let log = log.clone();
        tm.enqueue(Scope::read_only(["odd"]), move |_txn| async move {
            log.push("late reader");
            Ok::<_, TxnError>(())
        })
    };
    // An unrelated request is not held back by the queue.
    let unrelated = tm.run(Scope::read_write(["people"]), |_txn| async move {
        Ok::<_, TxnError>(())
    });
    timeout(GUARD, unrelated).await.unwrap().unwrap();
    assert!(log.snapshot().is_empty());

    reader.commit().await.unwrap();
    timeout(GUARD, writer).await.unwrap().unwrap();
    timeout(GUARD, late_reader).await.unwrap().unwrap();
    assert_eq!(log.snapshot(), vec!["writer", "late reader"]);
}

#[tokio::test]
async fn abort_invalidates_cursors_and_admits_next() {
    init_tracing();
    for kind in BACKENDS {
        let tm = TransactionManager::new(seeded(kind));
        let txn = tm.begin(Scope::read_write(["odd"])).await.unwrap();

        let mut forward = txn.open_cursor(CursorParams::store("odd")).await.unwrap();
        let mut backward = txn
            .open_cursor(CursorParams::store("odd").reverse())
            .await
            .unwrap();
        forward.open().await.unwrap();
        backward.open().await.unwrap();
        forward.next().await.unwrap();

        let queued = tm.enqueue(Scope::read_only(["odd"]), |txn| async move {
            txn.count("odd", None, &Default::default()).await
        });
        tokio::task::yield_now().await;
        assert_eq!(tm.scheduler().queued_count(), 1, "{kind}");

        txn.abort();

        for cursor in [&mut forward, &mut backward] {
            assert!(matches!(cursor.current(), Err(TxnError::Inactive(_))));
            assert!(matches!(cursor.next().await, Err(TxnError::Inactive(_))));
        }
        assert_eq!(timeout(GUARD, queued).await.unwrap().unwrap(), 5, "{kind}");
    }
}

#[tokio::test]
async fn timed_out_work_releases_scope() {
    init_tracing();
    let tm = TransactionManager::with_config(
        seeded(BackendKind::Ordered),
        SchedulerConfig::new().txn_timeout(Some(Duration::from_millis(20))),
    );

    let stuck = tm.enqueue(Scope::read_write(["odd"]), |txn| async move {
        txn.delete("odd", &Key::from_u64(1)).await?;
        std::future::pending::<()>().await;
        Ok::<_, TxnError>(())
    });
    let next = tm.enqueue(Scope::read_only(["odd"]), |txn| async move {
        txn.get("odd", &Key::from_u64(1)).await
    });

    let err = timeout(GUARD, stuck).await.unwrap().unwrap_err();
    assert!(matches!(err, TxnError::Timeout { .. }));
    // The timed-out delete was rolled back.
    assert!(timeout(GUARD, next).await.unwrap().unwrap().is_some());
}

#[tokio::test]
async fn backend_error_fails_only_its_transaction() {
    init_tracing();
    let tm = TransactionManager::new(seeded(BackendKind::Table));

    let failing = tm.enqueue(Scope::read_write(["odd"]), |txn| async move {
        txn.put("missing", Record::new(Key::from_u64(1), Value::from_str("x")))
            .await
    });
    let sibling = tm.enqueue(Scope::read_write(["odd"]), |txn| async move {
        txn.count("odd", None, &Default::default()).await
    });

    let err = timeout(GUARD, failing).await.unwrap().unwrap_err();
    assert!(matches!(err, TxnError::Storage(_)));
    assert_eq!(timeout(GUARD, sibling).await.unwrap().unwrap(), 5);
    assert_eq!(tm.scheduler().running_count(), 0);
}
