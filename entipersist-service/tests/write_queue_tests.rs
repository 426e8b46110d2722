mod common;

use common::{next_events, note, seeded_backend, Call, CountingDao, Harness};
use entipersist_dao::{EntityPersistenceDao, MemoryBackend};
use entipersist_service::{PersistenceConfig, PersistenceEvent, WriteKind};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn remove_after_slow_store_is_not_undone() {
    let backend = MemoryBackend::new();
    let h = Harness::new(backend.clone());
    h.dao.delay_key("a", Duration::from_millis(150));
    h.service.start().await.unwrap();

    h.collection.put("a", note("A")).unwrap();
    // Let the listener pick up the update while the entity still exists
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.collection.remove("a");
    h.service.flush().await.unwrap();

    assert_eq!(
        h.dao.writes(),
        vec![Call::Store("a".into(), "A".into()), Call::Remove("a".into())]
    );
    assert!(backend.get_raw("a").await.is_none());
}

#[tokio::test]
async fn updates_to_one_key_apply_in_order() {
    let backend = MemoryBackend::new();
    let h = Harness::new(backend.clone());
    h.service.start().await.unwrap();

    for i in 0..10 {
        h.collection.put("a", note(&format!("v{i}"))).unwrap();
    }
    h.service.flush().await.unwrap();

    let stored = h.dao.resolve("a").await.unwrap().into_option();
    assert_eq!(stored.map(|n| n.title).as_deref(), Some("v9"));
    assert_eq!(h.service.pending_writes().await, 0);
}

#[tokio::test]
async fn slow_key_does_not_block_other_keys() {
    let h = Harness::new(MemoryBackend::new());
    h.dao.delay_key("slow", Duration::from_millis(300));
    h.service.start().await.unwrap();
    let mut events = h.service.subscribe_events();

    h.collection.put("slow", note("S")).unwrap();
    h.collection.put("fast", note("F")).unwrap();

    let received = next_events(&mut events, 2).await;
    assert_eq!(
        received,
        vec![
            PersistenceEvent::Stored { key: "fast".into() },
            PersistenceEvent::Stored { key: "slow".into() },
        ]
    );
}

#[tokio::test]
async fn write_failure_is_reported_and_later_writes_proceed() {
    let h = Harness::new(MemoryBackend::new());
    h.dao.fail_key("bad");
    h.service.start().await.unwrap();
    let mut events = h.service.subscribe_events();

    h.collection.put("bad", note("B")).unwrap();
    h.service.flush().await.unwrap();
    h.collection.put("good", note("G")).unwrap();
    h.service.flush().await.unwrap();

    let received = next_events(&mut events, 2).await;
    match &received[0] {
        PersistenceEvent::WriteFailed { key, kind, error } => {
            assert_eq!(key, "bad");
            assert_eq!(*kind, WriteKind::Store);
            assert!(error.contains("injected failure"));
        }
        other => panic!("expected WriteFailed, got {other:?}"),
    }
    assert_eq!(received[1], PersistenceEvent::Stored { key: "good".into() });
    // The collection keeps the entity even though it was not persisted
    assert_eq!(h.title("bad").as_deref(), Some("B"));
}

#[tokio::test]
async fn remove_failure_is_reported() {
    let h = Harness::new(seeded_backend(&[("a", "X")]).await);
    h.dao.fail_key("a");
    h.service.start().await.unwrap();
    let mut events = h.service.subscribe_events();

    h.collection.remove("a");
    h.service.flush().await.unwrap();

    let received = next_events(&mut events, 1).await;
    assert_eq!(received[0].key(), Some("a"));
    assert!(matches!(
        received[0],
        PersistenceEvent::WriteFailed { kind: WriteKind::Remove, .. }
    ));
}

#[tokio::test]
async fn unresolved_entities_are_not_stored() {
    let h = Harness::new(MemoryBackend::new());
    h.service.start().await.unwrap();

    h.collection.insert_unresolved("pending").unwrap();
    h.service.flush().await.unwrap();
    assert!(h.dao.writes().is_empty());

    // A failed refresh of a resolved entity still stores the last payload
    h.collection.put("a", note("A")).unwrap();
    h.collection.mark_failed("a", "refresh failed").unwrap();
    h.service.flush().await.unwrap();
    assert_eq!(
        h.dao.writes(),
        vec![
            Call::Store("a".into(), "A".into()),
            Call::Store("a".into(), "A".into()),
        ]
    );
}

#[tokio::test]
async fn shutdown_drains_queued_writes() {
    let backend = MemoryBackend::new();
    let h = Harness::new(backend.clone());
    h.dao.delay_key("a", Duration::from_millis(50));
    h.service.start().await.unwrap();

    h.collection.put("a", note("A")).unwrap();
    h.collection.put("b", note("B")).unwrap();
    h.service.shutdown().await.unwrap();

    assert_eq!(backend.keys().await, vec!["a".to_string(), "b".to_string()]);

    // No longer listening
    h.collection.put("c", note("C")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.len().await, 2);
    h.service.flush().await.unwrap();
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn notification_burst_is_fully_persisted() {
    let backend = seeded_backend(&[("old", "Old")]).await;
    let config = PersistenceConfig {
        event_capacity: 8192,
        ..PersistenceConfig::new("test.Note").with_directory("/unused")
    };
    let h = Harness::with_config(Arc::new(CountingDao::new(backend.clone())), config);
    h.service.start().await.unwrap();
    let mut events = h.service.subscribe_events();

    // More changes than the notification channel buffers, with no yield
    // in between, so the oldest ones (including the remove) are dropped
    h.collection.remove("old");
    for i in 0..2000 {
        h.collection.put(format!("k{i:04}"), note(&i.to_string())).unwrap();
    }
    h.service.flush().await.unwrap();

    assert_eq!(backend.len().await, 2000);
    assert!(backend.get_raw("old").await.is_none());
    assert_eq!(h.service.pending_writes().await, 0);

    let mut lagged = None;
    while let Ok(event) = events.try_recv() {
        if let PersistenceEvent::NotificationsLagged { missed } = event {
            lagged = Some(missed);
        }
    }
    assert!(lagged.is_some_and(|missed| missed > 0));
}
