use entipersist_types::{
    EntityNotification, PersistenceInfo, ResolveResult, ResolveSucceeded, ResolvedMultiple,
};
use pretty_assertions::assert_eq;

#[test]
fn batch_keys_preserve_order() {
    let batch = ResolvedMultiple::new(vec![
        ResolveSucceeded::new("b", 2),
        ResolveSucceeded::new("a", 1),
    ]);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["b", "a"]);
}

#[test]
fn default_batch_is_empty() {
    let batch: ResolvedMultiple<u8> = ResolvedMultiple::default();
    assert!(batch.is_empty());
}

#[test]
fn resolve_result_from_option() {
    assert_eq!(ResolveResult::from(Some(3)), ResolveResult::Found(3));
    assert_eq!(ResolveResult::<i32>::from(None), ResolveResult::NotFound);
    assert!(ResolveResult::Found(1).is_found());
    assert_eq!(ResolveResult::Found(7).into_option(), Some(7));
    assert_eq!(ResolveResult::<i32>::NotFound.into_option(), None);
}

#[test]
fn resolve_result_wire_format() {
    let json = serde_json::to_value(ResolveResult::Found("x")).unwrap();
    assert_eq!(json, serde_json::json!({"status": "found", "data": "x"}));

    let json = serde_json::to_value(ResolveResult::<String>::NotFound).unwrap();
    assert_eq!(json, serde_json::json!({"status": "not_found"}));
}

#[test]
fn notification_key() {
    assert_eq!(EntityNotification::Updated("a".into()).key(), "a");
    assert_eq!(EntityNotification::Removed("b".into()).key(), "b");
}

#[test]
fn notification_wire_format() {
    let json = serde_json::to_value(EntityNotification::Removed("k".into())).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "removed", "key": "k"}));
}

#[test]
fn persistence_info_equality() {
    let info = PersistenceInfo {
        key: "a".into(),
        is_stored: true,
    };
    assert_eq!(info.clone(), info);
}
