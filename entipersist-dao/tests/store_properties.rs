//! Property tests for store/load/remove over arbitrary keys.

mod common;

use common::Note;
use entipersist_dao::{EntityPersistenceDao, FsDirectoryPersistence, StorageError};
use entipersist_types::Entity;
use proptest::prelude::*;
use tempfile::TempDir;

fn key_strategy() -> impl Strategy<Value = String> {
    // Printable keys including path separators, dots and non-ASCII, long
    // enough to cross the file name limit.
    prop::string::string_regex(r"[a-zA-Z0-9 ./\\:%ёß漢-]{1,96}").unwrap()
}

fn note_strategy() -> impl Strategy<Value = Note> {
    ("[a-zA-Z0-9 ]{0,30}", "[ -~]{0,200}", any::<bool>()).prop_map(|(title, body, pinned)| Note {
        title,
        body,
        pinned,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// store(k) then a fresh load yields k with an equal payload, unless the
    /// key is too long for a file name, in which case nothing is written.
    #[test]
    fn stored_payload_roundtrips(key in key_strategy(), payload in note_strategy()) {
        let temp = TempDir::new().unwrap();
        let store: FsDirectoryPersistence<Note> = FsDirectoryPersistence::new(temp.path());
        let storable = store.record_path(&key).is_ok();

        let (stored, loaded) = tokio_test::block_on(async {
            let stored = store.store(&Entity::resolved(key.clone(), payload.clone()), &key).await;
            let fresh: FsDirectoryPersistence<Note> = FsDirectoryPersistence::new(temp.path());
            (stored, fresh.load_stored().await.unwrap())
        });

        if storable {
            prop_assert!(stored.is_ok());
            prop_assert_eq!(loaded.loaded.len(), 1);
            prop_assert_eq!(&loaded.loaded[0].key, &key);
            prop_assert_eq!(&loaded.loaded[0].data, &payload);
        } else {
            prop_assert!(matches!(stored, Err(StorageError::InvalidKey(_))));
            prop_assert!(loaded.loaded.is_empty());
        }
        prop_assert!(loaded.skipped.is_empty());
    }

    /// remove(k) then a fresh load never yields k.
    #[test]
    fn removed_key_never_loads(key in key_strategy(), payload in note_strategy()) {
        let temp = TempDir::new().unwrap();
        let loaded = tokio_test::block_on(async {
            let store: FsDirectoryPersistence<Note> = FsDirectoryPersistence::new(temp.path());
            if store.record_path(&key).is_err() {
                return store.load_stored().await.unwrap();
            }
            store.store(&Entity::resolved(key.clone(), payload), &key).await.unwrap();
            store.remove(&key).await.unwrap();
            store.remove(&key).await.unwrap();

            let fresh: FsDirectoryPersistence<Note> = FsDirectoryPersistence::new(temp.path());
            fresh.load_stored().await.unwrap()
        });

        prop_assert!(loaded.loaded.iter().all(|e| e.key != key));
    }
}
