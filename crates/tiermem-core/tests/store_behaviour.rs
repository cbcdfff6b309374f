//! Behavioural suite run against every storage backend.

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use serde_json::json;
use tempfile::{TempDir, tempdir};
use tiermem_core::time::now_utc;
use tiermem_core::{
    BackendKind, IndexSet, MemoryEntry, MemoryLevel, MemoryQuery, MemorySource, Payload, SourceType, StoreConfig,
    TieredStore,
};

fn open(kind: BackendKind, recency_limit: usize) -> (TempDir, TieredStore) {
    let temp = tempdir().unwrap();
    let path = match kind {
        BackendKind::Sqlite => temp.path().join("memory.db"),
        BackendKind::File => temp.path().join("store"),
    };
    let config = StoreConfig::new(kind, path).with_recency_limit(recency_limit);
    let store = TieredStore::open(config).unwrap();
    (temp, store)
}

fn each_backend(test: impl Fn(TieredStore)) {
    for kind in [BackendKind::Sqlite, BackendKind::File] {
        let (_temp, store) = open(kind, 20);
        test(store);
    }
}

fn entry(level: MemoryLevel, session: Option<&str>, tags: &[&str]) -> MemoryEntry {
    let mut source = MemorySource::new(SourceType::Chat, "claude-001");
    if let Some(session) = session {
        source = source.with_session(session);
    }
    let mut payload = Payload::new();
    payload.insert("tags".into(), json!(tags));
    payload.insert("note".into(), json!({"nested": [1, 2, 3]}));
    MemoryEntry::new(source, level, payload)
}

#[test]
fn test_round_trip_all_fields() {
    each_backend(|store| {
        for level in MemoryLevel::ALL {
            let e = entry(level, Some("S1"), &["A"])
                .with_ttl(Some(3_600))
                .with_visibility("shared");
            store.put(&e).unwrap();
            assert_eq!(store.get(level, e.id()).unwrap(), Some(e));
        }
    });
}

#[test]
fn test_expiration() {
    each_backend(|store| {
        let fresh = entry(MemoryLevel::Immediate, Some("S1"), &["T"])
            .with_ttl(Some(60))
            .with_created_at(now_utc() - Duration::seconds(30));
        let stale = entry(MemoryLevel::Immediate, Some("S1"), &["T"])
            .with_ttl(Some(60))
            .with_created_at(now_utc() - Duration::seconds(90));
        store.put(&fresh).unwrap();
        store.put(&stale).unwrap();

        assert!(store.get(MemoryLevel::Immediate, fresh.id()).unwrap().is_some());
        assert!(store.get(MemoryLevel::Immediate, stale.id()).unwrap().is_none());

        let indices = store.indices().unwrap();
        assert!(!indices.lookup_by_session("S1").contains(stale.id()));
        assert!(!indices.lookup_by_tags(&["T"], false).contains(stale.id()));
        assert!(!indices.lookup_by_source(SourceType::Chat, "claude-001").contains(stale.id()));
        assert_eq!(indices, IndexSet::rebuild([&fresh]));
    });
}

#[test]
fn test_idempotent_delete() {
    each_backend(|store| {
        let e = entry(MemoryLevel::Working, Some("S1"), &["A"]);
        let other = entry(MemoryLevel::Working, Some("S1"), &["A"]);
        store.put(&e).unwrap();
        store.put(&other).unwrap();

        assert!(store.delete(MemoryLevel::Working, e.id()).unwrap());
        let snapshot = store.indices().unwrap();
        assert!(!store.delete(MemoryLevel::Working, e.id()).unwrap());
        assert_eq!(store.indices().unwrap(), snapshot);
        assert!(!store.delete(MemoryLevel::Longterm, "never-existed").unwrap());
    });
}

#[test]
fn test_tag_wildcard() {
    each_backend(|store| {
        let storage = entry(MemoryLevel::Longterm, None, &["TECHNICAL.STORAGE"]);
        let query = entry(MemoryLevel::Longterm, None, &["TECHNICAL.QUERY"]);
        let simple = entry(MemoryLevel::Longterm, None, &["INNOVATION.SIMPLE"]);
        for e in [&storage, &query, &simple] {
            store.put(e).unwrap();
        }

        let wild = store.query(&MemoryQuery::tags(["TECHNICAL.*"])).unwrap();
        let mut ids: Vec<&str> = wild.entries.iter().map(|e| e.id()).collect();
        ids.sort();
        let mut expected = vec![storage.id(), query.id()];
        expected.sort();
        assert_eq!(ids, expected);

        let exact = store.query(&MemoryQuery::tags(["TECHNICAL.STORAGE"])).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact.entries[0].id(), storage.id());
    });
}

#[test]
fn test_session_ordering() {
    each_backend(|store| {
        let base = now_utc();
        let t1 = entry(MemoryLevel::Working, Some("S1"), &[]).with_created_at(base - Duration::seconds(3));
        let t2 = entry(MemoryLevel::Immediate, Some("S1"), &[]).with_created_at(base - Duration::seconds(2));
        let t3 = entry(MemoryLevel::Longterm, Some("S1"), &[]).with_created_at(base - Duration::seconds(1));
        for e in [&t1, &t3, &t2] {
            store.put(e).unwrap();
        }

        let result = store.query(&MemoryQuery::session("S1")).unwrap();
        let ids: Vec<&str> = result.entries.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![t3.id(), t2.id(), t1.id()]);
    });
}

#[test]
fn test_bounded_unfiltered_query() {
    for kind in [BackendKind::Sqlite, BackendKind::File] {
        let (_temp, store) = open(kind, 4);
        for level in MemoryLevel::ALL {
            for _ in 0..6 {
                store.put(&entry(level, None, &[])).unwrap();
            }
        }

        let result = store.query(&MemoryQuery::new()).unwrap();
        assert!(result.partial, "{kind}");
        assert_eq!(result.len(), 12, "{kind}");
        for level in MemoryLevel::ALL {
            assert_eq!(result.entries.iter().filter(|e| e.level() == level).count(), 4, "{kind}");
        }
    }
}

#[test]
fn test_dangling_reference_is_dropped_from_queries() {
    let temp = tempdir().unwrap();
    let store = TieredStore::open(StoreConfig::file(temp.path())).unwrap();
    let lost = entry(MemoryLevel::Working, Some("S1"), &[]);
    let kept = entry(MemoryLevel::Working, Some("S1"), &[]);
    store.put(&lost).unwrap();
    store.put(&kept).unwrap();
    std::fs::remove_file(temp.path().join("working").join(format!("{}.json", lost.id()))).unwrap();

    let result = store.query(&MemoryQuery::session("S1")).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.entries[0].id(), kept.id());
    assert!(store.ensure_consistent().unwrap_err().to_string().contains("dangling"));
}

#[test]
fn test_concurrent_writers_keep_indices_consistent() {
    each_backend(|store| {
        let store = Arc::new(store);
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let session = format!("S{worker}");
                    for i in 0..10 {
                        let e = entry(MemoryLevel::Working, Some(session.as_str()), &["SHARED"]);
                        store.put(&e).unwrap();
                        if i % 3 == 0 {
                            store.delete(MemoryLevel::Working, e.id()).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.verify_indices().unwrap().is_consistent());
        // 10 puts per worker, 4 of them deleted (i = 0, 3, 6, 9)
        assert_eq!(store.stats().unwrap().total_records(), 24);
    });
}

#[test]
fn test_reopen_preserves_entries_and_indices() {
    for kind in [BackendKind::Sqlite, BackendKind::File] {
        let temp = tempdir().unwrap();
        let config = StoreConfig::new(kind, temp.path().join("data"));
        let e = entry(MemoryLevel::Longterm, Some("S1"), &["KEEP"]);
        {
            let store = TieredStore::open(config.clone()).unwrap();
            store.put(&e).unwrap();
        }

        let store = TieredStore::open(config).unwrap();
        assert_eq!(store.find(e.id()).unwrap(), Some(e.clone()));
        assert_eq!(store.indices().unwrap(), IndexSet::rebuild([&e]));
        store.ensure_consistent().unwrap();
    }
}

#[test]
fn test_handles_on_one_medium_keep_each_others_entries() {
    for kind in [BackendKind::Sqlite, BackendKind::File] {
        let temp = tempdir().unwrap();
        let config = StoreConfig::new(kind, temp.path().join("data"));
        let a = TieredStore::open(config.clone()).unwrap();
        let b = TieredStore::open(config.clone()).unwrap();

        let from_b = entry(MemoryLevel::Working, Some("S1"), &["B"]);
        let from_a = entry(MemoryLevel::Working, Some("S1"), &["A"]);
        b.put(&from_b).unwrap();
        a.put(&from_a).unwrap();

        // Each handle sees the other's writes without reopening
        assert_eq!(a.query(&MemoryQuery::session("S1")).unwrap().len(), 2);
        assert_eq!(b.query(&MemoryQuery::tags(["B"])).unwrap().len(), 1);
        assert!(a.delete(MemoryLevel::Working, from_b.id()).unwrap());
        assert_eq!(b.query(&MemoryQuery::session("S1")).unwrap().len(), 1);

        let reopened = TieredStore::open(config).unwrap();
        assert_eq!(reopened.indices().unwrap(), IndexSet::rebuild([&from_a]));
        reopened.ensure_consistent().unwrap();
    }
}

#[test]
fn test_concurrent_handles_keep_indices_consistent() {
    for kind in [BackendKind::Sqlite, BackendKind::File] {
        let temp = tempdir().unwrap();
        let config = StoreConfig::new(kind, temp.path().join("data"));
        TieredStore::open(config.clone()).unwrap();

        let handles: Vec<_> = (0..3)
            .map(|worker| {
                let config = config.clone();
                thread::spawn(move || {
                    let store = TieredStore::open(config).unwrap();
                    let session = format!("S{worker}");
                    for _ in 0..8 {
                        store.put(&entry(MemoryLevel::Immediate, Some(session.as_str()), &["SHARED"])).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = TieredStore::open(config).unwrap();
        store.ensure_consistent().unwrap();
        for worker in 0..3 {
            let session = format!("S{worker}");
            assert_eq!(store.query(&MemoryQuery::session(session.as_str())).unwrap().len(), 8);
        }
        assert_eq!(store.query(&MemoryQuery::tags(["SHARED"])).unwrap().len(), 24);
    }
}
