//! Property: replaying a watch from the beginning reproduces the listed state.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use futures::StreamExt;
use levelwatch_store::{
    DynamicObject, EventKind, ExternalStore, InMemoryStore, ObjectKey, ResourceVersion,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Upsert(u8, i64),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, any::<i64>()).prop_map(|(n, v)| Op::Upsert(n, v)),
        (0u8..4).prop_map(Op::Delete),
    ]
}

async fn apply(store: &InMemoryStore<DynamicObject>, op: &Op) -> usize {
    match op {
        Op::Upsert(n, v) => {
            let obj = DynamicObject::new("ns", format!("item-{n}"))
                .with_spec(serde_json::json!({ "value": v }));
            let key = ObjectKey::for_object(&obj).unwrap();
            if store.get(&key).await.is_some() {
                store.update(obj).await.map(|_| 1).unwrap_or(0)
            } else {
                store.create(obj).await.map(|_| 1).unwrap_or(0)
            }
        }
        Op::Delete(n) => {
            let key = ObjectKey::from(format!("ns/item-{n}"));
            store.delete(&key).await.map(|_| 1).unwrap_or(0)
        }
    }
}

proptest! {
    #[test]
    fn prop_watch_replay_matches_list(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryStore::new();
            let mut stream = store.watch(ResourceVersion::ZERO).await.unwrap();

            let mut changes = 0usize;
            for op in &ops {
                changes += apply(&store, op).await;
            }

            let mut replayed: BTreeMap<ObjectKey, DynamicObject> = BTreeMap::new();
            for _ in 0..changes {
                let event = stream.next().await.unwrap().unwrap();
                let key = ObjectKey::for_object(&event.object).unwrap();
                match event.kind {
                    EventKind::Added | EventKind::Modified => {
                        replayed.insert(key, event.object);
                    }
                    EventKind::Deleted => {
                        replayed.remove(&key);
                    }
                }
            }

            let listed: BTreeMap<ObjectKey, DynamicObject> = store
                .list()
                .await
                .unwrap()
                .items
                .into_iter()
                .map(|o| (ObjectKey::for_object(&o).unwrap(), o))
                .collect();

            assert_eq!(replayed, listed);
        });
    }
}
