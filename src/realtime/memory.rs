//! In-process realtime store.

use super::{tree, ChildEvent, RealtimeStore};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
}

/// Tree held in memory; subscribers receive the same child events the
/// hosted store would send.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an initial tree.
    pub fn with_root(root: Value) -> Self {
        Self {
            inner: Mutex::new(Inner {
                root,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Snapshot of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.inner.lock().root.clone()
    }

    fn mutate(&self, path: &str, value: Value) {
        let segments = tree::segments(path);
        let mut inner = self.inner.lock();

        let before: Vec<_> = inner
            .subscribers
            .iter()
            .map(|s| tree::children(&inner.root, &s.path))
            .collect();

        tree::set(&mut inner.root, &segments, value);

        let Inner { root, subscribers } = &mut *inner;
        let mut index = 0;
        subscribers.retain(|sub| {
            let after = tree::children(root, &sub.path);
            let events = tree::diff_children(&before[index], &after);
            index += 1;
            events.into_iter().all(|ev| sub.tx.send(ev).is_ok())
        });
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Value> {
        let inner = self.inner.lock();
        Ok(tree::get(&inner.root, &tree::segments(path))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn write(&self, path: &str, value: Value) -> Result<()> {
        self.mutate(path, value);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.mutate(path, Value::Null);
        Ok(())
    }

    async fn subscribe(
        &self,
        path: &str,
        known: HashSet<String>,
    ) -> Result<mpsc::UnboundedReceiver<ChildEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let segments = tree::segments(path);
        let mut inner = self.inner.lock();

        let children = tree::children(&inner.root, &segments);
        for key in known.into_iter().filter(|k| !children.contains_key(k)) {
            let _ = tx.send(ChildEvent::Removed { key });
        }
        for (key, value) in children {
            let _ = tx.send(ChildEvent::Added { key, value });
        }
        debug!(path, "memory store subscription opened");

        inner.subscribers.push(Subscriber { path: segments, tx });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_write_remove() {
        let store = MemoryStore::new();
        store.write("trucks/t1", json!({"make": "Volvo"})).await.unwrap();

        assert_eq!(store.read("trucks/t1/make").await.unwrap(), json!("Volvo"));
        store.remove("trucks/t1").await.unwrap();
        assert_eq!(store.read("trucks").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_subscription_replays_existing_children_then_changes() {
        let store = MemoryStore::with_root(json!({"trucks": {"t1": {"make": "Volvo"}}}));
        let mut rx = store.subscribe("trucks", HashSet::new()).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ChildEvent::Added { key: "t1".into(), value: json!({"make": "Volvo"}) }
        );

        store.write("trucks/t1/make", json!("Scania")).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ChildEvent::Changed { key: "t1".into(), value: json!({"make": "Scania"}) }
        );

        store.write("trucks/t2", json!({"make": "MAN"})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().label(), "added");

        store.remove("trucks/t1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ChildEvent::Removed { key: "t1".into() });
    }

    #[tokio::test]
    async fn test_known_keys_missing_from_snapshot_are_removed() {
        let store = MemoryStore::with_root(json!({"trucks": {"t1": {"make": "Volvo"}}}));
        let known: HashSet<String> = ["t1".to_string(), "t2".to_string()].into();
        let mut rx = store.subscribe("trucks", known).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(events.contains(&ChildEvent::Removed { key: "t2".into() }));
        assert_eq!(events.iter().filter(|e| e.label() == "added").count(), 1);
    }

    #[tokio::test]
    async fn test_writes_outside_subscription_are_not_delivered() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("trucks", HashSet::new()).await.unwrap();
        store.write("users/u1", json!({"name": "Ana"})).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let store = MemoryStore::new();
        let rx = store.subscribe("trucks", HashSet::new()).await.unwrap();
        drop(rx);
        store.write("trucks/t1", json!({"make": "DAF"})).await.unwrap();
        assert!(store.inner.lock().subscribers.is_empty());
    }
}
