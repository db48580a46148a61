//! Realtime document store
//!
//! A hierarchical JSON tree addressed by slash-separated paths, with
//! subscriptions that report child added / changed / removed events for the
//! collection at a path. Two backends:
//! - `FirebaseStore`: Firebase Realtime Database over REST + server-sent events
//! - `MemoryStore`: in-process tree for local development and tests

pub mod firebase;
pub mod memory;
pub mod sse;
pub mod tree;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// A change to one direct child of a subscribed collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    Added { key: String, value: Value },
    Changed { key: String, value: Value },
    Removed { key: String },
}

impl ChildEvent {
    pub fn key(&self) -> &str {
        match self {
            ChildEvent::Added { key, .. }
            | ChildEvent::Changed { key, .. }
            | ChildEvent::Removed { key } => key,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChildEvent::Added { .. } => "added",
            ChildEvent::Changed { .. } => "changed",
            ChildEvent::Removed { .. } => "removed",
        }
    }
}

/// Path-scoped read / write / subscribe operations.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Value at `path`, `Value::Null` when absent.
    async fn read(&self, path: &str) -> Result<Value>;

    /// Replace the value at `path`. Writing `null` removes it.
    async fn write(&self, path: &str, value: Value) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Stream child events for the collection at `path`.
    ///
    /// Existing children are delivered first as `Added`. Keys in `known`
    /// that are missing from that initial snapshot are then delivered as
    /// `Removed`, so deletions made while unsubscribed are not lost. The
    /// receiver yields `None` once the subscription ends; callers resubscribe.
    async fn subscribe(
        &self,
        path: &str,
        known: HashSet<String>,
    ) -> Result<mpsc::UnboundedReceiver<ChildEvent>>;
}

/// Join a collection path and a child key.
pub fn child_path(collection: &str, key: &str) -> String {
    format!(
        "{}/{}",
        collection.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
