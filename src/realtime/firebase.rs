//! Firebase Realtime Database client
//!
//! REST for reads and writes (`{url}/{path}.json`), server-sent events for
//! subscriptions. The stream delivers `put` / `patch` operations at any depth
//! below the subscribed path; a local mirror of the subtree turns them into
//! child added / changed / removed events.

use super::sse::SseDecoder;
use super::{tree, ChildEvent, RealtimeStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The server sends `keep-alive` every ~30s; silence beyond this means the
/// connection is dead.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

/// Local copy of a subscribed subtree.
#[derive(Debug, Default)]
pub struct StreamMirror {
    root: Value,
    /// Keys the subscriber already holds, checked against the first
    /// full snapshot.
    known: Option<HashSet<String>>,
}

/// What the stream asked us to do besides emitting child events.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    /// `cancel` or `auth_revoked`: the server closed the subscription.
    Closed(String),
}

impl StreamMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mirror that reports `known` keys absent from the first root `put`
    /// as removed.
    pub fn seeded(known: HashSet<String>) -> Self {
        Self {
            root: Value::Null,
            known: Some(known),
        }
    }

    /// Apply one stream event, returning the resulting child events.
    pub fn apply(&mut self, event: &str, data: &str) -> Result<(Vec<ChildEvent>, StreamControl)> {
        match event {
            "put" | "patch" => {
                let payload: StreamPayload = serde_json::from_str(data)
                    .with_context(|| format!("Malformed {} payload", event))?;
                let path = tree::segments(&payload.path);
                let before = tree::children(&self.root, &[]);

                if event == "put" {
                    tree::set(&mut self.root, &path, payload.data);
                } else {
                    let updates = payload
                        .data
                        .as_object()
                        .context("patch payload is not an object")?;
                    tree::patch(&mut self.root, &path, updates);
                }

                let after = tree::children(&self.root, &[]);
                let mut events = tree::diff_children(&before, &after);
                if event == "put" && path.is_empty() {
                    if let Some(known) = self.known.take() {
                        events.extend(
                            known
                                .into_iter()
                                .filter(|key| !after.contains_key(key))
                                .map(|key| ChildEvent::Removed { key }),
                        );
                    }
                }
                Ok((events, StreamControl::Continue))
            }
            "keep-alive" => Ok((Vec::new(), StreamControl::Continue)),
            "cancel" | "auth_revoked" => {
                Ok((Vec::new(), StreamControl::Closed(format!("{}: {}", event, data))))
            }
            other => {
                debug!(event = other, "ignoring unknown stream event");
                Ok((Vec::new(), StreamControl::Continue))
            }
        }
    }
}

pub struct FirebaseStore {
    client: Client,
    stream_client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl FirebaseStore {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build realtime HTTP client")?;

        // No overall timeout: event streams stay open indefinitely.
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build realtime stream client")?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match &self.auth_token {
            Some(token) => vec![("auth", token.clone())],
            None => Vec::new(),
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(anyhow::anyhow!("{} {}: {}", what, status, text))
    }
}

#[async_trait]
impl RealtimeStore for FirebaseStore {
    async fn read(&self, path: &str) -> Result<Value> {
        let resp = self
            .client
            .get(self.url(path))
            .query(&self.query())
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        Self::check(resp, &format!("GET {}", path))
            .await?
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse value at {}", path))
    }

    async fn write(&self, path: &str, value: Value) -> Result<()> {
        let resp = self
            .client
            .put(self.url(path))
            .query(&self.query())
            .json(&value)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", path))?;

        Self::check(resp, &format!("PUT {}", path)).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(path))
            .query(&self.query())
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", path))?;

        Self::check(resp, &format!("DELETE {}", path)).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        path: &str,
        known: HashSet<String>,
    ) -> Result<mpsc::UnboundedReceiver<ChildEvent>> {
        let resp = self
            .stream_client
            .get(self.url(path))
            .query(&self.query())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .with_context(|| format!("Stream {} failed", path))?;
        let resp = Self::check(resp, &format!("Stream {}", path)).await?;

        info!(path, "📡 Realtime stream connected");

        let (tx, rx) = mpsc::unbounded_channel();
        let path = path.to_string();
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut mirror = StreamMirror::seeded(known);

            loop {
                let chunk = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, bytes.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => {
                        warn!(path = %path, "realtime stream error: {}", e);
                        break;
                    }
                    Ok(None) => {
                        warn!(path = %path, "realtime stream closed by server");
                        break;
                    }
                    Err(_) => {
                        warn!(path = %path, "realtime stream idle for {:?}", STREAM_IDLE_TIMEOUT);
                        break;
                    }
                };

                for sse in decoder.push(&chunk) {
                    match mirror.apply(&sse.event, &sse.data) {
                        Ok((events, control)) => {
                            for event in events {
                                if tx.send(event).is_err() {
                                    debug!(path = %path, "subscriber dropped; closing stream");
                                    return;
                                }
                            }
                            if let StreamControl::Closed(reason) = control {
                                warn!(path = %path, reason = %reason, "realtime stream cancelled");
                                return;
                            }
                        }
                        Err(e) => warn!(path = %path, "skipping stream event: {:#}", e),
                    }
                }
            }
        });

        Ok(rx)
    }
}
