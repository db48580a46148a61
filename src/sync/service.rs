//! Two-way sync between the relational store and the realtime store
//!
//! Inbound: records are mapped, passed through the staleness gate and
//! upserted, both during the boot-time bulk reconciliation and for every
//! child event the listener receives. Outbound: API writes are published to
//! `<path>/<id>` after the relational write succeeds.

use super::gate::GateDecision;
use super::mapper::FromRecord;
use crate::db::{is_constraint_violation, Database, Model};
use crate::models::{
    EntityKind, Expense, MileageLog, Notification, Revenue, Ticket, Truck, User,
};
use crate::realtime::{child_path, ChildEvent, RealtimeStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

const INITIAL_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(60);

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    /// Dropped by the staleness gate.
    Stale,
    /// The record could not be mapped.
    Rejected,
    /// A removal; `true` when a row existed.
    Removed(bool),
}

impl From<GateDecision> for ApplyOutcome {
    fn from(decision: GateDecision) -> Self {
        match decision {
            GateDecision::Insert => ApplyOutcome::Inserted,
            GateDecision::Update => ApplyOutcome::Updated,
            GateDecision::Stale { .. } => ApplyOutcome::Stale,
        }
    }
}

/// Reconciliation counts for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindReport {
    pub kind: EntityKind,
    pub applied: usize,
    pub stale: usize,
    pub rejected: usize,
    pub pushed: usize,
    /// Local rows deleted because their remote copy is gone.
    pub removed: usize,
}

impl KindReport {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            applied: 0,
            stale: 0,
            rejected: 0,
            pushed: 0,
            removed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub kinds: Vec<KindReport>,
}

impl ReconcileReport {
    pub fn get(&self, kind: EntityKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn total_applied(&self) -> usize {
        self.kinds.iter().map(|k| k.applied).sum()
    }

    pub fn total_pushed(&self) -> usize {
        self.kinds.iter().map(|k| k.pushed).sum()
    }
}

pub struct SyncService {
    db: Arc<Database>,
    remote: Arc<dyn RealtimeStore>,
    push_local: bool,
}

impl SyncService {
    pub fn new(db: Arc<Database>, remote: Arc<dyn RealtimeStore>, push_local: bool) -> Self {
        Self {
            db,
            remote,
            push_local,
        }
    }

    pub fn remote(&self) -> &Arc<dyn RealtimeStore> {
        &self.remote
    }

    /// Map, gate and upsert one inbound record.
    pub fn apply_record(&self, kind: EntityKind, key: &str, value: &Value) -> Result<ApplyOutcome> {
        let applied = match kind {
            EntityKind::Truck => self.apply_as::<Truck>(key, value),
            EntityKind::User => self.apply_as::<User>(key, value),
            EntityKind::Expense => self.apply_as::<Expense>(key, value),
            EntityKind::Revenue => self.apply_as::<Revenue>(key, value),
            EntityKind::Ticket => self.apply_as::<Ticket>(key, value),
            EntityKind::Mileage => self.apply_as::<MileageLog>(key, value),
            EntityKind::Notification => self.apply_as::<Notification>(key, value),
        };
        applied.map(|(outcome, _)| outcome)
    }

    /// Delete the row for a removed child. A missing row is not an error.
    pub fn apply_removal(&self, kind: EntityKind, key: &str) -> Result<ApplyOutcome> {
        let removed = self
            .db
            .destroy_kind(kind, key)
            .with_context(|| format!("Failed to remove {} {}", kind, key))?;
        Ok(ApplyOutcome::Removed(removed))
    }

    pub fn handle_event(&self, kind: EntityKind, event: ChildEvent) -> Result<ApplyOutcome> {
        let outcome = match &event {
            ChildEvent::Added { key, value } | ChildEvent::Changed { key, value } => {
                self.apply_record(kind, key, value)?
            }
            ChildEvent::Removed { key } => self.apply_removal(kind, key)?,
        };
        debug!(entity = %kind, key = event.key(), event = event.label(), ?outcome, "realtime event applied");
        Ok(outcome)
    }

    /// Returns the outcome plus the remote `updated_at` when the record mapped.
    fn apply_as<M: FromRecord>(
        &self,
        key: &str,
        value: &Value,
    ) -> Result<(ApplyOutcome, Option<DateTime<Utc>>)> {
        let mapped = match M::from_record(key, value) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(entity = %M::KIND, key, "rejected record: {}", e);
                return Ok((ApplyOutcome::Rejected, None));
            }
        };

        let remote_ts = mapped.row.updated_at();
        let decision = match self.db.upsert_if_newer(&mapped.row) {
            Ok(decision) => decision,
            // e.g. a second account under an email we already hold
            Err(e) if is_constraint_violation(&e) => {
                warn!(entity = %M::KIND, key, "rejected record, conflicts with a stored row: {:#}", e);
                return Ok((ApplyOutcome::Rejected, Some(remote_ts)));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to upsert {} {}", M::KIND, key));
            }
        };
        self.db.mark_synced(M::KIND, key)?;

        if let GateDecision::Stale { stored } = decision {
            debug!(
                entity = %M::KIND,
                key,
                incoming = remote_ts.timestamp_millis(),
                stored = stored.timestamp_millis(),
                "stale record ignored"
            );
        }
        Ok((decision.into(), Some(remote_ts)))
    }

    /// Replay the whole realtime tree into the relational store.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for kind in EntityKind::ALL {
            let kind_report = match kind {
                EntityKind::Truck => self.reconcile_kind::<Truck>().await,
                EntityKind::User => self.reconcile_kind::<User>().await,
                EntityKind::Expense => self.reconcile_kind::<Expense>().await,
                EntityKind::Revenue => self.reconcile_kind::<Revenue>().await,
                EntityKind::Ticket => self.reconcile_kind::<Ticket>().await,
                EntityKind::Mileage => self.reconcile_kind::<MileageLog>().await,
                EntityKind::Notification => self.reconcile_kind::<Notification>().await,
            }
            .with_context(|| format!("Reconciliation of {} failed", kind.path()))?;

            info!(
                entity = %kind,
                applied = kind_report.applied,
                stale = kind_report.stale,
                rejected = kind_report.rejected,
                pushed = kind_report.pushed,
                removed = kind_report.removed,
                "🔄 Reconciled"
            );
            report.kinds.push(kind_report);
        }
        Ok(report)
    }

    async fn reconcile_kind<M: FromRecord + Serialize>(&self) -> Result<KindReport> {
        let kind = M::KIND;
        let mut report = KindReport::new(kind);

        let tree = self.remote.read(kind.path()).await?;
        let children = match tree {
            Value::Object(children) => children,
            Value::Null => Default::default(),
            other => {
                warn!(entity = %kind, "collection is not an object ({}), skipping", other);
                Default::default()
            }
        };

        let mut remote_stamps: HashMap<String, DateTime<Utc>> = HashMap::new();
        for (key, value) in &children {
            match self.apply_as::<M>(key, value) {
                Ok((outcome, remote_ts)) => {
                    match outcome {
                        ApplyOutcome::Inserted | ApplyOutcome::Updated => report.applied += 1,
                        ApplyOutcome::Stale => report.stale += 1,
                        _ => report.rejected += 1,
                    }
                    if let Some(ts) = remote_ts {
                        remote_stamps.insert(key.clone(), ts);
                    }
                }
                Err(e) => {
                    error!(entity = %kind, key = %key, "failed to apply record: {:#}", e);
                    report.rejected += 1;
                }
            }
        }

        // A synced row missing remotely was deleted there while we were away;
        // a row never synced has not been published yet.
        let synced = self.db.synced_ids(kind)?;
        for row in self.db.list::<M>()? {
            let id = row.id();
            if children.contains_key(id) {
                let behind = remote_stamps
                    .get(id)
                    .is_some_and(|remote| row.updated_at().timestamp_millis() > remote.timestamp_millis());
                if behind && self.push_local && self.publish(&row).await {
                    report.pushed += 1;
                }
            } else if synced.contains(id) {
                if self.apply_removal(kind, id)? == ApplyOutcome::Removed(true) {
                    report.removed += 1;
                }
            } else if self.push_local && self.publish(&row).await {
                report.pushed += 1;
            }
        }

        Ok(report)
    }

    /// Subscribe to every collection; one task per entity kind.
    pub fn listen(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let service = Arc::clone(&self);
                tokio::spawn(async move { service.listen_kind(kind).await })
            })
            .collect()
    }

    /// Runs forever, resubscribing with backoff whenever the stream ends.
    async fn listen_kind(&self, kind: EntityKind) {
        let mut delay = INITIAL_RESUBSCRIBE_DELAY;

        loop {
            // Rows known remotely; the subscription reports the ones that vanished
            let known = self.db.synced_ids(kind).unwrap_or_else(|e| {
                error!(entity = %kind, "failed to load synced ids: {:#}", e);
                HashSet::new()
            });

            match self.remote.subscribe(kind.path(), known).await {
                Ok(mut events) => {
                    info!(entity = %kind, path = kind.path(), "👂 Listening for realtime changes");
                    delay = INITIAL_RESUBSCRIBE_DELAY;

                    while let Some(event) = events.recv().await {
                        let key = event.key().to_string();
                        if let Err(e) = self.handle_event(kind, event) {
                            error!(entity = %kind, key = %key, "failed to apply realtime event: {:#}", e);
                        }
                    }
                    warn!(entity = %kind, "realtime subscription ended");
                }
                Err(e) => error!(entity = %kind, "subscribe failed: {:#}", e),
            }

            warn!(entity = %kind, "Resubscribing in {:?}...", delay);
            sleep(delay).await;
            delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
        }
    }

    /// Write a row's wire JSON to `<path>/<id>`. Failures are logged; the
    /// next reconciliation pushes the row again.
    pub async fn publish<M: Model + Serialize>(&self, row: &M) -> bool {
        let path = child_path(M::KIND.path(), row.id());
        let result = match serde_json::to_value(row) {
            Ok(value) => self.remote.write(&path, value).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {
                debug!(path = %path, "published");
                if let Err(e) = self.db.mark_synced(M::KIND, row.id()) {
                    warn!(path = %path, "failed to mark published row: {:#}", e);
                }
                true
            }
            Err(e) => {
                warn!(path = %path, "publish failed: {:#}", e);
                false
            }
        }
    }

    /// Remove `<path>/<id>` from the realtime store.
    pub async fn retract<M: Model>(&self, id: &str) -> bool {
        let path = child_path(M::KIND.path(), id);
        match self.remote.remove(&path).await {
            Ok(()) => {
                debug!(path = %path, "retracted");
                true
            }
            Err(e) => {
                warn!(path = %path, "retract failed: {:#}", e);
                false
            }
        }
    }
}
