//! Integration tests for realtime sync
//!
//! Two backend nodes share one in-memory realtime store. Writes published by
//! one node must land in the other node's relational store through the
//! listener, and replays must never overwrite newer data.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use fleet_backend::auth::UserStore;
use fleet_backend::db::Database;
use fleet_backend::jobs::{LicenceExpiryJob, LogMailer};
use fleet_backend::models::{
    now_millis, EntityKind, Notification, NotificationKind, Truck, TruckStatus, User, UserRole,
};
use fleet_backend::realtime::{MemoryStore, RealtimeStore};
use fleet_backend::sync::{boot, ApplyOutcome, SyncService};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Node {
    db: Arc<Database>,
    sync: Arc<SyncService>,
}

fn node(remote: &Arc<MemoryStore>) -> Node {
    let db = Arc::new(Database::new(":memory:").expect("open database"));
    let store: Arc<dyn RealtimeStore> = remote.clone();
    let sync = Arc::new(SyncService::new(db.clone(), store, true));
    Node { db, sync }
}

fn truck(id: &str, make: &str) -> Truck {
    let now = now_millis();
    Truck {
        id: id.to_string(),
        plate_number: "KDA 001A".to_string(),
        make: make.to_string(),
        model: "FH16".to_string(),
        year: Some(2021),
        status: TruckStatus::Active,
        driver_id: None,
        odometer: 120_000.0,
        created_at: now,
        updated_at: now,
    }
}

fn driver(id: &str, licence_expiry: Option<NaiveDate>) -> User {
    let now = now_millis();
    User {
        id: id.to_string(),
        name: "Wanjiru".to_string(),
        email: format!("{}@fleet.test", id),
        phone: None,
        role: UserRole::Driver,
        password_hash: String::new(),
        licence_number: Some("DL-778".to_string()),
        licence_expiry,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Poll until `check` passes or two seconds elapse.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_published_write_reaches_other_node() {
    let remote = Arc::new(MemoryStore::new());
    let a = node(&remote);
    let b = node(&remote);
    let handles = b.sync.clone().listen();

    let t = truck("t1", "Volvo");
    a.db.upsert(&t).unwrap();
    assert!(a.sync.publish(&t).await);

    let db_b = b.db.clone();
    assert!(
        eventually(|| db_b.find::<Truck>("t1").unwrap().is_some()).await,
        "truck never reached node b"
    );
    assert_eq!(b.db.find::<Truck>("t1").unwrap().unwrap(), t);

    for h in handles {
        h.abort();
    }
}

#[tokio::test]
async fn test_newer_remote_edit_wins_and_echo_is_ignored() {
    let remote = Arc::new(MemoryStore::new());
    let a = node(&remote);
    let b = node(&remote);
    let handles_a = a.sync.clone().listen();

    let original = truck("t1", "Volvo");
    a.db.upsert(&original).unwrap();
    a.sync.publish(&original).await;

    // Node b edits a copy with a later timestamp
    b.sync.reconcile_all().await.unwrap();
    let mut edited = b.db.find::<Truck>("t1").unwrap().unwrap();
    edited.make = "Scania".to_string();
    edited.updated_at = original.updated_at + ChronoDuration::milliseconds(5);
    b.db.upsert(&edited).unwrap();
    b.sync.publish(&edited).await;

    let db_a = a.db.clone();
    assert!(
        eventually(|| db_a.find::<Truck>("t1").unwrap().map(|t| t.make) == Some("Scania".into()))
            .await
    );

    // Replaying the older copy is rejected by the gate
    let stale = serde_json::to_value(&original).unwrap();
    assert_eq!(
        a.sync.apply_record(EntityKind::Truck, "t1", &stale).unwrap(),
        ApplyOutcome::Stale
    );
    assert_eq!(a.db.find::<Truck>("t1").unwrap().unwrap().make, "Scania");

    for h in handles_a {
        h.abort();
    }
}

#[tokio::test]
async fn test_remote_removal_deletes_local_row() {
    let remote = Arc::new(MemoryStore::new());
    let a = node(&remote);
    let b = node(&remote);

    let t = truck("t9", "MAN");
    a.db.upsert(&t).unwrap();
    a.sync.publish(&t).await;
    b.sync.reconcile_all().await.unwrap();
    assert!(b.db.find::<Truck>("t9").unwrap().is_some());

    let handles = b.sync.clone().listen();
    let db_b = b.db.clone();
    // Let the listener take its initial snapshot first
    assert!(eventually(|| db_b.count(EntityKind::Truck).unwrap() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.sync.retract::<Truck>("t9").await);
    assert!(eventually(|| db_b.find::<Truck>("t9").unwrap().is_none()).await);

    for h in handles {
        h.abort();
    }
}

#[tokio::test]
async fn test_reconcile_after_restart_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.db");
    let path = path.to_str().unwrap();

    let remote = Arc::new(MemoryStore::with_root(json!({
        "trucks": {
            "t1": { "plateNumber": "KDB 200B", "make": "Isuzu", "model": "FVZ",
                    "status": "maintenance", "updatedAt": 1_700_000_000_000i64 }
        },
        "expenses": {
            "e1": { "category": "fuel", "amount": "150.5", "date": "2024-03-02",
                    "updatedAt": 1_700_000_000 }
        }
    })));

    {
        let db = Arc::new(Database::new(path).unwrap());
        let store: Arc<dyn RealtimeStore> = remote.clone();
        let sync = SyncService::new(db.clone(), store, false);
        let report = sync.reconcile_all().await.unwrap();
        assert_eq!(report.total_applied(), 2);
    }

    let db = Arc::new(Database::new(path).unwrap());
    let store: Arc<dyn RealtimeStore> = remote.clone();
    let sync = SyncService::new(db.clone(), store, false);
    let report = sync.reconcile_all().await.unwrap();

    assert_eq!(report.total_applied(), 0);
    assert_eq!(report.get(EntityKind::Truck).unwrap().stale, 1);
    assert_eq!(report.get(EntityKind::Expense).unwrap().stale, 1);
    assert_eq!(
        db.find::<Truck>("t1").unwrap().unwrap().status,
        TruckStatus::Maintenance
    );
}

#[tokio::test]
async fn test_push_local_fills_empty_remote() {
    let remote = Arc::new(MemoryStore::new());
    let a = node(&remote);
    a.db.upsert(&truck("t1", "DAF")).unwrap();
    a.db.upsert(&driver("d1", None)).unwrap();

    let report = a.sync.reconcile_all().await.unwrap();
    assert_eq!(report.total_pushed(), 2);

    let tree = remote.snapshot();
    assert_eq!(tree["trucks"]["t1"]["make"], "DAF");
    assert_eq!(tree["users"]["d1"]["role"], "driver");
    assert!(tree["users"]["d1"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_licence_notification_syncs_to_other_node() {
    let remote = Arc::new(MemoryStore::new());
    let a = node(&remote);
    let b = node(&remote);
    let handles = b.sync.clone().listen();

    let today = Utc::now().date_naive();
    a.db
        .upsert(&driver("d1", Some(today + ChronoDuration::days(10))))
        .unwrap();

    let job = LicenceExpiryJob::new(
        a.db.clone(),
        a.sync.clone(),
        Arc::new(LogMailer),
        30,
        Duration::from_secs(60),
    );
    let first = job.scan_once(today).await.unwrap();
    assert_eq!(first.created, 1);
    let second = job.scan_once(today).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.already_notified, 1);

    let db_b = b.db.clone();
    assert!(eventually(|| db_b.count(EntityKind::Notification).unwrap() == 1).await);
    let notes = b.db.list::<Notification>().unwrap();
    assert_eq!(notes[0].kind, NotificationKind::LicenceExpiring);
    assert_eq!(notes[0].user_id.as_deref(), Some("d1"));

    for h in handles {
        h.abort();
    }
}

#[tokio::test]
async fn test_nodes_booting_in_sequence_share_one_admin() {
    let remote = Arc::new(MemoryStore::new());
    let a = node(&remote);
    let b = node(&remote);
    let users_a = UserStore::new(a.db.clone(), 4);
    let users_b = UserStore::new(b.db.clone(), 4);

    boot(&a.sync, &users_a, "admin@fleet.test", "bootstrap-pass", true)
        .await
        .unwrap();
    let report = boot(&b.sync, &users_b, "admin@fleet.test", "bootstrap-pass", true)
        .await
        .unwrap()
        .expect("reconciliation ran");

    let users = report.get(EntityKind::User).unwrap();
    assert_eq!((users.applied, users.rejected), (1, 0));

    let remote_users = remote.snapshot()["users"].clone();
    assert_eq!(remote_users.as_object().map(|m| m.len()), Some(1));

    let admin_a = a.db.users_with_role(UserRole::Admin).unwrap();
    let admin_b = b.db.users_with_role(UserRole::Admin).unwrap();
    assert_eq!(admin_b.len(), 1);
    assert_eq!(admin_a[0].id, admin_b[0].id);

    // The configured password works on the node that only received the account
    assert!(users_b
        .verify_credentials("admin@fleet.test", "bootstrap-pass")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_deletion_while_down_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.db");
    let path = path.to_str().unwrap();
    let remote = Arc::new(MemoryStore::new());
    let store: Arc<dyn RealtimeStore> = remote.clone();

    {
        let db = Arc::new(Database::new(path).unwrap());
        let sync = SyncService::new(db.clone(), store.clone(), true);
        let kept = truck("t1", "Volvo");
        let doomed = truck("t2", "MAN");
        for t in [&kept, &doomed] {
            db.upsert(t).unwrap();
            assert!(sync.publish(t).await);
        }
        // Written while the realtime store was unreachable
        db.upsert(&truck("t3", "DAF")).unwrap();
    }

    // Another client deletes t2 while this node is down
    remote.remove("trucks/t2").await.unwrap();

    let db = Arc::new(Database::new(path).unwrap());
    let sync = SyncService::new(db.clone(), store, true);
    let report = sync.reconcile_all().await.unwrap();
    let trucks = report.get(EntityKind::Truck).unwrap();
    assert_eq!((trucks.removed, trucks.pushed), (1, 1));

    assert!(db.find::<Truck>("t2").unwrap().is_none());
    let tree = remote.snapshot();
    assert!(tree["trucks"].get("t2").is_none());
    assert_eq!(tree["trucks"]["t1"]["make"], "Volvo");
    assert_eq!(tree["trucks"]["t3"]["make"], "DAF");
}
