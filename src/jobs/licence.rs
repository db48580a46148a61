//! Driver licence expiry scan
//!
//! Walks active drivers with a licence expiry date and raises one
//! notification per driver, kind and expiry date. Notification ids are
//! derived from those three values, so rescans and restarts never duplicate.

use super::mailer::{EmailMessage, Mailer};
use crate::db::Database;
use crate::models::{now_millis, EntityKind, Notification, NotificationKind, User, UserRole};
use crate::realtime::{child_path, RealtimeStore};
use crate::sync::{GateDecision, SyncService};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub created: usize,
    pub already_notified: usize,
}

/// Which notification, if any, a licence expiring on `expiry` warrants.
pub fn classify(expiry: NaiveDate, today: NaiveDate, warning_days: i64) -> Option<NotificationKind> {
    let days_left = (expiry - today).num_days();
    if days_left < 0 {
        Some(NotificationKind::LicenceExpired)
    } else if days_left <= warning_days {
        Some(NotificationKind::LicenceExpiring)
    } else {
        None
    }
}

/// Stable id for a (driver, kind, expiry) notification.
pub fn notification_id(user_id: &str, kind: NotificationKind, expiry: NaiveDate) -> String {
    let name = format!("licence:{}:{}:{}", user_id, kind.as_str(), expiry);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

pub struct LicenceExpiryJob {
    db: Arc<Database>,
    sync: Arc<SyncService>,
    mailer: Arc<dyn Mailer>,
    warning_days: i64,
    interval: Duration,
}

impl LicenceExpiryJob {
    pub fn new(
        db: Arc<Database>,
        sync: Arc<SyncService>,
        mailer: Arc<dyn Mailer>,
        warning_days: i64,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            sync,
            mailer,
            warning_days,
            interval,
        }
    }

    /// Scan forever at the configured interval. The first scan runs
    /// immediately.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            warning_days = self.warning_days,
            "🪪 Licence expiry job started"
        );
        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            match self.scan_once(Utc::now().date_naive()).await {
                Ok(report) if report.created > 0 => {
                    info!(created = report.created, "🪪 Licence notifications raised");
                }
                Ok(report) => debug!(?report, "licence scan finished"),
                Err(e) => warn!("licence scan failed: {:#}", e),
            }
        }
    }

    pub async fn scan_once(&self, today: NaiveDate) -> Result<ScanReport> {
        let drivers = self.db.licence_holders().context("Failed to load licence holders")?;
        let admins = self.db.users_with_role(UserRole::Admin)?;
        let mut report = ScanReport::default();

        for driver in &drivers {
            let Some(expiry) = driver.licence_expiry else {
                continue;
            };
            let Some(kind) = classify(expiry, today, self.warning_days) else {
                continue;
            };

            let id = notification_id(&driver.id, kind, expiry);
            if self.db.find::<Notification>(&id)?.is_some() || self.raised_elsewhere(&id).await? {
                report.already_notified += 1;
                continue;
            }

            let notification = build_notification(id, driver, kind, expiry, today);
            let decision = self
                .db
                .upsert_if_newer(&notification)
                .with_context(|| format!("Failed to store notification for {}", driver.id))?;
            // The listener may have landed another node's copy in the meantime
            if decision != GateDecision::Insert {
                report.already_notified += 1;
                continue;
            }
            self.sync.publish(&notification).await;
            self.email(driver, &admins, &notification).await;

            info!(
                driver = %driver.email,
                kind = kind.as_str(),
                %expiry,
                "🔔 {}",
                notification.title
            );
            report.created += 1;
        }

        Ok(report)
    }

    /// Whether another node already published this notification. Its copy is
    /// applied locally. An unreachable store counts as not raised.
    async fn raised_elsewhere(&self, id: &str) -> Result<bool> {
        let path = child_path(EntityKind::Notification.path(), id);
        match self.sync.remote().read(&path).await {
            Ok(Value::Null) => Ok(false),
            Ok(existing) => {
                self.sync.apply_record(EntityKind::Notification, id, &existing)?;
                debug!(id, "notification already raised by another node");
                Ok(true)
            }
            Err(e) => {
                warn!(id, "could not check realtime store for notification: {:#}", e);
                Ok(false)
            }
        }
    }

    async fn email(&self, driver: &User, admins: &[User], notification: &Notification) {
        let mut recipients: Vec<&str> = Vec::with_capacity(admins.len() + 1);
        for user in std::iter::once(driver).chain(admins.iter()) {
            let email = user.email.as_str();
            if user.active && !email.ends_with(".invalid") && !recipients.contains(&email) {
                recipients.push(email);
            }
        }

        for to in recipients {
            let message = EmailMessage {
                to: to.to_string(),
                subject: notification.title.clone(),
                body: notification.message.clone(),
            };
            if let Err(e) = self.mailer.send(&message).await {
                warn!(to, "failed to send licence email: {:#}", e);
            }
        }
    }
}

fn build_notification(
    id: String,
    driver: &User,
    kind: NotificationKind,
    expiry: NaiveDate,
    today: NaiveDate,
) -> Notification {
    let days_left = (expiry - today).num_days();
    let (title, message) = match kind {
        NotificationKind::LicenceExpired => (
            format!("Licence expired: {}", driver.name),
            format!(
                "{}'s driving licence{} expired on {} ({} days ago).",
                driver.name,
                licence_suffix(driver),
                expiry,
                -days_left
            ),
        ),
        _ => (
            format!("Licence expiring: {}", driver.name),
            format!(
                "{}'s driving licence{} expires on {} (in {} days).",
                driver.name,
                licence_suffix(driver),
                expiry,
                days_left
            ),
        ),
    };

    let now = now_millis();
    Notification {
        id,
        user_id: Some(driver.id.clone()),
        kind,
        title,
        message,
        read: false,
        created_at: now,
        updated_at: now,
    }
}

fn licence_suffix(driver: &User) -> String {
    driver
        .licence_number
        .as_deref()
        .map(|n| format!(" ({})", n))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait::async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn user(id: &str, role: UserRole, expiry: Option<&str>) -> User {
        User {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{}@fleet.test", id),
            phone: None,
            role,
            password_hash: String::new(),
            licence_number: Some(format!("DL-{}", id)),
            licence_expiry: expiry.map(day),
            active: true,
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    fn setup() -> (Arc<Database>, Arc<MemoryStore>, Arc<RecordingMailer>, LicenceExpiryJob) {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let remote = Arc::new(MemoryStore::new());
        let sync = Arc::new(SyncService::new(db.clone(), remote.clone(), false));
        let mailer = Arc::new(RecordingMailer::default());
        let job = LicenceExpiryJob::new(
            db.clone(),
            sync,
            mailer.clone(),
            30,
            Duration::from_secs(300),
        );
        (db, remote, mailer, job)
    }

    #[test]
    fn test_classify_thresholds() {
        let today = day("2026-06-01");
        assert_eq!(classify(day("2026-05-31"), today, 30), Some(NotificationKind::LicenceExpired));
        assert_eq!(classify(day("2026-06-01"), today, 30), Some(NotificationKind::LicenceExpiring));
        assert_eq!(classify(day("2026-07-01"), today, 30), Some(NotificationKind::LicenceExpiring));
        assert_eq!(classify(day("2026-07-02"), today, 30), None);
    }

    #[test]
    fn test_notification_id_is_stable() {
        let a = notification_id("d1", NotificationKind::LicenceExpiring, day("2026-07-01"));
        let b = notification_id("d1", NotificationKind::LicenceExpiring, day("2026-07-01"));
        let renewed = notification_id("d1", NotificationKind::LicenceExpiring, day("2027-07-01"));
        assert_eq!(a, b);
        assert_ne!(a, renewed);
    }

    #[tokio::test]
    async fn test_scan_creates_once_and_emails_driver_and_admins() {
        let (db, remote, mailer, job) = setup();
        db.upsert(&user("d1", UserRole::Driver, Some("2026-06-10"))).unwrap();
        db.upsert(&user("d2", UserRole::Driver, Some("2026-05-01"))).unwrap();
        db.upsert(&user("d3", UserRole::Driver, Some("2027-01-01"))).unwrap();
        db.upsert(&user("d4", UserRole::Driver, None)).unwrap();
        db.upsert(&user("a1", UserRole::Admin, None)).unwrap();

        let today = day("2026-06-01");
        let report = job.scan_once(today).await.unwrap();
        assert_eq!(report, ScanReport { created: 2, already_notified: 0 });

        let stored = db.list_notifications(Some("d2"), true).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::LicenceExpired);
        assert!(stored[0].message.contains("DL-d2"));

        let published = remote.snapshot()["notifications"].clone();
        assert_eq!(published.as_object().map(|m| m.len()), Some(2));

        let sent = mailer.sent.lock().clone();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().any(|m| m.to == "d1@fleet.test"));
        assert_eq!(sent.iter().filter(|m| m.to == "a1@fleet.test").count(), 2);

        let again = job.scan_once(today).await.unwrap();
        assert_eq!(again, ScanReport { created: 0, already_notified: 2 });
        assert_eq!(mailer.sent.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_expiring_then_expired_raises_second_notification() {
        let (db, _remote, _mailer, job) = setup();
        db.upsert(&user("d1", UserRole::Driver, Some("2026-06-10"))).unwrap();

        job.scan_once(day("2026-06-01")).await.unwrap();
        let report = job.scan_once(day("2026-06-11")).await.unwrap();
        assert_eq!(report.created, 1);

        let kinds: Vec<_> = db
            .list_notifications(Some("d1"), false)
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect();
        assert!(kinds.contains(&NotificationKind::LicenceExpiring));
        assert!(kinds.contains(&NotificationKind::LicenceExpired));
    }

    #[tokio::test]
    async fn test_inactive_drivers_are_skipped() {
        let (db, remote, _mailer, job) = setup();
        let mut driver = user("d1", UserRole::Driver, Some("2026-05-01"));
        driver.active = false;
        db.upsert(&driver).unwrap();

        let report = job.scan_once(day("2026-06-01")).await.unwrap();
        assert_eq!(report, ScanReport::default());
        assert_eq!(remote.snapshot(), Value::Null);
    }

    #[tokio::test]
    async fn test_notification_raised_by_another_node_is_not_repeated() {
        let (db, remote, mailer, job) = setup();
        db.upsert(&user("d1", UserRole::Driver, Some("2026-06-10"))).unwrap();
        let id = notification_id("d1", NotificationKind::LicenceExpiring, day("2026-06-10"));
        remote
            .write(
                &format!("notifications/{}", id),
                json!({
                    "userId": "d1",
                    "kind": "licence_expiring",
                    "title": "Licence expiring: D1",
                    "message": "raised elsewhere",
                    "read": false,
                    "updatedAt": 1_780_000_000_000i64,
                }),
            )
            .await
            .unwrap();

        let report = job.scan_once(day("2026-06-01")).await.unwrap();
        assert_eq!(report, ScanReport { created: 0, already_notified: 1 });
        assert!(mailer.sent.lock().is_empty());
        assert_eq!(db.find::<Notification>(&id).unwrap().unwrap().message, "raised elsewhere");
    }
}
