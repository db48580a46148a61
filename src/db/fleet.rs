//! Fleet-specific queries on top of the generic model operations.

use super::tables::DATE_FORMAT;
use super::{Database, Model};
use crate::auth::models::UserRole;
use crate::models::{
    Expense, FleetSummary, MileageLog, Notification, Revenue, Ticket, Truck, User,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Deserialize;
use tracing::info;

/// Filter shared by the dated record lists and the summary report.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RecordFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(truck_id) = &self.truck_id {
            values.push(Value::Text(truck_id.clone()));
            clauses.push(format!("truck_id = ?{}", values.len()));
        }
        if let Some(driver_id) = &self.driver_id {
            values.push(Value::Text(driver_id.clone()));
            clauses.push(format!("driver_id = ?{}", values.len()));
        }
        if let Some(from) = self.from {
            values.push(Value::Text(from.format(DATE_FORMAT).to_string()));
            clauses.push(format!("date >= ?{}", values.len()));
        }
        if let Some(to) = self.to {
            values.push(Value::Text(to.format(DATE_FORMAT).to_string()));
            clauses.push(format!("date <= ?{}", values.len()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Rows that belong to a truck and driver on a calendar date.
pub trait DatedRecord: Model {}

impl DatedRecord for Expense {}
impl DatedRecord for Revenue {}
impl DatedRecord for Ticket {}
impl DatedRecord for MileageLog {}

/// Why a truck could not be assigned.
#[derive(Debug)]
pub enum AssignmentError {
    TruckNotFound,
    DriverNotFound,
    NotADriver,
    Database(anyhow::Error),
}

impl std::fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentError::TruckNotFound => write!(f, "Truck not found"),
            AssignmentError::DriverNotFound => write!(f, "Driver not found"),
            AssignmentError::NotADriver => write!(f, "User is not a driver"),
            AssignmentError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for AssignmentError {}

impl From<rusqlite::Error> for AssignmentError {
    fn from(err: rusqlite::Error) -> Self {
        AssignmentError::Database(err.into())
    }
}

impl From<anyhow::Error> for AssignmentError {
    fn from(err: anyhow::Error) -> Self {
        AssignmentError::Database(err)
    }
}

fn select_where<M: Model>(conn: &Connection, clause: &str, values: Vec<Value>) -> Result<Vec<M>> {
    let sql = format!(
        "SELECT {} FROM {}{}",
        M::COLUMNS.join(", "),
        M::KIND.table(),
        clause
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), M::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Database {
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let rows = select_where::<User>(
            &conn,
            " WHERE lower(email) = lower(?1)",
            vec![Value::Text(email.trim().to_string())],
        )?;
        Ok(rows.into_iter().next())
    }

    pub fn users_with_role(&self, role: UserRole) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        select_where::<User>(
            &conn,
            " WHERE role = ?1 ORDER BY name",
            vec![Value::Text(role.as_str().to_string())],
        )
    }

    /// Active drivers with a licence expiry date on file.
    pub fn licence_holders(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        select_where::<User>(
            &conn,
            " WHERE role = 'driver' AND active = 1 AND licence_expiry IS NOT NULL ORDER BY licence_expiry",
            Vec::new(),
        )
    }

    /// Replace a user's password hash without touching the sync timestamp.
    pub fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Trucks currently assigned to a driver.
    pub fn trucks_for_driver(&self, driver_id: &str) -> Result<Vec<Truck>> {
        let conn = self.conn.lock();
        select_where::<Truck>(
            &conn,
            " WHERE driver_id = ?1",
            vec![Value::Text(driver_id.to_string())],
        )
    }

    /// Assign a truck to a driver in one transaction.
    ///
    /// Any other truck held by the driver is released. Returns every truck
    /// row that changed, stamped with `now`.
    pub fn assign_truck(
        &self,
        truck_id: &str,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Truck>, AssignmentError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut truck = select_where::<Truck>(
            &tx,
            " WHERE id = ?1",
            vec![Value::Text(truck_id.to_string())],
        )?
        .into_iter()
        .next()
        .ok_or(AssignmentError::TruckNotFound)?;

        let role: Option<String> = tx
            .query_row(
                "SELECT role FROM users WHERE id = ?1",
                params![driver_id],
                |row| row.get(0),
            )
            .optional()?;
        match role.as_deref().and_then(UserRole::from_str) {
            None if role.is_none() => return Err(AssignmentError::DriverNotFound),
            Some(UserRole::Driver) => {}
            _ => return Err(AssignmentError::NotADriver),
        }

        let mut changed = select_where::<Truck>(
            &tx,
            " WHERE driver_id = ?1 AND id != ?2",
            vec![
                Value::Text(driver_id.to_string()),
                Value::Text(truck_id.to_string()),
            ],
        )?;
        for other in &mut changed {
            other.driver_id = None;
            other.updated_at = now;
            super::write_row(&tx, other)?;
        }

        truck.driver_id = Some(driver_id.to_string());
        truck.updated_at = now;
        super::write_row(&tx, &truck)?;
        changed.push(truck);

        tx.commit()?;

        info!(
            truck_id,
            driver_id,
            released = changed.len() - 1,
            "🚚 Truck assigned"
        );
        Ok(changed)
    }

    /// Clear a truck's driver. `None` when the truck does not exist.
    pub fn unassign_truck(&self, truck_id: &str, now: DateTime<Utc>) -> Result<Option<Truck>> {
        let conn = self.conn.lock();
        let Some(mut truck) = select_where::<Truck>(
            &conn,
            " WHERE id = ?1",
            vec![Value::Text(truck_id.to_string())],
        )?
        .into_iter()
        .next() else {
            return Ok(None);
        };

        truck.driver_id = None;
        truck.updated_at = now;
        super::write_row(&conn, &truck)?;
        Ok(Some(truck))
    }

    /// Dated records matching a filter, newest date first.
    pub fn list_records<M: DatedRecord>(&self, filter: &RecordFilter) -> Result<Vec<M>> {
        let (clause, values) = filter.where_clause();
        let conn = self.conn.lock();
        select_where::<M>(
            &conn,
            &format!("{} ORDER BY date DESC, updated_at DESC", clause),
            values,
        )
    }

    /// Totals across revenues, expenses, mileage and tickets.
    pub fn summary(&self, filter: &RecordFilter) -> Result<FleetSummary> {
        let (clause, values) = filter.where_clause();
        let conn = self.conn.lock();

        let sum = |sql: String| -> Result<f64> {
            conn.query_row(&sql, params_from_iter(values.clone()), |row| row.get(0))
                .with_context(|| format!("summary query failed: {}", sql))
        };

        let total_revenue = sum(format!("SELECT COALESCE(SUM(amount), 0.0) FROM revenues{}", clause))?;
        let total_expenses = sum(format!("SELECT COALESCE(SUM(amount), 0.0) FROM expenses{}", clause))?;
        let distance = sum(format!("SELECT COALESCE(SUM(distance), 0.0) FROM mileage_logs{}", clause))?;
        let net_weight = sum(format!("SELECT COALESCE(SUM(net_weight), 0.0) FROM tickets{}", clause))?;
        let ticket_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM tickets{}", clause),
            params_from_iter(values.clone()),
            |row| row.get(0),
        )?;

        Ok(FleetSummary {
            total_revenue,
            total_expenses,
            net: total_revenue - total_expenses,
            distance,
            ticket_count,
            net_weight,
        })
    }

    /// Notifications, newest first. `user_id = None` lists everything.
    pub fn list_notifications(
        &self,
        user_id: Option<&str>,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(user_id) = user_id {
            values.push(Value::Text(user_id.to_string()));
            clauses.push("user_id = ?1".to_string());
        }
        if unread_only {
            clauses.push("read = 0".to_string());
        }
        let mut clause = String::new();
        if !clauses.is_empty() {
            clause = format!(" WHERE {}", clauses.join(" AND "));
        }
        clause.push_str(" ORDER BY created_at DESC, id");

        let conn = self.conn.lock();
        select_where::<Notification>(&conn, &clause, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExpenseCategory, TruckStatus};

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    fn user(id: &str, role: UserRole) -> User {
        User {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{}@fleet.test", id),
            phone: None,
            role,
            password_hash: String::new(),
            licence_number: None,
            licence_expiry: None,
            active: true,
            created_at: at(1_000),
            updated_at: at(1_000),
        }
    }

    fn truck(id: &str, driver_id: Option<&str>) -> Truck {
        Truck {
            id: id.to_string(),
            plate_number: format!("PLATE-{}", id),
            make: "Volvo".to_string(),
            model: "FH".to_string(),
            year: None,
            status: TruckStatus::Active,
            driver_id: driver_id.map(str::to_string),
            odometer: 0.0,
            created_at: at(1_000),
            updated_at: at(1_000),
        }
    }

    fn expense(id: &str, truck_id: &str, amount: f64, date: &str) -> Expense {
        Expense {
            id: id.to_string(),
            truck_id: Some(truck_id.to_string()),
            driver_id: Some("d1".to_string()),
            category: ExpenseCategory::Fuel,
            amount,
            description: String::new(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            created_at: at(1_000),
            updated_at: at(1_000),
        }
    }

    fn seeded() -> Database {
        let db = Database::new(":memory:").unwrap();
        db.upsert(&user("d1", UserRole::Driver)).unwrap();
        db.upsert(&user("a1", UserRole::Admin)).unwrap();
        db.upsert(&truck("t1", Some("d1"))).unwrap();
        db.upsert(&truck("t2", None)).unwrap();
        db
    }

    #[test]
    fn test_assign_truck_releases_previous_truck() {
        let db = seeded();
        let changed = db.assign_truck("t2", "d1", at(5_000)).unwrap();

        assert_eq!(changed.len(), 2);
        let t1: Truck = db.find("t1").unwrap().unwrap();
        let t2: Truck = db.find("t2").unwrap().unwrap();
        assert_eq!(t1.driver_id, None);
        assert_eq!(t2.driver_id.as_deref(), Some("d1"));
        assert_eq!(t1.updated_at, at(5_000));
    }

    #[test]
    fn test_assign_truck_rejects_unknown_and_non_drivers() {
        let db = seeded();
        assert!(matches!(
            db.assign_truck("nope", "d1", at(5_000)),
            Err(AssignmentError::TruckNotFound)
        ));
        assert!(matches!(
            db.assign_truck("t2", "ghost", at(5_000)),
            Err(AssignmentError::DriverNotFound)
        ));
        assert!(matches!(
            db.assign_truck("t2", "a1", at(5_000)),
            Err(AssignmentError::NotADriver)
        ));

        // Nothing changed on failure
        let t1: Truck = db.find("t1").unwrap().unwrap();
        assert_eq!(t1.driver_id.as_deref(), Some("d1"));
    }

    #[test]
    fn test_unassign_truck() {
        let db = seeded();
        let truck = db.unassign_truck("t1", at(6_000)).unwrap().unwrap();
        assert_eq!(truck.driver_id, None);
        assert!(db.unassign_truck("missing", at(6_000)).unwrap().is_none());
    }

    #[test]
    fn test_list_records_with_filter() {
        let db = seeded();
        db.upsert(&expense("e1", "t1", 100.0, "2026-01-05")).unwrap();
        db.upsert(&expense("e2", "t1", 50.0, "2026-02-10")).unwrap();
        db.upsert(&expense("e3", "t2", 75.0, "2026-02-11")).unwrap();

        let all: Vec<Expense> = db.list_records(&RecordFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "e3");

        let filter = RecordFilter {
            truck_id: Some("t1".to_string()),
            from: NaiveDate::from_ymd_opt(2026, 2, 1),
            ..Default::default()
        };
        let filtered: Vec<Expense> = db.list_records(&filter).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "e2");
    }

    #[test]
    fn test_summary_totals() {
        let db = seeded();
        db.upsert(&expense("e1", "t1", 100.0, "2026-01-05")).unwrap();
        db.upsert(&expense("e2", "t1", 50.0, "2026-01-06")).unwrap();
        db.upsert(&Revenue {
            id: "r1".to_string(),
            truck_id: Some("t1".to_string()),
            driver_id: Some("d1".to_string()),
            amount: 400.0,
            client: "Acme".to_string(),
            description: String::new(),
            date: NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
            created_at: at(1_000),
            updated_at: at(1_000),
        })
        .unwrap();

        let summary = db.summary(&RecordFilter::default()).unwrap();
        assert_eq!(summary.total_revenue, 400.0);
        assert_eq!(summary.total_expenses, 150.0);
        assert_eq!(summary.net, 250.0);
        assert_eq!(summary.ticket_count, 0);
    }

    #[test]
    fn test_user_lookup_by_email_is_case_insensitive() {
        let db = seeded();
        let found = db.find_user_by_email("D1@Fleet.Test").unwrap();
        assert_eq!(found.map(|u| u.id), Some("d1".to_string()));
    }

    #[test]
    fn test_sync_upsert_keeps_password_hash() {
        let db = seeded();
        assert!(db.set_password_hash("d1", "$2b$04$hash").unwrap());

        let mut incoming = user("d1", UserRole::Driver);
        incoming.name = "Renamed".to_string();
        incoming.updated_at = at(9_000);
        db.upsert_if_newer(&incoming).unwrap();

        let stored: User = db.find("d1").unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.password_hash, "$2b$04$hash");
    }

    #[test]
    fn test_notifications_filtering() {
        let db = seeded();
        for (id, user_id, read) in [("n1", "d1", false), ("n2", "d1", true), ("n3", "a1", false)] {
            db.upsert(&Notification {
                id: id.to_string(),
                user_id: Some(user_id.to_string()),
                kind: crate::models::NotificationKind::General,
                title: "t".to_string(),
                message: "m".to_string(),
                read,
                created_at: at(1_000),
                updated_at: at(1_000),
            })
            .unwrap();
        }

        assert_eq!(db.list_notifications(None, false).unwrap().len(), 3);
        assert_eq!(db.list_notifications(Some("d1"), false).unwrap().len(), 2);
        assert_eq!(db.list_notifications(Some("d1"), true).unwrap().len(), 1);
    }
}
