//! Fleet domain models
//!
//! Normalized rows shared by the relational store, the realtime mirror and
//! the REST API. Wire format is camelCase with epoch-millisecond timestamps.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use crate::auth::models::UserRole;

/// Every synchronized entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Truck,
    User,
    Expense,
    Revenue,
    Ticket,
    Mileage,
    Notification,
}

impl EntityKind {
    /// Users first so that reconciliation lands drivers before the rows
    /// that reference them.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::User,
        EntityKind::Truck,
        EntityKind::Expense,
        EntityKind::Revenue,
        EntityKind::Ticket,
        EntityKind::Mileage,
        EntityKind::Notification,
    ];

    /// Collection path in the realtime store.
    pub fn path(&self) -> &'static str {
        match self {
            EntityKind::Truck => "trucks",
            EntityKind::User => "users",
            EntityKind::Expense => "expenses",
            EntityKind::Revenue => "revenues",
            EntityKind::Ticket => "tickets",
            EntityKind::Mileage => "mileage",
            EntityKind::Notification => "notifications",
        }
    }

    /// Relational table name.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Truck => "trucks",
            EntityKind::User => "users",
            EntityKind::Expense => "expenses",
            EntityKind::Revenue => "revenues",
            EntityKind::Ticket => "tickets",
            EntityKind::Mileage => "mileage_logs",
            EntityKind::Notification => "notifications",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Truck => "truck",
            EntityKind::User => "user",
            EntityKind::Expense => "expense",
            EntityKind::Revenue => "revenue",
            EntityKind::Ticket => "ticket",
            EntityKind::Mileage => "mileage",
            EntityKind::Notification => "notification",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TruckStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "maintenance")]
    Maintenance,
    #[serde(rename = "inactive")]
    Inactive,
}

impl TruckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TruckStatus::Active => "active",
            TruckStatus::Maintenance => "maintenance",
            TruckStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(TruckStatus::Active),
            "maintenance" => Some(TruckStatus::Maintenance),
            "inactive" => Some(TruckStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Fuel,
    Maintenance,
    Repair,
    Toll,
    Insurance,
    Salary,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Fuel => "fuel",
            ExpenseCategory::Maintenance => "maintenance",
            ExpenseCategory::Repair => "repair",
            ExpenseCategory::Toll => "toll",
            ExpenseCategory::Insurance => "insurance",
            ExpenseCategory::Salary => "salary",
            ExpenseCategory::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fuel" => Some(ExpenseCategory::Fuel),
            "maintenance" => Some(ExpenseCategory::Maintenance),
            "repair" => Some(ExpenseCategory::Repair),
            "toll" => Some(ExpenseCategory::Toll),
            "insurance" => Some(ExpenseCategory::Insurance),
            "salary" => Some(ExpenseCategory::Salary),
            "other" => Some(ExpenseCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LicenceExpiring,
    LicenceExpired,
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::LicenceExpiring => "licence_expiring",
            NotificationKind::LicenceExpired => "licence_expired",
            NotificationKind::General => "general",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "licence_expiring" | "license_expiring" => Some(NotificationKind::LicenceExpiring),
            "licence_expired" | "license_expired" => Some(NotificationKind::LicenceExpired),
            "general" => Some(NotificationKind::General),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Truck {
    pub id: String,
    pub plate_number: String,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub status: TruckStatus,
    pub driver_id: Option<String>,
    pub odometer: f64,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Drivers and admins share one table; the role decides API access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: UserRole,
    #[serde(skip_serializing, default)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub licence_number: Option<String>,
    pub licence_expiry: Option<NaiveDate>,
    pub active: bool,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub category: ExpenseCategory,
    pub amount: f64,
    pub description: String,
    pub date: NaiveDate,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revenue {
    pub id: String,
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub amount: f64,
    pub client: String,
    pub description: String,
    pub date: NaiveDate,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Weighbridge ticket. Weights are in kilograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub ticket_number: String,
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub gross_weight: f64,
    pub tare_weight: f64,
    pub net_weight: f64,
    pub product: String,
    pub location: String,
    pub date: NaiveDate,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileageLog {
    pub id: String,
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub start_odometer: f64,
    pub end_odometer: f64,
    pub distance: f64,
    pub date: NaiveDate,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Aggregates returned by the summary report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub net: f64,
    pub distance: f64,
    pub ticket_count: i64,
    pub net_weight: f64,
}

/// Current time truncated to millisecond precision, matching what the
/// stores persist.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
