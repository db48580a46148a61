//! Column mappings for every entity table.

use super::Model;
use crate::auth::models::UserRole;
use crate::models::{
    EntityKind, Expense, ExpenseCategory, MileageLog, Notification, NotificationKind, Revenue,
    Ticket, Truck, TruckStatus, User,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", ms)))
}

fn date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, Type::Text, format!("bad date {:?}: {}", raw, e)))
}

fn opt_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .map(Some)
            .map_err(|e| conversion_error(idx, Type::Text, format!("bad date {:?}: {}", raw, e))),
        None => Ok(None),
    }
}

fn parsed<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, Type::Text, format!("unknown value {:?}", raw)))
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: Option<&String>) -> Value {
    s.map(|v| Value::Text(v.clone())).unwrap_or(Value::Null)
}

fn ms(t: DateTime<Utc>) -> Value {
    Value::Integer(t.timestamp_millis())
}

fn day(d: NaiveDate) -> Value {
    Value::Text(d.format(DATE_FORMAT).to_string())
}

impl Model for Truck {
    const KIND: EntityKind = EntityKind::Truck;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "plate_number",
        "make",
        "model",
        "year",
        "status",
        "driver_id",
        "odometer",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.plate_number),
            text(&self.make),
            text(&self.model),
            self.year.map(|y| Value::Integer(y as i64)).unwrap_or(Value::Null),
            text(self.status.as_str()),
            opt_text(self.driver_id.as_ref()),
            Value::Real(self.odometer),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Truck {
            id: row.get(0)?,
            plate_number: row.get(1)?,
            make: row.get(2)?,
            model: row.get(3)?,
            year: row.get(4)?,
            status: parsed(row, 5, TruckStatus::from_str)?,
            driver_id: row.get(6)?,
            odometer: row.get(7)?,
            created_at: ts(row, 8)?,
            updated_at: ts(row, 9)?,
        })
    }
}

impl Model for User {
    const KIND: EntityKind = EntityKind::User;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "email",
        "phone",
        "role",
        "password_hash",
        "licence_number",
        "licence_expiry",
        "active",
        "created_at",
        "updated_at",
    ];
    // Passwords only change through `set_password_hash`.
    const PRESERVED_ON_CONFLICT: &'static [&'static str] = &["password_hash"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.name),
            text(&self.email),
            opt_text(self.phone.as_ref()),
            text(self.role.as_str()),
            text(&self.password_hash),
            opt_text(self.licence_number.as_ref()),
            self.licence_expiry.map(day).unwrap_or(Value::Null),
            Value::Integer(self.active as i64),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            role: parsed(row, 4, UserRole::from_str)?,
            password_hash: row.get(5)?,
            licence_number: row.get(6)?,
            licence_expiry: opt_date(row, 7)?,
            active: row.get::<_, i64>(8)? != 0,
            created_at: ts(row, 9)?,
            updated_at: ts(row, 10)?,
        })
    }
}

impl Model for Expense {
    const KIND: EntityKind = EntityKind::Expense;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "truck_id",
        "driver_id",
        "category",
        "amount",
        "description",
        "date",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            opt_text(self.truck_id.as_ref()),
            opt_text(self.driver_id.as_ref()),
            text(self.category.as_str()),
            Value::Real(self.amount),
            text(&self.description),
            day(self.date),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Expense {
            id: row.get(0)?,
            truck_id: row.get(1)?,
            driver_id: row.get(2)?,
            category: parsed(row, 3, ExpenseCategory::from_str)?,
            amount: row.get(4)?,
            description: row.get(5)?,
            date: date(row, 6)?,
            created_at: ts(row, 7)?,
            updated_at: ts(row, 8)?,
        })
    }
}

impl Model for Revenue {
    const KIND: EntityKind = EntityKind::Revenue;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "truck_id",
        "driver_id",
        "amount",
        "client",
        "description",
        "date",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            opt_text(self.truck_id.as_ref()),
            opt_text(self.driver_id.as_ref()),
            Value::Real(self.amount),
            text(&self.client),
            text(&self.description),
            day(self.date),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Revenue {
            id: row.get(0)?,
            truck_id: row.get(1)?,
            driver_id: row.get(2)?,
            amount: row.get(3)?,
            client: row.get(4)?,
            description: row.get(5)?,
            date: date(row, 6)?,
            created_at: ts(row, 7)?,
            updated_at: ts(row, 8)?,
        })
    }
}

impl Model for Ticket {
    const KIND: EntityKind = EntityKind::Ticket;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "ticket_number",
        "truck_id",
        "driver_id",
        "gross_weight",
        "tare_weight",
        "net_weight",
        "product",
        "location",
        "date",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            text(&self.ticket_number),
            opt_text(self.truck_id.as_ref()),
            opt_text(self.driver_id.as_ref()),
            Value::Real(self.gross_weight),
            Value::Real(self.tare_weight),
            Value::Real(self.net_weight),
            text(&self.product),
            text(&self.location),
            day(self.date),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Ticket {
            id: row.get(0)?,
            ticket_number: row.get(1)?,
            truck_id: row.get(2)?,
            driver_id: row.get(3)?,
            gross_weight: row.get(4)?,
            tare_weight: row.get(5)?,
            net_weight: row.get(6)?,
            product: row.get(7)?,
            location: row.get(8)?,
            date: date(row, 9)?,
            created_at: ts(row, 10)?,
            updated_at: ts(row, 11)?,
        })
    }
}

impl Model for MileageLog {
    const KIND: EntityKind = EntityKind::Mileage;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "truck_id",
        "driver_id",
        "start_odometer",
        "end_odometer",
        "distance",
        "date",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            opt_text(self.truck_id.as_ref()),
            opt_text(self.driver_id.as_ref()),
            Value::Real(self.start_odometer),
            Value::Real(self.end_odometer),
            Value::Real(self.distance),
            day(self.date),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MileageLog {
            id: row.get(0)?,
            truck_id: row.get(1)?,
            driver_id: row.get(2)?,
            start_odometer: row.get(3)?,
            end_odometer: row.get(4)?,
            distance: row.get(5)?,
            date: date(row, 6)?,
            created_at: ts(row, 7)?,
            updated_at: ts(row, 8)?,
        })
    }
}

impl Model for Notification {
    const KIND: EntityKind = EntityKind::Notification;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "kind",
        "title",
        "message",
        "read",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            text(&self.id),
            opt_text(self.user_id.as_ref()),
            text(self.kind.as_str()),
            text(&self.title),
            text(&self.message),
            Value::Integer(self.read as i64),
            ms(self.created_at),
            ms(self.updated_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: parsed(row, 2, NotificationKind::from_str)?,
            title: row.get(3)?,
            message: row.get(4)?,
            read: row.get::<_, i64>(5)? != 0,
            created_at: ts(row, 6)?,
            updated_at: ts(row, 7)?,
        })
    }
}
