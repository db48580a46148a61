//! Record mapper
//!
//! Turns loosely-typed records from the realtime store into normalized rows.
//! Records written by older clients use snake_case keys, numeric strings,
//! second-resolution timestamps or omit fields entirely; every field that has
//! to be defaulted is logged and reported back to the caller.

use crate::db::Model;
use crate::models::{
    EntityKind, Expense, ExpenseCategory, MileageLog, Notification, NotificationKind, Revenue,
    Ticket, Truck, TruckStatus, User, UserRole,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::warn;

/// Epoch values below this are seconds rather than milliseconds.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// One defaulted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub field: &'static str,
    pub reason: String,
}

/// A normalized row plus the substitutions made to build it.
#[derive(Debug, Clone)]
pub struct Mapped<M> {
    pub row: M,
    pub substitutions: Vec<Substitution>,
}

/// A record that cannot be turned into a row at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    EmptyKey,
    NotAnObject { found: &'static str },
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::EmptyKey => write!(f, "record has an empty key"),
            MapError::NotAnObject { found } => write!(f, "expected an object, found {}", found),
        }
    }
}

impl std::error::Error for MapError {}

/// Rows that can be built from a realtime record.
pub trait FromRecord: Model + Sized {
    fn from_record(key: &str, value: &Value) -> Result<Mapped<Self>, MapError>;
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `plateNumber` -> `plate_number`
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw.unsigned_abs() < SECONDS_CUTOFF.unsigned_abs() {
        DateTime::<Utc>::from_timestamp(raw, 0)
    } else {
        DateTime::<Utc>::from_timestamp_millis(raw)
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => epoch(n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(raw) = s.parse::<i64>() {
                return epoch(raw);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    if let Value::String(s) = value {
        if let Ok(d) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            return Some(d);
        }
    }
    parse_timestamp(value).map(|ts| ts.date_naive())
}

/// Field accessor that records every default it has to apply.
struct RecordReader<'a> {
    kind: EntityKind,
    key: &'a str,
    fields: &'a Map<String, Value>,
    substitutions: Vec<Substitution>,
}

impl<'a> RecordReader<'a> {
    fn new(kind: EntityKind, key: &'a str, value: &'a Value) -> Result<Self, MapError> {
        if key.trim().is_empty() {
            return Err(MapError::EmptyKey);
        }
        let fields = value.as_object().ok_or(MapError::NotAnObject {
            found: json_type(value),
        })?;
        Ok(Self {
            kind,
            key,
            fields,
            substitutions: Vec::new(),
        })
    }

    /// Field by camelCase name, then snake_case. `null` counts as absent.
    fn lookup(&self, field: &str) -> Option<&'a Value> {
        self.fields
            .get(field)
            .or_else(|| self.fields.get(&snake_case(field)))
            .filter(|v| !v.is_null())
    }

    fn substitute(&mut self, field: &'static str, reason: String) {
        warn!(
            entity = %self.kind,
            key = self.key,
            field,
            reason = %reason,
            "substituted default for record field"
        );
        self.substitutions.push(Substitution { field, reason });
    }

    /// Read an optional field; a present but unparseable value is logged.
    fn optional<T>(&mut self, field: &'static str, parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
        let raw = self.lookup(field)?;
        match parse(raw) {
            Some(v) => Some(v),
            None => {
                self.substitute(field, format!("invalid {} value {}, using none", json_type(raw), raw));
                None
            }
        }
    }

    /// Read a required field, substituting `default` when missing or invalid.
    fn required<T: std::fmt::Debug>(
        &mut self,
        field: &'static str,
        parse: impl Fn(&Value) -> Option<T>,
        default: T,
    ) -> T {
        match self.lookup(field) {
            None => {
                self.substitute(field, format!("missing, using {:?}", default));
                default
            }
            Some(raw) => match parse(raw) {
                Some(v) => v,
                None => {
                    self.substitute(field, format!("invalid value {}, using {:?}", raw, default));
                    default
                }
            },
        }
    }

    fn string(&mut self, field: &'static str, default: &str) -> String {
        self.required(field, as_text, default.to_string())
    }

    /// Free text that is legitimately blank; absence is not worth a warning.
    fn text_or_empty(&mut self, field: &'static str) -> String {
        self.optional(field, |v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            other => as_text(other),
        })
        .unwrap_or_default()
    }

    fn opt_string(&mut self, field: &'static str) -> Option<String> {
        match self.lookup(field) {
            // Blank optional strings are simply absent.
            Some(Value::String(s)) if s.trim().is_empty() => None,
            _ => self.optional(field, as_text),
        }
    }

    /// Non-negative quantity, defaulting to zero.
    fn amount(&mut self, field: &'static str) -> f64 {
        self.required(field, |v| as_number(v).filter(|n| *n >= 0.0), 0.0)
    }

    fn opt_amount(&mut self, field: &'static str) -> Option<f64> {
        self.optional(field, |v| as_number(v).filter(|n| *n >= 0.0))
    }

    fn opt_i32(&mut self, field: &'static str) -> Option<i32> {
        self.optional(field, |v| {
            as_number(v)
                .filter(|n| n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64)
                .map(|n| n as i32)
        })
    }

    fn bool(&mut self, field: &'static str, default: bool) -> bool {
        self.required(field, as_bool, default)
    }

    fn one_of<T: std::fmt::Debug>(
        &mut self,
        field: &'static str,
        parse: fn(&str) -> Option<T>,
        default: T,
    ) -> T {
        self.required(field, |v| v.as_str().and_then(parse), default)
    }

    fn opt_date(&mut self, field: &'static str) -> Option<NaiveDate> {
        self.optional(field, parse_date)
    }

    fn date(&mut self, field: &'static str, fallback: NaiveDate) -> NaiveDate {
        self.required(field, parse_date, fallback)
    }

    /// `(created_at, updated_at)`. A record without `updatedAt` gets the
    /// epoch, so it can be inserted but never overwrites a stored row.
    fn stamps(&mut self) -> (DateTime<Utc>, DateTime<Utc>) {
        let updated = self.required("updatedAt", parse_timestamp, DateTime::<Utc>::UNIX_EPOCH);
        let created = self.required("createdAt", parse_timestamp, updated);
        (created, updated)
    }

    /// Clamp a derived quantity to zero, logging when it was negative.
    fn clamp_derived(&mut self, field: &'static str, value: f64) -> f64 {
        if value < 0.0 {
            self.substitute(field, format!("derived value {} is negative, using 0", value));
            0.0
        } else {
            value
        }
    }

    fn finish<M>(self, row: M) -> Mapped<M> {
        Mapped {
            row,
            substitutions: self.substitutions,
        }
    }
}

pub fn map_truck(key: &str, value: &Value) -> Result<Mapped<Truck>, MapError> {
    let mut r = RecordReader::new(EntityKind::Truck, key, value)?;
    let (created_at, updated_at) = r.stamps();

    let row = Truck {
        id: key.to_string(),
        plate_number: r.string("plateNumber", "UNKNOWN"),
        make: r.string("make", "Unknown"),
        model: r.string("model", "Unknown"),
        year: r.opt_i32("year"),
        status: r.one_of("status", TruckStatus::from_str, TruckStatus::Active),
        driver_id: r.opt_string("driverId"),
        odometer: r.amount("odometer"),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

/// The password hash never travels through the realtime store; synced rows
/// carry an empty hash and the upsert keeps any local one.
pub fn map_user(key: &str, value: &Value) -> Result<Mapped<User>, MapError> {
    let mut r = RecordReader::new(EntityKind::User, key, value)?;
    let (created_at, updated_at) = r.stamps();
    let placeholder_email = format!("{}@unknown.invalid", key.trim());

    let row = User {
        id: key.to_string(),
        name: r.string("name", "Unknown"),
        email: r.string("email", &placeholder_email).to_lowercase(),
        phone: r.opt_string("phone"),
        role: r.one_of("role", UserRole::from_str, UserRole::Driver),
        password_hash: String::new(),
        licence_number: r.opt_string("licenceNumber"),
        licence_expiry: r.opt_date("licenceExpiry"),
        active: r.bool("active", true),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

pub fn map_expense(key: &str, value: &Value) -> Result<Mapped<Expense>, MapError> {
    let mut r = RecordReader::new(EntityKind::Expense, key, value)?;
    let (created_at, updated_at) = r.stamps();

    let row = Expense {
        id: key.to_string(),
        truck_id: r.opt_string("truckId"),
        driver_id: r.opt_string("driverId"),
        category: r.one_of("category", ExpenseCategory::from_str, ExpenseCategory::Other),
        amount: r.amount("amount"),
        description: r.text_or_empty("description"),
        date: r.date("date", updated_at.date_naive()),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

pub fn map_revenue(key: &str, value: &Value) -> Result<Mapped<Revenue>, MapError> {
    let mut r = RecordReader::new(EntityKind::Revenue, key, value)?;
    let (created_at, updated_at) = r.stamps();

    let row = Revenue {
        id: key.to_string(),
        truck_id: r.opt_string("truckId"),
        driver_id: r.opt_string("driverId"),
        amount: r.amount("amount"),
        client: r.text_or_empty("client"),
        description: r.text_or_empty("description"),
        date: r.date("date", updated_at.date_naive()),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

pub fn map_ticket(key: &str, value: &Value) -> Result<Mapped<Ticket>, MapError> {
    let mut r = RecordReader::new(EntityKind::Ticket, key, value)?;
    let (created_at, updated_at) = r.stamps();

    let gross_weight = r.amount("grossWeight");
    let tare_weight = r.amount("tareWeight");
    let net_weight = match r.opt_amount("netWeight") {
        Some(net) => net,
        None => r.clamp_derived("netWeight", gross_weight - tare_weight),
    };

    let row = Ticket {
        id: key.to_string(),
        ticket_number: r.string("ticketNumber", key),
        truck_id: r.opt_string("truckId"),
        driver_id: r.opt_string("driverId"),
        gross_weight,
        tare_weight,
        net_weight,
        product: r.text_or_empty("product"),
        location: r.text_or_empty("location"),
        date: r.date("date", updated_at.date_naive()),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

pub fn map_mileage(key: &str, value: &Value) -> Result<Mapped<MileageLog>, MapError> {
    let mut r = RecordReader::new(EntityKind::Mileage, key, value)?;
    let (created_at, updated_at) = r.stamps();

    let start_odometer = r.amount("startOdometer");
    let end_odometer = r.amount("endOdometer");
    let distance = match r.opt_amount("distance") {
        Some(d) => d,
        None => r.clamp_derived("distance", end_odometer - start_odometer),
    };

    let row = MileageLog {
        id: key.to_string(),
        truck_id: r.opt_string("truckId"),
        driver_id: r.opt_string("driverId"),
        start_odometer,
        end_odometer,
        distance,
        date: r.date("date", updated_at.date_naive()),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

pub fn map_notification(key: &str, value: &Value) -> Result<Mapped<Notification>, MapError> {
    let mut r = RecordReader::new(EntityKind::Notification, key, value)?;
    let (created_at, updated_at) = r.stamps();

    let row = Notification {
        id: key.to_string(),
        user_id: r.opt_string("userId"),
        kind: r.one_of("kind", NotificationKind::from_str, NotificationKind::General),
        title: r.string("title", "Notification"),
        message: r.text_or_empty("message"),
        read: r.bool("read", false),
        created_at,
        updated_at,
    };
    Ok(r.finish(row))
}

macro_rules! from_record {
    ($($ty:ty => $map:ident),* $(,)?) => {
        $(
            impl FromRecord for $ty {
                fn from_record(key: &str, value: &Value) -> Result<Mapped<Self>, MapError> {
                    $map(key, value)
                }
            }
        )*
    };
}

from_record! {
    Truck => map_truck,
    User => map_user,
    Expense => map_expense,
    Revenue => map_revenue,
    Ticket => map_ticket,
    MileageLog => map_mileage,
    Notification => map_notification,
}
