//! Dated record endpoints: expenses, revenues, tickets and mileage logs
//!
//! All four share one set of generic handlers. Drivers only see and write
//! their own records; the driver id of anything they submit is forced to
//! the caller.

use super::{ApiError, AppState};
use crate::auth::Claims;
use crate::db::{DatedRecord, RecordFilter};
use crate::models::{
    now_millis, Expense, ExpenseCategory, MileageLog, Revenue, Ticket,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// A dated record exposed as a REST collection.
pub trait RecordResource: DatedRecord + Serialize + Clone + Send + Sync + 'static {
    type Payload: DeserializeOwned + Send + 'static;

    /// Singular name used in error messages.
    const NAME: &'static str;
    /// Only admins may create, update or delete.
    const ADMIN_WRITE: bool = false;

    /// Validate a payload and build the row.
    fn build(
        id: String,
        payload: Self::Payload,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ApiError>;

    fn driver_id(&self) -> Option<&str>;
    fn set_driver_id(&mut self, driver_id: String);
}

fn non_negative(field: &str, value: f64) -> Result<f64, ApiError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(format!("{} must be >= 0", field)))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePayload {
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub category: ExpenseCategory,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
}

impl RecordResource for Expense {
    type Payload = ExpensePayload;
    const NAME: &'static str = "Expense";

    fn build(
        id: String,
        p: ExpensePayload,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        Ok(Expense {
            id,
            truck_id: trimmed(p.truck_id),
            driver_id: trimmed(p.driver_id),
            category: p.category,
            amount: non_negative("amount", p.amount)?,
            description: p.description.trim().to_string(),
            date: p.date,
            created_at,
            updated_at,
        })
    }

    fn driver_id(&self) -> Option<&str> {
        self.driver_id.as_deref()
    }

    fn set_driver_id(&mut self, driver_id: String) {
        self.driver_id = Some(driver_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePayload {
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
}

impl RecordResource for Revenue {
    type Payload = RevenuePayload;
    const NAME: &'static str = "Revenue";
    const ADMIN_WRITE: bool = true;

    fn build(
        id: String,
        p: RevenuePayload,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        Ok(Revenue {
            id,
            truck_id: trimmed(p.truck_id),
            driver_id: trimmed(p.driver_id),
            amount: non_negative("amount", p.amount)?,
            client: p.client.trim().to_string(),
            description: p.description.trim().to_string(),
            date: p.date,
            created_at,
            updated_at,
        })
    }

    fn driver_id(&self) -> Option<&str> {
        self.driver_id.as_deref()
    }

    fn set_driver_id(&mut self, driver_id: String) {
        self.driver_id = Some(driver_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub ticket_number: String,
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub gross_weight: f64,
    pub tare_weight: f64,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub location: String,
    pub date: NaiveDate,
}

impl RecordResource for Ticket {
    type Payload = TicketPayload;
    const NAME: &'static str = "Ticket";

    fn build(
        id: String,
        p: TicketPayload,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        if p.ticket_number.trim().is_empty() {
            return Err(ApiError::BadRequest("ticketNumber is required".to_string()));
        }
        let gross_weight = non_negative("grossWeight", p.gross_weight)?;
        let tare_weight = non_negative("tareWeight", p.tare_weight)?;
        if tare_weight > gross_weight {
            return Err(ApiError::BadRequest(
                "tareWeight cannot exceed grossWeight".to_string(),
            ));
        }

        Ok(Ticket {
            id,
            ticket_number: p.ticket_number.trim().to_string(),
            truck_id: trimmed(p.truck_id),
            driver_id: trimmed(p.driver_id),
            gross_weight,
            tare_weight,
            net_weight: gross_weight - tare_weight,
            product: p.product.trim().to_string(),
            location: p.location.trim().to_string(),
            date: p.date,
            created_at,
            updated_at,
        })
    }

    fn driver_id(&self) -> Option<&str> {
        self.driver_id.as_deref()
    }

    fn set_driver_id(&mut self, driver_id: String) {
        self.driver_id = Some(driver_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileagePayload {
    pub truck_id: Option<String>,
    pub driver_id: Option<String>,
    pub start_odometer: f64,
    pub end_odometer: f64,
    pub date: NaiveDate,
}

impl RecordResource for MileageLog {
    type Payload = MileagePayload;
    const NAME: &'static str = "Mileage log";

    fn build(
        id: String,
        p: MileagePayload,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        let start_odometer = non_negative("startOdometer", p.start_odometer)?;
        let end_odometer = non_negative("endOdometer", p.end_odometer)?;
        if end_odometer < start_odometer {
            return Err(ApiError::BadRequest(
                "endOdometer cannot be less than startOdometer".to_string(),
            ));
        }

        Ok(MileageLog {
            id,
            truck_id: trimmed(p.truck_id),
            driver_id: trimmed(p.driver_id),
            start_odometer,
            end_odometer,
            distance: end_odometer - start_odometer,
            date: p.date,
            created_at,
            updated_at,
        })
    }

    fn driver_id(&self) -> Option<&str> {
        self.driver_id.as_deref()
    }

    fn set_driver_id(&mut self, driver_id: String) {
        self.driver_id = Some(driver_id);
    }
}

/// Routes for one collection: `{base}` and `{base}/:id`.
pub fn router<R: RecordResource>(base: &str) -> Router<AppState> {
    Router::new()
        .route(base, get(list::<R>).post(create::<R>))
        .route(
            &format!("{}/:id", base),
            get(fetch::<R>).put(update::<R>).delete(remove::<R>),
        )
}

fn check_write<R: RecordResource>(claims: &Claims) -> Result<(), ApiError> {
    if R::ADMIN_WRITE && !claims.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Load a row the caller may see. Other drivers' rows are reported as
/// missing.
fn load_visible<R: RecordResource>(
    state: &AppState,
    claims: &Claims,
    id: &str,
) -> Result<R, ApiError> {
    let row = state
        .db
        .find::<R>(id)?
        .ok_or(ApiError::NotFound(R::NAME))?;
    if !claims.is_admin() && row.driver_id() != Some(claims.sub.as_str()) {
        return Err(ApiError::NotFound(R::NAME));
    }
    Ok(row)
}

pub async fn list<R: RecordResource>(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    filter: Result<Query<RecordFilter>, QueryRejection>,
) -> Result<Json<Vec<R>>, ApiError> {
    let Query(mut filter) = filter?;
    if !claims.is_admin() {
        filter.driver_id = Some(claims.sub.clone());
    }
    Ok(Json(state.db.list_records::<R>(&filter)?))
}

pub async fn fetch<R: RecordResource>(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<R>, ApiError> {
    Ok(Json(load_visible::<R>(&state, &claims, &id)?))
}

pub async fn create<R: RecordResource>(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<R::Payload>, JsonRejection>,
) -> Result<(StatusCode, Json<R>), ApiError> {
    check_write::<R>(&claims)?;
    let Json(payload) = payload?;

    let now = now_millis();
    let mut row = R::build(Uuid::new_v4().to_string(), payload, now, now)?;
    if !claims.is_admin() {
        row.set_driver_id(claims.sub.clone());
    }

    state.db.upsert(&row)?;
    state.sync.publish(&row).await;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update<R: RecordResource>(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    payload: Result<Json<R::Payload>, JsonRejection>,
) -> Result<Json<R>, ApiError> {
    check_write::<R>(&claims)?;
    let Json(payload) = payload?;
    let existing = load_visible::<R>(&state, &claims, &id)?;

    let mut row = R::build(id, payload, existing.created_at(), now_millis())?;
    if !claims.is_admin() {
        row.set_driver_id(claims.sub.clone());
    }

    state.db.upsert(&row)?;
    state.sync.publish(&row).await;
    Ok(Json(row))
}

pub async fn remove<R: RecordResource>(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_write::<R>(&claims)?;
    load_visible::<R>(&state, &claims, &id)?;

    state.db.destroy::<R>(&id)?;
    state.sync.retract::<R>(&id).await;
    Ok(StatusCode::NO_CONTENT)
}
