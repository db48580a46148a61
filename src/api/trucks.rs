//! Truck endpoints

use super::{require_admin, ApiError, AppState};
use crate::auth::Claims;
use crate::models::{now_millis, Truck, TruckStatus, User};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruckPayload {
    pub plate_number: String,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub status: Option<TruckStatus>,
    pub driver_id: Option<String>,
    pub odometer: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub driver_id: String,
}

impl TruckPayload {
    fn validate(&self, state: &AppState) -> Result<(), ApiError> {
        for (field, value) in [
            ("plateNumber", &self.plate_number),
            ("make", &self.make),
            ("model", &self.model),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::BadRequest(format!("{} is required", field)));
            }
        }
        if let Some(odometer) = self.odometer {
            if !odometer.is_finite() || odometer < 0.0 {
                return Err(ApiError::BadRequest("odometer must be >= 0".to_string()));
            }
        }
        if let Some(driver_id) = &self.driver_id {
            match state.db.find::<User>(driver_id)? {
                Some(user) if !user.is_admin() => {}
                Some(_) => return Err(ApiError::BadRequest("User is not a driver".to_string())),
                None => return Err(ApiError::BadRequest("Driver not found".to_string())),
            }
        }
        Ok(())
    }
}

/// GET /api/trucks
pub async fn list_trucks(State(state): State<AppState>) -> Result<Json<Vec<Truck>>, ApiError> {
    Ok(Json(state.db.list::<Truck>()?))
}

/// GET /api/trucks/:id
pub async fn get_truck(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Truck>, ApiError> {
    let truck = state.db.find::<Truck>(&id)?.ok_or(ApiError::NotFound("Truck"))?;
    Ok(Json(truck))
}

/// POST /api/trucks (admin)
pub async fn create_truck(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<TruckPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Truck>), ApiError> {
    require_admin(&claims)?;
    let Json(payload) = payload?;
    payload.validate(&state)?;

    let now = now_millis();
    let truck = Truck {
        id: Uuid::new_v4().to_string(),
        plate_number: payload.plate_number.trim().to_string(),
        make: payload.make.trim().to_string(),
        model: payload.model.trim().to_string(),
        year: payload.year,
        status: payload.status.unwrap_or(TruckStatus::Active),
        driver_id: payload.driver_id,
        odometer: payload.odometer.unwrap_or(0.0),
        created_at: now,
        updated_at: now,
    };
    state.db.upsert(&truck)?;
    state.sync.publish(&truck).await;

    info!("🚚 Truck created: {} ({})", truck.plate_number, truck.id);
    Ok((StatusCode::CREATED, Json(truck)))
}

/// PUT /api/trucks/:id (admin)
pub async fn update_truck(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    payload: Result<Json<TruckPayload>, JsonRejection>,
) -> Result<Json<Truck>, ApiError> {
    require_admin(&claims)?;
    let Json(payload) = payload?;
    let existing = state.db.find::<Truck>(&id)?.ok_or(ApiError::NotFound("Truck"))?;
    payload.validate(&state)?;

    let truck = Truck {
        plate_number: payload.plate_number.trim().to_string(),
        make: payload.make.trim().to_string(),
        model: payload.model.trim().to_string(),
        year: payload.year,
        status: payload.status.unwrap_or(existing.status),
        driver_id: payload.driver_id,
        odometer: payload.odometer.unwrap_or(existing.odometer),
        updated_at: now_millis(),
        ..existing
    };
    state.db.upsert(&truck)?;
    state.sync.publish(&truck).await;
    Ok(Json(truck))
}

/// DELETE /api/trucks/:id (admin)
pub async fn delete_truck(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&claims)?;
    if !state.db.destroy::<Truck>(&id)? {
        return Err(ApiError::NotFound("Truck"));
    }
    state.sync.retract::<Truck>(&id).await;

    info!("🗑️  Truck deleted: {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/trucks/:id/assign (admin)
///
/// Returns every truck whose assignment changed.
pub async fn assign_truck(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<Vec<Truck>>, ApiError> {
    require_admin(&claims)?;
    let Json(payload) = payload?;

    let changed = state.db.assign_truck(&id, &payload.driver_id, now_millis())?;
    for truck in &changed {
        state.sync.publish(truck).await;
    }
    Ok(Json(changed))
}

/// POST /api/trucks/:id/unassign (admin)
pub async fn unassign_truck(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Truck>, ApiError> {
    require_admin(&claims)?;
    let truck = state
        .db
        .unassign_truck(&id, now_millis())?
        .ok_or(ApiError::NotFound("Truck"))?;
    state.sync.publish(&truck).await;
    Ok(Json(truck))
}
