//! Reporting endpoints

use super::{ApiError, AppState};
use crate::auth::Claims;
use crate::db::RecordFilter;
use crate::models::FleetSummary;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Extension, Json,
};

/// GET /api/reports/summary?truckId&from&to
///
/// Drivers get totals over their own records only.
pub async fn summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    filter: Result<Query<RecordFilter>, QueryRejection>,
) -> Result<Json<FleetSummary>, ApiError> {
    let Query(mut filter) = filter?;
    if !claims.is_admin() {
        filter.driver_id = Some(claims.sub.clone());
    }
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(ApiError::BadRequest("from must not be after to".to_string()));
        }
    }
    Ok(Json(state.db.summary(&filter)?))
}
