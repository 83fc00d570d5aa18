use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::model::{LevelAverageRecord, SensorReadingRecord};
use crate::web::error::ApiError;
use crate::web::query::{parse_level_query, SelectorParam};
use crate::web::AppState;

type Params = Query<Vec<(String, String)>>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readings/avg/latest/by-silo-id", get(avg_by_silo_id))
        .route("/readings/avg/latest/by-silo-number", get(avg_by_silo_number))
        .route("/readings/avg/latest/by-silo-group-id", get(avg_by_silo_group_id))
        .route("/readings/latest/by-silo-id", get(latest_by_silo_id))
        .route("/readings/latest/by-silo-number", get(latest_by_silo_number))
        .route("/readings/latest/by-silo-group-id", get(latest_by_silo_group_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn level_averages(
    state: &AppState,
    params: &[(String, String)],
    selector: SelectorParam,
) -> Result<Json<Vec<LevelAverageRecord>>, ApiError> {
    let query = parse_level_query(params, selector)?;
    Ok(Json(state.engine.level_averages(&query).await?))
}

async fn sensor_readings(
    state: &AppState,
    params: &[(String, String)],
    selector: SelectorParam,
) -> Result<Json<Vec<SensorReadingRecord>>, ApiError> {
    let query = parse_level_query(params, selector)?;
    Ok(Json(state.engine.latest_sensor_readings(&query).await?))
}

async fn avg_by_silo_id(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<LevelAverageRecord>>, ApiError> {
    level_averages(&state, &params, SelectorParam::SiloId).await
}

async fn avg_by_silo_number(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<LevelAverageRecord>>, ApiError> {
    level_averages(&state, &params, SelectorParam::SiloNumber).await
}

async fn avg_by_silo_group_id(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<LevelAverageRecord>>, ApiError> {
    level_averages(&state, &params, SelectorParam::SiloGroupId).await
}

async fn latest_by_silo_id(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<SensorReadingRecord>>, ApiError> {
    sensor_readings(&state, &params, SelectorParam::SiloId).await
}

async fn latest_by_silo_number(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<SensorReadingRecord>>, ApiError> {
    sensor_readings(&state, &params, SelectorParam::SiloNumber).await
}

async fn latest_by_silo_group_id(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<SensorReadingRecord>>, ApiError> {
    sensor_readings(&state, &params, SelectorParam::SiloGroupId).await
}
