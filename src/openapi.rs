use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::{equipment_data, health};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Equipment utilization API",
        description = "Equipment up/down time reconciled against operating schedules"
    ),
    paths(health::healthz_handler, equipment_data::equipment_data),
    components(schemas(
        health::HealthResponse,
        equipment_data::EquipmentDataResponse,
        equipment_data::EquipmentDataPoint,
        equipment_data::ScheduleDescriptor
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "equipment", description = "Utilization statistics")
    )
)]
struct ApiDoc;

pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
