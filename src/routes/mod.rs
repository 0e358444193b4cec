pub mod equipment_data;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(equipment_data::router())
        .merge(crate::openapi::router())
        .with_state(state)
}
