use crate::models::AppState;
use axum::Router;

pub mod analysis_routes;
pub mod appointment_routes;
pub mod collection;
pub mod doctor_routes;
pub mod home_routes;
pub mod product_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(user_routes::router())
        .merge(doctor_routes::router())
        .merge(product_routes::router())
        .merge(appointment_routes::router())
        .merge(analysis_routes::router())
        .merge(home_routes::router());

    Router::new().nest("/api/v1", api).with_state(state)
}
