use axum::{routing::get, Json, Router};
use serde::Serialize;

pub const ALIVE_STATUS: &str = "Bot is alive and listening!";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn root() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: ALIVE_STATUS,
    })
}

/// Liveness check for the hosting platform. Independent of the gateway
/// connection's state.
pub fn router() -> Router {
    Router::new().route("/", get(root))
}
