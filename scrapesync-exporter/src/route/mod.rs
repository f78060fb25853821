mod metrics;

use axum::Json;
use serde_json::{Value, json};

pub use metrics::metrics;

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
