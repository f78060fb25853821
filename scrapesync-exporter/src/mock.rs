//! In-process stand-in for the monitored system's HTTP API.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub enum Reply {
    Body(StatusCode, String),
    Hang,
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Reply::Body(StatusCode::OK, value.to_string())
    }

    /// A targets payload with one active target per `(address, health, duration)`.
    pub fn targets(targets: &[(&str, &str, f64)]) -> Self {
        let active: Vec<Value> = targets
            .iter()
            .map(|(address, health, duration)| {
                json!({
                    "discoveredLabels": {"__address__": address, "job": "mock"},
                    "labels": {"instance": address},
                    "scrapePool": "mock",
                    "health": health,
                    "lastScrapeDuration": duration,
                })
            })
            .collect();
        Reply::json(json!({
            "status": "success",
            "data": {"activeTargets": active, "droppedTargets": []},
        }))
    }

    /// A status/config payload scraping `address` every `interval`.
    pub fn config(address: &str, interval: &str) -> Self {
        let yaml = format!(
            "global:\n  scrape_interval: 1m\nscrape_configs:\n\
             - job_name: prometheus\n  scrape_interval: 5s\n  static_configs:\n  - targets:\n    - localhost:9090\n\
             - job_name: ours\n  scrape_interval: {interval}\n  static_configs:\n  - targets:\n    - {address}\n"
        );
        Reply::json(json!({"status": "success", "data": {"yaml": yaml}}))
    }

    async fn respond(self) -> Response {
        match self {
            Reply::Body(status, body) => {
                (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::GATEWAY_TIMEOUT.into_response()
            }
        }
    }
}

#[derive(Clone)]
struct MockState {
    targets: Arc<Mutex<Reply>>,
    config: Arc<Mutex<Reply>>,
}

pub struct MockPrometheus {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockPrometheus {
    pub async fn start() -> Self {
        let state = MockState {
            targets: Arc::new(Mutex::new(Reply::Body(StatusCode::NOT_FOUND, String::new()))),
            config: Arc::new(Mutex::new(Reply::Body(StatusCode::NOT_FOUND, String::new()))),
        };

        let app = Router::new()
            .route(
                "/api/v1/targets",
                get(|State(s): State<MockState>| async move {
                    let reply = s.targets.lock().unwrap().clone();
                    reply.respond().await
                }),
            )
            .route(
                "/api/v1/status/config",
                get(|State(s): State<MockState>| async move {
                    let reply = s.config.lock().unwrap().clone();
                    reply.respond().await
                }),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn set_targets(&self, reply: Reply) {
        *self.state.targets.lock().unwrap() = reply;
    }

    pub fn set_config(&self, reply: Reply) {
        *self.state.config.lock().unwrap() = reply;
    }
}
