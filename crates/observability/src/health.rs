//! Health-Check-Endpunkt fuer Parley
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Coordinator-Status

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub coordinator_running: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    coordinator_running: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            coordinator_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn coordinator_laeuft(&self) -> bool {
        self.coordinator_running.load(Ordering::Relaxed)
    }

    /// Wird vom Server gesetzt sobald der TCP-Listener gebunden ist
    pub fn coordinator_status_setzen(&self, laeuft: bool) {
        self.coordinator_running.store(laeuft, Ordering::Relaxed);
    }

    fn antwort(&self) -> HealthResponse {
        let coordinator_running = self.coordinator_laeuft();
        HealthResponse {
            status: if coordinator_running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            coordinator_running,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health`
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frischer_zustand_ist_unhealthy() {
        let state = HealthState::neu();
        assert!(!state.coordinator_laeuft());
        assert_eq!(state.antwort().status, HealthStatus::Unhealthy);
        assert!(state.uptime_seconds() < 5);
    }

    #[test]
    fn coordinator_status_umschalten() {
        let state = HealthState::neu();
        let kopie = state.clone();
        state.coordinator_status_setzen(true);
        assert!(kopie.coordinator_laeuft());
        assert_eq!(kopie.antwort().status, HealthStatus::Healthy);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            coordinator_running: true,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"coordinator_running\":true"));
    }
}
