//! Prometheus-kompatible Metriken fuer Parley
//!
//! Registrierte Metriken:
//! - `parley_connected_clients` – Gauge: identifizierte Verbindungen
//! - `parley_voice_channels_active` – Gauge: Voice-Channels mit Mitgliedern
//! - `parley_signals_routed_total` – Counter: zugestellte Signale (kind)
//! - `parley_signals_dropped_total` – Counter: verworfene Signale (reason)
//! - `parley_channel_joins_total` – Counter: Channel-Beitritte
//! - `parley_channel_leaves_total` – Counter: Channel-Austritte

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Parley-Prometheus-Metriken
///
/// Clone teilt dieselbe Registry; der Coordinator und der `/metrics`-Handler
/// halten jeweils eine Kopie.
#[derive(Clone)]
pub struct ParleyMetrics {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub voice_channels_active: IntGauge,
    pub signals_routed_total: IntCounterVec,
    pub signals_dropped_total: IntCounterVec,
    pub channel_joins_total: IntCounter,
    pub channel_leaves_total: IntCounter,
}

impl ParleyMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "parley_connected_clients",
            "Anzahl identifizierter Client-Verbindungen",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let voice_channels_active = IntGauge::with_opts(Opts::new(
            "parley_voice_channels_active",
            "Anzahl Voice-Channels mit mindestens einem Mitglied",
        ))?;
        registry.register(Box::new(voice_channels_active.clone()))?;

        let signals_routed_total = IntCounterVec::new(
            Opts::new(
                "parley_signals_routed_total",
                "Zugestellte Peer-Signale nach Art",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(signals_routed_total.clone()))?;

        let signals_dropped_total = IntCounterVec::new(
            Opts::new(
                "parley_signals_dropped_total",
                "Verworfene Peer-Signale nach Grund",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(signals_dropped_total.clone()))?;

        let channel_joins_total = IntCounter::with_opts(Opts::new(
            "parley_channel_joins_total",
            "Beitritte zu Voice-Channels",
        ))?;
        registry.register(Box::new(channel_joins_total.clone()))?;

        let channel_leaves_total = IntCounter::with_opts(Opts::new(
            "parley_channel_leaves_total",
            "Austritte aus Voice-Channels (inkl. Verbindungsabbruch)",
        ))?;
        registry.register(Box::new(channel_leaves_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            voice_channels_active,
            signals_routed_total,
            signals_dropped_total,
            channel_joins_total,
            channel_leaves_total,
        })
    }

    /// Zaehlt ein zugestelltes Signal
    pub fn signal_weitergeleitet(&self, art: &str) {
        self.signals_routed_total.with_label_values(&[art]).inc();
    }

    /// Zaehlt ein verworfenes Signal
    pub fn signal_verworfen(&self, grund: &str) {
        self.signals_dropped_total.with_label_values(&[grund]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: ParleyMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<ParleyMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
