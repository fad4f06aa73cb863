//! Prometheus metrics for the Dell CSI operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `dell_csi_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `dell_csi_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `dell_csi_resource_state` (gauge): lifecycle state of each custom resource, labeled by
//!   kind/namespace/name. Values: 0 none, 1 Updating, 2 Succeeded, 3 Running, 4 Failed,
//!   5 InvalidConfig.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64};

use axum::{routing::get, Router};
use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::crd::DriverState;
use crate::error::{Error, Result};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ControllerLabels {
    /// Driver type, e.g. "powermax", or "csipowermaxrevproxy"
    pub controller: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "validation"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Reconcile wall time, 10ms to ~80s
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ControllerLabels, Histogram>> =
    Lazy::new(|| Family::new_with_constructor(|| Histogram::new(exponential_buckets(0.01, 2.0, 14))));

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RESOURCE_STATE: Lazy<Family<ResourceLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "dell_csi_reconcile_duration_seconds",
        "Time spent in one reconcile of a driver or proxy resource",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "dell_csi_reconcile_errors_total",
        "Reconciles that ended in an error, by error kind",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "dell_csi_resource_state",
        "Lifecycle state of a driver or reverse proxy resource",
        RESOURCE_STATE.clone(),
    );

    registry
});

pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    RECONCILE_DURATION_SECONDS
        .get_or_create(&ControllerLabels {
            controller: controller.to_string(),
        })
        .observe(seconds);
}

pub fn inc_reconcile_error(controller: &str, kind: &str) {
    RECONCILE_ERRORS_TOTAL
        .get_or_create(&ErrorLabels {
            controller: controller.to_string(),
            kind: kind.to_string(),
        })
        .inc();
}

fn state_code(state: DriverState) -> i64 {
    match state {
        DriverState::NoState => 0,
        DriverState::Updating => 1,
        DriverState::Succeeded => 2,
        DriverState::Running => 3,
        DriverState::Failed => 4,
        DriverState::InvalidConfig => 5,
    }
}

pub fn set_resource_state(kind: &str, namespace: &str, name: &str, state: DriverState) {
    let labels = ResourceLabels {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    RESOURCE_STATE.get_or_create(&labels).set(state_code(state));
}

/// Render the registry in the Prometheus text format
pub fn render() -> Result<String> {
    let mut text = String::new();
    encode(&mut text, &REGISTRY)
        .map_err(|e| Error::ConfigError(format!("encoding metrics: {}", e)))?;
    Ok(text)
}

async fn scrape() -> String {
    render().unwrap_or_else(|e| {
        error!("{}", e);
        String::new()
    })
}

/// Parse a bind address; a bare `:port` binds every interface
pub fn parse_bind_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| Error::ConfigError(format!("Invalid metrics address {}: {}", addr, e)))
}

/// Serve `/metrics` until the process exits
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(scrape))
        .layer(TraceLayer::new_for_http());

    info!("Metrics server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
