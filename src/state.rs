//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the stored configuration, readable and replaceable at runtime
//! - **metrics**: request counters updated by the metrics middleware
//! - **orchestrator**: the speech engine itself (sessions, providers, voice biometrics)
//! - **start_time**: for uptime reporting
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every actix worker holds a handle to the same data
//! - **RwLock**: many concurrent readers, or one writer
//!
//! The engine is built once at startup. Updating the stored configuration through
//! `PUT /api/v1/config` changes what `GET /api/v1/config` reports; the running engine keeps
//! the settings it was built with until the server restarts.
//!
//! Locks here are `std::sync::RwLock` and are only held for a few field updates. A
//! poisoned lock still holds usable counters, so it is recovered rather than propagated.

use crate::config::AppConfig;
use crate::orchestrator::SpeechOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Stored configuration (can be updated at runtime).
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, written on every request.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The speech engine. Internally synchronized, so no lock is needed here.
    pub orchestrator: Arc<SpeechOrchestrator>,

    pub start_time: Instant,
}

/// Request metrics collected by the middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,

    /// Requests currently being processed.
    pub in_flight: u32,

    /// Key: `"METHOD /path"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, orchestrator: Arc<SpeechOrchestrator>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// A copy of the current configuration. Cloning releases the lock immediately.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Replace the stored configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        *write(&self.config) = new_config;
        Ok(())
    }

    /// Apply a partial JSON update to the stored configuration.
    ///
    /// The write lock is held across merge and validation so two concurrent updates
    /// cannot overwrite each other's keys.
    pub fn patch_config(&self, json: &str) -> anyhow::Result<AppConfig> {
        let mut config = write(&self.config);
        config.update_from_json(json)?;
        Ok(config.clone())
    }

    pub fn request_started(&self) {
        let mut metrics = write(&self.metrics);
        metrics.request_count += 1;
        metrics.in_flight += 1;
    }

    /// Record a finished request for `endpoint`.
    pub fn request_finished(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        metrics.in_flight = metrics.in_flight.saturating_sub(1);
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        ratio(self.error_count, self.request_count)
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        ratio(self.total_duration_ms, self.request_count)
    }

    /// Between 0.0 (no errors) and 1.0 (every request failed).
    pub fn error_rate(&self) -> f64 {
        ratio(self.error_count, self.request_count)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
