use prometheus::{
    HistogramVec, IntCounterVec, Registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry,
};

/// Authentication metrics for monitoring
#[derive(Clone)]
pub struct AuthMetrics {
    /// Counter for credential validations, by scheme and result
    pub auth_validations_total: IntCounterVec,

    /// Histogram for credential validation duration
    pub auth_validation_duration_seconds: HistogramVec,

    /// Counter for token revocations, by reason
    pub revocations_total: IntCounterVec,

    /// Counter for revocation record cleanups, by result
    pub cleanup_total: IntCounterVec,
}

impl AuthMetrics {
    /// Create a new AuthMetrics instance and register all metrics with the given registry
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register with the registry
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let auth_validations_total = register_int_counter_vec_with_registry!(
            "taskd_auth_validations_total",
            "Total number of credential validations",
            &["scheme", "result"],
            registry
        )?;

        let auth_validation_duration_seconds = register_histogram_vec_with_registry!(
            "taskd_auth_validation_duration_seconds",
            "Duration of credential validation in seconds",
            &["scheme"],
            registry
        )?;

        let revocations_total = register_int_counter_vec_with_registry!(
            "taskd_auth_revocations_total",
            "Total number of revoked tokens",
            &["reason"],
            registry
        )?;

        let cleanup_total = register_int_counter_vec_with_registry!(
            "taskd_auth_cleanup_total",
            "Total number of revocation record cleanups",
            &["result"],
            registry
        )?;

        Ok(Self {
            auth_validations_total,
            auth_validation_duration_seconds,
            revocations_total,
            cleanup_total,
        })
    }

    /// Record a successful validation
    pub fn record_validation_success(&self, scheme: &str) {
        self.auth_validations_total.with_label_values(&[scheme, "success"]).inc();
    }

    /// Record a failed validation, labelled with the failure class
    pub fn record_validation_failure(&self, scheme: &str, reason: &str) {
        self.auth_validations_total.with_label_values(&[scheme, reason]).inc();
    }

    /// Start timing a validation
    pub fn start_validation_timer(&self, scheme: &str) -> prometheus::HistogramTimer {
        self.auth_validation_duration_seconds.with_label_values(&[scheme]).start_timer()
    }

    /// Record a revocation
    pub fn record_revocation(&self, reason: &str) {
        self.revocations_total.with_label_values(&[reason]).inc();
    }

    /// Record a cleanup attempt
    pub fn record_cleanup(&self, deleted: bool) {
        let result = if deleted { "deleted" } else { "failed" };
        self.cleanup_total.with_label_values(&[result]).inc();
    }
}
