//! Telemetry sinks
//!
//! The router and orchestrator report through an injected
//! [`TelemetrySink`]; nothing here touches process-global metric state.

use crate::domain::operation::{OperationState, OperationType};
use crate::domain::ports::TelemetrySink;
use crate::error::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn operation_queued(&self, _operation_type: &OperationType) {}
    fn operation_extended(&self, _operation_type: &OperationType) {}
    fn operation_completed(&self, _operation_type: &OperationType, _state: OperationState, _duration: Duration) {}
    fn request_routed(&self, _plane_type: &str, _verb: &str, _outcome: &str) {}
}

/// Prometheus-backed sink with its own registry
pub struct PrometheusTelemetry {
    registry: Registry,
    queued: IntCounterVec,
    completed: IntCounterVec,
    extended: IntCounterVec,
    duration: HistogramVec,
    routed: IntCounterVec,
}

fn resource_type_label(operation_type: &OperationType) -> String {
    operation_type.resource_type.to_lowercase()
}

fn operation_label(operation_type: &OperationType) -> String {
    operation_type.method.to_string().to_lowercase()
}

impl PrometheusTelemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let queued = IntCounterVec::new(
            Opts::new("ucp_async_operation_queued_total", "Operations enqueued"),
            &["resource_type", "operation_type"],
        )?;
        let completed = IntCounterVec::new(
            Opts::new("ucp_async_operation_total", "Operations that reached a terminal state"),
            &["resource_type", "operation_type", "operation_state"],
        )?;
        let extended = IntCounterVec::new(
            Opts::new("ucp_async_operation_extended_total", "Operation leases renewed"),
            &["resource_type", "operation_type"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("ucp_async_operation_duration_seconds", "Operation execution time")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
            &["resource_type", "operation_type", "operation_state"],
        )?;
        let routed = IntCounterVec::new(
            Opts::new("ucp_router_requests_total", "Requests dispatched by the router"),
            &["plane_type", "verb", "outcome"],
        )?;

        registry.register(Box::new(queued.clone()))?;
        registry.register(Box::new(completed.clone()))?;
        registry.register(Box::new(extended.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(routed.clone()))?;

        Ok(Self {
            registry,
            queued,
            completed,
            extended,
            duration,
            routed,
        })
    }

    /// Text exposition format for `/metrics`
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl TelemetrySink for PrometheusTelemetry {
    fn operation_queued(&self, operation_type: &OperationType) {
        self.queued
            .with_label_values(&[&resource_type_label(operation_type), &operation_label(operation_type)])
            .inc();
    }

    fn operation_extended(&self, operation_type: &OperationType) {
        self.extended
            .with_label_values(&[&resource_type_label(operation_type), &operation_label(operation_type)])
            .inc();
    }

    fn operation_completed(&self, operation_type: &OperationType, state: OperationState, duration: Duration) {
        let state = state.to_string().to_lowercase();
        let labels = [
            resource_type_label(operation_type),
            operation_label(operation_type),
            state,
        ];
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.completed.with_label_values(&labels).inc();
        self.duration.with_label_values(&labels).observe(duration.as_secs_f64());
    }

    fn request_routed(&self, plane_type: &str, verb: &str, outcome: &str) {
        self.routed
            .with_label_values(&[&plane_type.to_lowercase(), verb, outcome])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::OperationMethod;

    #[test]
    fn test_prometheus_render() {
        let telemetry = PrometheusTelemetry::new().unwrap();
        let op = OperationType::new("AWS.Kinesis/Stream", OperationMethod::Put);
        telemetry.operation_queued(&op);
        telemetry.operation_extended(&op);
        telemetry.operation_completed(&op, OperationState::Succeeded, Duration::from_millis(250));
        telemetry.request_routed("AWS", "Get", "ok");

        let text = telemetry.render().unwrap();
        assert!(text.contains(
            "ucp_async_operation_queued_total{operation_type=\"put\",resource_type=\"aws.kinesis/stream\"} 1"
        ));
        assert!(text.contains("operation_state=\"succeeded\""));
        assert!(text.contains("ucp_async_operation_extended_total"));
        assert!(text.contains("ucp_router_requests_total{outcome=\"ok\",plane_type=\"aws\",verb=\"Get\"} 1"));
    }

    #[test]
    fn test_separate_instances_do_not_collide() {
        assert!(PrometheusTelemetry::new().is_ok());
        assert!(PrometheusTelemetry::new().is_ok());
    }
}
