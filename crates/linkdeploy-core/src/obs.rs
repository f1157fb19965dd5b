//! Structured tracing events for the deployment lifecycle.
//!
//! Every event carries an `event` field (`run.started`, `component.deployed`,
//! ...) so log pipelines can filter on it. Runs are instrumented with
//! [`run_span`], which attaches `run_id` to everything emitted inside.
//!
//! Verbosity follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

/// Span tagging everything inside a run with its `run_id`. Attach it to the
/// run future with `tracing::Instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("linkdeploy.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, components: usize) {
    info!(event = "run.started", run_id = %run_id, components = components);
}

/// Emit event: plan computed, with the deployment order and patch count.
pub fn emit_plan_computed(order: &[&str], patches: usize) {
    info!(
        event = "plan.computed",
        order = %order.join(","),
        patches = patches,
    );
}

pub fn emit_component_deployed(position: usize, component: &str, address: &str) {
    info!(
        event = "component.deployed",
        position = position,
        component = %component,
        address = %address,
    );
}

pub fn emit_patch_applied(source: &str, dependency: &str, method: &str, tx: &str) {
    info!(
        event = "patch.applied",
        source = %source,
        dependency = %dependency,
        method = %method,
        tx = %tx,
    );
}

pub fn emit_manifest_committed(components: usize) {
    info!(event = "manifest.committed", components = components);
}

/// Emit event: run finished, successfully or not.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, deployed: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        deployed = deployed,
        success = success,
    );
}

/// Emit event: run aborted (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}
