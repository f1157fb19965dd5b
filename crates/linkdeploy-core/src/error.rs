//! Error taxonomy for a deployment run.
//!
//! Each variant of [`OrchestratorError`] tells the caller how much of the
//! world has changed:
//!
//! - `Planning` / `Artifact`: nothing was sent to the backend.
//! - `Deployment`: the failing step was the first side effect attempted.
//! - `PartialManifest`: some components exist on the backend; the partial
//!   mapping is attached for inspection or manual resumption.
//! - `SinkWrite`: every deploy and patch is durable; only the commit failed.

use std::fmt;
use std::path::PathBuf;

use linkdeploy_backend::{
    Address, ArtifactError, BackendError, DeployedComponent, Manifest, SinkError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::journal::JournalEntry;
use crate::plan::PlannedPatch;

/// A single backend-facing step of a run, used to report where it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    QueryDeployer,
    Deploy {
        component: String,
    },
    Patch {
        source: String,
        dependency: String,
        method: String,
    },
    Commit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::QueryDeployer => write!(f, "query deployer"),
            Step::Deploy { component } => write!(f, "deploy {component}"),
            Step::Patch {
                source,
                dependency,
                method,
            } => write!(f, "patch {source}.{method}({dependency})"),
            Step::Commit => write!(f, "commit manifest"),
        }
    }
}

/// The declared topology cannot be turned into a deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("topology declares no components")]
    EmptyTopology,

    #[error("component name must not be empty")]
    EmptyName,

    #[error("component declared twice: {name}")]
    DuplicateComponent { name: String },

    #[error("component {component} depends on undeclared component {dependency}")]
    UndeclaredDependency {
        component: String,
        dependency: String,
    },

    #[error("alias {alias} points at undeclared component {component}")]
    UndeclaredAlias { alias: String, component: String },

    /// The forward (constructor-time) edges contain a cycle. Cyclic
    /// references must be declared as deferred.
    #[error("forward dependency cycle: {}", .components.join(" -> "))]
    DependencyCycle { components: Vec<String> },
}

/// A deploy or patch step did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeploymentError {
    #[error("{step}: backend unavailable: {reason}")]
    BackendUnavailable { step: Step, reason: String },

    #[error("{step}: backend rejected the action: {reason}")]
    BackendRejected { step: Step, reason: String },

    /// The action was sent but its outcome is unknown: it may still land.
    #[error("{step}: outcome unknown{}: {reason}", tx_suffix(.tx_hash))]
    Unconfirmed {
        step: Step,
        tx_hash: Option<String>,
        reason: String,
    },

    /// The backend confirmed a deploy at an address this run cannot use.
    #[error("{step}: backend confirmed unusable address {address}: {reason}")]
    UnusableAddress {
        step: Step,
        address: Address,
        reason: String,
    },

    #[error("{step}: run cancelled before this step")]
    Cancelled { step: Step },
}

impl DeploymentError {
    pub fn from_backend(step: Step, err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => {
                DeploymentError::BackendUnavailable { step, reason }
            }
            BackendError::Rejected(reason) => DeploymentError::BackendRejected { step, reason },
            BackendError::Unconfirmed { tx_hash, reason } => DeploymentError::Unconfirmed {
                step,
                tx_hash: Some(tx_hash),
                reason,
            },
        }
    }

    pub fn step(&self) -> &Step {
        match self {
            DeploymentError::BackendUnavailable { step, .. }
            | DeploymentError::BackendRejected { step, .. }
            | DeploymentError::Unconfirmed { step, .. }
            | DeploymentError::UnusableAddress { step, .. }
            | DeploymentError::Cancelled { step } => step,
        }
    }

    /// `true` when the same step could succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeploymentError::BackendUnavailable { .. })
    }

    /// The backend action this failure may have left behind, if any.
    pub fn in_flight(&self) -> Option<InFlight> {
        match self {
            DeploymentError::Unconfirmed { step, tx_hash, .. } => Some(InFlight {
                step: step.clone(),
                tx_hash: tx_hash.clone(),
                address: None,
            }),
            DeploymentError::UnusableAddress { step, address, .. } => Some(InFlight {
                step: step.clone(),
                tx_hash: None,
                address: Some(address.clone()),
            }),
            _ => None,
        }
    }
}

fn tx_suffix(tx_hash: &Option<String>) -> String {
    tx_hash
        .as_deref()
        .map(|hash| format!(" (tx {hash})"))
        .unwrap_or_default()
}

/// A backend action that was sent and may have taken effect, but is not
/// part of the confirmed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub step: Step,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Address the backend reported, when it reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// State reached by a run that aborted after at least one deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDeployment {
    /// Components confirmed on the backend, in deployment order.
    pub deployed: Vec<DeployedComponent>,
    /// Components in the plan that were never sent to the backend.
    pub not_deployed: Vec<String>,
    /// The failing action, when it may exist on the backend anyway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlight>,
    /// Deferred links not yet patched.
    pub pending_patches: Vec<PlannedPatch>,
    /// Every side effect that did happen, in order.
    pub journal: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Error)]
#[error(
    "run aborted with {} component(s) deployed, {} in doubt, {} not deployed: {cause}",
    .partial.deployed.len(),
    usize::from(.partial.in_flight.is_some()),
    .partial.not_deployed.len()
)]
pub struct PartialManifestError {
    pub cause: DeploymentError,
    pub partial: Box<PartialDeployment>,
}

/// The manifest could not be committed. Every deploy and patch is already
/// durable, so retrying [`crate::ManifestWriter::commit`] with `manifest` is
/// the only recovery needed.
#[derive(Debug, Error)]
#[error("manifest commit failed after all components deployed: {source}")]
pub struct SinkWriteError {
    #[source]
    pub source: SinkError,
    pub manifest: Box<Manifest>,
}

/// Errors produced by a deployment run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("artifact resolution failed: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("deployment failed: {0}")]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    PartialManifest(#[from] PartialManifestError),

    #[error(transparent)]
    SinkWrite(#[from] SinkWriteError),
}

impl OrchestratorError {
    /// `true` when re-running from scratch is safe and may succeed: nothing
    /// was sent and the failure was transient.
    pub fn retry_safe(&self) -> bool {
        match self {
            OrchestratorError::Deployment(err) => err.is_transient(),
            _ => false,
        }
    }

    /// `true` when the backend holds state from this run.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            OrchestratorError::PartialManifest(_) | OrchestratorError::SinkWrite(_)
        )
    }

    /// The step that failed, when the failure happened at a backend or sink
    /// step.
    pub fn step(&self) -> Option<Step> {
        match self {
            OrchestratorError::Deployment(err) => Some(err.step().clone()),
            OrchestratorError::PartialManifest(err) => Some(err.cause.step().clone()),
            OrchestratorError::SinkWrite(_) => Some(Step::Commit),
            OrchestratorError::Planning(_) | OrchestratorError::Artifact(_) => None,
        }
    }
}

/// Errors loading configuration or topology files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid topology in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn deploy_step(name: &str) -> Step {
        Step::Deploy {
            component: name.to_string(),
        }
    }

    #[test]
    fn step_display_names_component_and_method() {
        assert_eq!(deploy_step("Ticket").to_string(), "deploy Ticket");
        let patch = Step::Patch {
            source: "Ticket".to_string(),
            dependency: "EventManager".to_string(),
            method: "updateEventManager".to_string(),
        };
        assert_eq!(
            patch.to_string(),
            "patch Ticket.updateEventManager(EventManager)"
        );
    }

    #[test]
    fn cycle_error_lists_path() {
        let err = PlanningError::DependencyCycle {
            components: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "forward dependency cycle: A -> B -> A");
    }

    #[test]
    fn backend_errors_map_to_transient_and_fatal() {
        let transient =
            DeploymentError::from_backend(deploy_step("A"), BackendError::Unavailable("x".into()));
        assert!(transient.is_transient());
        let fatal =
            DeploymentError::from_backend(deploy_step("A"), BackendError::Rejected("x".into()));
        assert!(!fatal.is_transient());
        assert_eq!(fatal.step(), &deploy_step("A"));
    }

    #[test]
    fn only_side_effect_free_transient_failures_are_retry_safe() {
        let transient = OrchestratorError::Deployment(DeploymentError::BackendUnavailable {
            step: deploy_step("A"),
            reason: "timeout".into(),
        });
        assert!(transient.retry_safe());
        assert!(!transient.has_side_effects());

        let partial = OrchestratorError::PartialManifest(PartialManifestError {
            cause: DeploymentError::BackendUnavailable {
                step: deploy_step("B"),
                reason: "timeout".into(),
            },
            partial: Box::new(PartialDeployment {
                deployed: Vec::new(),
                not_deployed: vec!["B".into()],
                in_flight: None,
                pending_patches: Vec::new(),
                journal: Vec::new(),
            }),
        });
        assert!(!partial.retry_safe());
        assert!(partial.has_side_effects());
        assert_eq!(partial.step(), Some(deploy_step("B")));
    }

    #[test]
    fn unconfirmed_backend_failure_is_in_flight_and_not_transient() {
        let err = DeploymentError::from_backend(
            deploy_step("A"),
            BackendError::Unconfirmed {
                tx_hash: "0x11".into(),
                reason: "no receipt".into(),
            },
        );
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "deploy A: outcome unknown (tx 0x11): no receipt"
        );
        let in_flight = err.in_flight().unwrap();
        assert_eq!(in_flight.tx_hash.as_deref(), Some("0x11"));
        assert_eq!(in_flight.step, deploy_step("A"));

        let unusable = DeploymentError::UnusableAddress {
            step: deploy_step("B"),
            address: Address::new("0xaa"),
            reason: "reused".into(),
        };
        assert_eq!(
            unusable.in_flight().unwrap().address,
            Some(Address::new("0xaa"))
        );
        assert!(DeploymentError::Cancelled {
            step: deploy_step("C")
        }
        .in_flight()
        .is_none());
    }
}
