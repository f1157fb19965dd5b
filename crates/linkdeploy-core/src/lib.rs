//! linkdeploy-core: dependency-ordered deployment of linked components
//!
//! Deploys a set of components whose constructors need each other's
//! addresses. Forward references are satisfied by ordering; cyclic ones are
//! broken by deploying with a placeholder address and patching it once the
//! real address exists.
//!
//! ## Layer 1 - Orchestration
//!
//! Depends only on the traits in `linkdeploy-backend`; every concrete
//! resolver, backend and sink is injected.
//!
//! ## Key Components
//!
//! - `Topology`: declared components and their forward/deferred edges
//! - `plan`: validation and declaration-order topological sort
//! - `DependencySequencer`: plan → resolve → deploy → patch → commit
//! - `DeploymentExecutor`: timeout, write-once check, error classification
//! - `ManifestWriter`: single atomic commit, alias derivation

pub mod config;
pub mod error;
pub mod executor;
pub mod journal;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod plan;
pub mod sequencer;
pub mod telemetry;
pub mod topology;

pub use config::{DeployConfig, ManifestLayout};
pub use error::{
    ConfigError, DeploymentError, InFlight, OrchestratorError, PartialDeployment,
    PartialManifestError, PlanningError, Result, SinkWriteError, Step,
};
pub use executor::DeploymentExecutor;
pub use journal::{JournalEntry, PatchAction};
pub use manifest::{alias_key, ManifestWriter};
pub use plan::{ArgSource, DependencyGraph, DeploymentPlan, PlanStep, PlannedPatch};
pub use sequencer::{DependencySequencer, RunReport, SequencerOptions};
pub use telemetry::init_tracing;
pub use topology::{ComponentSpec, Topology};
