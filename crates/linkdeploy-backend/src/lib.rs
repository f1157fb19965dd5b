//! linkdeploy-backend: collaborator seams for the deployment orchestrator
//!
//! This crate owns every piece of I/O the orchestrator performs. It defines
//! the traits the sequencer talks through and ships concrete and in-memory
//! implementations of each.
//!
//! ## Layer 0 - Collaborators
//!
//! Focus: durability, atomic manifest writes, and wire encoding.
//!
//! ## Key Components
//!
//! - `ArtifactResolver` / `FsArtifactResolver`: component name → bytecode + ABI
//! - `ExecutionBackend` / `JsonRpcBackend`: deploy and mutate with confirmation
//! - `ManifestSink` / `JsonManifestSink`: all-or-nothing manifest persistence
//! - `ConsumerLayoutSink`: per-component ABI files plus a flat alias map
//! - `fakes`: deterministic in-memory doubles for tests

pub mod abi;
mod artifacts;
pub mod backend_traits;
pub mod consumer_sink;
mod error;
pub mod fakes;
mod json_sink;
pub mod rpc;

pub use artifacts::FsArtifactResolver;
pub use backend_traits::{
    Address, Artifact, ArtifactResolver, ArtifactResult, BackendResult, Bundle, DeployedComponent,
    Deployer, ExecutionBackend, InterfaceDescriptor, Manifest, ManifestSink, Receipt, SinkResult,
    PLACEHOLDER_ADDRESS,
};
pub use consumer_sink::ConsumerLayoutSink;
pub use error::{ArtifactError, BackendError, SinkError};
pub use json_sink::JsonManifestSink;
pub use rpc::{JsonRpcBackend, RpcConfig};
