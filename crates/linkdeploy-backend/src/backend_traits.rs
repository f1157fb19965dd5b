//! Collaborator trait definitions for linkdeploy
//!
//! These traits define the three seams the orchestrator talks through:
//! - `ArtifactResolver`: component name → deployable bundle + interface
//! - `ExecutionBackend`: deploy / mutate with durability confirmation
//! - `ManifestSink`: all-or-nothing persistence of the final manifest
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, BackendError, SinkError};

/// Result type for artifact resolution
pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

/// Result type for execution backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type for manifest sink calls
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// The well-known null address substituted for not-yet-deployed dependencies.
pub const PLACEHOLDER_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// Address assigned by the execution backend.
///
/// Opaque to the orchestrator: it is compared, stored and passed back to the
/// backend, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Address(raw.into())
    }

    /// The null placeholder address.
    pub fn placeholder() -> Self {
        Address(PLACEHOLDER_ADDRESS.to_string())
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.eq_ignore_ascii_case(PLACEHOLDER_ADDRESS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default caller identity reported by a backend. Never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Deployer(pub String);

impl std::fmt::Display for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deployable bytecode bundle, serialized as `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl Bundle {
    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(raw: &str) -> std::result::Result<Self, hex::FromHexError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        Ok(Bundle(hex::decode(body)?))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Interface descriptor (an ABI array for EVM backends). Opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceDescriptor(pub serde_json::Value);

impl Default for InterfaceDescriptor {
    fn default() -> Self {
        InterfaceDescriptor(serde_json::Value::Array(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// ArtifactResolver: builder output lookup
// ---------------------------------------------------------------------------

/// Builder output for one component.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub bundle: Bundle,
    pub interface: InterfaceDescriptor,
}

/// Pure lookup of build artifacts by component name.
///
/// Guarantees:
/// - No side effects; resolving the same name twice yields the same artifact.
/// - Returns `ArtifactError::NotFound` for unknown names.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> ArtifactResult<Artifact>;
}

// ---------------------------------------------------------------------------
// ExecutionBackend: deploy / mutate with durability
// ---------------------------------------------------------------------------

/// Confirmation of a durable state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
}

/// Execution backend accepting deploy and mutation requests.
///
/// Guarantees:
/// - `deploy` and `mutate` return only after the action is durable
///   (final, and observable by subsequent calls).
/// - Every returned address is unique for the backend's lifetime.
/// - `BackendError::Unavailable` means nothing was submitted and the request
///   may be retried; `BackendError::Rejected` means it was durably refused;
///   `BackendError::Unconfirmed` means it was submitted and may still land.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Default caller identity used for deploys and mutations.
    async fn deployer(&self) -> BackendResult<Deployer>;

    /// Instantiate `bundle` with `args` as constructor arguments.
    async fn deploy(&self, bundle: &Bundle, args: &[Address]) -> BackendResult<Address>;

    /// Call `method(args...)` on the component at `target`.
    async fn mutate(
        &self,
        target: &Address,
        method: &str,
        args: &[Address],
    ) -> BackendResult<Receipt>;
}

// ---------------------------------------------------------------------------
// ManifestSink: final address/interface mapping
// ---------------------------------------------------------------------------

/// One deployed component as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedComponent {
    pub name: String,
    pub address: Address,
    #[serde(rename = "abi")]
    pub interface: InterfaceDescriptor,
    /// Final address each dependency resolves to, after patching.
    #[serde(default)]
    pub links: BTreeMap<String, Address>,
}

/// Final mapping of component name → deployed component, plus aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub deployer: Deployer,
    /// Components in deployment order.
    pub components: Vec<DeployedComponent>,
    /// Well-known keys (e.g. `TICKET_ADDRESS`) for simple consumers.
    pub aliases: BTreeMap<String, Address>,
}

impl Manifest {
    pub fn get(&self, name: &str) -> Option<&DeployedComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn address_of(&self, name: &str) -> Option<&Address> {
        self.get(name).map(|c| &c.address)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Durable destination for the final manifest.
///
/// Guarantees:
/// - `commit` is all-or-nothing: a concurrent or later `read` observes either
///   the previous manifest or the new one, never a mixture.
/// - `read` returns `None` until the first successful commit.
#[async_trait]
pub trait ManifestSink: Send + Sync {
    async fn commit(&self, manifest: &Manifest) -> SinkResult<()>;

    async fn read(&self) -> SinkResult<Option<Manifest>>;
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        let body = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(body).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_recognised_case_insensitively() {
        assert!(Address::placeholder().is_placeholder());
        assert!(Address::new("0X0000000000000000000000000000000000000000").is_placeholder());
        assert!(!Address::new("0x00000000000000000000000000000000000000aa").is_placeholder());
    }

    #[test]
    fn bundle_hex_accepts_optional_prefix() {
        let a = Bundle::from_hex("0x6080").unwrap();
        let b = Bundle::from_hex("6080").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), "0x6080");
    }

    #[test]
    fn bundle_serializes_as_prefixed_hex() {
        let raw = serde_json::to_value(Bundle(vec![0xde, 0xad])).unwrap();
        assert_eq!(raw, serde_json::json!("0xdead"));
    }

    #[test]
    fn manifest_lookup_by_name() {
        let manifest = Manifest {
            deployer: Deployer("0xdeployer".to_string()),
            components: vec![DeployedComponent {
                name: "Ticket".to_string(),
                address: Address::new("0x01"),
                interface: InterfaceDescriptor::default(),
                links: BTreeMap::new(),
            }],
            aliases: BTreeMap::new(),
        };
        assert_eq!(manifest.address_of("Ticket"), Some(&Address::new("0x01")));
        assert!(manifest.get("Marketplace").is_none());
        assert_eq!(manifest.len(), 1);
    }
}
