//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `MemoryArtifactResolver`, `MemoryBackend`, and
//! `MemoryManifestSink` that satisfy the trait contracts without any
//! external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::backend_traits::*;
use crate::error::{ArtifactError, BackendError, SinkError};

/// First default account of a local development node.
pub const DEFAULT_FAKE_DEPLOYER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

// ---------------------------------------------------------------------------
// MemoryArtifactResolver
// ---------------------------------------------------------------------------

/// In-memory artifact resolver backed by a `HashMap<name, Artifact>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactResolver {
    artifacts: HashMap<String, Artifact>,
}

impl MemoryArtifactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact whose bytecode is `bytecode` and whose ABI is
    /// a single marker entry naming the component.
    pub fn with_artifact(mut self, name: &str, bytecode: &[u8]) -> Self {
        self.insert(Artifact {
            name: name.to_string(),
            bundle: Bundle(bytecode.to_vec()),
            interface: InterfaceDescriptor(serde_json::json!([
                { "type": "constructor", "name": name }
            ])),
        });
        self
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }
}

#[async_trait]
impl ArtifactResolver for MemoryArtifactResolver {
    async fn resolve(&self, name: &str) -> ArtifactResult<Artifact> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound {
                name: name.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// A request observed by [`MemoryBackend`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Deploy {
        bundle: Bundle,
        args: Vec<Address>,
    },
    Mutate {
        target: Address,
        method: String,
        args: Vec<Address>,
    },
}

/// State of one instance living in the fake backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    pub bundle: Bundle,
    pub constructor_args: Vec<Address>,
    /// Applied mutations as `(method, args)`, in order.
    pub mutations: Vec<(String, Vec<Address>)>,
}

#[derive(Debug, Default)]
struct BackendState {
    calls: Vec<BackendCall>,
    nonce: u64,
    block: u64,
    instances: HashMap<Address, InstanceState>,
    failures: HashMap<usize, BackendError>,
}

/// Deterministic in-memory execution backend.
///
/// Addresses are the first 20 bytes of `SHA-256(deployer ‖ nonce)`, so two
/// backends with the same deployer assign identical address sequences.
/// Every call is confirmed immediately.
#[derive(Debug)]
pub struct MemoryBackend {
    deployer: Deployer,
    state: Mutex<BackendState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_deployer(DEFAULT_FAKE_DEPLOYER)
    }

    pub fn with_deployer(deployer: &str) -> Self {
        Self {
            deployer: Deployer(deployer.to_string()),
            state: Mutex::new(BackendState::default()),
        }
    }

    /// Make the `index`-th call (0-based, deploys and mutations counted
    /// together) fail with `error`.
    pub fn fail_call(&self, index: usize, error: BackendError) {
        self.state.lock().unwrap().failures.insert(index, error);
    }

    /// Every call received so far, including failed ones.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Current state of the instance at `address`.
    pub fn instance(&self, address: &Address) -> Option<InstanceState> {
        self.state.lock().unwrap().instances.get(address).cloned()
    }

    /// Compute the address the next deploy would receive, without deploying.
    pub fn address_for_nonce(&self, nonce: u64) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(self.deployer.0.as_bytes());
        hasher.update(nonce.to_be_bytes());
        let hash = hasher.finalize();
        Address::new(format!("0x{}", hex::encode(&hash[..20])))
    }

    fn record(&self, state: &mut BackendState, call: BackendCall) -> BackendResult<()> {
        let index = state.calls.len();
        state.calls.push(call);
        match state.failures.remove(&index) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
    async fn deployer(&self) -> BackendResult<Deployer> {
        Ok(self.deployer.clone())
    }

    async fn deploy(&self, bundle: &Bundle, args: &[Address]) -> BackendResult<Address> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            BackendCall::Deploy {
                bundle: bundle.clone(),
                args: args.to_vec(),
            },
        )?;
        if bundle.is_empty() {
            return Err(BackendError::Rejected("empty bytecode".to_string()));
        }

        let address = self.address_for_nonce(state.nonce);
        state.nonce += 1;
        state.block += 1;
        state.instances.insert(
            address.clone(),
            InstanceState {
                bundle: bundle.clone(),
                constructor_args: args.to_vec(),
                mutations: Vec::new(),
            },
        );
        Ok(address)
    }

    async fn mutate(
        &self,
        target: &Address,
        method: &str,
        args: &[Address],
    ) -> BackendResult<Receipt> {
        let mut state = self.state.lock().unwrap();
        self.record(
            &mut state,
            BackendCall::Mutate {
                target: target.clone(),
                method: method.to_string(),
                args: args.to_vec(),
            },
        )?;

        state.block += 1;
        let block = state.block;
        let instance = state
            .instances
            .get_mut(target)
            .ok_or_else(|| BackendError::Rejected(format!("no component at {target}")))?;
        instance
            .mutations
            .push((method.to_string(), args.to_vec()));

        let mut hasher = Sha256::new();
        hasher.update(target.as_str().as_bytes());
        hasher.update(method.as_bytes());
        hasher.update(block.to_be_bytes());
        Ok(Receipt {
            transaction_hash: format!("0x{}", hex::encode(hasher.finalize())),
            block_number: Some(block),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryManifestSink
// ---------------------------------------------------------------------------

/// In-memory manifest sink. A failed commit leaves the stored manifest
/// untouched.
#[derive(Debug, Default)]
pub struct MemoryManifestSink {
    current: Mutex<Option<Manifest>>,
    failing_commits: AtomicUsize,
    attempts: AtomicUsize,
}

impl MemoryManifestSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` commits.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of commit attempts, failed ones included.
    pub fn commit_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestSink for MemoryManifestSink {
    async fn commit(&self, manifest: &Manifest) -> SinkResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SinkError::Write("injected sink failure".to_string()));
        }
        *self.current.lock().unwrap() = Some(manifest.clone());
        Ok(())
    }

    async fn read(&self) -> SinkResult<Option<Manifest>> {
        Ok(self.current.lock().unwrap().clone())
    }
}
