//! Run configuration.
//!
//! Every setting has a default, so a run needs no flags at all. The
//! `linkdeploy` binary maps its flags and `LINKDEPLOY_*` variables onto
//! [`DeployConfig`].

use std::path::PathBuf;
use std::time::Duration;

use linkdeploy_backend::RpcConfig;

use crate::error::ConfigError;
use crate::topology::Topology;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
pub const DEFAULT_MANIFEST_PATH: &str = "deployedContracts.json";
pub const DEFAULT_CONFIRMATIONS: u64 = 1;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;

/// How the committed manifest is laid out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManifestLayout {
    /// One JSON document at `manifest_path`.
    #[default]
    Document,
    /// A directory at `manifest_path` holding `abis/<Component>.json` and
    /// the flat `deployedContracts.json` alias map.
    Consumer,
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub rpc: RpcConfig,
    /// Root searched for `<Component>.json` build artifacts.
    pub artifacts_dir: PathBuf,
    /// Where the manifest is committed.
    pub manifest_path: PathBuf,
    pub layout: ManifestLayout,
    /// JSON topology file; the built-in ticketing topology when unset.
    pub topology_path: Option<PathBuf>,
    pub step_timeout: Option<Duration>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            rpc: RpcConfig {
                url: DEFAULT_RPC_URL.to_string(),
                from: None,
                confirmations: DEFAULT_CONFIRMATIONS,
                poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
                receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
            },
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            layout: ManifestLayout::default(),
            topology_path: None,
            step_timeout: None,
        }
    }
}

impl DeployConfig {
    /// Topology for this run: the configured file, or the built-in one.
    pub fn load_topology(&self) -> Result<Topology, ConfigError> {
        match &self.topology_path {
            Some(path) => Topology::load(path),
            None => Ok(Topology::ticketing()),
        }
    }
}
