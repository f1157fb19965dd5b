//! Manifest assembly and commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use linkdeploy_backend::{Address, DeployedComponent, Deployer, Manifest, ManifestSink};
use tracing::debug;

use crate::error::SinkWriteError;
use crate::metrics::METRICS;
use crate::obs;

/// Alias key for a component: `EventManager` becomes
/// `EVENT_MANAGER_ADDRESS`.
pub fn alias_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 10);
    let mut prev: Option<char> = None;
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if !c.is_alphanumeric() {
            if !key.is_empty() && !key.ends_with('_') {
                key.push('_');
            }
            prev = None;
            continue;
        }
        if c.is_uppercase() {
            let after_lower = prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            let acronym_end = prev.is_some_and(char::is_uppercase)
                && chars.peek().is_some_and(|n| n.is_lowercase());
            if (after_lower || acronym_end) && !key.ends_with('_') {
                key.push('_');
            }
        }
        key.extend(c.to_uppercase());
        prev = Some(c);
    }
    key.push_str("_ADDRESS");
    key
}

/// Build the manifest from deployed components in plan order.
///
/// Every component gets its derived alias; `extra_aliases` (alias →
/// component name) are added on top and win on conflict. Extra aliases
/// naming a component that is not in `components` are skipped.
pub fn assemble(
    deployer: Deployer,
    components: Vec<DeployedComponent>,
    extra_aliases: &BTreeMap<String, String>,
) -> Manifest {
    let mut aliases: BTreeMap<String, Address> = components
        .iter()
        .map(|c| (alias_key(&c.name), c.address.clone()))
        .collect();
    for (alias, component) in extra_aliases {
        if let Some(found) = components.iter().find(|c| &c.name == component) {
            aliases.insert(alias.clone(), found.address.clone());
        }
    }
    Manifest {
        deployer,
        components,
        aliases,
    }
}

/// Commits a finished manifest to a [`ManifestSink`] in a single write.
#[derive(Clone)]
pub struct ManifestWriter {
    sink: Arc<dyn ManifestSink>,
}

impl ManifestWriter {
    pub fn new(sink: Arc<dyn ManifestSink>) -> Self {
        Self { sink }
    }

    /// Write `manifest` as one durable unit.
    ///
    /// On failure the sink still holds whatever it held before, and the
    /// returned error carries `manifest` so the commit alone can be retried.
    pub async fn commit(&self, manifest: &Manifest) -> Result<(), SinkWriteError> {
        debug!(components = manifest.len(), "committing manifest");
        match self.sink.commit(manifest).await {
            Ok(()) => {
                METRICS.inc_manifests();
                obs::emit_manifest_committed(manifest.len());
                Ok(())
            }
            Err(source) => Err(SinkWriteError {
                source,
                manifest: Box::new(manifest.clone()),
            }),
        }
    }
}
