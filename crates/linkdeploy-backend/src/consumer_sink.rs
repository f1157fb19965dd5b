//! Manifest sink producing the files a client application reads.
//!
//! Layout under the output directory:
//!
//! ```text
//! <dir>/abis/<Component>.json    { "address": "0x...", "abi": [...] }
//! <dir>/deployedContracts.json   { "TICKET_ADDRESS": "0x...", ... }
//! <dir>/manifest.json            the full manifest, read back by `read`
//! ```
//!
//! A commit stages the whole directory next to the destination and swaps
//! it in with two renames. Between them the directory is briefly absent;
//! a reader never sees old and new files mixed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::backend_traits::{Address, InterfaceDescriptor, Manifest, ManifestSink, SinkResult};
use crate::error::SinkError;

pub const ABI_DIR: &str = "abis";
pub const ALIASES_FILE: &str = "deployedContracts.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Serialize)]
struct AbiFile<'a> {
    address: &'a Address,
    abi: &'a InterfaceDescriptor,
}

#[derive(Debug, Clone)]
pub struct ConsumerLayoutSink {
    dir: PathBuf,
}

impl ConsumerLayoutSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn parent_dir(&self) -> PathBuf {
        match self.dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn stage(&self, manifest: &Manifest, root: &Path) -> SinkResult<()> {
        let abis = root.join(ABI_DIR);
        fs::create_dir(&abis)?;
        for component in &manifest.components {
            let file = abi_file_name(&component.name)?;
            write_json(
                &abis.join(file),
                &AbiFile {
                    address: &component.address,
                    abi: &component.interface,
                },
            )?;
        }
        write_json(&root.join(ALIASES_FILE), &manifest.aliases)?;
        write_json(&root.join(MANIFEST_FILE), manifest)
    }

    /// Replace `self.dir` with `staged`, restoring the previous directory if
    /// the second rename fails.
    fn swap_in(&self, staged: &Path, parent: &Path) -> SinkResult<()> {
        if !self.dir.exists() {
            return fs::rename(staged, &self.dir).map_err(|e| self.rename_error(e));
        }

        let retired = tempfile::Builder::new()
            .prefix(".linkdeploy-retired-")
            .tempdir_in(parent)?;
        fs::rename(&self.dir, retired.path()).map_err(|e| self.rename_error(e))?;
        if let Err(err) = fs::rename(staged, &self.dir) {
            fs::rename(retired.path(), &self.dir)?;
            return Err(self.rename_error(err));
        }
        Ok(())
    }

    fn rename_error(&self, err: std::io::Error) -> SinkError {
        SinkError::Write(format!("swap into {}: {err}", self.dir.display()))
    }
}

/// `<name>.json`, refusing names that would escape the `abis` directory.
fn abi_file_name(name: &str) -> SinkResult<String> {
    let bad = name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']);
    if bad {
        return Err(SinkError::Write(format!(
            "component name {name:?} cannot be used as a file name"
        )));
    }
    Ok(format!("{name}.json"))
}

fn write_json(path: &Path, value: &impl Serialize) -> SinkResult<()> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    let mut file = fs::File::create(path)?;
    file.write_all(&body)?;
    file.sync_all()?;
    Ok(())
}

#[async_trait]
impl ManifestSink for ConsumerLayoutSink {
    async fn commit(&self, manifest: &Manifest) -> SinkResult<()> {
        let parent = self.parent_dir();
        fs::create_dir_all(&parent)?;

        let staged = tempfile::Builder::new()
            .prefix(".linkdeploy-staged-")
            .tempdir_in(&parent)?;
        self.stage(manifest, staged.path())?;
        self.swap_in(staged.path(), &parent)?;

        debug!(
            dir = %self.dir.display(),
            components = manifest.len(),
            "consumer layout persisted"
        );
        Ok(())
    }

    async fn read(&self) -> SinkResult<Option<Manifest>> {
        match fs::read(self.dir.join(MANIFEST_FILE)) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SinkError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_traits::{DeployedComponent, Deployer};
    use std::collections::BTreeMap;

    fn component(name: &str, addr: &str) -> DeployedComponent {
        DeployedComponent {
            name: name.to_string(),
            address: Address::new(addr),
            interface: InterfaceDescriptor(serde_json::json!([
                { "type": "function", "name": format!("touch{name}") }
            ])),
            links: BTreeMap::new(),
        }
    }

    fn manifest(components: Vec<DeployedComponent>) -> Manifest {
        let aliases = components
            .iter()
            .map(|c| (format!("{}_ADDRESS", c.name.to_uppercase()), c.address.clone()))
            .collect();
        Manifest {
            deployer: Deployer("0xdeployer".to_string()),
            components,
            aliases,
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    fn leftovers(parent: &Path) -> Vec<String> {
        fs::read_dir(parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".linkdeploy-"))
            .collect()
    }

    #[tokio::test]
    async fn commit_writes_abi_files_and_flat_alias_map() {
        let parent = tempfile::tempdir().unwrap();
        let sink = ConsumerLayoutSink::new(parent.path().join("abis-out"));
        let first = manifest(vec![
            component("Ticket", "0x01"),
            component("Marketplace", "0x02"),
        ]);

        sink.commit(&first).await.unwrap();

        let ticket = read_json(&sink.dir().join("abis/Ticket.json"));
        assert_eq!(ticket["address"], "0x01");
        assert_eq!(ticket["abi"][0]["name"], "touchTicket");
        assert_eq!(
            read_json(&sink.dir().join(ALIASES_FILE)),
            serde_json::json!({ "MARKETPLACE_ADDRESS": "0x02", "TICKET_ADDRESS": "0x01" })
        );
        assert_eq!(sink.read().await.unwrap(), Some(first));
        assert!(leftovers(parent.path()).is_empty());
    }

    #[tokio::test]
    async fn recommit_replaces_the_whole_layout() {
        let parent = tempfile::tempdir().unwrap();
        let sink = ConsumerLayoutSink::new(parent.path().join("out"));
        let first = manifest(vec![component("Ticket", "0x01"), component("Old", "0x09")]);
        sink.commit(&first).await.unwrap();

        let second = manifest(vec![component("Ticket", "0x05")]);
        sink.commit(&second).await.unwrap();

        assert!(!sink.dir().join("abis/Old.json").exists());
        let ticket = read_json(&sink.dir().join("abis/Ticket.json"));
        assert_eq!(ticket["address"], "0x05");
        assert_eq!(sink.read().await.unwrap(), Some(second));
        assert!(leftovers(parent.path()).is_empty());
    }

    #[tokio::test]
    async fn failed_commit_keeps_previous_layout() {
        let parent = tempfile::tempdir().unwrap();
        let sink = ConsumerLayoutSink::new(parent.path().join("out"));
        let first = manifest(vec![component("Ticket", "0x01")]);
        sink.commit(&first).await.unwrap();

        let escaping = manifest(vec![
            component("Ticket", "0x02"),
            component("../evil", "0x03"),
        ]);
        let err = sink.commit(&escaping).await.unwrap_err();
        assert!(matches!(err, SinkError::Write(_)));

        assert_eq!(sink.read().await.unwrap(), Some(first));
        let ticket = read_json(&sink.dir().join("abis/Ticket.json"));
        assert_eq!(ticket["address"], "0x01");
        assert!(!parent.path().join("evil.json").exists());
        assert!(leftovers(parent.path()).is_empty());
    }

    #[tokio::test]
    async fn read_before_first_commit_is_none() {
        let parent = tempfile::tempdir().unwrap();
        let sink = ConsumerLayoutSink::new(parent.path().join("out"));
        assert!(sink.read().await.unwrap().is_none());
    }
}
