//! Filesystem artifact resolver for Hardhat-style build output.
//!
//! Layout: `<root>/contracts/<Source>.sol/<Name>.json`, each file holding at
//! least `"abi"` and `"bytecode"`. The resolver searches `root` recursively
//! for `<Name>.json`, so flat directories of artifact files work as well.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backend_traits::{
    Artifact, ArtifactResolver, ArtifactResult, Bundle, InterfaceDescriptor,
};
use crate::error::ArtifactError;

#[derive(Debug, Deserialize)]
struct ArtifactFile {
    abi: Option<serde_json::Value>,
    bytecode: Option<String>,
}

/// Resolves artifacts from a directory tree of JSON files.
#[derive(Debug, Clone)]
pub struct FsArtifactResolver {
    root: PathBuf,
}

impl FsArtifactResolver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate `<name>.json` under the root, skipping `*.dbg.json` files.
    fn find(&self, name: &str) -> ArtifactResult<Option<PathBuf>> {
        let file_name = format!("{name}.json");
        if !self.root.is_dir() {
            return Ok(None);
        }

        let mut pending = vec![self.root.clone()];
        let mut matches = Vec::new();
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.file_name().and_then(|f| f.to_str()) == Some(file_name.as_str()) {
                    matches.push(path);
                }
            }
        }
        // Shortest path wins; ties broken lexically for a stable choice.
        matches.sort_by(|a, b| {
            a.components()
                .count()
                .cmp(&b.components().count())
                .then_with(|| a.cmp(b))
        });
        Ok(matches.into_iter().next())
    }
}

#[async_trait]
impl ArtifactResolver for FsArtifactResolver {
    async fn resolve(&self, name: &str) -> ArtifactResult<Artifact> {
        let path = self.find(name)?.ok_or_else(|| ArtifactError::NotFound {
            name: name.to_string(),
        })?;
        debug!(component = %name, path = %path.display(), "resolved artifact file");

        let raw = fs::read_to_string(&path)?;
        let file: ArtifactFile =
            serde_json::from_str(&raw).map_err(|e| ArtifactError::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let bytecode = file.bytecode.ok_or_else(|| ArtifactError::Malformed {
            name: name.to_string(),
            reason: "missing bytecode".to_string(),
        })?;
        let bundle = Bundle::from_hex(&bytecode).map_err(|e| ArtifactError::Malformed {
            name: name.to_string(),
            reason: format!("bytecode is not hex: {e}"),
        })?;
        if bundle.is_empty() {
            return Err(ArtifactError::Malformed {
                name: name.to_string(),
                reason: "empty bytecode (abstract contract or interface?)".to_string(),
            });
        }

        let abi = file.abi.ok_or_else(|| ArtifactError::Malformed {
            name: name.to_string(),
            reason: "missing abi".to_string(),
        })?;

        Ok(Artifact {
            name: name.to_string(),
            bundle,
            interface: InterfaceDescriptor(abi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn resolves_nested_hardhat_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "contracts/Ticket.sol/Ticket.json",
            r#"{"contractName":"Ticket","abi":[{"type":"constructor"}],"bytecode":"0x6080"}"#,
        );
        write(
            dir.path(),
            "contracts/Ticket.sol/Ticket.dbg.json",
            r#"{"buildInfo":"x"}"#,
        );

        let resolver = FsArtifactResolver::new(dir.path());
        let artifact = resolver.resolve("Ticket").await.unwrap();
        assert_eq!(artifact.bundle, Bundle(vec![0x60, 0x80]));
        assert_eq!(artifact.interface.0[0]["type"], "constructor");
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FsArtifactResolver::new(dir.path());
        let err = resolver.resolve("Marketplace").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { name } if name == "Marketplace"));
    }

    #[tokio::test]
    async fn missing_root_is_not_found() {
        let resolver = FsArtifactResolver::new("/definitely/not/here");
        let err = resolver.resolve("Ticket").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_bytecode_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "IThing.json", r#"{"abi":[],"bytecode":"0x"}"#);
        let resolver = FsArtifactResolver::new(dir.path());
        let err = resolver.resolve("IThing").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Malformed { .. }));
    }

    #[tokio::test]
    async fn shallowest_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Ticket.json", r#"{"abi":[],"bytecode":"0x01"}"#);
        write(
            dir.path(),
            "deep/er/Ticket.json",
            r#"{"abi":[],"bytecode":"0x02"}"#,
        );
        let resolver = FsArtifactResolver::new(dir.path());
        let artifact = resolver.resolve("Ticket").await.unwrap();
        assert_eq!(artifact.bundle, Bundle(vec![0x01]));
    }
}
