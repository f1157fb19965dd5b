//! Error types for linkdeploy-backend

use thiserror::Error;

/// Errors raised while resolving a component's build artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// No artifact exists for the component name
    #[error("artifact not found for component: {name}")]
    NotFound { name: String },

    /// The artifact exists but cannot be used (missing bytecode, bad hex, ...)
    #[error("malformed artifact for component {name}: {reason}")]
    Malformed { name: String, reason: String },

    /// IO error while reading artifacts
    #[error("artifact IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by an execution backend.
///
/// The split matters to callers: `Unavailable` is transient and nothing was
/// submitted, `Rejected` is a durable refusal, and `Unconfirmed` means the
/// action was submitted and may still take effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Transport failure or overload before anything was submitted
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused or reverted the action
    #[error("backend rejected action: {0}")]
    Rejected(String),

    /// Submitted as `tx_hash`, but durability was never confirmed
    #[error("transaction {tx_hash} submitted but not confirmed: {reason}")]
    Unconfirmed { tx_hash: String, reason: String },
}

impl BackendError {
    /// `true` for failures that may succeed on a later attempt without
    /// risking a duplicate.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    /// Hash of the submitted transaction whose outcome is unknown.
    pub fn unconfirmed_tx(&self) -> Option<&str> {
        match self {
            BackendError::Unconfirmed { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        // Every reqwest-level failure is a transport problem; JSON-RPC
        // error objects are classified separately by the RPC client.
        BackendError::Unavailable(err.to_string())
    }
}

/// Errors raised by a manifest sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink refused or failed the write
    #[error("manifest write failed: {0}")]
    Write(String),

    /// Manifest (de)serialization failed
    #[error("manifest serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("manifest IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient_rejected_is_not() {
        assert!(BackendError::Unavailable("timeout".into()).is_transient());
        assert!(!BackendError::Rejected("revert".into()).is_transient());
    }

    #[test]
    fn unconfirmed_is_neither_transient_nor_a_refusal() {
        let err = BackendError::Unconfirmed {
            tx_hash: "0x11".into(),
            reason: "no receipt".into(),
        };
        assert!(!err.is_transient());
        assert_eq!(err.unconfirmed_tx(), Some("0x11"));
        assert!(err.to_string().contains("0x11"));
        assert_eq!(BackendError::Rejected("x".into()).unconfirmed_tx(), None);
    }

    #[test]
    fn artifact_not_found_names_component() {
        let err = ArtifactError::NotFound {
            name: "Ticket".to_string(),
        };
        assert!(err.to_string().contains("Ticket"));
    }
}
