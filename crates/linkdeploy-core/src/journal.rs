//! Ordered record of the side effects of a run.

use chrono::{DateTime, Utc};
use linkdeploy_backend::{Address, Receipt};
use serde::{Deserialize, Serialize};

use crate::error::InFlight;

/// A backend action of a run: confirmed, or sent with an unknown outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Deployed {
        position: usize,
        component: String,
        address: Address,
        at: DateTime<Utc>,
    },
    Patched {
        source: String,
        dependency: String,
        method: String,
        receipt: Receipt,
        at: DateTime<Utc>,
    },
    /// Sent, but never confirmed. Always the last entry of a journal.
    InDoubt {
        #[serde(flatten)]
        action: InFlight,
        at: DateTime<Utc>,
    },
}

impl JournalEntry {
    pub fn deployed(position: usize, component: &str, address: Address) -> Self {
        JournalEntry::Deployed {
            position,
            component: component.to_string(),
            address,
            at: Utc::now(),
        }
    }

    pub fn patched(action: &PatchAction, receipt: Receipt) -> Self {
        JournalEntry::Patched {
            source: action.source.clone(),
            dependency: action.dependency.clone(),
            method: action.method.clone(),
            receipt,
            at: Utc::now(),
        }
    }

    pub fn in_doubt(action: InFlight) -> Self {
        JournalEntry::InDoubt {
            action,
            at: Utc::now(),
        }
    }
}

/// A patch call with every address resolved, ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchAction {
    pub source: String,
    pub dependency: String,
    /// Address of `source`.
    pub target_address: Address,
    pub method: String,
    pub argument_addresses: Vec<Address>,
}
