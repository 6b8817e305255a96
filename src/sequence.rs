//! Sequence store: the ordered received→response table the virtual device runs.
//!
//! The store is write-through. Every mutation computes the complete candidate
//! table, sends it to the backend (`spi/sequences`) and only replaces the local
//! table once the backend has accepted it. A rejected mutation leaves the local
//! table exactly as it was.
//!
//! Hex strings are opaque here: the store neither checks hex digits nor byte
//! alignment. Interpretation is the backend's job.
//!
//! Import and export are purely local. An imported table reaches the backend
//! only through an explicit [`SequenceStore::save`] (or the next driver start).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::{BackendClient, SequencePayload};
use crate::error::{ClientError, Result};
use crate::inflight::{OperationClass, OperationSlot};

/// Opaque, store-unique identifier of a sequence entry.
///
/// New entries get UUIDs; numeric ids from older exports are kept as they are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceId {
    /// Legacy numeric id
    Numeric(u64),
    /// Token id
    Token(String),
}

impl SequenceId {
    /// A fresh, unique id.
    #[must_use]
    pub fn generate() -> Self {
        Self::Token(Uuid::new_v4().to_string())
    }

    /// Ids match when they print the same, so `42` and `"42"` name one entry.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a == b,
            (Self::Token(a), Self::Token(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Token(t) => f.write_str(t),
        }
    }
}

impl FromStr for SequenceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.parse::<u64>()
            .map(Self::Numeric)
            .unwrap_or_else(|_| Self::Token(s.to_string())))
    }
}

/// One received→response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEntry {
    /// Store-unique id
    pub id: SequenceId,
    /// Hex the device expects to receive
    pub received: String,
    /// Hex the device answers with
    pub response: String,
}

impl SequenceEntry {
    /// Wire form without the client-side id.
    #[must_use]
    pub fn payload(&self) -> SequencePayload {
        SequencePayload {
            received: self.received.clone(),
            response: self.response.clone(),
        }
    }
}

/// Entry shape accepted on import; the id may be missing.
#[derive(Debug, Deserialize)]
struct ImportedEntry {
    #[serde(default)]
    id: Option<SequenceId>,
    received: String,
    response: String,
}

/// Pending input for the next entry, kept until the backend accepts it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceDraft {
    /// Received-hex input
    pub received: String,
    /// Response-hex input
    pub response: String,
}

/// Convert entries to their ordered wire form.
#[must_use]
pub fn to_payload(entries: &[SequenceEntry]) -> Vec<SequencePayload> {
    entries.iter().map(SequenceEntry::payload).collect()
}

/// Write-through store of the sequence table.
#[derive(Debug)]
pub struct SequenceStore {
    entries: RwLock<Vec<SequenceEntry>>,
    draft: RwLock<SequenceDraft>,
    slot: OperationSlot,
    backend: BackendClient,
}

impl SequenceStore {
    /// Create an empty store.
    pub fn new(backend: BackendClient) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            draft: RwLock::new(SequenceDraft::default()),
            slot: OperationSlot::new(OperationClass::SequenceMutation),
            backend,
        }
    }

    /// Snapshot of the local table, in order.
    pub async fn entries(&self) -> Vec<SequenceEntry> {
        self.entries.read().await.clone()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the table is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Append an entry, committing locally only after the backend accepts
    /// the full resulting table.
    pub async fn add(&self, received: &str, response: &str) -> Result<SequenceEntry> {
        if received.trim().is_empty() || response.trim().is_empty() {
            return Err(ClientError::Validation(
                "both received and response must be non-empty".into(),
            ));
        }
        let _permit = self.slot.try_acquire()?;

        let entry = SequenceEntry {
            id: SequenceId::generate(),
            received: received.to_string(),
            response: response.to_string(),
        };
        let mut candidate = self.entries().await;
        candidate.push(entry.clone());

        self.commit(candidate).await?;
        tracing::info!(id = %entry.id, received = %entry.received, "Added sequence");
        Ok(entry)
    }

    /// Remove the entry with `id`, committing locally only after the backend
    /// accepts the full resulting table.
    pub async fn remove(&self, id: &SequenceId) -> Result<()> {
        let _permit = self.slot.try_acquire()?;

        let current = self.entries().await;
        if !current.iter().any(|e| e.id.matches(id)) {
            return Err(ClientError::Validation(format!("no sequence with id {id}")));
        }
        let candidate: Vec<_> = current.into_iter().filter(|e| !e.id.matches(id)).collect();

        self.commit(candidate).await?;
        tracing::info!(%id, "Removed sequence");
        Ok(())
    }

    /// Push the current local table to the backend unchanged.
    pub async fn save(&self) -> Result<()> {
        let _permit = self.slot.try_acquire()?;
        let current = self.entries().await;
        let count = current.len();
        self.commit(current).await?;
        tracing::info!(count, "Synchronized sequence table");
        Ok(())
    }

    async fn commit(&self, candidate: Vec<SequenceEntry>) -> Result<()> {
        if let Err(e) = self.backend.replace_sequences(&to_payload(&candidate)).await {
            tracing::warn!(error = %e, "Backend rejected sequence table, keeping local state");
            return Err(e);
        }
        *self.entries.write().await = candidate;
        Ok(())
    }

    /// Current draft input.
    pub async fn draft(&self) -> SequenceDraft {
        self.draft.read().await.clone()
    }

    /// Replace the draft input.
    pub async fn set_draft(&self, received: impl Into<String>, response: impl Into<String>) {
        *self.draft.write().await = SequenceDraft {
            received: received.into(),
            response: response.into(),
        };
    }

    /// Add the draft; the draft is cleared only if the add succeeds.
    pub async fn submit_draft(&self) -> Result<SequenceEntry> {
        let draft = self.draft().await;
        let entry = self.add(&draft.received, &draft.response).await?;
        *self.draft.write().await = SequenceDraft::default();
        Ok(entry)
    }

    /// Replace the local table from exported JSON. Never contacts the backend.
    ///
    /// Only a top-level array of `{id?, received, response}` objects with
    /// distinct ids is accepted; anything else leaves the table untouched.
    pub async fn import_from(&self, text: &str) -> Result<usize> {
        let entries = parse_sequences_json(text)?;
        let count = entries.len();
        *self.entries.write().await = entries;
        tracing::info!(count, "Imported sequence table");
        Ok(count)
    }

    /// Pretty-printed JSON of the local table.
    pub async fn export_to(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.entries.read().await)?)
    }
}

/// Parse an exported sequence table.
pub fn parse_sequences_json(text: &str) -> Result<Vec<SequenceEntry>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ClientError::ImportFormat(format!("not valid JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(ClientError::ImportFormat(
            "expected a JSON array of sequences".into(),
        ));
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let imported: ImportedEntry = serde_json::from_value(item).map_err(|e| {
            ClientError::ImportFormat(format!("sequence #{index} is malformed: {e}"))
        })?;
        let id = imported.id.unwrap_or_else(SequenceId::generate);
        if !seen.insert(id.to_string()) {
            return Err(ClientError::ImportFormat(format!("duplicate sequence id {id}")));
        }
        entries.push(SequenceEntry {
            id,
            received: imported.received,
            response: imported.response,
        });
    }
    Ok(entries)
}
