//! Core data types for the retrieval pipeline.
//!
//! Records are owned by the external relational store; the retrieval core
//! only sees them through [`RecordChange`] notifications and keeps a
//! [`RecordSnapshot`] of their narrative text. [`Chunk`]s are derived from
//! snapshots and owned exclusively by the indexer that wrote them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, RetrievalError};

/// Identifier of a record in the external relational store.
pub type RecordId = i64;

/// Narrative field a chunk was extracted from.
///
/// The archive's record kinds carry their free text in a small, closed set
/// of columns: containment procedures and descriptions for anomalous
/// objects, notes for personnel and task forces, summaries for incident
/// reports, and purpose statements for facilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceField {
    Procedures,
    Description,
    Notes,
    Summary,
    Purpose,
}

impl SourceField {
    pub const ALL: [SourceField; 5] = [
        SourceField::Procedures,
        SourceField::Description,
        SourceField::Notes,
        SourceField::Summary,
        SourceField::Purpose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceField::Procedures => "procedures",
            SourceField::Description => "description",
            SourceField::Notes => "notes",
            SourceField::Summary => "summary",
            SourceField::Purpose => "purpose",
        }
    }
}

impl fmt::Display for SourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceField {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "procedures" => Ok(SourceField::Procedures),
            "description" => Ok(SourceField::Description),
            "notes" => Ok(SourceField::Notes),
            "summary" => Ok(SourceField::Summary),
            "purpose" => Ok(SourceField::Purpose),
            other => Err(RetrievalError::InvalidChange(format!(
                "unknown narrative field '{}'",
                other
            ))),
        }
    }
}

/// Kind of committed write on the canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl FromStr for ChangeKind {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(ChangeKind::Created),
            "updated" => Ok(ChangeKind::Updated),
            "deleted" => Ok(ChangeKind::Deleted),
            other => Err(RetrievalError::InvalidChange(format!(
                "unknown change kind '{}'",
                other
            ))),
        }
    }
}

/// Untrusted change notification as it arrives over the wire.
///
/// Convert with [`RecordChange::try_from`] before acting on it.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordChangePayload {
    pub record_id: RecordId,
    pub change_kind: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// A validated change notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordChange {
    pub record_id: RecordId,
    pub change_kind: ChangeKind,
    pub fields: BTreeMap<SourceField, String>,
}

impl RecordChange {
    /// Parse and validate a JSON change notification.
    pub fn from_json(json: &str) -> Result<Self> {
        let payload: RecordChangePayload = serde_json::from_str(json)
            .map_err(|e| RetrievalError::InvalidChange(e.to_string()))?;
        Self::try_from(payload)
    }
}

impl TryFrom<RecordChangePayload> for RecordChange {
    type Error = RetrievalError;

    fn try_from(payload: RecordChangePayload) -> Result<Self> {
        if payload.record_id <= 0 {
            return Err(RetrievalError::InvalidChange(format!(
                "record_id must be positive, got {}",
                payload.record_id
            )));
        }

        let change_kind: ChangeKind = payload.change_kind.parse()?;

        let mut fields = BTreeMap::new();
        for (name, text) in payload.fields {
            let field: SourceField = name.parse()?;
            if fields.insert(field, text).is_some() {
                return Err(RetrievalError::InvalidChange(format!(
                    "field '{}' given more than once",
                    field
                )));
            }
        }

        if change_kind != ChangeKind::Deleted && fields.is_empty() {
            return Err(RetrievalError::InvalidChange(
                "created/updated changes must carry at least one narrative field".to_string(),
            ));
        }

        Ok(Self {
            record_id: payload.record_id,
            change_kind,
            fields,
        })
    }
}

/// The last narrative text received for a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub record_id: RecordId,
    pub fields: BTreeMap<SourceField, String>,
    /// SHA-256 over the ordered `(field, text)` pairs.
    pub content_hash: String,
    /// Unix timestamp of when the snapshot was received.
    pub updated_at: i64,
}

impl RecordSnapshot {
    pub fn new(record_id: RecordId, fields: BTreeMap<SourceField, String>) -> Self {
        let content_hash = hash_fields(&fields);
        Self {
            record_id,
            fields,
            content_hash,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

fn hash_fields(fields: &BTreeMap<SourceField, String>) -> String {
    let mut hasher = Sha256::new();
    for (field, text) in fields {
        hasher.update(field.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of a chunk's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One embedded segment of a record's narrative text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub record_id: RecordId,
    pub source_field: SourceField,
    /// Zero-based position within the source field's chunk sequence.
    pub ordinal: i64,
    pub text: String,
    pub hash: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

/// Row produced by a full store scan. Carries the text so a hit never
/// needs a second read that a concurrent replace could invalidate.
#[derive(Debug, Clone)]
pub struct ChunkVector {
    pub chunk_id: String,
    pub record_id: RecordId,
    pub source_field: SourceField,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Indexing state of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexState {
    NoChunks,
    Indexed,
    Reindexing,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexState::NoChunks => "no-chunks",
            IndexState::Indexed => "indexed",
            IndexState::Reindexing => "reindexing",
        })
    }
}
