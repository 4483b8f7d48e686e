//! Operations exchanged between the transaction coordinator and shard
//! participants during two-phase commit.

use serde::{Deserialize, Serialize};
use serde_json::Map;
use serde_json::Value;

/// Kind of a single operation within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    Read,
    Write,
    Delete,
}

/// A single operation targeting one (collection, id) pair. `data` carries
/// the full replacement payload for `WRITE`; absent for `READ`/`DELETE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OpType,
    pub collection: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Operation {
    #[must_use]
    pub fn write(collection: impl Into<String>, id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            op_type: OpType::Write,
            collection: collection.into(),
            document_id: id.into(),
            data: Some(data),
        }
    }

    #[must_use]
    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            op_type: OpType::Delete,
            collection: collection.into(),
            document_id: id.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn read(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            op_type: OpType::Read,
            collection: collection.into(),
            document_id: id.into(),
            data: None,
        }
    }
}

/// A participant's response to `PREPARE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareVote {
    Ok,
    Abort,
}
