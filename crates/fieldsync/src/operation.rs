//! Pending operation types.
//!
//! A [`PendingOperation`] is a write the remote store has not yet confirmed.
//! Operations are immutable once created: the queue only ever adds or removes
//! them whole.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::path::RecordPath;

/// URI scheme used for placeholders handed out for queued uploads.
pub const PLACEHOLDER_SCHEME: &str = "pending-upload://";

/// What a pending operation does once connectivity returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    /// Store a JSON document at a record path.
    Write {
        /// Target record path.
        path: RecordPath,
        /// Document to store.
        payload: Value,
    },

    /// Upload a local file and obtain its remote URL.
    UploadBinary {
        /// Destination path in the remote file store.
        remote_path: String,
        /// Local file to upload.
        local_resource: PathBuf,
        /// Identifier returned to the caller while the upload is pending.
        placeholder: String,
    },
}

impl OperationKind {
    /// Short name used in logs and the CLI.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Write { .. } => "write",
            Self::UploadBinary { .. } => "upload_binary",
        }
    }

    /// The remote location this operation targets.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Write { path, .. } => path.as_str(),
            Self::UploadBinary { remote_path, .. } => remote_path,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.target())
    }
}

/// A queued write awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique identifier assigned at creation.
    pub id: String,

    /// When the operation entered the queue.
    pub enqueued_at: DateTime<Utc>,

    /// The operation itself.
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl PendingOperation {
    /// Create a write operation.
    #[must_use]
    pub fn write(path: RecordPath, payload: Value) -> Self {
        Self::new(OperationKind::Write { path, payload })
    }

    /// Create an upload operation with a fresh placeholder derived from its id.
    #[must_use]
    pub fn upload_binary(remote_path: impl Into<String>, local_resource: PathBuf) -> Self {
        let id = Uuid::new_v4().to_string();
        let placeholder = format!("{PLACEHOLDER_SCHEME}{id}");
        Self {
            id,
            enqueued_at: Utc::now(),
            kind: OperationKind::UploadBinary {
                remote_path: remote_path.into(),
                local_resource,
                placeholder,
            },
        }
    }

    fn new(kind: OperationKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            enqueued_at: Utc::now(),
            kind,
        }
    }

    /// The placeholder of an upload operation.
    #[must_use]
    pub fn placeholder(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::UploadBinary { placeholder, .. } => Some(placeholder),
            OperationKind::Write { .. } => None,
        }
    }
}

/// Check whether a string is a pending-upload placeholder.
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    value.starts_with(PLACEHOLDER_SCHEME)
}
