//! tlog-checkpoint text format.
//!
//! The body is `origin\nsize\nbase64(root)\n`, wrapped in a signed note.
//! Signing and verification live with the witness gateway; this module only
//! reads and writes the body, tolerating a trailing signature block separated
//! by a blank line.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use crate::TreeSize;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint is not valid utf-8")]
    NotText,

    #[error("checkpoint body is missing a field")]
    MissingField,

    #[error("invalid tree size: {0}")]
    InvalidSize(String),

    #[error("invalid root hash encoding")]
    InvalidRoot,
}

/// The unsigned body of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub origin: String,
    pub size: TreeSize,
    pub root_hash: [u8; 32],
}

impl Checkpoint {
    /// Parse the body of a (possibly signed) checkpoint note.
    pub fn parse(raw: &[u8]) -> Result<Self, CheckpointError> {
        let text = std::str::from_utf8(raw).map_err(|_| CheckpointError::NotText)?;

        // a signed note separates body and signatures with a blank line
        let body = text.split("\n\n").next().unwrap_or(text);
        let mut lines = body.lines();

        let origin = lines.next().ok_or(CheckpointError::MissingField)?;
        if origin.is_empty() {
            return Err(CheckpointError::MissingField);
        }

        let size = lines.next().ok_or(CheckpointError::MissingField)?;
        let size: TreeSize = size
            .parse()
            .map_err(|_| CheckpointError::InvalidSize(size.to_string()))?;

        let root = lines.next().ok_or(CheckpointError::MissingField)?;
        let root = BASE64
            .decode(root)
            .map_err(|_| CheckpointError::InvalidRoot)?;
        let root_hash: [u8; 32] = root.try_into().map_err(|_| CheckpointError::InvalidRoot)?;

        Ok(Self {
            origin: origin.to_string(),
            size,
            root_hash,
        })
    }

    /// Render the checkpoint body, ready to be wrapped in a signed note.
    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            self.origin,
            self.size,
            BASE64.encode(self.root_hash)
        )
    }
}
