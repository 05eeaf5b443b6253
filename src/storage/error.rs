// Storage error types

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// Errors reported by an object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("The specified multipart upload does not exist: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("Part number must be between 1 and 10000, got {0}")]
    InvalidPartNumber(u32),

    #[error("The multipart upload must list at least one part")]
    NoParts,

    #[error("The list of parts was not in ascending order")]
    InvalidPartOrder,

    #[error("Part {part_number} could not be found or its etag does not match")]
    InvalidPart { part_number: u32 },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt storage metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the backend explicitly rejected the request, as opposed to
    /// failing internally
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Metadata(_))
    }

    /// Stable name of the error variant
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidPartNumber(_) => "InvalidPartNumber",
            Self::NoParts => "NoParts",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::Io(_) | Self::Metadata(_) => "InternalError",
        }
    }

    pub(crate) fn no_such_upload(upload_id: &str) -> Self {
        Self::NoSuchUpload {
            upload_id: upload_id.to_string(),
        }
    }
}

/// Serialized as `{"error": <kind>, "message": <display>}`
impl Serialize for StoreError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StoreError", 2)?;
        state.serialize_field("error", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
