//! Versioned envelope for persisted states and stores.
//!
//! A paused execution is resumed from a persisted `State`, and a finished
//! one is inspected from its persisted `Store`. Both are written as JSON
//! wrapped in `{version, payload}` so that readers can refuse data written
//! by a newer engine before trying to decode it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// Errors from reading or writing persisted envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The envelope was written by a newer version of the format.
    UnsupportedVersion { found: u32 },
    /// The bytes are not an envelope, or the payload has the wrong shape.
    Malformed { reason: String },
    /// The envelope could not be encoded.
    Encode { reason: String },
    /// Reading or writing the file failed.
    Io { path: PathBuf, reason: String },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found } => write!(
                f,
                "envelope version {found} is newer than the supported version {CURRENT_VERSION}"
            ),
            Self::Malformed { reason } => write!(f, "malformed envelope: {reason}"),
            Self::Encode { reason } => write!(f, "failed to encode envelope: {reason}"),
            Self::Io { path, reason } => write!(f, "{}: {reason}", path.display()),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// A versioned wrapper around a persisted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The version of the envelope format.
    pub version: u32,
    /// The wrapped payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload with the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Unwraps the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Returns a reference to the payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Encodes the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json_bytes(&self) -> trellis_core::Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| {
            EnvelopeError::Encode {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Writes the envelope to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_to(&self, path: impl AsRef<Path>) -> trellis_core::Result<(), EnvelopeError> {
        let path = path.as_ref();
        let bytes = self.to_json_bytes()?;
        std::fs::write(path, bytes).map_err(|e| io_error(path, &e))?;
        tracing::debug!(path = %path.display(), version = self.version, "wrote envelope");
        Ok(())
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes an envelope, refusing versions newer than `CURRENT_VERSION`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are malformed or the version is
    /// unsupported.
    pub fn from_json_bytes(bytes: &[u8]) -> trellis_core::Result<Self, EnvelopeError> {
        RawEnvelope::from_json_bytes(bytes)?.decode()
    }

    /// Reads and decodes the envelope stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn read_from(path: impl AsRef<Path>) -> trellis_core::Result<Self, EnvelopeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| io_error(path, &e))?;
        Self::from_json_bytes(&bytes)
    }
}

/// An envelope whose payload has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEnvelope {
    /// The version of the envelope format.
    pub version: u32,
    /// The undecoded payload.
    pub payload: serde_json::Value,
}

impl RawEnvelope {
    /// Parses the envelope frame only.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON envelope.
    pub fn from_json_bytes(bytes: &[u8]) -> trellis_core::Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| malformed(&e).into())
    }

    /// Returns true if this version can be decoded.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.version <= CURRENT_VERSION
    }

    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is unsupported or the payload does
    /// not match `T`.
    pub fn decode<T: DeserializeOwned>(self) -> trellis_core::Result<Envelope<T>, EnvelopeError> {
        if !self.is_supported() {
            return Err(EnvelopeError::UnsupportedVersion {
                found: self.version,
            }
            .into());
        }
        let payload = serde_json::from_value(self.payload).map_err(|e| malformed(&e))?;
        Ok(Envelope {
            version: self.version,
            payload,
        })
    }
}

fn malformed(error: &serde_json::Error) -> EnvelopeError {
    EnvelopeError::Malformed {
        reason: error.to_string(),
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> EnvelopeError {
    EnvelopeError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}
