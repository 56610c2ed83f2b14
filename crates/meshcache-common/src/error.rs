//! Error types for MeshCache
//!
//! One error taxonomy is carried end to end: handlers translate it to HTTP
//! status codes, the peer RPC layer translates it to and from `tonic::Status`.

use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

/// Metadata key carrying the structured error kind on peer RPC failures.
pub const ERROR_TAG_KEY: &str = "x-cache-error";

/// Metadata key carrying the raw inner message for `Internal`/`Network`
/// errors, so reconstruction does not pick up the Display prefix.
pub const ERROR_DETAIL_KEY: &str = "x-cache-error-detail";

/// Common result type for MeshCache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Common error type for MeshCache
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("key is empty")]
    EmptyKey,

    #[error("key not found")]
    NotFound,

    #[error("cache group not found")]
    NoSuchGroup,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("network error: {0}")]
    Network(String),
}

impl CacheError {
    /// Create an internal error wrapping an origin failure
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error for an unreachable or timed-out peer
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Check if this is a not found error (key or group)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoSuchGroup)
    }

    /// Check if this error means the peer could not be reached at all
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Get the HTTP status code for the client-facing API
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::EmptyKey => 400,
            Self::NotFound | Self::NoSuchGroup => 404,
            // Network errors are swallowed by the origin fallback; if one
            // surfaces anyway it is an internal failure to the client.
            Self::Internal(_) | Self::Network(_) => 500,
        }
    }

    /// Get the gRPC status code for the peer API
    #[must_use]
    pub fn grpc_code(&self) -> Code {
        match self {
            Self::EmptyKey => Code::InvalidArgument,
            Self::NotFound | Self::NoSuchGroup => Code::NotFound,
            Self::Internal(_) => Code::Internal,
            Self::Network(_) => Code::Unavailable,
        }
    }

    /// Stable tag carried in `x-cache-error` metadata on the wire
    #[must_use]
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Self::EmptyKey => "empty_key",
            Self::NotFound => "not_found",
            Self::NoSuchGroup => "no_such_group",
            Self::Internal(_) => "internal",
            Self::Network(_) => "network",
        }
    }

    /// Convert into a `tonic::Status`, attaching the structured kind tag
    #[must_use]
    pub fn to_status(&self) -> Status {
        let mut status = Status::new(self.grpc_code(), self.to_string());
        if let Ok(tag) = MetadataValue::try_from(self.wire_tag()) {
            status.metadata_mut().insert(ERROR_TAG_KEY, tag);
        }
        if let Self::Internal(detail) | Self::Network(detail) = self {
            if let Ok(detail) = MetadataValue::try_from(detail.as_str()) {
                status.metadata_mut().insert(ERROR_DETAIL_KEY, detail);
            }
        }
        status
    }

    /// Reconstruct the error kind from a peer `tonic::Status`.
    ///
    /// Resolution order: the `x-cache-error` metadata tag, then the gRPC
    /// status code, then substring matching on the message. The substring
    /// path exists only for owners that predate the tag.
    #[must_use]
    pub fn from_status(status: &Status) -> Self {
        if let Some(tag) = status.metadata().get(ERROR_TAG_KEY) {
            match tag.to_str().unwrap_or_default() {
                "empty_key" => return Self::EmptyKey,
                "not_found" => return Self::NotFound,
                "no_such_group" => return Self::NoSuchGroup,
                "internal" => return Self::Internal(Self::detail(status, "internal error: ")),
                "network" => return Self::Network(Self::detail(status, "network error: ")),
                _ => {}
            }
        }

        let message = status.message();
        match status.code() {
            Code::InvalidArgument => Self::EmptyKey,
            Code::NotFound => {
                if message.contains("group") {
                    Self::NoSuchGroup
                } else {
                    Self::NotFound
                }
            }
            Code::Unavailable | Code::DeadlineExceeded => Self::Network(message.to_string()),
            _ => {
                // Legacy owners report kinds only through the message text.
                if message.contains("key is empty") {
                    Self::EmptyKey
                } else if message.contains("group not found") || message.contains("no such group") {
                    Self::NoSuchGroup
                } else if message.contains("not found") || message.contains("not exist") {
                    Self::NotFound
                } else {
                    Self::Internal(message.to_string())
                }
            }
        }
    }

    /// Inner message for `Internal`/`Network` statuses: the detail metadata
    /// when the owner sent it, otherwise the status message with the known
    /// Display prefix stripped.
    fn detail(status: &Status, prefix: &str) -> String {
        if let Some(detail) = status.metadata().get(ERROR_DETAIL_KEY) {
            if let Ok(detail) = detail.to_str() {
                return detail.to_string();
            }
        }
        let message = status.message();
        message.strip_prefix(prefix).unwrap_or(message).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(CacheError::EmptyKey.http_status(), 400);
        assert_eq!(CacheError::NotFound.http_status(), 404);
        assert_eq!(CacheError::NoSuchGroup.http_status(), 404);
        assert_eq!(CacheError::internal("boom").http_status(), 500);
    }

    #[test]
    fn test_status_round_trip() {
        for err in [
            CacheError::EmptyKey,
            CacheError::NotFound,
            CacheError::NoSuchGroup,
            CacheError::Internal("origin failed".into()),
            CacheError::Network("connection refused".into()),
        ] {
            let status = err.to_status();
            assert_eq!(CacheError::from_status(&status), err);
        }
    }

    #[test]
    fn test_tagged_status_without_detail_strips_display_prefix() {
        // An owner that sends the kind tag but not the detail value; the
        // inner message must not accumulate the Display prefix.
        let mut status = Status::new(Code::Internal, "internal error: origin failed");
        status
            .metadata_mut()
            .insert(ERROR_TAG_KEY, MetadataValue::from_static("internal"));
        assert_eq!(
            CacheError::from_status(&status),
            CacheError::Internal("origin failed".into())
        );
    }

    #[test]
    fn test_from_status_without_tag_uses_code() {
        let status = Status::new(Code::NotFound, "key not found");
        assert_eq!(CacheError::from_status(&status), CacheError::NotFound);

        let status = Status::new(Code::NotFound, "cache group not found");
        assert_eq!(CacheError::from_status(&status), CacheError::NoSuchGroup);

        let status = Status::new(Code::DeadlineExceeded, "timed out");
        assert!(CacheError::from_status(&status).is_network());
    }

    #[test]
    fn test_from_status_legacy_message_matching() {
        let status = Status::new(Code::Unknown, "remote: key not found");
        assert_eq!(CacheError::from_status(&status), CacheError::NotFound);

        let status = Status::new(Code::Unknown, "remote: no such group");
        assert_eq!(CacheError::from_status(&status), CacheError::NoSuchGroup);

        let status = Status::new(Code::Unknown, "something else");
        assert!(matches!(
            CacheError::from_status(&status),
            CacheError::Internal(_)
        ));
    }
}
