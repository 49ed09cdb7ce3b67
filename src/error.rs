//! Error types for the profile photo server

use thiserror::Error;

/// Result type alias for the profile photo server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the profile photo server
#[derive(Error, Debug)]
pub enum Error {
    /// Request is missing the document or the document is empty
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Input is not a parsable PDF document
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// An embedded image could not be pulled out of the document
    #[error("Failed to extract image {index} on page {page}: {reason}")]
    ImageExtraction {
        page: usize,
        index: usize,
        reason: String,
    },

    /// Extracted image bytes could not be decoded into pixels
    #[error("Failed to decode image {index} on page {page}: {reason}")]
    ImageDecode {
        page: usize,
        index: usize,
        reason: String,
    },

    /// Detection model could not be loaded
    #[error("Failed to load face model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    /// Face detection failed
    #[error("Face detection failed: {reason}")]
    Detection { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// Unexpected failure in the request machinery (worker panics, join errors)
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::InvalidRequest { reason } => reason.clone(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF document".to_string(),
            Error::ImageExtraction { .. } => "Image extraction error".to_string(),
            Error::ImageDecode { .. } => "Image decode error".to_string(),
            Error::ModelLoad { .. } => "Face detection model unavailable".to_string(),
            Error::Detection { .. } => "Face detection error".to_string(),
            Error::Config { .. } => "Server configuration error".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
        }
    }

    /// Whether the caller is at fault (bad or missing input)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidRequest { .. } | Error::Base64Decode(_))
    }

    /// Per-image failures only disqualify the image, never the request
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ImageExtraction { .. } | Error::ImageDecode { .. }
        )
    }

    pub(crate) fn missing_document() -> Self {
        Error::InvalidRequest {
            reason: "Missing pdf_base64".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn test_client_message_hides_details() {
        let err = Error::InvalidPdf {
            reason: "xref table at offset 1234 is corrupt".to_string(),
        };
        assert_eq!(err.client_message(), "Invalid PDF document");

        let err = Error::ModelLoad {
            path: "/etc/secret/model.json".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(!err.client_message().contains("/etc/secret"));
    }

    #[test]
    fn test_invalid_request_message_is_passed_through() {
        assert_eq!(Error::missing_document().client_message(), "Missing pdf_base64");
    }

    #[test]
    fn test_error_classification() {
        let decode_err = base64::engine::general_purpose::STANDARD
            .decode("@@@")
            .unwrap_err();
        assert!(Error::from(decode_err).is_client_error());
        assert!(Error::missing_document().is_client_error());
        assert!(!Error::InvalidPdf {
            reason: String::new()
        }
        .is_client_error());

        let skip = Error::ImageDecode {
            page: 0,
            index: 1,
            reason: "truncated".to_string(),
        };
        assert!(skip.is_recoverable());
        assert!(!Error::Detection {
            reason: String::new()
        }
        .is_recoverable());
    }
}
