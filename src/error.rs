//! Error types shared by the scraper, checker and geolocation tools

use thiserror::Error;

/// Crate-wide error type.
///
/// Per-source and per-record failures are absorbed by the pipeline and turned
/// into statistics; only `Configuration` is meant to stop a tool.
#[derive(Debug, Error)]
pub enum Error {
    /// One source could not be fetched or its payload could not be understood
    #[error("source {id} failed: {reason}")]
    SourceFetch { id: String, reason: String },

    /// A single line, row or record did not describe a `host:port` endpoint
    #[error("invalid record {record:?}: {reason}")]
    InvalidFormat { record: String, reason: String },

    /// The geolocation provider could not answer for this address
    #[error("geolocation lookup unavailable for {ip}: {reason}")]
    LookupUnavailable { ip: String, reason: String },

    /// Invalid arguments or configuration assets
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn source_fetch(id: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceFetch {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_format(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidFormat {
            record: record.into(),
            reason: reason.into(),
        }
    }

    pub fn lookup_unavailable(ip: impl Into<String>, reason: impl ToString) -> Self {
        Error::LookupUnavailable {
            ip: ip.into(),
            reason: reason.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// True for errors that should abort a tool before it starts working
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::source_fetch("spys.me/http", "HTTP status 503");
        assert_eq!(err.to_string(), "source spys.me/http failed: HTTP status 503");

        let err = Error::invalid_format("not-a-line", "missing port");
        assert!(err.to_string().contains("not-a-line"));
    }

    #[test]
    fn test_result_alias_carries_crate_error() {
        fn load() -> Result<u16> {
            Err(Error::configuration("missing list"))
        }
        assert!(load().unwrap_err().is_fatal());
        let ok: crate::Result<u16> = Ok(8080);
        assert_eq!(ok.unwrap(), 8080);
    }

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(Error::configuration("timeout must be positive").is_fatal());
        assert!(!Error::lookup_unavailable("1.2.3.4", "timed out").is_fatal());
        assert!(!Error::source_fetch("x", "y").is_fatal());
    }
}
