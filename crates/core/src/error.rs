use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed taxonomy of failure kinds the dispatcher can surface to clients.
///
/// Handlers translate into this type at the component boundary; nothing
/// else crosses the dispatcher as an exception.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} is required")]
    ArgumentMissing(String),

    #[error("invalid argument {name}: {reason}")]
    ArgumentInvalid { name: String, reason: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("captcha detected")]
    CaptchaDetected,

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("unknown export format: {0}")]
    UnknownExportFormat(String),

    #[error("shutting down")]
    Shutdown,

    #[error("page gone: {0}")]
    PageGone(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("certificate invalid: {0}")]
    CertificateInvalid(String),

    #[error("no proxy available")]
    ProxyUnavailable,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Stable tag used to populate the `kind` field of a response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ArgumentMissing(_) => "argument_missing",
            Error::ArgumentInvalid { .. } => "argument_invalid",
            Error::UnknownCommand(_) => "unknown_command",
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::IllegalState(_) => "illegal_state",
            Error::LimitExceeded(_) => "limit_exceeded",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::Timeout(_) => "timeout",
            Error::CaptchaDetected => "captcha_detected",
            Error::VerificationFailed(_) => "verification_failed",
            Error::UnknownExportFormat(_) => "unknown_export_format",
            Error::Shutdown => "shutdown",
            Error::PageGone(_) => "page_gone",
            Error::TransportClosed => "transport_closed",
            Error::CertificateInvalid(_) => "certificate_invalid",
            Error::ProxyUnavailable => "proxy_unavailable",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound { kind, id: id.into() }
    }

    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        Error::AlreadyExists { kind, id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(Error::ArgumentMissing("url".into()).kind(), "argument_missing");
        assert_eq!(Error::CaptchaDetected.kind(), "captcha_detected");
        assert_eq!(
            Error::not_found("jar", "scratch").kind(),
            "not_found"
        );
    }

    #[test]
    fn argument_missing_message_matches_protocol_wording() {
        let err = Error::ArgumentMissing("url".into());
        assert_eq!(err.to_string(), "url is required");
    }
}
