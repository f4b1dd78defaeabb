use std::fmt;

/// Error taxonomy for the MBSTF core, mirroring the failure modes surfaced
/// across the session lifecycle, ingesters, and packager.
#[derive(Debug)]
pub enum CoreError {
    /// Session or object id absent.
    NotFound(String),
    /// Malformed JSON, wrong content type, wrong API version, invalid path.
    BadRequest(String),
    /// Unexpected allocation/IO failure.
    Internal(String),
    /// Manifest parse/validation failure.
    InvalidManifest(String),
    /// Pull fetch timed out.
    TransportTimeout(String),
    /// Pull fetch failed for a reason other than timeout.
    TransportError(String),
    /// Session parameters are invalid for the requested mode (e.g. STREAMING
    /// with missing required fields, an unparsable MBR).
    SessionConfigError(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotFound(s) => write!(f, "not found: {s}"),
            CoreError::BadRequest(s) => write!(f, "bad request: {s}"),
            CoreError::Internal(s) => write!(f, "internal error: {s}"),
            CoreError::InvalidManifest(s) => write!(f, "invalid manifest: {s}"),
            CoreError::TransportTimeout(s) => write!(f, "transport timeout: {s}"),
            CoreError::TransportError(s) => write!(f, "transport error: {s}"),
            CoreError::SessionConfigError(s) => write!(f, "session config error: {s}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;
