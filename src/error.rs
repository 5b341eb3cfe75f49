//! Central error type for the core.
//!
//! Every mutating or validating operation in the crate returns `Result<T, CoreError>`.
//! Variants mirror the error kinds named in the governance contract; a transport
//! collaborator maps them to exit codes or HTTP statuses (documented per-variant
//! below) but that mapping is not implemented in this crate.

use std::fmt;
use std::path::PathBuf;

/// Errors produced by the core pipeline and governance engine.
#[derive(Debug)]
pub enum CoreError {
    /// A boundary rule was violated (forbidden metadata key, missing fingerprint).
    /// Transport: 400.
    ContractViolation(String),

    /// Required features are absent and no build was permitted.
    /// Transport: 400 (or 422 if a build was attempted and still came up short).
    MissingFeatures(Vec<(String, u32)>),

    /// The features manifest contradicts a fixed policy field.
    /// Transport: 422.
    ManifestMismatch(String),

    /// A build was requested but no Build Context was supplied.
    /// Transport: 400.
    BuildNotAllowed,

    /// An incremental rebuild would silently rewrite history.
    /// Transport: 409.
    IncrementalRejected(String),

    /// A write was attempted outside its declared scope.
    /// Transport: 500 (programmer error, never reachable from user input alone).
    ScopeViolation(PathBuf),

    /// A mutation was attempted against a frozen season.
    /// Transport: 403.
    FrozenViolation(String),

    /// The policy engine vetoed an action.
    /// Transport: 403.
    PolicyDenied { action: String, reason: String },

    /// A snapshot, dataset, or plan already exists under this identity.
    /// Transport: 409.
    Duplicate(String),

    /// Manifest verification failed against the directory it describes.
    /// Transport: 500.
    TamperDetected(String),

    /// The requested artifact does not exist.
    /// Transport: 404.
    NotFound(String),

    /// Underlying filesystem failure.
    Io(std::io::Error),

    /// Underlying (de)serialization failure.
    Json(serde_json::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContractViolation(reason) => write!(f, "contract violation: {reason}"),
            Self::MissingFeatures(missing) => {
                write!(f, "missing features: ")?;
                for (i, (name, tf)) in missing.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}@{tf}m")?;
                }
                Ok(())
            }
            Self::ManifestMismatch(field) => write!(f, "manifest mismatch on field: {field}"),
            Self::BuildNotAllowed => write!(f, "build requested without a build context"),
            Self::IncrementalRejected(day) => {
                write!(f, "incremental rebuild rejected: earliest changed day {day}")
            }
            Self::ScopeViolation(path) => write!(f, "write scope violation: {}", path.display()),
            Self::FrozenViolation(season) => write!(f, "season '{season}' is frozen"),
            Self::PolicyDenied { action, reason } => {
                write!(f, "policy denied action '{action}': {reason}")
            }
            Self::Duplicate(id) => write!(f, "already exists: {id}"),
            Self::TamperDetected(reason) => write!(f, "tamper detected: {reason}"),
            Self::NotFound(path) => write!(f, "not found: {path}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
