//! Typed failures that callers need to tell apart.
//!
//! Most of the crate propagates [`anyhow::Error`]; the two enums here exist for
//! the cases where the CLI (or a test) has to branch on *what kind* of failure
//! happened rather than just print it:
//! - [`ConfigError`]: the build config is unusable; detected before any
//!   repository or registry query runs.
//! - [`DigestError`]: a registry lookup failed, split into "not there" and
//!   "could not find out".

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("'{0}' must be set")]
    MustBeSet(String),

    #[error("'{field}: {value:?}' is not valid, should be '{field}: {expected:?}'")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("at least '.spec.dir' or '.spec.variants' must be set")]
    NoDirOrVariants,

    #[error("absolute path in '{field}: {path:?}' is prohibited")]
    AbsoluteDockerfilePath { field: String, path: String },

    #[error("'{field}: {path:?}' points outside of the context directory - you can try '{body_field}' instead")]
    DockerfileOutsideContext {
        field: String,
        path: String,
        body_field: String,
    },

    #[error("unsupported '{field}: {value:?}' - must be \"file\"")]
    UnsupportedSecretType { field: String, value: String },

    #[error("unknown '.spec.tagMode' ({0:?})")]
    UnknownTagMode(String),

    #[error("label '{field}: {key:?}' uses reserved prefix {prefix:?}")]
    ReservedLabel {
        field: String,
        key: String,
        prefix: String,
    },

    #[error("variant name '{field}: {name:?}' is reserved")]
    ReservedVariantName { field: String, name: String },

    #[error("duplicate variant name '{field}: {name:?}'")]
    DuplicateVariant { field: String, name: String },

    #[error("--export and --push are mutually exclusive and cannot be set at the same time")]
    ExportWithPush,
}

#[derive(Debug, Error)]
pub enum DigestError {
    /// The registry answered and the reference does not exist.
    #[error("image {reference:?} not found in registry")]
    NotFound { reference: String },

    /// Auth, network, or parse failure: presence is unknown.
    #[error("unable to look up digest for {reference:?}: {reason}")]
    Unavailable { reference: String, reason: String },
}

impl DigestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DigestError::NotFound { .. })
    }

    pub fn reference(&self) -> &str {
        match self {
            DigestError::NotFound { reference } | DigestError::Unavailable { reference, .. } => {
                reference
            }
        }
    }
}
