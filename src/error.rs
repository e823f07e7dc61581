//! Error types for windows-dsc.
//!
//! The taxonomy separates the two failure modes operators most need to tell
//! apart: `Apply` ("the converging command failed") and `Verification`
//! ("the command reported success but the host disagrees"). Every variant
//! carries enough context (feature name, host, underlying message) to
//! diagnose without re-running the operation.

use crate::connection::ConnectionError;
use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for windows-dsc.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to open the remote execution channel (network or auth).
    #[error("Failed to connect to '{host}': {source}")]
    Connection {
        /// Target host
        host: String,
        /// Underlying transport error
        #[source]
        source: ConnectionError,
    },

    /// The named feature is unknown to the host. Distinct from "known but
    /// not installed": a feature that does not exist cannot be created by
    /// declaring it present.
    #[error("Feature '{feature}' is not known to host '{host}'")]
    FeatureNotFound {
        /// Feature name as queried
        feature: String,
        /// Host that was queried
        host: String,
    },

    /// The state query succeeded but its output could not be classified.
    #[error("Could not classify state of feature '{feature}' on '{host}': {message}")]
    Inspection {
        /// Feature name as queried
        feature: String,
        /// Host that was queried
        host: String,
        /// What was ambiguous, with the raw output attached
        message: String,
    },

    /// The converging command failed on the remote host.
    #[error("Applying configuration for '{feature}' on '{host}' failed with exit code {exit_code}: {message}")]
    Apply {
        /// Feature name being converged
        feature: String,
        /// Target host
        host: String,
        /// Remote exit code
        exit_code: i32,
        /// Captured remote output
        message: String,
    },

    /// The apply reported success but the re-inspected state does not match
    /// the desired state.
    #[error("Verification failed for '{feature}' on '{host}': apply succeeded but observed state is '{observed}' (expected '{expected}')")]
    Verification {
        /// Feature name being verified
        feature: String,
        /// Target host
        host: String,
        /// What inspection reported after the apply
        observed: String,
        /// What the desired state required
        expected: String,
    },

    /// A feature or sub-feature name contains characters that are
    /// significant to the remote interpreter.
    #[error("Invalid feature name '{0}': names may only contain alphanumerics, '.', '_' and '-'")]
    InvalidFeatureName(String),

    /// An external identity string could not be parsed or does not match
    /// the targeted host/feature.
    #[error("Invalid external identity '{identity}': {message}")]
    Identity {
        /// The offending identity string
        identity: String,
        /// Why it was rejected
        message: String,
    },
}

impl Error {
    /// Creates a connection error from a transport failure.
    pub fn connection(host: impl Into<String>, source: ConnectionError) -> Self {
        Self::Connection {
            host: host.into(),
            source,
        }
    }

    /// Creates a feature-not-found error.
    pub fn feature_not_found(feature: impl Into<String>, host: impl Into<String>) -> Self {
        Self::FeatureNotFound {
            feature: feature.into(),
            host: host.into(),
        }
    }

    /// Creates an inspection error.
    pub fn inspection(
        feature: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Inspection {
            feature: feature.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates an apply error.
    pub fn apply(
        feature: impl Into<String>,
        host: impl Into<String>,
        exit_code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::Apply {
            feature: feature.into(),
            host: host.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Creates a verification error.
    pub fn verification(
        feature: impl Into<String>,
        host: impl Into<String>,
        observed: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Verification {
            feature: feature.into(),
            host: host.into(),
            observed: observed.into(),
            expected: expected.into(),
        }
    }

    /// Creates an identity error.
    pub fn identity(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Identity {
            identity: identity.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error means the feature is absent from the
    /// host's catalog, which delete treats as already converged.
    pub fn is_feature_not_found(&self) -> bool {
        matches!(self, Error::FeatureNotFound { .. })
    }
}
