//! Resource lifecycle adapter.
//!
//! Maps the four lifecycle verbs (create, read, update, delete) onto
//! reconciler operations and an external identity string. This is the
//! surface an external lifecycle driver talks to; it holds no state of its
//! own beyond the reconciler it wraps.
//!
//! The identity scheme is `featureName@host`, derived deterministically
//! and applied uniformly. An identity is only produced when the
//! corresponding operation succeeds, and rename of the identity-defining
//! feature name is modeled as delete-old-then-create-new, never an
//! in-place rename.

use crate::compile::{validate_feature_name, DesiredState, Ensure};
use crate::connection::{ChannelFactory, ConnectionConfig};
use crate::error::{Error, Result};
use crate::inspect::FeatureState;
use crate::reconcile::{Diagnostic, ReconciliationResult, Reconciler};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// The caller-facing key for a managed feature: `featureName@host`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalIdentity {
    feature: String,
    host: String,
}

impl ExternalIdentity {
    /// Derive the identity for a feature on a host.
    pub fn derive(feature: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            host: host.into(),
        }
    }

    /// Parse an identity previously produced by [`ExternalIdentity::derive`].
    ///
    /// Rejects strings without the `@` separator so ids from other schemes
    /// fail loudly instead of silently aliasing a feature name.
    pub fn parse(s: &str) -> Result<Self> {
        let (feature, host) = s
            .split_once('@')
            .ok_or_else(|| Error::identity(s, "expected 'featureName@host'"))?;
        if feature.is_empty() || host.is_empty() {
            return Err(Error::identity(s, "feature name and host must be non-empty"));
        }
        validate_feature_name(feature)
            .map_err(|_| Error::identity(s, "feature name component is not a valid name"))?;
        Ok(Self {
            feature: feature.to_string(),
            host: host.to_string(),
        })
    }

    /// The feature name component.
    pub fn feature_name(&self) -> &str {
        &self.feature
    }

    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.feature, self.host)
    }
}

impl From<ExternalIdentity> for String {
    fn from(id: ExternalIdentity) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ExternalIdentity {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// Lifecycle adapter for a managed Windows feature.
pub struct WindowsFeatureResource<F: ChannelFactory> {
    reconciler: Reconciler<F>,
}

impl<F: ChannelFactory> WindowsFeatureResource<F> {
    /// Create an adapter that opens channels through `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            reconciler: Reconciler::new(factory),
        }
    }

    /// The channel factory the underlying reconciler uses.
    pub fn factory(&self) -> &F {
        self.reconciler.factory()
    }

    /// Create the feature: converge to `Present` and bind its identity.
    ///
    /// Fails with `FeatureNotFound` when the host's catalog does not know
    /// the feature. The identity is returned only when the operation's
    /// terminal state is success.
    pub async fn create(
        &self,
        conn: &ConnectionConfig,
        desired: &DesiredState,
    ) -> Result<(ExternalIdentity, ReconciliationResult)> {
        // Presence is implicit in create, whatever the record says.
        let desired = DesiredState {
            ensure: Ensure::Present,
            ..desired.clone()
        };

        debug!(feature = %desired.name, host = %conn.host, "Creating feature");
        let result = self.reconciler.reconcile(conn, &desired).await?;
        let identity = ExternalIdentity::derive(&desired.name, &conn.host);

        info!(identity = %identity, "Feature created");
        Ok((identity, result))
    }

    /// Observe the current state of a previously created feature.
    ///
    /// Returns `None` when the identity no longer resolves on the host
    /// (the feature vanished from the catalog), letting the lifecycle
    /// driver clear its binding instead of erroring.
    pub async fn read(
        &self,
        conn: &ConnectionConfig,
        identity: &ExternalIdentity,
    ) -> Result<Option<FeatureState>> {
        self.check_host(conn, identity)?;

        match self.reconciler.observe(conn, identity.feature_name()).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_feature_not_found() => {
                info!(identity = %identity, "Feature no longer known to host");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-converge an existing feature toward `desired`.
    ///
    /// A changed feature name is an identity change: the old feature is
    /// removed and the new one created, and the new identity is returned.
    /// Same-name updates re-run the converging path under the existing
    /// identity.
    pub async fn update(
        &self,
        conn: &ConnectionConfig,
        identity: &ExternalIdentity,
        desired: &DesiredState,
    ) -> Result<(ExternalIdentity, ReconciliationResult)> {
        self.check_host(conn, identity)?;

        if desired.name != identity.feature_name() {
            info!(
                old = %identity.feature_name(),
                new = %desired.name,
                host = %conn.host,
                "Feature name changed, replacing"
            );
            let removal = self.delete(conn, identity).await?;
            let (new_identity, mut result) = self.create(conn, desired).await?;
            let mut diagnostics = vec![Diagnostic::info(format!(
                "feature '{}' replaced by '{}' (identity change)",
                identity.feature_name(),
                desired.name
            ))];
            diagnostics.extend(removal.diagnostics);
            diagnostics.append(&mut result.diagnostics);
            result.diagnostics = diagnostics;
            return Ok((new_identity, result));
        }

        self.create(conn, desired).await
    }

    /// Remove the feature: converge to `Absent`.
    ///
    /// Idempotent: a feature that is already absent, or not known to the
    /// host at all, is treated as already converged.
    pub async fn delete(
        &self,
        conn: &ConnectionConfig,
        identity: &ExternalIdentity,
    ) -> Result<ReconciliationResult> {
        self.check_host(conn, identity)?;

        debug!(identity = %identity, "Deleting feature");
        let desired = DesiredState::new(identity.feature_name(), Ensure::Absent);
        let result = self.reconciler.reconcile(conn, &desired).await?;

        info!(identity = %identity, changed = %result.changed, "Feature deleted");
        Ok(result)
    }

    /// An identity bound to one host must not be driven through a
    /// connection to another.
    fn check_host(&self, conn: &ConnectionConfig, identity: &ExternalIdentity) -> Result<()> {
        if identity.host() != conn.host {
            return Err(Error::identity(
                identity.to_string(),
                format!(
                    "identity is bound to host '{}' but the connection targets '{}'",
                    identity.host(),
                    conn.host
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_round_trips() {
        let id = ExternalIdentity::derive("Web-Server", "winsrv01");
        assert_eq!(id.to_string(), "Web-Server@winsrv01");
        let parsed = ExternalIdentity::parse("Web-Server@winsrv01").unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.feature_name(), "Web-Server");
        assert_eq!(parsed.host(), "winsrv01");
    }

    #[test]
    fn identity_without_separator_rejected() {
        let err = ExternalIdentity::parse("Web-Server").unwrap_err();
        assert!(matches!(err, Error::Identity { .. }));
    }

    #[test]
    fn identity_with_empty_components_rejected() {
        assert!(ExternalIdentity::parse("@winsrv01").is_err());
        assert!(ExternalIdentity::parse("Web-Server@").is_err());
    }

    #[test]
    fn identity_with_invalid_feature_name_rejected() {
        assert!(ExternalIdentity::parse("Web Server@winsrv01").is_err());
    }
}
