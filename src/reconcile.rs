//! The reconciliation state machine.
//!
//! One operation walks `Start -> Connecting -> Inspecting ->
//! {NoActionNeeded | Converging} -> Verifying -> {Succeeded | Failed}`:
//! open a channel, observe actual state, decide whether to converge,
//! apply the compiled configuration, then re-inspect to verify. The apply
//! command reporting success is never trusted on its own; verification is
//! what distinguishes "command failed" from "command lied".
//!
//! The reconciler exclusively owns the channel for the duration of one
//! operation. A fresh channel is opened per operation and closed on every
//! exit path. Nothing is shared across concurrent operations; callers that
//! run operations against the same feature+host concurrently must
//! serialize them themselves.

use crate::compile::{compile, DesiredState};
use crate::connection::{Channel, ChannelFactory, ConnectionConfig};
use crate::error::{Error, Result};
use crate::inspect::{FeatureState, Inspector};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Phases of one reconciliation operation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Connecting,
    Inspecting,
    NoActionNeeded,
    Converging,
    Verifying,
    Succeeded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Start => "start",
            Phase::Connecting => "connecting",
            Phase::Inspecting => "inspecting",
            Phase::NoActionNeeded => "no_action_needed",
            Phase::Converging => "converging",
            Phase::Verifying => "verifying",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A message emitted during reconciliation, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the message is.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Info-level diagnostic.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    /// Warning-level diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// The outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// The verified final state.
    pub state: FeatureState,
    /// Whether a converging apply was issued.
    pub changed: bool,
    /// Diagnostics in emission order.
    pub diagnostics: Vec<Diagnostic>,
}

/// Orchestrates inspector, compiler and channel into one idempotent
/// reconciliation operation.
pub struct Reconciler<F: ChannelFactory> {
    factory: F,
    inspector: Inspector,
}

impl<F: ChannelFactory> Reconciler<F> {
    /// Create a reconciler that opens channels through `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            inspector: Inspector::new(),
        }
    }

    /// The channel factory this reconciler opens channels through.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Converge the feature on the configured host toward `desired`.
    ///
    /// Runs the full state machine. Idempotent: a second run with the same
    /// desired state and no external drift short-circuits to
    /// `NoActionNeeded` and issues no apply.
    pub async fn reconcile(
        &self,
        conn: &ConnectionConfig,
        desired: &DesiredState,
    ) -> Result<ReconciliationResult> {
        desired.validate()?;

        trace!(
            feature = %desired.name,
            host = %conn.host,
            phase = %Phase::Connecting,
            "Opening channel"
        );
        let channel = self
            .factory
            .open(conn)
            .await
            .map_err(|e| Error::connection(&conn.host, e))?;

        // The channel is closed on every exit path; a close failure is
        // logged but never masks the operation's own outcome.
        let result = self.run_phases(channel.as_ref(), desired).await;

        if let Err(e) = channel.close().await {
            warn!(host = %conn.host, error = %e, "Failed to close channel cleanly");
        }

        match &result {
            Ok(outcome) => trace!(
                feature = %desired.name,
                host = %conn.host,
                phase = %Phase::Succeeded,
                changed = %outcome.changed,
                "Reconciliation finished"
            ),
            Err(e) => debug!(
                feature = %desired.name,
                host = %conn.host,
                phase = %Phase::Failed,
                error = %e,
                "Reconciliation failed"
            ),
        }

        result
    }

    /// Read-only observation of a feature's current state.
    pub async fn observe(
        &self,
        conn: &ConnectionConfig,
        feature: &str,
    ) -> Result<FeatureState> {
        let channel = self
            .factory
            .open(conn)
            .await
            .map_err(|e| Error::connection(&conn.host, e))?;

        let result = self.inspector.inspect(channel.as_ref(), feature).await;

        if let Err(e) = channel.close().await {
            warn!(host = %conn.host, error = %e, "Failed to close channel cleanly");
        }

        if let Ok(state) = &result {
            info!(
                feature = %feature,
                host = %conn.host,
                installed = %state.installed,
                "Observed feature state"
            );
        }

        result
    }

    async fn run_phases(
        &self,
        channel: &dyn Channel,
        desired: &DesiredState,
    ) -> Result<ReconciliationResult> {
        let host = channel.host().to_string();
        let mut diagnostics = Vec::new();

        trace!(feature = %desired.name, host = %host, phase = %Phase::Inspecting, "Querying actual state");
        let observed = match self.inspector.inspect(channel, &desired.name).await {
            Ok(state) => state,
            // A feature the host has never heard of cannot be installed.
            // On the absent path that means there is nothing to remove:
            // delete is idempotent. On the present path it is fatal.
            Err(e) if e.is_feature_not_found() && !desired.ensure.wants_installed() => {
                diagnostics.push(Diagnostic::info(format!(
                    "feature '{}' is not known to host '{}'; treating absence as already converged",
                    desired.name, host
                )));
                return Ok(ReconciliationResult {
                    state: FeatureState::absent(&desired.name),
                    changed: false,
                    diagnostics,
                });
            }
            Err(e) => return Err(e),
        };

        if desired.is_satisfied_by(&observed) {
            trace!(
                feature = %desired.name,
                host = %host,
                phase = %Phase::NoActionNeeded,
                "Observed state already matches desired state"
            );
            diagnostics.push(Diagnostic::info(format!(
                "feature '{}' already in desired state '{}'",
                desired.name, desired.ensure
            )));
            return Ok(ReconciliationResult {
                state: observed,
                changed: false,
                diagnostics,
            });
        }

        trace!(feature = %desired.name, host = %host, phase = %Phase::Converging, "Applying configuration");
        let payload = compile(desired)?;
        let apply = channel
            .run(&payload.to_command())
            .await
            .map_err(|e| Error::connection(&host, e))?;

        if !apply.success {
            return Err(Error::apply(
                &desired.name,
                &host,
                apply.exit_code,
                apply.combined_output(),
            ));
        }

        trace!(feature = %desired.name, host = %host, phase = %Phase::Verifying, "Re-inspecting after apply");
        let verified = match self.inspector.inspect(channel, &desired.name).await {
            Ok(state) => state,
            Err(e) if e.is_feature_not_found() && !desired.ensure.wants_installed() => {
                FeatureState::absent(&desired.name)
            }
            Err(e) => return Err(e),
        };

        if verified.installed != desired.ensure.wants_installed() {
            return Err(Error::verification(
                &desired.name,
                &host,
                installed_label(verified.installed),
                installed_label(desired.ensure.wants_installed()),
            ));
        }

        if !desired.is_satisfied_by(&verified) {
            // Installed flag converged but the sub-feature set could not
            // be confirmed. Surfaced, not fatal.
            diagnostics.push(Diagnostic::warning(format!(
                "feature '{}' converged but its sub-feature set could not be confirmed",
                desired.name
            )));
        }

        info!(
            feature = %desired.name,
            host = %host,
            ensure = %desired.ensure,
            "Feature converged to desired state"
        );
        diagnostics.push(Diagnostic::info(format!(
            "feature '{}' converged to '{}'",
            desired.name, desired.ensure
        )));

        Ok(ReconciliationResult {
            state: verified,
            changed: true,
            diagnostics,
        })
    }
}

fn installed_label(installed: bool) -> &'static str {
    if installed {
        "installed"
    } else {
        "not installed"
    }
}
