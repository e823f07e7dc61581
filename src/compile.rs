//! Configuration compiler: desired state to PowerShell DSC document.
//!
//! `compile` is a pure function. Identical [`DesiredState`] input always
//! yields a byte-identical [`ConfigurationPayload`], which the idempotence
//! and diffing guarantees of the reconciler rely on. The payload is a
//! complete, independently applicable DSC document; it references no
//! external state.
//!
//! Feature and sub-feature names are user input that ends up inside a
//! script interpreted by a remote shell. They are treated as data, not
//! code: every name must match a conservative identifier pattern, and
//! anything carrying interpreter-significant characters (quotes, `$`,
//! backticks, semicolons, ...) is rejected outright instead of escaped
//! through.

use crate::error::{Error, Result};
use crate::inspect::FeatureState;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Windows feature names: alphanumeric start, then alphanumerics, dots,
/// underscores and hyphens. Matches the catalog naming of
/// `Get-WindowsFeature` (e.g. `Web-Server`, `NET-Framework-45-Core`).
static FEATURE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

/// Target presence of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// The feature should be installed.
    Present,
    /// The feature should not be installed.
    Absent,
}

impl Ensure {
    /// The literal used in the DSC document.
    pub fn as_dsc(&self) -> &'static str {
        match self {
            Ensure::Present => "Present",
            Ensure::Absent => "Absent",
        }
    }

    /// Whether this presence corresponds to `installed == true`.
    pub fn wants_installed(&self) -> bool {
        matches!(self, Ensure::Present)
    }
}

impl fmt::Display for Ensure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_dsc())
    }
}

/// The configuration an operator wants a remote feature to have.
///
/// Immutable value record; the reconciler never mutates it. `name` is the
/// identity component: changing it means destroy-and-recreate of the
/// managed entity, not an in-place update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Feature name as known to the host's catalog.
    pub name: String,
    /// Target presence.
    pub ensure: Ensure,
    /// Install every sub-feature. When true, `sub_features` is ignored
    /// entirely (never merged).
    pub include_all_sub_features: bool,
    /// Explicit sub-features to install, in order. Only consulted when
    /// `include_all_sub_features` is false.
    pub sub_features: Vec<String>,
}

impl DesiredState {
    /// Desired state with no sub-feature declarations.
    pub fn new(name: impl Into<String>, ensure: Ensure) -> Self {
        Self {
            name: name.into(),
            ensure,
            include_all_sub_features: false,
            sub_features: Vec::new(),
        }
    }

    /// Request installation of all sub-features.
    pub fn with_all_sub_features(mut self) -> Self {
        self.include_all_sub_features = true;
        self
    }

    /// Declare an explicit sub-feature list.
    pub fn with_sub_features<I, S>(mut self, sub_features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_features = sub_features.into_iter().map(Into::into).collect();
        self
    }

    /// The sub-features that compilation will enumerate: the explicit list
    /// only when `include_all_sub_features` is false.
    pub fn effective_sub_features(&self) -> &[String] {
        if self.include_all_sub_features {
            &[]
        } else {
            self.sub_features.as_slice()
        }
    }

    /// Whether the observed state already satisfies this desired state.
    ///
    /// For an explicit sub-feature list the observed set must be known and
    /// contain every desired entry; an unknown observed set means we
    /// cannot prove convergence and the reconciler reapplies.
    pub fn is_satisfied_by(&self, observed: &FeatureState) -> bool {
        match self.ensure {
            Ensure::Absent => !observed.installed,
            Ensure::Present => {
                if !observed.installed {
                    return false;
                }
                let wanted = self.effective_sub_features();
                if wanted.is_empty() {
                    return true;
                }
                match &observed.sub_features {
                    Some(present) => wanted.iter().all(|w| present.iter().any(|p| p == w)),
                    None => false,
                }
            }
        }
    }

    /// Validate every identifier this state will interpolate into a
    /// remote script.
    pub fn validate(&self) -> Result<()> {
        validate_feature_name(&self.name)?;
        for sub in &self.sub_features {
            validate_feature_name(sub)?;
        }
        Ok(())
    }
}

/// Reject names the remote interpreter could treat as code.
pub fn validate_feature_name(name: &str) -> Result<()> {
    if FEATURE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidFeatureName(name.to_string()))
    }
}

/// A compiled, self-contained DSC document ready to run on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationPayload {
    script: String,
}

impl ConfigurationPayload {
    /// The DSC document itself.
    pub fn as_script(&self) -> &str {
        &self.script
    }

    /// The single command string that applies this document, suitable for
    /// [`Channel::run`].
    ///
    /// [`Channel::run`]: crate::connection::Channel::run
    pub fn to_command(&self) -> String {
        format!(
            "powershell -NoProfile -NonInteractive -Command \"{}\"",
            self.script.replace('"', "\\\"")
        )
    }
}

/// Compile a desired state into a DSC document.
///
/// Pure and deterministic: no I/O, and repeated calls with an unchanged
/// input produce a byte-identical payload.
pub fn compile(desired: &DesiredState) -> Result<ConfigurationPayload> {
    desired.validate()?;

    // Configuration block name follows the action, as the DSC scripts this
    // engine replaces did: ConfigureFeature on install, RemoveFeature on
    // removal.
    let config_name = match desired.ensure {
        Ensure::Present => "ConfigureFeature",
        Ensure::Absent => "RemoveFeature",
    };

    let mut script = String::new();
    script.push_str(&format!("Configuration {} {{\n", config_name));
    script.push_str("    Import-DscResource -ModuleName PSDesiredStateConfiguration\n");
    script.push_str("    Node \"localhost\" {\n");
    script.push_str(&format!("        WindowsFeature {} {{\n", desired.name));
    script.push_str(&format!("            Name = \"{}\"\n", desired.name));
    script.push_str(&format!(
        "            Ensure = \"{}\"\n",
        desired.ensure.as_dsc()
    ));

    if desired.ensure == Ensure::Present {
        script.push_str(&format!(
            "            IncludeAllSubFeature = {}\n",
            if desired.include_all_sub_features {
                "$true"
            } else {
                "$false"
            }
        ));

        let subs = desired.effective_sub_features();
        if !subs.is_empty() {
            let list = subs
                .iter()
                .map(|s| format!("\"{}\"", s))
                .collect::<Vec<_>>()
                .join(", ");
            script.push_str(&format!("            SubFeatures = @({})\n", list));
        }
    }

    script.push_str("        }\n");
    script.push_str("    }\n");
    script.push_str("}\n");
    script.push_str(&format!("{}\n", config_name));
    script.push_str(&format!(
        "Start-DscConfiguration -Path .\\{} -Wait -Verbose -Force",
        config_name
    ));

    Ok(ConfigurationPayload { script })
}
