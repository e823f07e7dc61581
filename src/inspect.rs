//! State inspector: read-only queries of a host's actual feature state.
//!
//! The inspector issues a `Get-WindowsFeature` query over the channel and
//! classifies the response into exactly one of three outcomes: the feature
//! is unknown to the host, installed, or not installed. "Unknown to the
//! host" is a distinct error, never conflated with "not installed" - a
//! feature that does not exist in the catalog cannot be created by
//! declaring it present.
//!
//! Parsing is tolerant of whitespace and table decoration but strict about
//! the presence marker itself: zero markers, or conflicting ones, is an
//! inspection error carrying the raw output, not a guess.

use crate::compile::validate_feature_name;
use crate::connection::Channel;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// `Installed : True` / `Installed=False` style marker lines.
static INSTALLED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*Installed\s*[:=]?\s*(True|False)\s*$").expect("valid regex"));

/// Bare `True` / `False` tokens, for output that lost its labels.
static BARE_BOOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(True|False)\s*$").expect("valid regex"));

/// Markers Get-WindowsFeature emits when the feature name itself is
/// unknown to the host's catalog.
const NOT_FOUND_MARKERS: [&str; 2] = ["FeatureNotFound", "ArgumentNotValid"];

/// The observed state of a feature on a host.
///
/// Produced only by inspection; callers never construct it themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureState {
    /// Feature name as queried.
    pub name: String,
    /// Whether the feature is installed.
    pub installed: bool,
    /// Sub-features actually installed, when the host could enumerate
    /// them. `None` means the enumeration was unavailable, not empty.
    pub sub_features: Option<Vec<String>>,
}

impl FeatureState {
    /// State of a feature the host does not know about: by definition not
    /// installed, with nothing to enumerate. Crate-internal so that
    /// observed states otherwise only ever come from inspection.
    pub(crate) fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            installed: false,
            sub_features: Some(Vec::new()),
        }
    }
}

/// Classification of a state query response.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Classification {
    /// The feature name is unknown to the host.
    NotFound,
    /// The feature exists; the flag is its installed state.
    Installed(bool),
}

/// Issues read-only state queries and normalizes their output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inspector;

impl Inspector {
    /// Create a new inspector.
    pub fn new() -> Self {
        Self
    }

    /// The query command for a feature's installed state.
    pub fn query_command(feature: &str) -> String {
        format!(
            "powershell -NoProfile -NonInteractive -Command \
             \"Get-WindowsFeature -Name '{}' | Select-Object -Property Name,Installed | Format-List\"",
            feature
        )
    }

    /// The best-effort query for a feature's installed sub-features.
    pub fn sub_feature_command(feature: &str) -> String {
        format!(
            "powershell -NoProfile -NonInteractive -Command \
             \"Get-WindowsFeature -Name (Get-WindowsFeature -Name '{}').SubFeatures \
             | Where-Object Installed | Select-Object -ExpandProperty Name\"",
            feature
        )
    }

    /// Query the actual state of `feature` on the channel's host.
    pub async fn inspect(&self, channel: &dyn Channel, feature: &str) -> Result<FeatureState> {
        validate_feature_name(feature)?;
        let host = channel.host().to_string();

        let result = channel
            .run(&Self::query_command(feature))
            .await
            .map_err(|e| Error::connection(&host, e))?;

        let output = result.combined_output();
        let classification = classify(&output, result.success)
            .map_err(|message| Error::inspection(feature, &host, message))?;

        let installed = match classification {
            Classification::NotFound => {
                debug!(feature = %feature, host = %host, "Feature not known to host");
                return Err(Error::feature_not_found(feature, &host));
            }
            Classification::Installed(installed) => installed,
        };

        debug!(
            feature = %feature,
            host = %host,
            installed = %installed,
            "Inspected feature state"
        );

        // Sub-feature enumeration is best-effort: a failure here degrades
        // to "unknown", never to an inspection error.
        let sub_features = if installed {
            self.list_sub_features(channel, feature).await
        } else {
            Some(Vec::new())
        };

        Ok(FeatureState {
            name: feature.to_string(),
            installed,
            sub_features,
        })
    }

    async fn list_sub_features(
        &self,
        channel: &dyn Channel,
        feature: &str,
    ) -> Option<Vec<String>> {
        match channel.run(&Self::sub_feature_command(feature)).await {
            Ok(result) if result.success => Some(
                result
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            Ok(result) => {
                warn!(
                    feature = %feature,
                    exit_code = %result.exit_code,
                    "Sub-feature enumeration failed, continuing without it"
                );
                None
            }
            Err(e) => {
                warn!(feature = %feature, error = %e, "Sub-feature enumeration failed, continuing without it");
                None
            }
        }
    }
}

/// Classify raw query output into exactly one outcome.
///
/// Returns `Err(message)` when the output cannot be classified; the
/// message embeds the raw output so the operator can diagnose without
/// re-running the query.
fn classify(output: &str, success: bool) -> std::result::Result<Classification, String> {
    if NOT_FOUND_MARKERS.iter().any(|m| output.contains(m)) {
        return Ok(Classification::NotFound);
    }

    if !success {
        return Err(format!(
            "state query failed without a recognizable marker; output: {:?}",
            output.trim()
        ));
    }

    let markers: Vec<bool> = INSTALLED_MARKER
        .captures_iter(output)
        .map(|c| c[1].eq_ignore_ascii_case("true"))
        .collect();

    match markers.as_slice() {
        [single] => return Ok(Classification::Installed(*single)),
        [] => {}
        many => {
            if many.iter().all(|&m| m == many[0]) {
                return Ok(Classification::Installed(many[0]));
            }
            return Err(format!(
                "conflicting Installed markers in output: {:?}",
                output.trim()
            ));
        }
    }

    // Some shells drop the label column; accept a lone boolean token.
    let bare: Vec<bool> = BARE_BOOL
        .captures_iter(output)
        .map(|c| c[1].eq_ignore_ascii_case("true"))
        .collect();

    match bare.as_slice() {
        [single] => Ok(Classification::Installed(*single)),
        [] => Err(format!(
            "no Installed marker in output: {:?}",
            output.trim()
        )),
        _ => Err(format!(
            "ambiguous Installed markers in output: {:?}",
            output.trim()
        )),
    }
}
